//! Process-wide bounded pool shared by open calls and stream creations.

use std::sync::{Arc, OnceLock};

use tokio::sync::Semaphore;

static FETCH_POOL: OnceLock<Arc<Semaphore>> = OnceLock::new();

/// Permit pool bounding total open/creation concurrency across every pipeline
/// instance in the process. Initialized once; sized by the first caller.
pub(crate) fn fetch_pool(size: usize) -> Arc<Semaphore> {
    Arc::clone(FETCH_POOL.get_or_init(|| Arc::new(Semaphore::new(size.max(1)))))
}

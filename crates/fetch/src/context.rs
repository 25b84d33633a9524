//! Task-lifecycle seam supplied by the consuming engine.

/// Task-context contract: completion hooks plus read-side metric sinks.
///
/// One instance is scoped to the consuming task. Completion callbacks must run
/// exactly once, on any task outcome (success, failure, cancellation); the
/// pipeline relies on this to release remote streams.
pub trait TaskContext: Send + Sync {
    /// Register a callback to run when the task terminates.
    fn on_completion(&self, callback: Box<dyn FnOnce() + Send>);
    /// Account bytes delivered to the consumer.
    fn add_bytes_read(&self, n: u64);
    /// Account time the consumer spent waiting on stream setup.
    fn add_read_time_millis(&self, n: u64);
    /// Account partition streams delivered to the consumer.
    fn add_blocks_fetched(&self, n: u64);
}

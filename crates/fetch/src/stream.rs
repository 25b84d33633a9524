//! Per-partition byte streams delivered to the consuming task.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use rsf_common::{Result, RsfError, global_metrics};

use crate::context::TaskContext;

/// Chunked payload source produced by the transport layer.
pub type ChunkStream = futures::stream::BoxStream<'static, Result<Bytes>>;

/// Payload codec a stream assumes was applied by the serving worker.
///
/// Writers in this protocol ship raw payloads, so streams are forced to
/// [`CompressionCodec::None`] after open; anything else at read time is an
/// error rather than a silent misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCodec {
    None,
    Lz4,
    Zstd,
}

impl fmt::Display for CompressionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionCodec::None => write!(f, "none"),
            CompressionCodec::Lz4 => write!(f, "lz4"),
            CompressionCodec::Zstd => write!(f, "zstd"),
        }
    }
}

#[derive(Debug, Default)]
struct StreamState {
    closed: AtomicBool,
}

/// Idempotent close handle shared between a stream and the cleanup ledger.
#[derive(Debug, Clone)]
pub struct StreamCloser {
    state: Arc<StreamState>,
}

impl StreamCloser {
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

struct StreamMetrics {
    task: Arc<dyn TaskContext>,
    shuffle_key: String,
}

/// One partition's byte stream, consumed forward-only by the external decoder.
pub struct PartitionStream {
    partition_id: u32,
    codec: CompressionCodec,
    chunks: Option<ChunkStream>,
    state: Arc<StreamState>,
    metrics: Option<StreamMetrics>,
    bytes_read: u64,
    drained: bool,
}

impl PartitionStream {
    /// Stream backed by transport chunks. Arrives assuming the worker-side
    /// default codec until the pipeline adjusts it after open.
    pub fn from_chunks(partition_id: u32, chunks: ChunkStream) -> Self {
        Self {
            partition_id,
            codec: CompressionCodec::Lz4,
            chunks: Some(chunks),
            state: Arc::new(StreamState::default()),
            metrics: None,
            bytes_read: 0,
            drained: false,
        }
    }

    /// Explicit empty stream for partitions with nothing to read.
    pub fn empty(partition_id: u32) -> Self {
        Self {
            partition_id,
            codec: CompressionCodec::None,
            chunks: None,
            state: Arc::new(StreamState::default()),
            metrics: None,
            bytes_read: 0,
            drained: true,
        }
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    pub fn codec(&self) -> CompressionCodec {
        self.codec
    }

    pub fn set_codec(&mut self, codec: CompressionCodec) {
        self.codec = codec;
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn closer(&self) -> StreamCloser {
        StreamCloser {
            state: Arc::clone(&self.state),
        }
    }

    pub(crate) fn attach_metrics(&mut self, task: Arc<dyn TaskContext>, shuffle_key: String) {
        self.metrics = Some(StreamMetrics { task, shuffle_key });
    }

    /// Next payload chunk, or `None` once the stream is drained.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        if self.state.closed.load(Ordering::Acquire) {
            return Some(Err(RsfError::Internal(format!(
                "partition {} stream read after close",
                self.partition_id
            ))));
        }
        if self.codec != CompressionCodec::None {
            return Some(Err(RsfError::Internal(format!(
                "partition {} stream assumes {} payloads; fetch path serves raw data only",
                self.partition_id, self.codec
            ))));
        }
        let chunks = self.chunks.as_mut()?;
        match chunks.next().await {
            Some(Ok(chunk)) => {
                self.bytes_read += chunk.len() as u64;
                if let Some(metrics) = &self.metrics {
                    metrics.task.add_bytes_read(chunk.len() as u64);
                }
                Some(Ok(chunk))
            }
            Some(Err(e)) => Some(Err(e)),
            None => {
                if !self.drained {
                    self.drained = true;
                    if let Some(metrics) = &self.metrics {
                        global_metrics().add_fetch_bytes(&metrics.shuffle_key, self.bytes_read);
                    }
                }
                None
            }
        }
    }
}

impl fmt::Debug for PartitionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionStream")
            .field("partition_id", &self.partition_id)
            .field("codec", &self.codec)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

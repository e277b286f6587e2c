//! Time-series sinks
//!
//! A [`Sink`] hands out one [`SinkWriter`] per file. Writes are buffered in
//! the writer; nothing is durable until [`SinkWriter::flush`] returns a
//! [`FlushAck`]. A failed flush is inconclusive.

mod influx;
mod memory;
mod stdout;

use async_trait::async_trait;
use gas2influx_config::{SinkBackend, SinkConfig};
use gas2influx_core::NormalizedBatch;
use std::sync::Arc;

use crate::error::Result;

pub use influx::InfluxSink;
pub use memory::{MemorySink, RecordedFlush};
pub use stdout::StdoutSink;

/// Acknowledgement that a batch was accepted into the writer's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Points (rows) buffered by this write.
    pub points: usize,
}

/// Confirmation that buffered points reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushAck {
    pub points: usize,
    /// Requests issued to the backing store; zero for an empty flush.
    pub requests: usize,
}

pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a fresh write session for one file.
    fn open(&self) -> Box<dyn SinkWriter>;
}

#[async_trait]
pub trait SinkWriter: Send {
    async fn write(
        &mut self,
        batch: &NormalizedBatch,
        measurement: &str,
        tag_columns: &[String],
    ) -> Result<WriteReceipt>;

    /// Push every buffered point. Flushing an empty buffer is a no-op ack.
    async fn flush(&mut self) -> Result<FlushAck>;
}

/// Build the sink selected by `sink.backend`.
pub fn build_sink(config: &SinkConfig) -> Result<Arc<dyn Sink>> {
    match config.backend {
        SinkBackend::Influxdb => Ok(Arc::new(InfluxSink::new(config)?)),
        SinkBackend::Stdout => Ok(Arc::new(StdoutSink::new())),
    }
}

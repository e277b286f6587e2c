//! Output side of the pipeline
//!
//! - [`ArtifactStore`]: the Parquet hand-off between transform and write
//! - [`Sink`]: durable writes into the time-series store

mod artifact;
mod error;
pub mod line_protocol;
mod sink;

pub use artifact::ArtifactStore;
pub use error::{ArtifactError, Result, SinkError};
pub use line_protocol::{render_lines, SeriesLayout};
pub use sink::{
    build_sink, FlushAck, InfluxSink, MemorySink, RecordedFlush, Sink, SinkWriter, StdoutSink,
    WriteReceipt,
};

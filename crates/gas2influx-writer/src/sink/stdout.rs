use async_trait::async_trait;
use gas2influx_core::NormalizedBatch;
use std::io::Write;

use super::{FlushAck, Sink, SinkWriter, WriteReceipt};
use crate::error::{Result, SinkError};
use crate::line_protocol::render_lines;

/// Dry-run sink: prints line protocol instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn open(&self) -> Box<dyn SinkWriter> {
        Box::new(StdoutWriter::default())
    }
}

#[derive(Default)]
struct StdoutWriter {
    pending: Vec<String>,
}

#[async_trait]
impl SinkWriter for StdoutWriter {
    async fn write(
        &mut self,
        batch: &NormalizedBatch,
        measurement: &str,
        tag_columns: &[String],
    ) -> Result<WriteReceipt> {
        let lines = render_lines(batch, measurement, tag_columns)?;
        let points = lines.len();
        self.pending.extend(lines);
        Ok(WriteReceipt { points })
    }

    async fn flush(&mut self) -> Result<FlushAck> {
        if self.pending.is_empty() {
            return Ok(FlushAck::default());
        }

        // Lock once so lines from concurrent files do not interleave
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for line in &self.pending {
            writeln!(out, "{line}").map_err(|e| SinkError::unavailable("stdout", e))?;
        }
        out.flush().map_err(|e| SinkError::unavailable("stdout", e))?;

        let ack = FlushAck {
            points: self.pending.len(),
            requests: 1,
        };
        self.pending.clear();
        Ok(ack)
    }
}

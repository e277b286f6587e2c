use async_trait::async_trait;
use gas2influx_core::NormalizedBatch;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{FlushAck, Sink, SinkWriter, WriteReceipt};
use crate::error::{Result, SinkError};
use crate::line_protocol::render_lines;

/// One confirmed flush: the source file and the lines it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFlush {
    pub identifier: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    flushes: Vec<RecordedFlush>,
    write_calls: usize,
    fail_writes: bool,
    fail_flushes: bool,
}

/// In-process sink recording every confirmed flush. Failures can be injected.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<State>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn fail_flushes(&self, fail: bool) {
        self.state.lock().fail_flushes = fail;
    }

    /// Confirmed flushes in completion order. Empty flushes are not recorded.
    pub fn flushes(&self) -> Vec<RecordedFlush> {
        self.state.lock().flushes.clone()
    }

    pub fn flushes_for(&self, identifier: &str) -> usize {
        self.state
            .lock()
            .flushes
            .iter()
            .filter(|flush| flush.identifier == identifier)
            .count()
    }

    pub fn write_calls(&self) -> usize {
        self.state.lock().write_calls
    }

    pub fn lines(&self) -> Vec<String> {
        self.state
            .lock()
            .flushes
            .iter()
            .flat_map(|flush| flush.lines.iter().cloned())
            .collect()
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self) -> Box<dyn SinkWriter> {
        Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            identifier: None,
            pending: Vec::new(),
        })
    }
}

struct MemoryWriter {
    state: Arc<Mutex<State>>,
    identifier: Option<String>,
    pending: Vec<String>,
}

#[async_trait]
impl SinkWriter for MemoryWriter {
    async fn write(
        &mut self,
        batch: &NormalizedBatch,
        measurement: &str,
        tag_columns: &[String],
    ) -> Result<WriteReceipt> {
        {
            let mut state = self.state.lock();
            state.write_calls += 1;
            if state.fail_writes {
                return Err(SinkError::unavailable("memory", "injected write failure"));
            }
        }

        let lines = render_lines(batch, measurement, tag_columns)?;
        let points = lines.len();
        self.identifier = Some(batch.record.identifier.clone());
        self.pending.extend(lines);
        Ok(WriteReceipt { points })
    }

    async fn flush(&mut self) -> Result<FlushAck> {
        let mut state = self.state.lock();
        if state.fail_flushes {
            return Err(SinkError::unavailable("memory", "injected flush failure"));
        }
        if self.pending.is_empty() {
            return Ok(FlushAck::default());
        }

        let lines = std::mem::take(&mut self.pending);
        let ack = FlushAck {
            points: lines.len(),
            requests: 1,
        };
        state.flushes.push(RecordedFlush {
            identifier: self.identifier.clone().unwrap_or_default(),
            lines,
        });
        Ok(ack)
    }
}

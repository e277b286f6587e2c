// Pipeline controller
//
// Drives each discovered file through the state machine in `state.rs`:
// admission check, transform, artifact hand-off, sink write and flush.
// Files run concurrently up to `max_concurrency`; cancellation is observed
// only before a file starts.

use anyhow::bail;
use gas2influx_config::{Delivery, RuntimeConfig};
use gas2influx_core::parquet::ArtifactOptions;
use gas2influx_core::{
    transform_file, NormalizedBatch, TransformOptions, TransformOutput, MEASUREMENT_COLUMNS,
    TEMPERATURE_COLUMN,
};
use gas2influx_ledger::{Admission, Ledger, LedgerError};
use gas2influx_writer::{ArtifactStore, FlushAck, Sink, SinkError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::discovery::DiscoveredFile;
use crate::error::IngestError;
use crate::state::{FileRun, Step};
use crate::summary::{FileOutcome, RunSummary};

/// Everything the controller needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub delivery: Delivery,
    pub max_concurrency: usize,
    pub transform: TransformOptions,
    pub artifact: ArtifactOptions,
    pub measurement: String,
    pub tag_columns: Vec<String>,
    pub ledger_timeout: Duration,
    pub transform_timeout: Duration,
    pub sink_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            delivery: Delivery::AtMostOnce,
            max_concurrency: 4,
            transform: TransformOptions::default(),
            artifact: ArtifactOptions::default(),
            measurement: "gas".to_string(),
            tag_columns: vec![TEMPERATURE_COLUMN.to_string()],
            ledger_timeout: Duration::from_secs(10),
            transform_timeout: Duration::from_secs(120),
            sink_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &RuntimeConfig) -> anyhow::Result<Self> {
        for tag in &config.sink.tag_columns {
            if !MEASUREMENT_COLUMNS.contains(&tag.as_str()) {
                bail!(
                    "sink.tag_columns entry '{}' is not a measurement column\n\n\
                    How to fix:\n  \
                      • Use one of: {}\n",
                    tag,
                    MEASUREMENT_COLUMNS.join(", ")
                );
            }
        }

        Ok(Self {
            delivery: config.pipeline.delivery,
            max_concurrency: config.pipeline.max_concurrency,
            transform: crate::transform_options(config),
            artifact: ArtifactOptions {
                chunk_rows: config.transform.chunk_rows,
                row_group_size: config.artifacts.row_group_size,
            },
            measurement: config.sink.measurement.clone(),
            tag_columns: config.sink.tag_columns.clone(),
            ledger_timeout: config.ledger.timeout(),
            transform_timeout: config.transform.timeout(),
            sink_timeout: config.sink.timeout(),
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    rows_written: usize,
    malformed_rows: u64,
}

/// One lock per artifact stem. `20160930.csv` and `20160930.CSV` share
/// `20160930.parquet`, so their write stages must not overlap.
type StemLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

#[derive(Clone)]
pub struct Pipeline {
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn Sink>,
    artifacts: ArtifactStore,
    settings: Arc<PipelineSettings>,
    stem_locks: StemLocks,
}

impl Pipeline {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn Sink>,
        artifacts: ArtifactStore,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            ledger,
            sink,
            artifacts,
            settings: Arc::new(settings),
            stem_locks: StemLocks::default(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process a snapshot of files. Never fails as a whole; per-file errors
    /// land in the summary.
    pub async fn run(&self, files: Vec<DiscoveredFile>, cancel: CancellationToken) -> RunSummary {
        info!(
            files = files.len(),
            delivery = %self.settings.delivery,
            max_concurrency = self.settings.max_concurrency,
            sink = self.sink.name(),
            "Starting run"
        );

        let identifiers: Vec<String> = files.iter().map(|f| f.identifier.clone()).collect();
        let mut outcomes: Vec<Option<FileOutcome>> = vec![None; files.len()];
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, file) in files.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                outcomes[idx] = Some(cancel_unstarted(&file.identifier));
                continue;
            };

            let pipeline = self.clone();
            tasks.spawn(async move {
                let outcome = pipeline.process_file(file).await;
                drop(permit);
                (idx, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => error!(error = %e, "File task aborted"),
            }
        }

        let outcomes = outcomes
            .into_iter()
            .zip(identifiers)
            .map(|(outcome, identifier)| {
                outcome.unwrap_or_else(|| {
                    let err = IngestError::Internal("file task aborted".to_string());
                    FileOutcome::failed(identifier, &err)
                })
            })
            .collect();

        RunSummary::from_outcomes(outcomes)
    }

    /// Like [`Pipeline::run`], but stops starting new files once `limit` has
    /// elapsed. Files already in flight still finish.
    pub async fn run_with_deadline(
        &self,
        files: Vec<DiscoveredFile>,
        cancel: CancellationToken,
        limit: Option<Duration>,
    ) -> RunSummary {
        let deadline = limit.map(|limit| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(?limit, "Run deadline reached; no further files will start");
                token.cancel();
            })
        });

        let summary = self.run(files, cancel).await;
        if let Some(timer) = deadline {
            timer.abort();
        }
        summary
    }

    /// Run one file to a terminal state.
    pub async fn process_file(&self, file: DiscoveredFile) -> FileOutcome {
        let span = info_span!("ingest_file", file = %file.identifier);
        async move {
            let mut run = FileRun::new(&file.identifier);
            match self.drive(&mut run, &file).await {
                Ok(progress) => {
                    info!(
                        state = %run.state(),
                        rows = progress.rows_written,
                        malformed_rows = progress.malformed_rows,
                        "File finished"
                    );
                    FileOutcome {
                        rows_written: progress.rows_written,
                        malformed_rows: progress.malformed_rows,
                        ..FileOutcome::new(&file.identifier, run.state())
                    }
                }
                Err(e) => {
                    let at = run.state();
                    run.fail();
                    error!(code = e.code().as_str(), stage = %at, error = %e, "File failed");
                    FileOutcome::failed(&file.identifier, &e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        run: &mut FileRun,
        file: &DiscoveredFile,
    ) -> Result<Progress, IngestError> {
        run.apply(Step::Check)?;
        let admission = match self.settings.delivery {
            Delivery::AtMostOnce => self.admit(&file.identifier).await?,
            // Read-only pre-check; the entry is written after the flush
            Delivery::AtLeastOnce => {
                if self.is_admitted(&file.identifier).await? {
                    Admission::AlreadyAdmitted
                } else {
                    Admission::Admitted
                }
            }
        };
        run.apply(Step::Admission(admission))?;

        if admission == Admission::AlreadyAdmitted {
            run.apply(Step::Skip)?;
            info!("Already ingested, skipping");
            return Ok(Progress::default());
        }

        run.apply(Step::Transform)?;
        let output = self.transform(file).await?;
        let malformed_rows = output.report.malformed_rows;

        run.apply(Step::Write)?;
        let ack = self.write(&output.batch).await?;

        if self.settings.delivery == Delivery::AtLeastOnce {
            run.apply(Step::Commit)?;
            if self.admit(&file.identifier).await? == Admission::AlreadyAdmitted {
                warn!("Ledger entry appeared while the file was in flight; points were rewritten");
            }
        }

        run.apply(Step::Finish)?;
        Ok(Progress {
            rows_written: ack.points,
            malformed_rows,
        })
    }

    async fn admit(&self, identifier: &str) -> Result<Admission, LedgerError> {
        match timeout(self.settings.ledger_timeout, self.ledger.admit(identifier)).await {
            Ok(result) => result,
            Err(_) => Err(self.ledger_timed_out()),
        }
    }

    async fn is_admitted(&self, identifier: &str) -> Result<bool, LedgerError> {
        match timeout(
            self.settings.ledger_timeout,
            self.ledger.is_admitted(identifier),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(self.ledger_timed_out()),
        }
    }

    fn ledger_timed_out(&self) -> LedgerError {
        LedgerError::Unavailable {
            location: "ledger".to_string(),
            reason: format!("no response within {:?}", self.settings.ledger_timeout),
        }
    }

    async fn transform(&self, file: &DiscoveredFile) -> Result<TransformOutput, IngestError> {
        let path = file.path.clone();
        let options = self.settings.transform;
        let task = tokio::task::spawn_blocking(move || transform_file(&path, &options));

        let output = match timeout(self.settings.transform_timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => {
                return Err(IngestError::Internal(format!("transform task failed: {join}")))
            }
            Err(_) => {
                return Err(IngestError::TransformTimedOut {
                    identifier: file.identifier.clone(),
                    timeout: self.settings.transform_timeout,
                })
            }
        };

        let report = &output.report;
        info!(
            rows_read = report.rows_read,
            rows_retained = report.rows_retained,
            rows_outside_window = report.rows_outside_window,
            malformed_rows = report.malformed_rows,
            "Transformed"
        );
        Ok(output)
    }

    /// Stage the batch as an artifact, push it through a fresh sink writer and
    /// drop the artifact once the flush is confirmed.
    async fn write(&self, batch: &NormalizedBatch) -> Result<FlushAck, IngestError> {
        let stem = batch.record.stem().to_string();
        let lock = self.stem_lock(&stem);
        let staged = lock.lock().await;
        let result = self.write_staged(batch, &stem).await;
        drop(staged);
        self.release_stem_lock(&stem, lock);
        result
    }

    fn stem_lock(&self, stem: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.stem_locks.lock();
        Arc::clone(locks.entry(stem.to_string()).or_default())
    }

    fn release_stem_lock(&self, stem: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.stem_locks.lock();
        // Only the map and `lock` hold it: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(stem);
        }
    }

    async fn write_staged(
        &self,
        batch: &NormalizedBatch,
        stem: &str,
    ) -> Result<FlushAck, IngestError> {
        self.artifacts
            .put_batch(batch, &self.settings.artifact)
            .await?;
        let staged = self.artifacts.load_batch(stem).await?;

        let limit = self.settings.sink_timeout;
        let mut writer = self.sink.open();
        let write = writer.write(
            &staged,
            &self.settings.measurement,
            &self.settings.tag_columns,
        );
        let receipt = match timeout(limit, write).await {
            Ok(result) => result?,
            Err(_) => return Err(self.sink_timed_out("write").into()),
        };
        let ack = match timeout(limit, writer.flush()).await {
            Ok(result) => result?,
            Err(_) => return Err(self.sink_timed_out("flush").into()),
        };
        debug!(
            points = receipt.points,
            requests = ack.requests,
            "Sink flush confirmed"
        );

        if let Err(e) = self.artifacts.delete(stem).await {
            warn!(code = e.code().as_str(), error = %e, "Failed to delete artifact");
        }
        Ok(ack)
    }

    fn sink_timed_out(&self, stage: &str) -> SinkError {
        SinkError::Unavailable {
            sink: self.sink.name(),
            reason: format!("{stage} did not finish within {:?}", self.settings.sink_timeout),
        }
    }
}

fn cancel_unstarted(identifier: &str) -> FileOutcome {
    let mut run = FileRun::new(identifier);
    // Discovered -> Cancelled is always legal
    let _ = run.apply(Step::Cancel);
    info!(file = %identifier, "Cancelled before start");
    FileOutcome::cancelled(identifier)
}

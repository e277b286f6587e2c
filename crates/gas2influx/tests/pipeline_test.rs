// End-to-end pipeline tests against in-process collaborators
//
// MemoryLedger + MemorySink + in-memory artifact store, except where a test
// exercises the SQLite ledger and filesystem artifacts explicitly.

use async_trait::async_trait;
use gas2influx::{discover_files, FileState, Pipeline, PipelineSettings, RunSummary};
use gas2influx_config::Delivery;
use gas2influx_core::{NormalizedBatch, MEASUREMENT_COLUMNS, TIME_COLUMN};
use gas2influx_ledger::{Admission, Ledger, MemoryLedger, SqliteLedger};
use gas2influx_writer::{
    ArtifactStore, FlushAck, MemorySink, Sink, SinkWriter, WriteReceipt,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn write_csv(dir: &Path, name: &str, rows: &[(&str, &str)]) {
    let mut content = String::from(TIME_COLUMN);
    for column in MEASUREMENT_COLUMNS {
        content.push(',');
        content.push_str(column);
    }
    content.push('\n');

    for (time, co) in rows {
        content.push_str(time);
        content.push(',');
        content.push_str(co);
        for i in 1..MEASUREMENT_COLUMNS.len() {
            content.push_str(&format!(",{}.5", i));
        }
        content.push('\n');
    }
    std::fs::write(dir.join(name), content).unwrap();
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    sink: MemorySink,
    artifacts: ArtifactStore,
    pipeline: Pipeline,
}

impl Harness {
    fn new(settings: PipelineSettings) -> Self {
        Self::with_ledger(Arc::new(MemoryLedger::new()), settings)
    }

    fn with_ledger(ledger: Arc<MemoryLedger>, settings: PipelineSettings) -> Self {
        let sink = MemorySink::new();
        let artifacts = ArtifactStore::memory().unwrap();
        let pipeline = Pipeline::new(
            ledger.clone(),
            Arc::new(sink.clone()),
            artifacts.clone(),
            settings,
        );
        Self {
            ledger,
            sink,
            artifacts,
            pipeline,
        }
    }

    async fn run(&self, dir: &Path) -> RunSummary {
        let files = discover_files(dir).unwrap();
        self.pipeline.run(files, CancellationToken::new()).await
    }
}

/// Answers like its inner ledger, after a fixed delay.
struct SlowLedger {
    delay: Duration,
    inner: MemoryLedger,
}

#[async_trait]
impl Ledger for SlowLedger {
    async fn is_admitted(&self, identifier: &str) -> gas2influx_ledger::Result<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.is_admitted(identifier).await
    }

    async fn admit(&self, identifier: &str) -> gas2influx_ledger::Result<Admission> {
        tokio::time::sleep(self.delay).await;
        self.inner.admit(identifier).await
    }
}

/// Records into a MemorySink, but every flush first waits `flush_delay`.
struct SlowSink {
    flush_delay: Duration,
    inner: MemorySink,
}

struct SlowWriter {
    flush_delay: Duration,
    inner: Box<dyn SinkWriter>,
}

impl Sink for SlowSink {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn open(&self) -> Box<dyn SinkWriter> {
        Box::new(SlowWriter {
            flush_delay: self.flush_delay,
            inner: self.inner.open(),
        })
    }
}

#[async_trait]
impl SinkWriter for SlowWriter {
    async fn write(
        &mut self,
        batch: &NormalizedBatch,
        measurement: &str,
        tag_columns: &[String],
    ) -> gas2influx_writer::Result<WriteReceipt> {
        self.inner.write(batch, measurement, tag_columns).await
    }

    async fn flush(&mut self) -> gas2influx_writer::Result<FlushAck> {
        tokio::time::sleep(self.flush_delay).await;
        self.inner.flush().await
    }
}

fn at_least_once() -> PipelineSettings {
    PipelineSettings {
        delivery: Delivery::AtLeastOnce,
        ..PipelineSettings::default()
    }
}

#[tokio::test]
async fn rerun_writes_each_file_once() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930_203718.csv", &[("0", "1"), ("1", "2")]);
    let harness = Harness::new(PipelineSettings::default());

    let first = harness.run(dir.path()).await;
    assert_eq!(first.done, 1);
    assert_eq!(first.rows_written, 2);

    let second = harness.run(dir.path()).await;
    assert_eq!(second.done, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(
        second.outcome("20160930_203718.csv").unwrap().state,
        FileState::Skipped
    );

    assert_eq!(harness.sink.flushes_for("20160930_203718.csv"), 1);
    assert_eq!(harness.sink.write_calls(), 1);
}

#[tokio::test]
async fn empty_batch_is_done_with_zero_rows() {
    let dir = tempfile::tempdir().unwrap();
    // Everything lies past the one-day window
    write_csv(dir.path(), "20160930.csv", &[("86401", "1"), ("90000", "2")]);
    let harness = Harness::new(PipelineSettings::default());

    let summary = harness.run(dir.path()).await;
    let outcome = summary.outcome("20160930.csv").unwrap();
    assert_eq!(outcome.state, FileState::Done);
    assert_eq!(outcome.rows_written, 0);
    assert!(harness.ledger.contains("20160930.csv"));
    assert!(harness.sink.flushes().is_empty());
}

#[tokio::test]
async fn non_numeric_rows_are_dropped_and_siblings_written() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(
        dir.path(),
        "20160930.csv",
        &[("0", "1"), ("1", "n/a"), ("2", "3")],
    );
    let harness = Harness::new(PipelineSettings::default());

    let summary = harness.run(dir.path()).await;
    let outcome = summary.outcome("20160930.csv").unwrap();
    assert_eq!(outcome.state, FileState::Done);
    assert_eq!(outcome.rows_written, 2);
    assert_eq!(outcome.malformed_rows, 1);
    assert_eq!(harness.sink.lines().len(), 2);
}

#[tokio::test]
async fn out_of_order_rows_reach_the_sink_ascending() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(
        dir.path(),
        "20160930.csv",
        &[("30", "1"), ("10", "2"), ("20", "3")],
    );
    let harness = Harness::new(PipelineSettings::default());
    harness.run(dir.path()).await;

    let stamps: Vec<i64> = harness
        .sink
        .lines()
        .iter()
        .map(|line| line.rsplit(' ').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(stamps.len(), 3);
    assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn unavailable_ledger_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("0", "1")]);
    let harness = Harness::new(PipelineSettings::default());
    harness.ledger.set_unavailable(true);

    let summary = harness.run(dir.path()).await;
    let outcome = summary.outcome("20160930.csv").unwrap();
    assert_eq!(outcome.state, FileState::Failed);
    assert_eq!(outcome.error_code, Some("E001"));
    assert!(harness.sink.flushes().is_empty());
    assert_eq!(harness.sink.write_calls(), 0);
    assert!(summary.has_failures());
}

#[tokio::test]
async fn at_most_once_flush_failure_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("0", "1")]);
    let harness = Harness::new(PipelineSettings::default());
    harness.sink.fail_flushes(true);

    let summary = harness.run(dir.path()).await;
    let outcome = summary.outcome("20160930.csv").unwrap();
    assert_eq!(outcome.state, FileState::Failed);
    assert_eq!(outcome.error_code, Some("E005"));
    // Admitted before the write, so the next run skips it
    assert!(harness.ledger.contains("20160930.csv"));

    harness.sink.fail_flushes(false);
    let rerun = harness.run(dir.path()).await;
    assert_eq!(rerun.skipped, 1);
    assert!(harness.sink.flushes().is_empty());
}

#[tokio::test]
async fn at_least_once_flush_failure_is_retried_next_run() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("0", "1"), ("5", "2")]);
    let harness = Harness::new(at_least_once());
    harness.sink.fail_flushes(true);

    let summary = harness.run(dir.path()).await;
    assert_eq!(summary.failed, 1);
    assert!(!harness.ledger.contains("20160930.csv"));

    harness.sink.fail_flushes(false);
    let rerun = harness.run(dir.path()).await;
    assert_eq!(rerun.done, 1);
    assert_eq!(rerun.rows_written, 2);
    assert!(harness.ledger.contains("20160930.csv"));

    let third = harness.run(dir.path()).await;
    assert_eq!(third.skipped, 1);
    assert_eq!(harness.sink.flushes_for("20160930.csv"), 1);
}

#[tokio::test]
async fn at_least_once_skips_already_admitted_files() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("0", "1")]);
    let ledger = Arc::new(MemoryLedger::with_entries(["20160930.csv"]));
    let harness = Harness::with_ledger(ledger, at_least_once());

    let summary = harness.run(dir.path()).await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(harness.sink.write_calls(), 0);
}

#[tokio::test]
async fn artifact_is_removed_only_after_confirmed_flush() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930_203718.csv", &[("0", "1")]);
    write_csv(dir.path(), "20161001_000000.csv", &[("0", "1")]);

    let harness = Harness::new(PipelineSettings::default());
    let files = discover_files(dir.path()).unwrap();

    harness
        .pipeline
        .run(files[..1].to_vec(), CancellationToken::new())
        .await;
    assert!(!harness.artifacts.exists("20160930_203718").await.unwrap());

    harness.sink.fail_flushes(true);
    harness
        .pipeline
        .run(files[1..].to_vec(), CancellationToken::new())
        .await;
    assert!(harness.artifacts.exists("20161001_000000").await.unwrap());
}

#[tokio::test]
async fn malformed_identifier_fails_only_that_file() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "readings.csv", &[("0", "1")]);
    write_csv(dir.path(), "20160930.csv", &[("0", "1")]);
    let harness = Harness::new(PipelineSettings::default());

    let summary = harness.run(dir.path()).await;
    assert_eq!(summary.done, 1);
    assert_eq!(summary.failed, 1);
    let bad = summary.outcome("readings.csv").unwrap();
    assert_eq!(bad.state, FileState::Failed);
    assert_eq!(bad.error_code, Some("E002"));
    assert_eq!(harness.sink.flushes_for("20160930.csv"), 1);
}

#[tokio::test]
async fn cancelled_run_starts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("0", "1")]);
    write_csv(dir.path(), "20161001.csv", &[("0", "1")]);
    let harness = Harness::new(PipelineSettings::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = harness
        .pipeline
        .run(discover_files(dir.path()).unwrap(), cancel)
        .await;

    assert_eq!(summary.cancelled, 2);
    assert!(!summary.has_failures());
    assert!(harness.ledger.is_empty());
    assert_eq!(harness.sink.write_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bounded_concurrency_processes_every_file() {
    let dir = tempfile::tempdir().unwrap();
    for day in 1..=9 {
        write_csv(
            dir.path(),
            &format!("2016100{day}.csv"),
            &[("0", "1"), ("60", "2")],
        );
    }
    let harness = Harness::new(PipelineSettings {
        max_concurrency: 3,
        ..PipelineSettings::default()
    });

    let summary = harness.run(dir.path()).await;
    assert_eq!(summary.done, 9);
    assert_eq!(summary.rows_written, 18);
    assert_eq!(harness.sink.flushes().len(), 9);
    // Outcomes keep discovery order
    assert_eq!(summary.outcomes[0].identifier, "20161001.csv");
    assert_eq!(summary.outcomes[8].identifier, "20161009.csv");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_runs_write_a_file_once() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("0", "1"), ("1", "2")]);

    let ledger = Arc::new(MemoryLedger::new());
    let sink = MemorySink::new();
    let make = || {
        Pipeline::new(
            ledger.clone(),
            Arc::new(sink.clone()),
            ArtifactStore::memory().unwrap(),
            PipelineSettings::default(),
        )
    };
    let (a, b) = (make(), make());
    let files = discover_files(dir.path()).unwrap();

    let (first, second) = tokio::join!(
        a.run(files.clone(), CancellationToken::new()),
        b.run(files, CancellationToken::new())
    );
    assert_eq!(first.done + second.done, 1);
    assert_eq!(first.skipped + second.skipped, 1);
    assert_eq!(sink.flushes_for("20160930.csv"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_ledger_and_fs_artifacts_end_to_end() {
    let input = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    write_csv(input.path(), "20160930_203718.csv", &[("0", "1"), ("3661", "2")]);

    let ledger = SqliteLedger::open(
        state.path().join("ledger.db"),
        Duration::from_secs(10),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    let artifact_root = state.path().join("artifacts");
    let artifacts = ArtifactStore::fs(artifact_root.to_str().unwrap()).unwrap();
    let sink = MemorySink::new();
    let pipeline = Pipeline::new(
        Arc::new(ledger),
        Arc::new(sink.clone()),
        artifacts,
        PipelineSettings::default(),
    );

    let files = discover_files(input.path()).unwrap();
    let first = pipeline.run(files.clone(), CancellationToken::new()).await;
    assert_eq!(first.done, 1);
    assert!(!artifact_root.join("20160930_203718.parquet").exists());

    let lines = sink.lines();
    assert_eq!(lines.len(), 2);
    // 2016-09-30T01:01:01Z
    assert!(lines[1].ends_with(" 1475197261"));

    let second = pipeline.run(files, CancellationToken::new()).await;
    assert_eq!(second.skipped, 1);
    assert_eq!(sink.flushes_for("20160930_203718.csv"), 1);
}

#[tokio::test]
async fn preview_touches_nothing_but_the_file() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("20", "1"), ("10", "n/a"), ("5", "2")]);

    let output = gas2influx::preview_file(
        &dir.path().join("20160930.csv"),
        gas2influx_core::TransformOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(output.report.rows_retained, 2);
    assert_eq!(output.report.malformed_rows, 1);
    assert_eq!(output.batch.rows[0].timestamp_iso(), "2016-09-30T00:00:05Z");
}

#[tokio::test]
async fn slow_ledger_times_out_as_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("0", "1")]);
    let sink = MemorySink::new();
    let pipeline = Pipeline::new(
        Arc::new(SlowLedger {
            delay: Duration::from_secs(5),
            inner: MemoryLedger::new(),
        }),
        Arc::new(sink.clone()),
        ArtifactStore::memory().unwrap(),
        PipelineSettings {
            ledger_timeout: Duration::from_millis(50),
            ..PipelineSettings::default()
        },
    );

    let summary = pipeline
        .run(discover_files(dir.path()).unwrap(), CancellationToken::new())
        .await;
    let outcome = summary.outcome("20160930.csv").unwrap();
    assert_eq!(outcome.state, FileState::Failed);
    assert_eq!(outcome.error_code, Some("E001"));
    assert_eq!(sink.write_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_transform_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let offsets: Vec<String> = (0..20_000).map(|n| (n % 86_400).to_string()).collect();
    let rows: Vec<(&str, &str)> = offsets.iter().map(|t| (t.as_str(), "1")).collect();
    write_csv(dir.path(), "20160930.csv", &rows);

    let harness = Harness::new(PipelineSettings {
        transform_timeout: Duration::ZERO,
        ..PipelineSettings::default()
    });

    let summary = harness.run(dir.path()).await;
    let outcome = summary.outcome("20160930.csv").unwrap();
    assert_eq!(outcome.state, FileState::Failed);
    assert_eq!(outcome.error_code, Some("E007"));
    assert_eq!(harness.sink.write_calls(), 0);
    // Admitted before the transform started
    assert!(harness.ledger.contains("20160930.csv"));
}

#[tokio::test]
async fn slow_flush_times_out_and_keeps_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("0", "1")]);
    let recorded = MemorySink::new();
    let artifacts = ArtifactStore::memory().unwrap();
    let pipeline = Pipeline::new(
        Arc::new(MemoryLedger::new()),
        Arc::new(SlowSink {
            flush_delay: Duration::from_secs(5),
            inner: recorded.clone(),
        }),
        artifacts.clone(),
        PipelineSettings {
            sink_timeout: Duration::from_millis(50),
            ..PipelineSettings::default()
        },
    );

    let summary = pipeline
        .run(discover_files(dir.path()).unwrap(), CancellationToken::new())
        .await;
    let outcome = summary.outcome("20160930.csv").unwrap();
    assert_eq!(outcome.state, FileState::Failed);
    assert_eq!(outcome.error_code, Some("E005"));
    assert!(recorded.flushes().is_empty());
    assert!(artifacts.exists("20160930").await.unwrap());
}

#[tokio::test]
async fn rejected_write_keeps_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "20160930.csv", &[("0", "1")]);
    let harness = Harness::new(at_least_once());
    harness.sink.fail_writes(true);

    let summary = harness.run(dir.path()).await;
    let outcome = summary.outcome("20160930.csv").unwrap();
    assert_eq!(outcome.state, FileState::Failed);
    assert_eq!(outcome.error_code, Some("E005"));
    assert!(harness.sink.flushes().is_empty());
    assert!(harness.artifacts.exists("20160930").await.unwrap());
    assert!(!harness.ledger.contains("20160930.csv"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_deadline_cancels_files_not_yet_started() {
    let dir = tempfile::tempdir().unwrap();
    for day in 1..=6 {
        write_csv(dir.path(), &format!("2016100{day}.csv"), &[("0", "1")]);
    }
    let ledger = Arc::new(MemoryLedger::new());
    let pipeline = Pipeline::new(
        ledger.clone(),
        Arc::new(SlowSink {
            flush_delay: Duration::from_millis(300),
            inner: MemorySink::new(),
        }),
        ArtifactStore::memory().unwrap(),
        PipelineSettings {
            max_concurrency: 1,
            ..PipelineSettings::default()
        },
    );

    let summary = pipeline
        .run_with_deadline(
            discover_files(dir.path()).unwrap(),
            CancellationToken::new(),
            Some(Duration::from_millis(400)),
        )
        .await;

    assert!(summary.done >= 1);
    assert!(summary.cancelled >= 1);
    assert_eq!(summary.done + summary.cancelled, 6);
    assert!(!summary.has_failures());
    for outcome in &summary.outcomes {
        let admitted = ledger.contains(&outcome.identifier);
        assert_eq!(admitted, outcome.state == FileState::Done);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn names_differing_in_extension_case_keep_their_own_rows() {
    for _ in 0..20 {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "20160930.csv", &[("0", "1")]);
        write_csv(dir.path(), "20160930.CSV", &[("0", "1"), ("1", "2"), ("2", "3")]);
        let harness = Harness::new(PipelineSettings {
            max_concurrency: 2,
            ..PipelineSettings::default()
        });

        let summary = harness.run(dir.path()).await;
        assert_eq!(summary.done, 2);

        let flushes = harness.sink.flushes();
        let lower = flushes.iter().find(|f| f.identifier == "20160930.csv").unwrap();
        let upper = flushes.iter().find(|f| f.identifier == "20160930.CSV").unwrap();
        assert_eq!(lower.lines.len(), 1);
        assert_eq!(upper.lines.len(), 3);
        assert!(!harness.artifacts.exists("20160930").await.unwrap());
    }
}

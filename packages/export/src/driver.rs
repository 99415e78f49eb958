//! Pagination driver.
//!
//! Runs the batch loop: fetch the batch at the current cursor, write each
//! record, then decide whether to continue. The run ends successfully when
//! the server reports `has_more: false` or returns an empty batch, and fails
//! on the first fetch or write error. Files written before a failure stay on
//! disk.
//!
//! The server may redirect the crawl through `next_batch`; its value wins
//! over the local `cursor + 1` and is not bounds-checked.

use std::sync::Arc;
use std::time::Instant;

use order_export_models::{BatchResponse, ExportConfig, ProgressEvent, RunSummary};

use crate::ExportError;
use crate::fetch::BatchSource;
use crate::progress::ProgressReporter;
use crate::writer::{RecordStore, SaveOutcome};

/// Mutable state of one run. Owned by the driver and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    /// Cursor of the next batch to fetch.
    pub cursor: u64,
    /// Records written so far. Only ever increases.
    pub total_saved: u64,
    /// Records skipped for lack of a usable identifier.
    pub total_skipped: u64,
    /// Expected grand total, captured from the first batch.
    pub expected_total: Option<u64>,
    /// Server storage type, captured from the first batch.
    pub storage_type: Option<String>,
    /// Batches fetched successfully.
    pub batches_fetched: u64,
}

impl RunState {
    /// Creates the state for a run starting at `initial_batch`.
    #[must_use]
    pub fn new(initial_batch: u64) -> Self {
        Self {
            cursor: initial_batch,
            ..Self::default()
        }
    }

    /// Captures the run-wide values from `batch` the first time it is
    /// called. Later batches never change them.
    ///
    /// Returns `true` if the values were captured by this call.
    pub fn capture_run_info(&mut self, batch: &BatchResponse) -> bool {
        if self.storage_type.is_some() {
            return false;
        }
        self.storage_type = Some(
            batch
                .storage_type
                .clone()
                .unwrap_or_else(|| "Unknown".to_owned()),
        );
        self.expected_total = Some(batch.total_orders.unwrap_or(0));
        true
    }

    /// Moves the cursor to the next batch.
    ///
    /// The next cursor is `cursor + 1` unless the server suggested a
    /// different one, in which case the suggestion is taken and
    /// `Some((expected, suggested))` is returned.
    pub const fn advance(&mut self, next_batch: Option<u64>) -> Option<(u64, u64)> {
        let expected = self.cursor.saturating_add(1);
        match next_batch {
            Some(suggested) if suggested != expected => {
                self.cursor = suggested;
                Some((expected, suggested))
            }
            _ => {
                self.cursor = expected;
                None
            }
        }
    }
}

/// Drives an export run from the first batch to completion.
pub struct Exporter<F, S> {
    config: ExportConfig,
    fetcher: F,
    store: S,
    reporter: Arc<dyn ProgressReporter>,
}

impl<F: BatchSource, S: RecordStore> Exporter<F, S> {
    /// Creates an exporter.
    pub fn new(
        config: ExportConfig,
        fetcher: F,
        store: S,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
            reporter,
        }
    }

    /// The configuration this exporter runs with.
    #[must_use]
    pub const fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Runs until `shutdown` resolves or the export ends, whichever comes
    /// first. A shutdown is reported as [`ExportError::Interrupted`].
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Interrupted`] on shutdown, otherwise the same
    /// errors as [`run`](Self::run).
    pub async fn run_until(
        &self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<RunSummary, ExportError> {
        tokio::select! {
            biased;
            () = shutdown => {
                log::warn!("Shutdown requested, abandoning run");
                Err(ExportError::Interrupted)
            }
            result = self.run() => result,
        }
    }

    /// Runs the export to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Setup`] if the output destination cannot be
    /// prepared, [`ExportError::Fetch`] on the first failed batch, or
    /// [`ExportError::Write`] on the first failed record write.
    pub async fn run(&self) -> Result<RunSummary, ExportError> {
        let started = Instant::now();
        let per_page = self.config.per_page;

        self.reporter.report(&ProgressEvent::RunStarted {
            base_url: self.config.base_url.clone(),
            per_page,
            initial_batch: self.config.initial_batch,
            output_dir: self.store.location().to_path_buf(),
        });

        self.store.prepare().map_err(|source| ExportError::Setup {
            path: self.store.location().to_path_buf(),
            source,
        })?;
        self.reporter.report(&ProgressEvent::OutputReady {
            output_dir: self.store.location().to_path_buf(),
        });

        let mut state = RunState::new(self.config.initial_batch);

        loop {
            let cursor = state.cursor;
            self.reporter.report(&ProgressEvent::BatchStarted {
                cursor,
                url: self.fetcher.request_url(cursor, per_page),
            });

            let batch = self
                .fetcher
                .fetch_batch(cursor, per_page)
                .await
                .map_err(|source| ExportError::Fetch { cursor, source })?;
            state.batches_fetched += 1;

            if state.capture_run_info(&batch) {
                self.reporter.report(&ProgressEvent::RunInfo {
                    storage_type: state.storage_type.clone().unwrap_or_default(),
                    expected_total: state.expected_total.unwrap_or(0),
                    total_batches: batch.total_batches.unwrap_or(0),
                });
            }

            let processed = batch.processed();
            self.reporter
                .report(&ProgressEvent::BatchReceived { cursor, processed });

            if batch.orders.is_empty() {
                log::debug!("Batch {cursor} is empty, treating as end of export");
                self.reporter.report(&ProgressEvent::EmptyBatch { cursor });
                break;
            }

            let saved_in_batch = self.write_batch(&batch, &mut state)?;

            self.reporter.report(&ProgressEvent::BatchComplete {
                cursor,
                saved_in_batch,
                total_saved: state.total_saved,
                expected_total: state.expected_total,
                memory_usage: batch.memory_usage.clone(),
            });

            if !batch.has_more {
                self.reporter.report(&ProgressEvent::AllBatchesProcessed);
                break;
            }

            if let Some(limit) = self.config.max_batches
                && state.batches_fetched >= u64::from(limit)
            {
                log::debug!("Stopping after {limit} batches");
                self.reporter
                    .report(&ProgressEvent::BatchLimitReached { limit });
                break;
            }

            if let Some((expected, suggested)) = state.advance(batch.next_batch) {
                log::warn!("Expected next batch {expected}, but API suggests {suggested}");
                self.reporter.report(&ProgressEvent::CursorOverride {
                    expected,
                    suggested,
                });
            }

            let delay = self.config.batch_delay();
            if !delay.is_zero() {
                self.reporter.report(&ProgressEvent::Waiting { delay });
                tokio::time::sleep(delay).await;
            }
        }

        let (samples, sample_total) = match self.store.samples(self.config.sample_limit) {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!(
                    "Failed to list output directory {}: {e}",
                    self.store.location().display()
                );
                (Vec::new(), 0)
            }
        };

        let summary = RunSummary {
            total_saved: state.total_saved,
            total_skipped: state.total_skipped,
            expected_total: state.expected_total,
            storage_type: state.storage_type,
            batches_fetched: state.batches_fetched,
            output_dir: self.store.location().to_path_buf(),
            elapsed: started.elapsed(),
            samples,
            sample_total,
        };

        self.reporter
            .report(&ProgressEvent::Finished(summary.clone()));

        Ok(summary)
    }

    /// Writes every record of `batch` in order, stopping at the first write
    /// failure. Returns the number of records written.
    fn write_batch(&self, batch: &BatchResponse, state: &mut RunState) -> Result<u64, ExportError> {
        let processed = batch.processed();
        let mut saved = 0;

        for (index, record) in (1_u64..).zip(&batch.orders) {
            match self.store.save(record)? {
                SaveOutcome::Saved { id, path, bytes } => {
                    state.total_saved += 1;
                    saved += 1;
                    self.reporter.report(&ProgressEvent::RecordSaved {
                        index,
                        processed,
                        id,
                        path,
                        bytes,
                    });
                }
                SaveOutcome::Skipped(reason) => {
                    state.total_skipped += 1;
                    log::debug!("Skipping record {index}/{processed}: {reason}");
                    self.reporter.report(&ProgressEvent::RecordSkipped {
                        index,
                        processed,
                        reason,
                    });
                }
            }
        }

        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use order_export_models::{Record, SkipReason};

    use super::*;
    use crate::fetch::{FetchError, ProtocolError};
    use crate::writer::JsonFileStore;

    /// Serves a fixed sequence of responses and records each request.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<BatchResponse, FetchError>>>,
        requests: Mutex<Vec<(u64, u32)>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<BatchResponse, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(u64, u32)> {
            self.requests.lock().unwrap().clone()
        }

        fn cursors(&self) -> Vec<u64> {
            self.requests().into_iter().map(|(cursor, _)| cursor).collect()
        }
    }

    impl BatchSource for &ScriptedSource {
        async fn fetch_batch(
            &self,
            cursor: u64,
            per_page: u32,
        ) -> Result<BatchResponse, FetchError> {
            self.requests.lock().unwrap().push((cursor, per_page));
            self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(ProtocolError::Unsuccessful {
                    detail: Some("script exhausted".to_owned()),
                }
                .into())
            })
        }

        fn request_url(&self, cursor: u64, per_page: u32) -> String {
            format!("scripted?batch={cursor}&per_page={per_page}")
        }
    }

    /// Never answers.
    struct StalledSource;

    impl BatchSource for StalledSource {
        async fn fetch_batch(
            &self,
            _cursor: u64,
            _per_page: u32,
        ) -> Result<BatchResponse, FetchError> {
            std::future::pending().await
        }

        fn request_url(&self, cursor: u64, _per_page: u32) -> String {
            cursor.to_string()
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingReporter {
        fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressReporter for RecordingReporter {
        fn report(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn order(id: u64) -> Record {
        serde_json::json!({"id": id, "status": "completed"})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn batch(ids: &[u64], has_more: bool, next_batch: Option<u64>) -> BatchResponse {
        BatchResponse {
            success: true,
            orders: ids.iter().copied().map(order).collect(),
            has_more,
            next_batch,
            ..BatchResponse::default()
        }
    }

    fn config(initial_batch: u64) -> ExportConfig {
        ExportConfig {
            initial_batch,
            batch_delay_ms: 0,
            ..ExportConfig::default()
        }
    }

    fn exporter<'a>(
        config: ExportConfig,
        source: &'a ScriptedSource,
        dir: &std::path::Path,
        reporter: &Arc<RecordingReporter>,
    ) -> Exporter<&'a ScriptedSource, JsonFileStore> {
        let store = JsonFileStore::new(dir, "json");
        Exporter::new(config, source, store, reporter.clone())
    }

    #[tokio::test]
    async fn single_batch_export() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![Ok(BatchResponse {
            total_orders: Some(2),
            ..batch(&[9001, 9002], false, None)
        })]);
        let config = ExportConfig {
            per_page: 100,
            ..config(251)
        };

        let summary = exporter(config, &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        assert_eq!(source.requests(), vec![(251, 100)]);
        assert_eq!(summary.total_saved, 2);
        assert_eq!(summary.expected_total, Some(2));
        assert_eq!(summary.batches_fetched, 1);
        assert!(dir.path().join("9001.json").is_file());
        assert!(dir.path().join("9002.json").is_file());
        let names: Vec<_> = summary.samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["9001.json", "9002.json"]);
        assert_eq!(summary.sample_total, 2);
        assert!(reporter.events().contains(&ProgressEvent::AllBatchesProcessed));
    }

    #[tokio::test]
    async fn visits_batches_in_increasing_order() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let mut with_missing_id = batch(&[3], true, None);
        with_missing_id.orders.push(
            serde_json::json!({"status": "draft"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let source = ScriptedSource::new(vec![
            Ok(batch(&[1, 2], true, Some(1))),
            Ok(with_missing_id),
            Ok(batch(&[4, 5], false, None)),
        ]);

        let summary = exporter(config(0), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        assert_eq!(source.cursors(), vec![0, 1, 2]);
        // 2 + 2 + 2 processed, minus one skip.
        assert_eq!(summary.total_saved, 5);
        assert_eq!(summary.total_skipped, 1);
        assert!(
            !reporter
                .events()
                .iter()
                .any(|e| matches!(e, ProgressEvent::CursorOverride { .. }))
        );
    }

    #[tokio::test]
    async fn empty_batch_ends_run_despite_has_more() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![
            Ok(batch(&[1], true, None)),
            Ok(batch(&[], true, Some(2))),
            Ok(batch(&[2], false, None)),
        ]);

        let summary = exporter(config(0), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        assert_eq!(source.cursors(), vec![0, 1]);
        assert_eq!(summary.total_saved, 1);
        assert!(
            reporter
                .events()
                .contains(&ProgressEvent::EmptyBatch { cursor: 1 })
        );
    }

    #[tokio::test]
    async fn null_orders_end_run() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![
            Ok(batch(&[1], true, None)),
            crate::fetch::parse_batch(r#"{"success": true, "orders": null, "has_more": true}"#),
        ]);

        let summary = exporter(config(0), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        assert_eq!(source.cursors(), vec![0, 1]);
        assert_eq!(summary.total_saved, 1);
        assert!(
            reporter
                .events()
                .contains(&ProgressEvent::EmptyBatch { cursor: 1 })
        );
    }

    #[tokio::test]
    async fn null_has_more_finishes_after_batch() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![crate::fetch::parse_batch(
            r#"{"success": true, "orders": [{"id": 7}], "has_more": null}"#,
        )]);

        let summary = exporter(config(0), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        assert_eq!(source.cursors(), vec![0]);
        assert_eq!(summary.total_saved, 1);
        assert!(dir.path().join("7.json").is_file());
        assert!(reporter.events().contains(&ProgressEvent::AllBatchesProcessed));
    }

    #[tokio::test]
    async fn server_cursor_overrides_increment() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![
            Ok(batch(&[1], true, Some(500))),
            Ok(batch(&[2], true, Some(3))),
            Ok(batch(&[3], false, None)),
        ]);

        exporter(config(251), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        // A backwards suggestion is followed too.
        assert_eq!(source.cursors(), vec![251, 500, 3]);
        let overrides: Vec<_> = reporter
            .events()
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::CursorOverride { .. }))
            .collect();
        assert_eq!(
            overrides,
            vec![
                ProgressEvent::CursorOverride {
                    expected: 252,
                    suggested: 500
                },
                ProgressEvent::CursorOverride {
                    expected: 501,
                    suggested: 3
                },
            ]
        );
    }

    #[tokio::test]
    async fn record_without_id_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let mut response = batch(&[10], false, None);
        response.orders.insert(
            0,
            serde_json::json!({"id": null, "status": "draft"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let source = ScriptedSource::new(vec![Ok(response)]);

        let summary = exporter(config(0), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.total_saved, 1);
        assert_eq!(summary.sample_total, 1);
        assert!(reporter.events().contains(&ProgressEvent::RecordSkipped {
            index: 1,
            processed: 2,
            reason: SkipReason::MissingIdentifier,
        }));
    }

    #[tokio::test]
    async fn write_failure_aborts_and_keeps_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        std::fs::create_dir(dir.path().join("22.json")).unwrap();
        let source = ScriptedSource::new(vec![
            Ok(batch(&[10, 11], true, None)),
            Ok(batch(&[21, 22, 23], true, None)),
            Ok(batch(&[30], false, None)),
        ]);

        let err = exporter(config(0), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap_err();

        match err {
            ExportError::Write(e) => assert_eq!(e.id, "22"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(source.cursors(), vec![0, 1]);
        for id in [10, 11, 21] {
            assert!(dir.path().join(format!("{id}.json")).is_file(), "{id}");
        }
        assert!(!dir.path().join("23.json").exists());
        assert!(
            !reporter
                .events()
                .iter()
                .any(|e| matches!(e, ProgressEvent::Finished(_)))
        );
    }

    #[tokio::test]
    async fn fetch_failure_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![
            Ok(batch(&[1], true, None)),
            Err(FetchError::Timeout {
                after: Duration::from_secs(30),
            }),
        ]);

        let err = exporter(config(7), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExportError::Fetch {
                cursor: 8,
                source: FetchError::Timeout { .. }
            }
        ));
        assert!(dir.path().join("1.json").is_file());
    }

    #[tokio::test]
    async fn run_info_is_captured_once() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![
            Ok(BatchResponse {
                total_orders: Some(10),
                total_batches: Some(2),
                storage_type: Some("HPOS".to_owned()),
                ..batch(&[1], true, None)
            }),
            Ok(BatchResponse {
                total_orders: Some(99),
                storage_type: Some("Legacy".to_owned()),
                ..batch(&[2], false, None)
            }),
        ]);

        let summary = exporter(config(0), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.expected_total, Some(10));
        assert_eq!(summary.storage_type.as_deref(), Some("HPOS"));
        let infos: Vec<_> = reporter
            .events()
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::RunInfo { .. }))
            .collect();
        assert_eq!(
            infos,
            vec![ProgressEvent::RunInfo {
                storage_type: "HPOS".to_owned(),
                expected_total: 10,
                total_batches: 2,
            }]
        );
    }

    #[tokio::test]
    async fn missing_run_info_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![Ok(batch(&[1], false, None))]);

        let summary = exporter(config(0), &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.expected_total, Some(0));
        assert_eq!(summary.storage_type.as_deref(), Some("Unknown"));
    }

    #[tokio::test]
    async fn batch_limit_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![
            Ok(batch(&[1], true, None)),
            Ok(batch(&[2], true, None)),
            Ok(batch(&[3], true, None)),
        ]);
        let config = ExportConfig {
            max_batches: Some(2),
            ..config(0)
        };

        let summary = exporter(config, &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        assert_eq!(source.cursors(), vec![0, 1]);
        assert_eq!(summary.total_saved, 2);
        assert!(
            reporter
                .events()
                .contains(&ProgressEvent::BatchLimitReached { limit: 2 })
        );
    }

    #[tokio::test]
    async fn unwritable_output_fails_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("orders");
        std::fs::write(&blocker, b"file").unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![Ok(batch(&[1], false, None))]);

        let err = exporter(config(0), &source, &blocker, &reporter)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Setup { .. }));
        assert!(err.to_string().starts_with(&format!(
            "failed to prepare output directory {}: ",
            blocker.display()
        )));
        assert!(source.cursors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_batches() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let source = ScriptedSource::new(vec![
            Ok(batch(&[1], true, None)),
            Ok(batch(&[2], false, None)),
        ]);
        let config = ExportConfig {
            batch_delay_ms: 2_000,
            ..config(0)
        };

        exporter(config, &source, dir.path(), &reporter)
            .run()
            .await
            .unwrap();

        let waits: Vec<_> = reporter
            .events()
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::Waiting { .. }))
            .collect();
        assert_eq!(
            waits,
            vec![ProgressEvent::Waiting {
                delay: Duration::from_secs(2)
            }]
        );
    }

    #[tokio::test]
    async fn shutdown_interrupts_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), "json");
        let exporter = Exporter::new(config(0), StalledSource, store, crate::null_reporter());

        let err = exporter
            .run_until(tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Interrupted));
    }

    #[test]
    fn advance_follows_suggestion() {
        let mut state = RunState::new(5);
        assert_eq!(state.advance(Some(6)), None);
        assert_eq!(state.cursor, 6);
        assert_eq!(state.advance(None), None);
        assert_eq!(state.cursor, 7);
        assert_eq!(state.advance(Some(2)), Some((8, 2)));
        assert_eq!(state.cursor, 2);
    }
}

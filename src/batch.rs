use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::errors::ResolveError;
use crate::ingestion::Record;
use crate::markers::{MarkerStore, ResolvedPoint};
use crate::resolver::LocationResolver;
use crate::telemetry::TelemetryClient;

/// How rows inside one chunk are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConcurrencyPolicy {
    /// One row at a time, in input order. Failed ids come back in input order.
    Sequential,
    /// Up to `n` rows in flight on the current task. Markers and failed ids follow
    /// completion order.
    Bounded(usize),
}

impl ConcurrencyPolicy {
    pub fn from_limit(limit: usize) -> Self {
        if limit <= 1 {
            ConcurrencyPolicy::Sequential
        } else {
            ConcurrencyPolicy::Bounded(limit)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub elapsed_seconds: f64,
    pub failed_ids: Vec<String>,
    pub resolved: usize,
    pub chunk_sizes: Vec<usize>,
}

impl BatchResult {
    pub fn processed(&self) -> usize {
        self.resolved + self.failed_ids.len()
    }

    pub fn summary_message(&self) -> String {
        let mut message = format!(
            "Your file has been processed in {:.2} seconds.",
            self.elapsed_seconds
        );
        if !self.failed_ids.is_empty() {
            message.push_str(&format!(
                " Unable to mark IDs {} on the map.",
                self.failed_ids.join(", ")
            ));
        }
        message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub processed: usize,
    pub total: usize,
    pub resolved: usize,
    pub failed: usize,
}

pub type ProgressObserver = Arc<dyn Fn(BatchProgress) + Send + Sync>;

#[derive(Default)]
struct Tally {
    failed_ids: Vec<String>,
    resolved: usize,
}

impl Tally {
    fn processed(&self) -> usize {
        self.resolved + self.failed_ids.len()
    }
}

pub struct BatchCoordinator {
    resolver: LocationResolver,
    store: MarkerStore,
    batch_size: usize,
    policy: ConcurrencyPolicy,
    telemetry: Option<TelemetryClient>,
}

impl BatchCoordinator {
    pub fn new(resolver: LocationResolver, store: MarkerStore) -> Self {
        Self {
            resolver,
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            policy: ConcurrencyPolicy::Sequential,
            telemetry: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryClient) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Resolves every record, appending successes to the marker store. Row failures are
    /// collected into `failed_ids`; nothing here aborts the run.
    pub async fn run(
        &self,
        records: Vec<Record>,
        observer: Option<ProgressObserver>,
    ) -> BatchResult {
        let started = Instant::now();
        let total = records.len();
        if total == 0 {
            return BatchResult {
                elapsed_seconds: started.elapsed().as_secs_f64(),
                failed_ids: Vec::new(),
                resolved: 0,
                chunk_sizes: Vec::new(),
            };
        }

        let chunk_count = total.div_ceil(self.batch_size);
        let mut tally = Tally::default();
        let mut chunk_sizes = Vec::with_capacity(chunk_count);
        info!(
            total,
            chunk_count,
            batch_size = self.batch_size,
            policy = ?self.policy,
            "starting batch"
        );

        for (chunk_index, chunk) in records.chunks(self.batch_size).enumerate() {
            let chunk_started = Instant::now();
            let failed_before = tally.failed_ids.len();
            let mut settle = |outcome: Result<ResolvedPoint, ResolveError>| {
                self.settle(outcome, &mut tally);
                if let Some(callback) = &observer {
                    callback(BatchProgress {
                        chunk_index,
                        chunk_count,
                        processed: tally.processed(),
                        total,
                        resolved: tally.resolved,
                        failed: tally.failed_ids.len(),
                    });
                }
            };

            match self.policy {
                ConcurrencyPolicy::Sequential => {
                    for record in chunk {
                        settle(self.resolver.resolve(&record.description, &record.id).await);
                    }
                }
                ConcurrencyPolicy::Bounded(limit) => {
                    let mut in_flight = stream::iter(chunk)
                        .map(|record| self.resolver.resolve(&record.description, &record.id))
                        .buffer_unordered(limit.clamp(1, chunk.len()));
                    while let Some(outcome) = in_flight.next().await {
                        settle(outcome);
                    }
                }
            }

            chunk_sizes.push(chunk.len());
            let chunk_failed = tally.failed_ids.len() - failed_before;
            debug!(
                chunk = chunk_index + 1,
                chunk_count,
                size = chunk.len(),
                failed = chunk_failed,
                elapsed_ms = chunk_started.elapsed().as_millis() as u64,
                "chunk complete"
            );
            self.record_event(
                "chunk_completed",
                json!({
                    "chunk_index": chunk_index,
                    "size": chunk.len(),
                    "failed": chunk_failed,
                    "elapsed_ms": chunk_started.elapsed().as_millis() as u64,
                }),
            );
        }

        let result = BatchResult {
            elapsed_seconds: started.elapsed().as_secs_f64(),
            failed_ids: tally.failed_ids,
            resolved: tally.resolved,
            chunk_sizes,
        };
        info!(
            resolved = result.resolved,
            failed = result.failed_ids.len(),
            elapsed_seconds = result.elapsed_seconds,
            "batch complete"
        );
        self.record_event(
            "batch_completed",
            json!({
                "total": total,
                "resolved": result.resolved,
                "failed": result.failed_ids.len(),
                "chunks": result.chunk_sizes.len(),
                "elapsed_seconds": result.elapsed_seconds,
            }),
        );
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.flush() {
                warn!(?err, "failed to flush telemetry queue");
            }
        }
        result
    }

    fn settle(&self, outcome: Result<ResolvedPoint, ResolveError>, tally: &mut Tally) {
        match outcome {
            Ok(point) => {
                self.store.append(point);
                tally.resolved += 1;
            }
            Err(err) => {
                warn!(%err, id = err.id(), kind = err.kind(), "failed to resolve row");
                self.record_event(
                    "row_failed",
                    json!({
                        "id": err.id(),
                        "kind": err.kind(),
                    }),
                );
                tally.failed_ids.push(err.id().to_string());
            }
        }
    }

    fn record_event(&self, name: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.record(name, payload) {
                warn!(?err, event = name, "failed to queue telemetry event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::resolver::testing::{resolver, ScriptedExtractor, ScriptedGeocoder};

    fn records(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| Record::new(i.to_string(), format!("place-{i}")))
            .collect()
    }

    fn all_known(count: usize) -> ScriptedGeocoder {
        (0..count).fold(ScriptedGeocoder::default(), |geocoder, i| {
            geocoder.place(&format!("place-{i}"), (i % 90) as f64, 0.0)
        })
    }

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let coordinator = BatchCoordinator::new(
            resolver(ScriptedExtractor::default(), ScriptedGeocoder::default()),
            MarkerStore::detached(),
        );
        let result = coordinator.run(Vec::new(), None).await;
        assert!(result.failed_ids.is_empty());
        assert!(result.chunk_sizes.is_empty());
        assert_eq!(result.resolved, 0);
        assert!(result.elapsed_seconds < 1.0);
    }

    #[tokio::test]
    async fn isolates_failures_per_row() {
        let store = MarkerStore::detached();
        let coordinator = BatchCoordinator::new(
            resolver(
                ScriptedExtractor::default().reply("Meet at the Louvre", Some("Paris, France")),
                ScriptedGeocoder::default().place("Paris, France", 48.86, 2.35),
            ),
            store.clone(),
        );

        let input = "id,message\n1,Meet at the Louvre\n2,\n3,\"Nowhereville, Qx\"\n";
        let rows = crate::ingestion::parse_rows(input.as_bytes()).unwrap();
        let result = coordinator.run(rows, None).await;

        assert_eq!(result.failed_ids, vec!["3"]);
        let points = store.all();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id(), "1");
        assert_eq!(points[0].lat(), 48.86);
        assert_eq!(points[0].lng(), 2.35);
        assert_eq!(
            result.summary_message(),
            format!(
                "Your file has been processed in {:.2} seconds. Unable to mark IDs 3 on the map.",
                result.elapsed_seconds
            )
        );
    }

    #[tokio::test]
    async fn all_failures_still_produce_a_result() {
        let input = records(5);
        let extractor = input
            .iter()
            .fold(ScriptedExtractor::default(), |extractor, record| {
                extractor.reply(&record.description, None)
            });
        let coordinator = BatchCoordinator::new(
            resolver(extractor, ScriptedGeocoder::default()),
            MarkerStore::detached(),
        )
        .with_batch_size(2);

        let result = coordinator.run(input, None).await;
        assert_eq!(result.failed_ids, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(result.resolved, 0);
        assert_eq!(result.chunk_sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn splits_into_fixed_size_chunks() {
        let store = MarkerStore::detached();
        let coordinator = BatchCoordinator::new(
            resolver(ScriptedExtractor::default(), all_known(550)),
            store.clone(),
        )
        .with_batch_size(250);

        let result = coordinator.run(records(600), None).await;
        assert_eq!(result.chunk_sizes, vec![250, 250, 100]);
        assert_eq!(result.processed(), 600);
        assert_eq!(result.resolved, 550);
        assert_eq!(result.failed_ids.len(), 50);
        assert_eq!(result.failed_ids.first().map(String::as_str), Some("550"));
        assert_eq!(store.len(), 550);
    }

    #[tokio::test]
    async fn oversized_batch_is_a_single_chunk() {
        let coordinator = BatchCoordinator::new(
            resolver(ScriptedExtractor::default(), all_known(3)),
            MarkerStore::detached(),
        );
        let result = coordinator.run(records(3), None).await;
        assert_eq!(result.chunk_sizes, vec![3]);
        assert!(result.failed_ids.is_empty());
    }

    #[tokio::test]
    async fn sequential_runs_keep_input_order() {
        let store = MarkerStore::detached();
        let extractor = ScriptedExtractor::default();
        let geocoder = all_known(6)
            .broken("place-1", "boom")
            .slow("place-0", Duration::from_millis(30));
        let extractor = Arc::new(extractor);
        let coordinator = BatchCoordinator::new(
            LocationResolver::new(extractor.clone(), Arc::new(geocoder), Duration::from_secs(5)),
            store.clone(),
        )
        .with_batch_size(4);

        let result = coordinator.run(records(6), None).await;
        let ids: Vec<_> = store.all().iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["0", "2", "3", "4", "5"]);
        assert_eq!(result.failed_ids, vec!["1"]);
        assert_eq!(
            *extractor.calls.lock(),
            (0..6).map(|i| format!("place-{i}")).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn bounded_fan_out_follows_completion_order() {
        let store = MarkerStore::detached();
        let geocoder = all_known(4)
            .slow("place-0", Duration::from_millis(200))
            .broken("place-1", "boom");
        let coordinator = BatchCoordinator::new(
            resolver(ScriptedExtractor::default(), geocoder),
            store.clone(),
        )
        .with_policy(ConcurrencyPolicy::Bounded(4));

        let result = coordinator.run(records(4), None).await;
        let ids: Vec<_> = store.all().iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.last().map(String::as_str), Some("0"));
        assert_eq!(result.failed_ids, vec!["1"]);
        assert_eq!(result.processed(), 4);
    }

    #[tokio::test]
    async fn reports_progress_after_every_row() {
        let seen = Arc::new(Mutex::new(Vec::<BatchProgress>::new()));
        let sink = Arc::clone(&seen);
        let observer: ProgressObserver =
            Arc::new(move |progress: BatchProgress| sink.lock().push(progress));
        let coordinator = BatchCoordinator::new(
            resolver(ScriptedExtractor::default(), all_known(2)),
            MarkerStore::detached(),
        )
        .with_batch_size(2);

        coordinator.run(records(3), Some(observer)).await;
        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[2],
            BatchProgress {
                chunk_index: 1,
                chunk_count: 2,
                processed: 3,
                total: 3,
                resolved: 2,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn records_telemetry_for_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let telemetry = TelemetryClient::new(&config.data_dir, &config).unwrap();
        let coordinator = BatchCoordinator::new(
            resolver(ScriptedExtractor::default(), ScriptedGeocoder::default()),
            MarkerStore::detached(),
        )
        .with_telemetry(telemetry.clone());

        coordinator.run(records(1), None).await;
        let journal = std::fs::read_to_string(telemetry.journal_path()).unwrap();
        assert!(journal.contains("row_failed"));
        assert!(journal.contains("batch_completed"));
        assert_eq!(telemetry.queue_depth(), 0);
    }
}

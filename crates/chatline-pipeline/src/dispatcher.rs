use std::time::{Duration, Instant};

use chatline_store::StoreResult;
use chatline_types::ChatEvent;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::DispatchError;
use crate::guard::IdempotencyGuard;
use crate::record::{parse_batch, EventName, StreamRecord};
use crate::stage::{ProcessingOutcome, Stage};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of one stage on one record.
#[derive(Clone, Debug)]
pub struct StageReport {
    pub stage: String,
    pub outcome: ProcessingOutcome,
    pub elapsed: Duration,
}

/// What the dispatcher did with a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordDisposition {
    /// The record was an insert and went through the stages.
    Staged,
    /// The record was not an insert, or could not be decoded. No stage ran.
    Skipped { reason: String },
}

#[derive(Clone, Debug)]
pub struct RecordReport {
    /// Position of the record in its batch.
    pub index: usize,
    pub event_id: Option<String>,
    pub disposition: RecordDisposition,
    pub stages: Vec<StageReport>,
}

impl RecordReport {
    fn skipped(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            event_id: None,
            disposition: RecordDisposition::Skipped {
                reason: reason.into(),
            },
            stages: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.disposition, RecordDisposition::Skipped { .. })
    }

    /// Outcome of the named stage, if it ran on this record.
    pub fn outcome(&self, stage: &str) -> Option<&ProcessingOutcome> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| &s.outcome)
    }

    /// Name and reason of the first failed stage.
    pub fn first_failure(&self) -> Option<(&str, &str)> {
        self.stages.iter().find_map(|s| match &s.outcome {
            ProcessingOutcome::Failed(reason) => Some((s.stage.as_str(), reason.as_str())),
            _ => None,
        })
    }
}

/// Per-record, per-stage outcomes of one batch, in delivery order.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub records: Vec<RecordReport>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// How many records the named stage ended with `outcome`.
    pub fn count(&self, stage: &str, outcome: &ProcessingOutcome) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome(stage) == Some(outcome))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct GuardedStage {
    stage: Box<dyn Stage>,
    guard: IdempotencyGuard,
}

/// Routes change-stream records through the registered stages.
///
/// Records are processed strictly in order. Every inserted event goes to
/// every stage, each behind its own idempotency guard. A failing stage does
/// not stop the other stages on the same record, but the batch stops after
/// that record and is reported back for redelivery.
pub struct Dispatcher {
    stages: Vec<GuardedStage>,
    window_secs: i64,
}

impl Dispatcher {
    /// A dispatcher with no stages that remembers processed events for
    /// `window_secs`.
    pub fn new(window_secs: i64) -> Self {
        Self {
            stages: Vec::new(),
            window_secs,
        }
    }

    /// Register a stage; stages run in registration order.
    pub fn add_stage(&mut self, stage: Box<dyn Stage>, guard: IdempotencyGuard) {
        self.stages.push(GuardedStage { stage, guard });
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static, guard: IdempotencyGuard) -> Self {
        self.add_stage(Box::new(stage), guard);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage.name()).collect()
    }

    /// Sweep expired records out of every stage's guard.
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        let mut purged = 0;
        for guarded in &self.stages {
            purged += guarded.guard.purge_expired().await?;
        }
        Ok(purged)
    }

    /// Parse a batch document and dispatch it.
    pub async fn dispatch_bytes(&self, input: &[u8]) -> Result<BatchReport, DispatchError> {
        let records = parse_batch(input)?;
        self.dispatch(&records).await
    }

    pub async fn dispatch(&self, records: &[Value]) -> Result<BatchReport, DispatchError> {
        let batch_start = Instant::now();
        let mut report = BatchReport {
            records: Vec::with_capacity(records.len()),
        };

        for (index, raw) in records.iter().enumerate() {
            let record = self.process_record(index, raw).await;
            let failure = record
                .first_failure()
                .map(|(stage, reason)| (stage.to_string(), reason.to_string()));
            report.records.push(record);

            if let Some((stage, reason)) = failure {
                error!(record = index, stage = %stage, reason = %reason, "stage failed; batch must be redelivered");
                return Err(DispatchError::StageFailed {
                    record: index,
                    stage,
                    reason,
                    report,
                });
            }
        }

        info!(
            records = report.len(),
            elapsed_ms = batch_start.elapsed().as_millis() as u64,
            "batch dispatched"
        );
        Ok(report)
    }

    async fn process_record(&self, index: usize, raw: &Value) -> RecordReport {
        let record = match StreamRecord::parse(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(record = index, error = %e, "undecodable stream record; skipping");
                return RecordReport::skipped(index, e.to_string());
            }
        };

        if record.event_name != EventName::Insert {
            debug!(record = index, event_name = %record.event_name, "not an insert; skipping");
            return RecordReport::skipped(index, format!("{} record", record.event_name));
        }

        let event = match record.decode_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(record = index, error = %e, "undecodable chat event; skipping");
                return RecordReport::skipped(index, e.to_string());
            }
        };

        let mut stages = Vec::with_capacity(self.stages.len());
        for guarded in &self.stages {
            stages.push(self.run_stage(guarded, &event).await);
        }

        RecordReport {
            index,
            event_id: Some(event.id),
            disposition: RecordDisposition::Staged,
            stages,
        }
    }

    async fn run_stage(&self, guarded: &GuardedStage, event: &ChatEvent) -> StageReport {
        let start = Instant::now();
        let name = guarded.stage.name();

        let outcome = match guarded.guard.already_processed(&event.id).await {
            Ok(true) => ProcessingOutcome::SkippedDuplicate,
            Ok(false) => match guarded.stage.process(event).await {
                Ok(outcome) if outcome.marks_guard() => {
                    match guarded.guard.mark_processed(&event.id, self.window_secs).await {
                        Ok(()) => outcome,
                        Err(e) => ProcessingOutcome::Failed(format!("marking processed: {e}")),
                    }
                }
                Ok(outcome) => outcome,
                Err(e) => ProcessingOutcome::Failed(e.to_string()),
            },
            Err(e) => ProcessingOutcome::Failed(format!("checking guard: {e}")),
        };

        debug!(stage = name, id = %event.id, outcome = %outcome, "stage finished");
        StageReport {
            stage: name.to_string(),
            outcome,
            elapsed: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chatline_store::{InMemoryRepository, TableSchema};
    use chatline_types::{ManualClock, Role};
    use serde_json::json;

    use crate::error::{PipelineError, PipelineResult};

    /// Counts calls; fails while `failing` is set.
    struct Counting {
        name: &'static str,
        calls: AtomicUsize,
        failing: std::sync::atomic::AtomicBool,
    }

    impl Counting {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                failing: Default::default(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Stage for Arc<Counting> {
        fn name(&self) -> &str {
            self.name
        }

        async fn process(&self, _event: &ChatEvent) -> PipelineResult<ProcessingOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(PipelineError::generator("boom"));
            }
            Ok(ProcessingOutcome::Processed)
        }
    }

    fn guard(scope: &str) -> IdempotencyGuard {
        IdempotencyGuard::new(
            Arc::new(InMemoryRepository::new(TableSchema::new("idem", "id"))),
            scope,
            Arc::new(ManualClock::new(1_000)),
        )
    }

    fn insert(id: &str) -> Value {
        let event = ChatEvent::new(id, "c1", 100, "u1", Role::User, "hi");
        StreamRecord::insert(&event).unwrap().to_json()
    }

    #[tokio::test]
    async fn skips_non_insert_and_malformed_records() {
        let first = Counting::new("first");
        let dispatcher = Dispatcher::new(60).with_stage(first.clone(), guard("first"));

        let records = vec![
            json!({"eventName": "REMOVE", "changeImage": null}),
            json!({"eventName": "MODIFY", "changeImage": {"id": "m0"}}),
            json!({"eventName": "INSERT", "changeImage": {"id": "m1"}}),
            json!("garbage"),
            insert("m2"),
        ];
        let report = dispatcher.dispatch(&records).await.unwrap();

        assert_eq!(report.len(), 5);
        assert!(report.records[..4].iter().all(RecordReport::is_skipped));
        assert_eq!(report.records[4].event_id.as_deref(), Some("m2"));
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test]
    async fn duplicate_records_run_each_stage_once() {
        let first = Counting::new("first");
        let second = Counting::new("second");
        let dispatcher = Dispatcher::new(60)
            .with_stage(first.clone(), guard("first"))
            .with_stage(second.clone(), guard("second"));
        assert_eq!(dispatcher.stage_names(), ["first", "second"]);

        let report = dispatcher.dispatch(&[insert("m1"), insert("m1")]).await.unwrap();

        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(report.count("first", &ProcessingOutcome::Processed), 1);
        assert_eq!(report.count("second", &ProcessingOutcome::SkippedDuplicate), 1);
    }

    #[tokio::test]
    async fn failure_runs_remaining_stages_then_stops_batch() {
        let first = Counting::new("first");
        let second = Counting::new("second");
        first.failing.store(true, Ordering::SeqCst);
        let dispatcher = Dispatcher::new(60)
            .with_stage(first.clone(), guard("first"))
            .with_stage(second.clone(), guard("second"));

        let err = dispatcher
            .dispatch(&[insert("m1"), insert("m2")])
            .await
            .unwrap_err();

        let DispatchError::StageFailed {
            record,
            stage,
            report,
            ..
        } = err
        else {
            panic!("expected a stage failure");
        };
        assert_eq!(record, 0);
        assert_eq!(stage, "first");
        assert_eq!(report.len(), 1);
        assert_eq!(report.records[0].outcome("second"), Some(&ProcessingOutcome::Processed));
        assert_eq!(second.calls(), 1);

        // Redelivery retries only the stage that failed.
        first.failing.store(false, Ordering::SeqCst);
        let report = dispatcher
            .dispatch(&[insert("m1"), insert("m2")])
            .await
            .unwrap();
        assert_eq!(report.records[0].outcome("first"), Some(&ProcessingOutcome::Processed));
        assert_eq!(
            report.records[0].outcome("second"),
            Some(&ProcessingOutcome::SkippedDuplicate)
        );
        assert_eq!(first.calls(), 3);
        assert_eq!(second.calls(), 2);
    }

    #[tokio::test]
    async fn out_of_range_timestamp_is_skipped() {
        let first = Counting::new("first");
        let dispatcher = Dispatcher::new(60).with_stage(first.clone(), guard("first"));

        let event = ChatEvent::new("m1", "c1", i64::MAX, "u1", Role::User, "hi");
        let records = [StreamRecord::insert(&event).unwrap().to_json(), insert("m2")];
        let report = dispatcher.dispatch(&records).await.unwrap();

        assert!(report.records[0].is_skipped());
        assert_eq!(report.records[1].event_id.as_deref(), Some("m2"));
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test]
    async fn purge_sweeps_every_guard() {
        let repo = Arc::new(InMemoryRepository::new(TableSchema::new("idem", "id")));
        let clock = Arc::new(ManualClock::new(1_000));
        let shared = |scope: &str| IdempotencyGuard::new(repo.clone(), scope, clock.clone());
        let dispatcher = Dispatcher::new(60)
            .with_stage(Counting::new("first"), shared("first"))
            .with_stage(Counting::new("second"), shared("second"));

        dispatcher.dispatch(&[insert("m1")]).await.unwrap();
        assert_eq!(repo.len().unwrap(), 2);
        assert_eq!(dispatcher.purge_expired().await.unwrap(), 0);

        clock.advance(60);
        assert_eq!(dispatcher.purge_expired().await.unwrap(), 2);
        assert!(repo.is_empty().unwrap());
    }

    #[tokio::test]
    async fn malformed_batch_is_an_error() {
        let dispatcher = Dispatcher::new(60);
        let err = dispatcher.dispatch_bytes(b"{\"nope\": 1}").await.unwrap_err();
        assert!(matches!(err, DispatchError::MalformedBatch(_)));
        assert!(err.report().is_none());

        let report = dispatcher.dispatch_bytes(b"{\"Records\": []}").await.unwrap();
        assert!(report.is_empty());
    }
}

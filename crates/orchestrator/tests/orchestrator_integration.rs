//! End-to-end saga lifecycle tests over the in-memory store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use orchestrator::{
    RetryPolicy, SagaDefinition, SagaError, SagaExecutionOptions, SagaOrchestrator, SagaRegistry,
    SagaStep, StepError,
};
use serde::{Deserialize, Serialize};
use state_store::{InMemorySagaStore, SagaState, SagaStateStore, SagaStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TripData {
    executed: Vec<String>,
    compensated: Vec<String>,
}

/// A step whose behavior is scripted per test: it can fail fatally,
/// fail retryably a fixed number of times, or fail its compensation.
struct ScriptedStep {
    name: String,
    can_compensate: bool,
    fail_fatal: bool,
    retryable_failures_left: AtomicU32,
    fail_compensation: bool,
}

impl ScriptedStep {
    fn ok(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            can_compensate: true,
            fail_fatal: false,
            retryable_failures_left: AtomicU32::new(0),
            fail_compensation: false,
        })
    }

    fn fatal(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            can_compensate: true,
            fail_fatal: true,
            retryable_failures_left: AtomicU32::new(0),
            fail_compensation: false,
        })
    }

    fn flaky(name: &str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            can_compensate: true,
            fail_fatal: false,
            retryable_failures_left: AtomicU32::new(failures),
            fail_compensation: false,
        })
    }

    fn pivot(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            can_compensate: false,
            fail_fatal: false,
            retryable_failures_left: AtomicU32::new(0),
            fail_compensation: false,
        })
    }

    fn bad_compensation(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            can_compensate: true,
            fail_fatal: false,
            retryable_failures_left: AtomicU32::new(0),
            fail_compensation: true,
        })
    }
}

#[async_trait]
impl SagaStep<TripData> for ScriptedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_compensate(&self) -> bool {
        self.can_compensate
    }

    async fn execute(&self, data: &mut TripData) -> Result<(), StepError> {
        if self.fail_fatal {
            return Err(StepError::new(format!("{} failed", self.name)));
        }
        let left = self.retryable_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.retryable_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(StepError::retryable(format!(
                "{} temporarily unavailable",
                self.name
            )));
        }
        data.executed.push(self.name.clone());
        Ok(())
    }

    async fn compensate(&self, data: &mut TripData) -> Result<(), StepError> {
        if self.fail_compensation {
            return Err(StepError::new(format!(
                "{} compensation failed",
                self.name
            )));
        }
        data.compensated.push(self.name.clone());
        Ok(())
    }
}

struct TripSaga {
    steps: Vec<Arc<dyn SagaStep<TripData>>>,
}

impl SagaDefinition for TripSaga {
    type Data = TripData;

    fn saga_type() -> &'static str {
        "TripSaga"
    }

    fn steps(&self) -> Vec<Arc<dyn SagaStep<TripData>>> {
        self.steps.clone()
    }
}

fn harness(
    steps: Vec<Arc<dyn SagaStep<TripData>>>,
) -> (SagaOrchestrator<InMemorySagaStore>, Arc<InMemorySagaStore>) {
    let store = Arc::new(InMemorySagaStore::new());
    let mut registry = SagaRegistry::new();
    registry.register(&TripSaga { steps });
    let orchestrator = SagaOrchestrator::new(store.clone(), Arc::new(registry));
    (orchestrator, store)
}

#[tokio::test]
async fn all_steps_succeed_in_order() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::ok("book_hotel"),
        ScriptedStep::ok("charge_card"),
    ]);

    let report = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.status, SagaStatus::Completed);
    let data = report.data.unwrap();
    assert_eq!(data.executed, vec!["book_flight", "book_hotel", "charge_card"]);
    assert!(data.compensated.is_empty());

    let state = store.get(report.saga_id).await.unwrap().unwrap();
    assert_eq!(state.current_step_index, 3);
    assert_eq!(state.executed_steps.len(), state.current_step_index);
    assert!(state.errors.is_empty());
}

#[tokio::test]
async fn second_of_three_steps_failing_compensates_only_the_first() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::fatal("book_hotel"),
        ScriptedStep::ok("charge_card"),
    ]);

    let report = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(report.status, SagaStatus::Compensated);

    let state = store.get(report.saga_id).await.unwrap().unwrap();
    assert_eq!(state.executed_steps, vec!["book_flight"]);
    let data: TripData = serde_json::from_value(state.payload).unwrap();
    // The third step never ran, so only the first is undone.
    assert_eq!(data.executed, vec!["book_flight"]);
    assert_eq!(data.compensated, vec!["book_flight"]);
}

#[tokio::test]
async fn midway_failure_compensates_executed_steps_in_reverse() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::ok("book_hotel"),
        ScriptedStep::fatal("charge_card"),
    ]);

    let report = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.status, SagaStatus::Compensated);

    let state = store.get(report.saga_id).await.unwrap().unwrap();
    // The failing step never lands in executed_steps.
    assert_eq!(state.executed_steps, vec!["book_flight", "book_hotel"]);
    assert_eq!(state.current_step_index, state.executed_steps.len());
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].step.as_deref(), Some("charge_card"));

    let data: TripData = serde_json::from_value(state.payload).unwrap();
    assert_eq!(data.compensated, vec!["book_hotel", "book_flight"]);
}

#[tokio::test]
async fn non_compensable_steps_are_skipped_during_unwind() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::pivot("send_confirmation_email"),
        ScriptedStep::fatal("charge_card"),
    ]);

    let report = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    // Nothing compensable ran, so the unwind succeeds trivially.
    assert_eq!(report.status, SagaStatus::Compensated);

    let state = store.get(report.saga_id).await.unwrap().unwrap();
    let data: TripData = serde_json::from_value(state.payload).unwrap();
    assert!(data.compensated.is_empty());
    assert!(state.compensation_errors.is_empty());
}

#[tokio::test]
async fn compensation_failure_yields_partially_compensated() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::bad_compensation("book_flight"),
        ScriptedStep::ok("book_hotel"),
        ScriptedStep::fatal("charge_card"),
    ]);

    let report = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(report.status, SagaStatus::PartiallyCompensated);

    let state = store.get(report.saga_id).await.unwrap().unwrap();
    assert_eq!(state.compensation_errors.len(), 1);
    assert_eq!(
        state.compensation_errors[0].step.as_deref(),
        Some("book_flight")
    );

    // book_hotel was still undone even though book_flight's undo failed.
    let data: TripData = serde_json::from_value(state.payload).unwrap();
    assert_eq!(data.compensated, vec!["book_hotel"]);
}

#[tokio::test]
async fn retryable_failure_suspends_with_scheduled_retry() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::flaky("book_hotel", 1),
    ]);

    let report = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.status, SagaStatus::Suspended);

    let state = store.get(report.saga_id).await.unwrap().unwrap();
    assert_eq!(state.executed_steps, vec!["book_flight"]);
    assert_eq!(state.current_step_index, 1);
    assert!(state.next_retry_at.is_some());
    assert_eq!(state.errors.len(), 1);
}

#[tokio::test]
async fn resume_continues_from_suspended_step_without_replaying() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::flaky("book_hotel", 1),
        ScriptedStep::ok("charge_card"),
    ]);

    let suspended = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();
    assert_eq!(suspended.status, SagaStatus::Suspended);

    let report = orchestrator
        .resume::<TripSaga>(suspended.saga_id)
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.status, SagaStatus::Completed);
    // book_flight ran exactly once: resume picks up at the suspended step.
    let data = report.data.unwrap();
    assert_eq!(data.executed, vec!["book_flight", "book_hotel", "charge_card"]);

    let state = store.get(report.saga_id).await.unwrap().unwrap();
    assert!(state.next_retry_at.is_none());
    assert!(state.completed_at.is_some());
}

#[tokio::test]
async fn resume_with_wrong_type_is_rejected() {
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Empty {}

    struct OtherSaga;
    impl SagaDefinition for OtherSaga {
        type Data = Empty;

        fn saga_type() -> &'static str {
            "OtherSaga"
        }

        fn steps(&self) -> Vec<Arc<dyn SagaStep<Empty>>> {
            Vec::new()
        }
    }

    let (orchestrator, store) = harness(vec![ScriptedStep::flaky("book_flight", 1)]);
    let suspended = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    // Registered or not, the stored type takes precedence.
    let result = orchestrator.resume::<OtherSaga>(suspended.saga_id).await;
    assert!(matches!(result, Err(SagaError::TypeMismatch { .. })));
    let state = store.get(suspended.saga_id).await.unwrap().unwrap();
    assert_eq!(state.status, SagaStatus::Suspended);
}

#[tokio::test]
async fn retry_queue_reruns_due_sagas() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::flaky("book_hotel", 1),
    ]);

    let suspended = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    // Not due yet.
    assert_eq!(orchestrator.process_retry_queue(Utc::now()).await.unwrap(), 0);

    let later = Utc::now() + chrono::Duration::hours(1);
    assert_eq!(orchestrator.process_retry_queue(later).await.unwrap(), 1);

    let state = store.get(suspended.saga_id).await.unwrap().unwrap();
    assert_eq!(state.status, SagaStatus::Completed);
    assert_eq!(state.retry_count, 1);
}

#[tokio::test]
async fn retry_queue_quarantines_stale_payloads_and_finishes_the_tick() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::flaky("book_hotel", 1),
    ]);

    // A record written by an earlier build whose payload no longer
    // deserializes to the saga's data type.
    let mut stale = SagaState::new("TripSaga", serde_json::json!("v1-blob"));
    stale.max_retries = 3;
    stale.schedule_retry(Utc::now() - chrono::Duration::seconds(5));
    let stale_id = stale.saga_id;
    store.save(stale).await.unwrap();

    // A healthy suspended saga due in the same sweep.
    let healthy = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();
    assert_eq!(healthy.status, SagaStatus::Suspended);

    let later = Utc::now() + chrono::Duration::hours(1);
    let processed = orchestrator.process_retry_queue(later).await.unwrap();
    assert_eq!(processed, 2);

    // The broken record is failed with the fault on its trail, not left
    // Running and invisible to every later sweep.
    let stale_state = store.get(stale_id).await.unwrap().unwrap();
    assert_eq!(stale_state.status, SagaStatus::Failed);
    assert!(!stale_state.errors.is_empty());
    assert_eq!(
        store.get_pending_compensations().await.unwrap().len(),
        1
    );

    // The healthy saga in the same tick still completed.
    let healthy_state = store.get(healthy.saga_id).await.unwrap().unwrap();
    assert_eq!(healthy_state.status, SagaStatus::Completed);

    // Nothing is stranded for the next sweep.
    assert_eq!(orchestrator.process_retry_queue(later).await.unwrap(), 0);
}

#[tokio::test]
async fn resume_with_stale_payload_marks_the_saga_failed() {
    let (orchestrator, store) = harness(vec![ScriptedStep::ok("book_flight")]);

    let mut stale = SagaState::new("TripSaga", serde_json::json!(42));
    stale.mark_running();
    let saga_id = stale.saga_id;
    store.save(stale).await.unwrap();

    let result = orchestrator.resume::<TripSaga>(saga_id).await;
    assert!(matches!(result, Err(SagaError::PayloadSerialization(_))));

    let state = store.get(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status, SagaStatus::Failed);
    assert!(state.errors[0].message.contains("serialization"));
}

#[tokio::test]
async fn exhausted_retry_budget_fails_and_compensates() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::flaky("book_hotel", 10),
    ]);

    let suspended = orchestrator
        .execute::<TripSaga>(
            TripData::default(),
            SagaExecutionOptions::new().with_max_retries(1),
        )
        .await
        .unwrap();
    assert_eq!(suspended.status, SagaStatus::Suspended);

    let later = Utc::now() + chrono::Duration::hours(1);
    assert_eq!(orchestrator.process_retry_queue(later).await.unwrap(), 1);

    let state = store.get(suspended.saga_id).await.unwrap().unwrap();
    assert_eq!(state.status, SagaStatus::Compensated);
    assert_eq!(state.retry_count, 1);
    assert!(state
        .errors
        .iter()
        .any(|e| e.message.contains("retry budget exhausted")));

    let data: TripData = serde_json::from_value(state.payload).unwrap();
    assert_eq!(data.compensated, vec!["book_flight"]);

    // Nothing left in the queue afterwards.
    assert_eq!(orchestrator.process_retry_queue(later).await.unwrap(), 0);
}

#[tokio::test]
async fn backoff_grows_with_each_suspension() {
    let (orchestrator, store) = harness(vec![ScriptedStep::flaky("book_flight", 10)]);
    let orchestrator = orchestrator.with_retry_policy(RetryPolicy::new(
        chrono::Duration::seconds(10),
        chrono::Duration::hours(1),
    ));

    let suspended = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();
    let first = store.get(suspended.saga_id).await.unwrap().unwrap();
    let first_delay = first.next_retry_at.unwrap() - Utc::now();

    let later = Utc::now() + chrono::Duration::hours(2);
    orchestrator.process_retry_queue(later).await.unwrap();
    let second = store.get(suspended.saga_id).await.unwrap().unwrap();
    assert_eq!(second.status, SagaStatus::Suspended);
    let second_delay = second.next_retry_at.unwrap() - Utc::now();

    // retry_count went 0 -> 1, so the scheduled delay roughly doubles.
    assert!(second_delay > first_delay);
}

#[tokio::test]
async fn compensate_running_saga_unwinds_and_is_not_repeatable() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::ok("book_hotel"),
    ]);

    // A saga left Running, as after a crash between steps.
    let mut state = SagaState::new(
        "TripSaga",
        serde_json::to_value(TripData {
            executed: vec!["book_flight".into()],
            compensated: Vec::new(),
        })
        .unwrap(),
    );
    state.mark_running();
    state.record_step_completed("book_flight", state.payload.clone());
    let saga_id = state.saga_id;
    store.save(state).await.unwrap();

    let report = orchestrator.compensate(saga_id).await.unwrap();
    assert!(report.success);
    assert_eq!(report.status, SagaStatus::Compensated);

    let state = store.get(saga_id).await.unwrap().unwrap();
    let data: TripData = serde_json::from_value(state.payload).unwrap();
    assert_eq!(data.compensated, vec!["book_flight"]);

    // Already compensated: a second pass is refused rather than replayed.
    let again = orchestrator.compensate(saga_id).await;
    assert!(matches!(
        again,
        Err(SagaError::InvalidState {
            operation: "compensate",
            ..
        })
    ));
}

/// A step whose compensation is guarded: replaying it after a crash
/// must not double its side effect.
struct GuardedStep;

#[async_trait]
impl SagaStep<TripData> for GuardedStep {
    fn name(&self) -> &str {
        "guarded"
    }

    async fn execute(&self, data: &mut TripData) -> Result<(), StepError> {
        data.executed.push("guarded".into());
        Ok(())
    }

    async fn compensate(&self, data: &mut TripData) -> Result<(), StepError> {
        if !data.compensated.iter().any(|s| s == "guarded") {
            data.compensated.push("guarded".into());
        }
        Ok(())
    }
}

#[tokio::test]
async fn replayed_compensation_of_a_step_is_idempotent() {
    use orchestrator::{SagaBehavior, StepSaga};

    let behavior = StepSaga::new(&TripSaga {
        steps: vec![Arc::new(GuardedStep)],
    });
    let payload = serde_json::to_value(TripData {
        executed: vec!["guarded".into()],
        compensated: Vec::new(),
    })
    .unwrap();

    // Compensate once, then replay as a crash-and-retry would.
    let once = behavior.compensate_step(0, payload).await.unwrap();
    let twice = behavior.compensate_step(0, once.clone()).await.unwrap();

    assert_eq!(once, twice);
    let data: TripData = serde_json::from_value(twice).unwrap();
    assert_eq!(data.compensated, vec!["guarded"]);
}

#[tokio::test]
async fn cancel_without_compensation_marks_cancelled_only() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::flaky("book_hotel", 1),
    ]);

    let suspended = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    let report = orchestrator.cancel(suspended.saga_id, false).await.unwrap();
    assert!(report.success);
    assert_eq!(report.status, SagaStatus::Cancelled);

    let state = store.get(suspended.saga_id).await.unwrap().unwrap();
    assert_eq!(state.status, SagaStatus::Cancelled);
    assert!(state.completed_at.is_some());
    assert!(state.errors.iter().any(|e| e.message.contains("cancelled")));

    let data: TripData = serde_json::from_value(state.payload).unwrap();
    assert!(data.compensated.is_empty());

    // Terminal: further lifecycle calls are refused.
    assert!(matches!(
        orchestrator.cancel(suspended.saga_id, false).await,
        Err(SagaError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn cancel_running_saga_is_permitted() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::ok("book_hotel"),
    ]);

    let mut state = SagaState::new("TripSaga", serde_json::json!({}));
    state.mark_running();
    let saga_id = state.saga_id;
    store.save(state).await.unwrap();

    let report = orchestrator.cancel(saga_id, false).await.unwrap();
    assert_eq!(report.status, SagaStatus::Cancelled);
}

#[tokio::test]
async fn cancel_with_compensation_unwinds_but_stays_cancelled() {
    let (orchestrator, store) = harness(vec![
        ScriptedStep::ok("book_flight"),
        ScriptedStep::flaky("book_hotel", 1),
    ]);

    let suspended = orchestrator
        .execute::<TripSaga>(TripData::default(), SagaExecutionOptions::default())
        .await
        .unwrap();

    let report = orchestrator.cancel(suspended.saga_id, true).await.unwrap();
    assert_eq!(report.status, SagaStatus::Cancelled);

    let state = store.get(suspended.saga_id).await.unwrap().unwrap();
    assert_eq!(state.status, SagaStatus::Cancelled);
    let data: TripData = serde_json::from_value(state.payload).unwrap();
    assert_eq!(data.compensated, vec!["book_flight"]);
}

#[tokio::test]
async fn timeouts_are_marked_without_compensation() {
    let (orchestrator, store) = harness(vec![ScriptedStep::ok("book_flight")]);

    let mut state = SagaState::new("TripSaga", serde_json::json!({}));
    state.mark_running();
    state.begin_step("book_flight");
    state.started_at = Utc::now() - chrono::Duration::minutes(30);
    state.set_timeout(chrono::Duration::minutes(5));
    let saga_id = state.saga_id;
    store.save(state).await.unwrap();

    let marked = orchestrator.process_timeouts(Utc::now()).await.unwrap();
    assert_eq!(marked, 1);

    let state = store.get(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status, SagaStatus::TimedOut);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].step.as_deref(), Some("book_flight"));
    assert!(state.compensation_errors.is_empty());

    // Marked once: a second sweep finds nothing.
    assert_eq!(orchestrator.process_timeouts(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn cleanup_removes_only_old_terminal_records() {
    let (orchestrator, store) = harness(vec![ScriptedStep::ok("book_flight")]);

    let mut old_done = SagaState::new("TripSaga", serde_json::json!({}));
    old_done.enter_terminal(SagaStatus::Completed);
    old_done.completed_at = Some(Utc::now() - chrono::Duration::days(30));
    let old_done_id = old_done.saga_id;
    store.save(old_done).await.unwrap();

    let mut old_failed = SagaState::new("TripSaga", serde_json::json!({}));
    old_failed.mark_failed();
    let old_failed_id = old_failed.saga_id;
    store.save(old_failed).await.unwrap();

    let removed = orchestrator
        .cleanup(Utc::now() - chrono::Duration::days(7))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store.get(old_done_id).await.unwrap().is_none());
    // Failed sagas are kept for inspection and compensation.
    assert!(store.get(old_failed_id).await.unwrap().is_some());
}

//! End-to-end orchestrator scenarios with scripted collaborators.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use uuid::Uuid;

use gs_ledger::{Ledger, LedgerAction};
use gs_policy::{ChangeSet, GovernancePolicy, Operation, RuleSet, RuleSetStatus, VerdictMode};
use gs_rules::{
    EvalError, EvaluatorGateway, QueryPath, RawVerdict, RuleEvaluator, TranslationError,
    TranslationGateway, Translator,
};
use gs_sync::{
    Backoff, EventDispatcher, EventName, FileRuleStore, LogSink, Notification, Orchestrator,
    PolicyEvent, RuleSink, RunOutcome, RunSettings, SyncState, SyncStore, WorkflowRun,
};
use gs_validate::{DifferentialValidator, ValidationSuite};

// ── Scripted collaborators ──

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// Replays scripted results, then renders the document as rule text.
#[derive(Default)]
struct ScriptedTranslator {
    script: Mutex<VecDeque<Result<String, TranslationError>>>,
    calls: AtomicUsize,
    hook: Option<Hook>,
}

impl ScriptedTranslator {
    fn new(script: Vec<Result<String, TranslationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    fn with_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Translator for ScriptedTranslator {
    fn translate(&self, policy: &GovernancePolicy) -> Result<String, TranslationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.hook {
            hook(call);
        }
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(format!(
                "package aws.scp\n# {}",
                serde_json::to_string(&policy.document).unwrap()
            )),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Denies an operation when its action appears in the rule text.
#[derive(Default)]
struct TextEvaluator {
    compile_failures: Mutex<VecDeque<EvalError>>,
}

impl TextEvaluator {
    fn failing_compile(errors: Vec<EvalError>) -> Self {
        Self {
            compile_failures: Mutex::new(errors.into()),
        }
    }
}

impl RuleEvaluator for TextEvaluator {
    fn compile(&self, _rules: &str) -> Result<(), EvalError> {
        match self.compile_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn evaluate(&self, rules: &str, _query: &QueryPath, input: &Value) -> Result<RawVerdict, EvalError> {
        let action = input["action"].as_str().unwrap_or_default();
        if rules.contains(action) {
            Ok(RawVerdict::Collection(vec![format!(
                "SCP: {} is explicitly denied",
                action
            )]))
        } else {
            Ok(RawVerdict::Collection(Vec::new()))
        }
    }

    fn name(&self) -> &str {
        "text"
    }
}

// ── Harness ──

struct Harness {
    dir: TempDir,
    sink: Arc<FileRuleStore>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(
            FileRuleStore::open(dir.path().join("rules"), dir.path().join("ledger.jsonl")).unwrap(),
        );
        Self { dir, sink }
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    fn notifications_path(&self) -> PathBuf {
        self.dir.path().join("notifications.jsonl")
    }

    fn ledger_path(&self) -> PathBuf {
        self.dir.path().join("ledger.jsonl")
    }

    fn store(&self) -> SyncStore {
        SyncStore::open(self.state_dir()).unwrap()
    }

    fn orchestrator(
        &self,
        translator: Arc<ScriptedTranslator>,
        evaluator: TextEvaluator,
        owner: &str,
    ) -> Orchestrator {
        let translation = TranslationGateway::new(translator, Duration::from_secs(5));
        let gateway = EvaluatorGateway::new(Arc::new(evaluator), Duration::from_secs(5));
        let notifier = EventDispatcher::new().with_sink(Box::new(LogSink::new(self.notifications_path())));
        Orchestrator::new(
            self.store(),
            translation,
            DifferentialValidator::new(Arc::new(gateway)),
            self.sink.clone(),
            notifier,
            settings(),
        )
        .with_owner(owner)
        .with_suite(ValidationSuite::new())
    }

    fn notifications(&self) -> Vec<Notification> {
        LogSink::read_all(self.notifications_path()).unwrap()
    }

    fn failures(&self) -> usize {
        self.notifications()
            .iter()
            .filter(|n| n.event_type() == "run_failed")
            .count()
    }

    fn run(&self, run_id: Uuid) -> WorkflowRun {
        self.store().load_run(run_id).unwrap().unwrap()
    }

    fn ledger_actions(&self) -> Vec<LedgerAction> {
        Ledger::read_all(self.ledger_path())
            .unwrap()
            .iter()
            .map(|e| e.action)
            .collect()
    }
}

fn settings() -> RunSettings {
    RunSettings {
        budget: 5,
        backoff: Backoff::none(),
        lease_ttl: Duration::from_secs(60),
        mode: VerdictMode::DenySet,
        query: QueryPath::default(),
    }
}

fn deny(action: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{"Effect": "Deny", "Action": action, "Resource": "*"}]
    })
}

fn update(policy_id: &str, action: &str) -> PolicyEvent {
    PolicyEvent::new(EventName::UpdatePolicy, policy_id, Some(deny(action))).with_name("guardrail")
}

fn transient() -> Result<String, TranslationError> {
    Err(TranslationError::transient("rate limited"))
}

fn candidate(action: &str) -> ChangeSet {
    ChangeSet::new(vec![Operation::new(action, "arn:aws:s3:::bucket/prod-x")])
}

fn run_id(report: &gs_sync::RunReport) -> Uuid {
    report.run_id.expect("report has a run")
}

// ── Retry discipline ──

#[test]
fn transient_translation_errors_are_retried_until_success() {
    let h = Harness::new();
    let translator = Arc::new(ScriptedTranslator::new(vec![transient(), transient(), transient()]));
    let orch = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-a");

    let report = orch.handle_event(update("p-1", "s3:DeleteBucket")).unwrap();

    let run = h.run(run_id(&report));
    assert!(run.visited(SyncState::Validating));
    assert!(!run.visited(SyncState::Failed));
    assert_eq!(run.translate_attempts, 4);
    assert_eq!(translator.calls(), 4);
    let retries = run
        .transitions
        .iter()
        .filter(|t| t.from == SyncState::Translating && t.to == SyncState::Translating)
        .count();
    assert_eq!(retries, 3);
    assert_eq!(report.outcome, RunOutcome::Committed);
    assert_eq!(h.failures(), 0);
}

#[test]
fn permanent_translation_error_fails_without_retry() {
    let h = Harness::new();
    let translator = Arc::new(ScriptedTranslator::new(vec![Err(TranslationError::permanent(
        "document rejected",
    ))]));
    let orch = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-a");

    let report = orch.handle_event(update("p-1", "s3:DeleteBucket")).unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.state, Some(SyncState::Failed));
    assert_eq!(report.translate_attempts, 1);
    assert_eq!(translator.calls(), 1);
    let error = report.last_error.unwrap();
    assert_eq!(error.kind, "translation_permanent");
    assert_eq!(error.attempt, 1);
    assert_eq!(h.failures(), 1);
    assert_eq!(h.ledger_actions(), vec![LedgerAction::Failed]);
    assert!(h.sink.active("p-1").unwrap().is_none());
}

#[test]
fn exhausted_budget_fails_with_last_error() {
    let h = Harness::new();
    let translator = Arc::new(ScriptedTranslator::new((0..10).map(|_| transient()).collect()));
    let orch = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-a");

    let report = orch.handle_event(update("p-1", "s3:*")).unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(translator.calls(), 5);
    let error = report.last_error.unwrap();
    assert_eq!(error.kind, "translation_transient");
    assert_eq!(error.attempt, 5);
    assert!(error.message.contains("rate limited"));

    let failed = h
        .notifications()
        .into_iter()
        .find(|n| n.event_type() == "run_failed")
        .unwrap();
    match failed {
        Notification::RunFailed { attempts, error_kind, .. } => {
            assert_eq!(attempts, 5);
            assert_eq!(error_kind, "translation_transient");
        }
        other => panic!("unexpected notification {:?}", other),
    }
}

#[test]
fn event_counter_counts_against_the_budget() {
    let h = Harness::new();
    let translator = Arc::new(ScriptedTranslator::new((0..10).map(|_| transient()).collect()));
    let orch = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-a");

    let report = orch
        .handle_event(update("p-1", "s3:*").with_counter(3))
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(translator.calls(), 2);
    assert_eq!(report.translate_attempts, 5);
}

#[test]
fn malformed_policy_is_a_permanent_failure() {
    let h = Harness::new();
    let translator = Arc::new(ScriptedTranslator::default());
    let orch = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-a");
    let event = PolicyEvent::new(
        EventName::CreatePolicy,
        "p-1",
        Some(json!({"Statement": [{"Effect": "Deny", "Action": "s3:*", "NotAction": "ec2:*"}]})),
    );

    let report = orch.handle_event(event).unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.translate_attempts, 1);
    assert_eq!(report.last_error.unwrap().kind, "translation_permanent");
    assert_eq!(translator.calls(), 0);
    assert_eq!(h.failures(), 1);
}

#[test]
fn transient_evaluator_errors_are_retried() {
    let h = Harness::new();
    let evaluator = TextEvaluator::failing_compile(vec![
        EvalError::Engine { message: "opa crashed".into() },
        EvalError::Timeout { after_ms: 10_000 },
    ]);
    let orch = h.orchestrator(Arc::new(ScriptedTranslator::default()), evaluator, "w-a");

    let report = orch.handle_event(update("p-1", "s3:*")).unwrap();

    assert_eq!(report.outcome, RunOutcome::Committed);
    assert_eq!(report.validate_attempts, 3);
    let run = h.run(run_id(&report));
    let retries = run
        .transitions
        .iter()
        .filter(|t| t.from == SyncState::Validating && t.to == SyncState::Validating)
        .count();
    assert_eq!(retries, 2);
}

#[test]
fn syntax_error_fails_and_invalidates_the_rule_set() {
    let h = Harness::new();
    let evaluator = TextEvaluator::failing_compile(vec![EvalError::Syntax {
        message: "rego_parse_error: unexpected eof".into(),
    }]);
    let orch = h.orchestrator(Arc::new(ScriptedTranslator::default()), evaluator, "w-a");

    let report = orch.handle_event(update("p-1", "s3:*")).unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.validate_attempts, 1);
    assert_eq!(report.last_error.as_ref().unwrap().kind, "syntax");
    let run = h.run(run_id(&report));
    assert_eq!(run.rule_set.unwrap().status, RuleSetStatus::Invalid);
    assert_eq!(h.failures(), 1);
}

// ── Commit, rejection, idempotence, precedence ──

#[test]
fn duplicate_event_is_a_no_op() {
    let h = Harness::new();
    let translator = Arc::new(ScriptedTranslator::default());
    let orch = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-a");

    let first = orch.handle_event(update("p-1", "s3:DeleteBucket")).unwrap();
    let second = orch.handle_event(update("p-1", "s3:DeleteBucket")).unwrap();

    assert_eq!(first.outcome, RunOutcome::Committed);
    assert_eq!(second.outcome, RunOutcome::Duplicate);
    assert_eq!(second.generation, Some(1));
    assert!(second.run_id.is_none());
    assert_eq!(translator.calls(), 1);
    assert_eq!(h.ledger_actions(), vec![LedgerAction::Committed]);
    assert_eq!(h.store().current_generation("p-1").unwrap(), 1);
}

#[test]
fn newer_content_supersedes_the_active_rule_set() {
    let h = Harness::new();
    let orch = h.orchestrator(Arc::new(ScriptedTranslator::default()), TextEvaluator::default(), "w-a");

    orch.handle_event(update("p-1", "s3:DeleteBucket")).unwrap();
    let second = orch.handle_event(update("p-1", "ec2:TerminateInstances")).unwrap();

    assert_eq!(second.outcome, RunOutcome::Committed);
    let active = h.sink.active("p-1").unwrap().unwrap();
    assert_eq!(active.generation(), 2);
    assert_eq!(active.rule_set.status, RuleSetStatus::Valid);

    let committed: Vec<_> = h
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::RuleSetCommitted { generation, superseded_generation, .. } => {
                Some((generation, superseded_generation))
            }
            _ => None,
        })
        .collect();
    assert_eq!(committed, vec![(1, None), (2, Some(1))]);
    assert_eq!(
        h.ledger_actions(),
        vec![LedgerAction::Committed, LedgerAction::Superseded, LedgerAction::Committed]
    );
    assert_eq!(Ledger::verify_chain(h.ledger_path()).unwrap(), 3);
}

#[test]
fn mismatch_rejects_and_keeps_the_prior_rule_set() {
    let h = Harness::new();
    let orch = h
        .orchestrator(Arc::new(ScriptedTranslator::default()), TextEvaluator::default(), "w-a")
        .with_suite(ValidationSuite::new().with_candidate(candidate("s3:DeleteBucket")));

    let first = orch.handle_event(update("p-1", "ec2:TerminateInstances")).unwrap();
    assert_eq!(first.outcome, RunOutcome::Committed);

    let second = orch.handle_event(update("p-1", "s3:DeleteBucket")).unwrap();
    assert_eq!(second.outcome, RunOutcome::Rejected);

    let active = h.sink.active("p-1").unwrap().unwrap();
    assert_eq!(active.generation(), 1);

    let run = h.run(run_id(&second));
    assert!(run.visited(SyncState::Rejecting));
    assert_eq!(run.rule_set.unwrap().status, RuleSetStatus::Invalid);

    let violation = h
        .notifications()
        .into_iter()
        .find(|n| n.event_type() == "violation_detected")
        .unwrap();
    match violation {
        Notification::ViolationDetected { policy_name, mismatches, .. } => {
            assert_eq!(policy_name, "guardrail");
            assert_eq!(mismatches.len(), 1);
            assert_eq!(mismatches[0].action, "s3:DeleteBucket");
            assert_eq!(mismatches[0].resource, "arn:aws:s3:::bucket/prod-x");
        }
        other => panic!("unexpected notification {:?}", other),
    }
    assert_eq!(
        h.ledger_actions(),
        vec![LedgerAction::Committed, LedgerAction::Rejected]
    );
}

#[test]
fn older_generation_never_overwrites_a_newer_commit() {
    let h = Harness::new();
    let sink = h.sink.clone();
    let state_dir = h.state_dir();
    // Another worker allocates and commits a newer generation while this run
    // is translating.
    let translator = Arc::new(ScriptedTranslator::default().with_hook(move |call| {
        if call != 1 {
            return;
        }
        let store = SyncStore::open(&state_dir).unwrap();
        let generation = store.next_generation("p-1").unwrap();
        let policy = update("p-1", "ec2:*").to_policy().unwrap();
        sink.commit(&RuleSet::pending(&policy, generation, "newer"), Uuid::new_v4())
            .unwrap();
    }));
    let orch = h.orchestrator(translator, TextEvaluator::default(), "w-a");

    let report = orch.handle_event(update("p-1", "s3:*")).unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.generation, Some(1));
    let active = h.sink.active("p-1").unwrap().unwrap();
    assert_eq!(active.generation(), 2);
    assert_eq!(active.rule_set.rule_text, "newer");

    let run = h.run(run_id(&report));
    assert!(run.visited(SyncState::Committing));
    assert_eq!(run.rule_set.unwrap().status, RuleSetStatus::Superseded);
    assert!(run.cancel_reason.unwrap().contains("generation 2"));
}

// ── Single flight, cancellation, deletion ──

#[test]
fn concurrent_event_is_queued_then_drained() {
    let h = Harness::new();
    let newer = update("p-1", "ec2:TerminateInstances");
    let worker_b = Arc::new(h.orchestrator(
        Arc::new(ScriptedTranslator::default()),
        TextEvaluator::default(),
        "w-b",
    ));
    let queued = Arc::new(Mutex::new(None));

    let b = worker_b.clone();
    let seen = queued.clone();
    let event = newer.clone();
    let translator = Arc::new(ScriptedTranslator::default().with_hook(move |call| {
        if call == 1 {
            *seen.lock().unwrap() = Some(b.handle_event(event.clone()).unwrap());
        }
    }));
    let worker_a = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-a");

    let report = worker_a.handle_event(update("p-1", "s3:DeleteBucket")).unwrap();

    let queued = queued.lock().unwrap().clone().unwrap();
    assert_eq!(queued.outcome, RunOutcome::Queued);
    assert_eq!(report.outcome, RunOutcome::Cancelled);

    let active = h.sink.active("p-1").unwrap().unwrap();
    assert_eq!(active.source_hash(), newer.content_hash().unwrap());
    assert_eq!(active.generation(), 2);
    assert_eq!(translator.calls(), 2);
    assert!(h.store().lease("p-1").unwrap().is_none());
    assert!(h.store().peek_pending("p-1").unwrap().is_none());
}

#[test]
fn identical_event_is_coalesced_onto_the_in_flight_run() {
    let h = Harness::new();
    let store_dir = h.state_dir();
    let translator = Arc::new(ScriptedTranslator::default().with_hook(move |call| {
        if call == 1 {
            SyncStore::open(&store_dir)
                .unwrap()
                .enqueue(&update("p-1", "s3:DeleteBucket"))
                .unwrap();
        }
    }));
    let orch = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-a");

    let report = orch.handle_event(update("p-1", "s3:DeleteBucket")).unwrap();

    assert_eq!(report.outcome, RunOutcome::Committed);
    assert_eq!(translator.calls(), 1);
    assert_eq!(h.ledger_actions(), vec![LedgerAction::Committed]);
}

#[test]
fn cancellation_is_honoured_between_retries() {
    let h = Harness::new();
    let store_dir = h.state_dir();
    let translator = Arc::new(
        ScriptedTranslator::new(vec![transient(), transient()]).with_hook(move |call| {
            if call == 1 {
                SyncStore::open(&store_dir).unwrap().request_cancel("p-1").unwrap();
            }
        }),
    );
    let orch = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-a");

    let report = orch.handle_event(update("p-1", "s3:*")).unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(translator.calls(), 1);
    assert!(h.sink.active("p-1").unwrap().is_none());
    assert!(!h.store().cancel_requested("p-1"));
    assert!(h.store().lease("p-1").unwrap().is_none());
    assert!(h
        .notifications()
        .iter()
        .any(|n| n.event_type() == "run_cancelled"));
}

#[test]
fn delete_retires_the_active_rule_set() {
    let h = Harness::new();
    let orch = h.orchestrator(Arc::new(ScriptedTranslator::default()), TextEvaluator::default(), "w-a");
    orch.handle_event(update("p-1", "s3:*")).unwrap();

    let delete = PolicyEvent::new(EventName::DeletePolicy, "p-1", None);
    let report = orch.handle_event(delete).unwrap();

    assert_eq!(report.outcome, RunOutcome::Retired);
    assert!(h.sink.active("p-1").unwrap().is_none());
    assert!(h
        .notifications()
        .iter()
        .any(|n| matches!(n, Notification::PolicyRetired { generation: Some(1), .. })));
    assert_eq!(
        h.ledger_actions(),
        vec![LedgerAction::Committed, LedgerAction::Retired]
    );

    // Re-creating the policy continues the generation sequence.
    let again = orch.handle_event(update("p-1", "s3:*")).unwrap();
    assert_eq!(again.outcome, RunOutcome::Committed);
    assert_eq!(again.generation, Some(2));
}

// ── Recovery ──

fn checkpoint_after_translation(h: &Harness, owner: &str) -> WorkflowRun {
    let store = h.store();
    let event = update("p-1", "s3:DeleteBucket");
    let policy = event.to_policy().unwrap();
    let generation = store.next_generation("p-1").unwrap();
    let mut run = WorkflowRun::new(Uuid::new_v4(), event, generation, owner);
    run.transition(SyncState::Translating).unwrap();
    run.translate_attempts = 2;
    run.rule_set = Some(RuleSet::pending(&policy, generation, "package aws.scp"));
    run.transition(SyncState::Validating).unwrap();
    store.save_run(&run).unwrap();
    run
}

#[test]
fn resume_continues_from_the_checkpoint() {
    let h = Harness::new();
    let crashed = checkpoint_after_translation(&h, "w-crashed");
    let translator = Arc::new(ScriptedTranslator::default());
    let orch = h.orchestrator(translator.clone(), TextEvaluator::default(), "w-b");

    let reports = orch.resume_incomplete().unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].run_id, Some(crashed.run_id));
    assert_eq!(reports[0].outcome, RunOutcome::Committed);
    assert_eq!(reports[0].translate_attempts, 2);
    assert_eq!(translator.calls(), 0);

    let active = h.sink.active("p-1").unwrap().unwrap();
    assert_eq!(active.rule_set.rule_text, "package aws.scp");
    assert_eq!(h.run(crashed.run_id).owner, "w-b");
    assert!(h.store().incomplete_runs().unwrap().is_empty());
}

#[test]
fn resume_skips_runs_leased_by_a_live_worker() {
    let h = Harness::new();
    let crashed = checkpoint_after_translation(&h, "w-a");
    h.store()
        .acquire_for_resume("p-1", "w-a", crashed.run_id, Duration::from_secs(60))
        .unwrap()
        .unwrap();
    let orch = h.orchestrator(Arc::new(ScriptedTranslator::default()), TextEvaluator::default(), "w-b");

    let reports = orch.resume_incomplete().unwrap();

    assert!(reports.is_empty());
    assert_eq!(h.store().incomplete_runs().unwrap().len(), 1);
}

#[test]
fn independent_policies_do_not_contend() {
    let h = Harness::new();
    let orch = Arc::new(h.orchestrator(
        Arc::new(ScriptedTranslator::default()),
        TextEvaluator::default(),
        "w-a",
    ));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orch = orch.clone();
            std::thread::spawn(move || orch.handle_event(update(&format!("p-{i}"), "s3:*")).unwrap())
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().outcome).collect();

    assert!(outcomes.iter().all(|o| *o == RunOutcome::Committed));
    assert_eq!(h.sink.list_active().unwrap().len(), 4);
    assert_eq!(Ledger::verify_chain(h.ledger_path()).unwrap(), 4);
}

// orchestrator.rs — The synchronization state machine.
//
// One Orchestrator drives runs for any number of policy identifiers. Each
// identifier is single-flight: a run must hold the identifier's lease in the
// durable store, and an event arriving while the lease is held is parked in
// the identifier's pending slot and drained when the holder finishes.
//
// Every transition is checkpointed before the next external call, so a run
// interrupted anywhere can be resumed by any worker once its lease expires.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use gs_policy::{RuleSet, RuleSetStatus, VerdictMode};
use gs_rules::{QueryPath, TranslationError, TranslationGateway};
use gs_validate::{CaseGenerator, DifferentialValidator, ReferenceEvaluator, ReportStatus, ValidationSuite};

use crate::backoff::Backoff;
use crate::config::SyncConfig;
use crate::error::{PersistenceError, SyncError};
use crate::event::PolicyEvent;
use crate::notify::{EventDispatcher, Notification};
use crate::sink::{CommitOutcome, RuleSink};
use crate::store::{LeaseAcquisition, PendingCheck, SyncStore};
use crate::workflow::{ErrorRecord, RunOutcome, SyncState, WorkflowRun};

/// Knobs that shape a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Total attempts per stage.
    pub budget: u32,
    pub backoff: Backoff,
    pub lease_ttl: Duration,
    pub mode: VerdictMode,
    pub query: QueryPath,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_parts(&SyncConfig::default(), QueryPath::default())
    }
}

impl RunSettings {
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let query = QueryPath::parse(&config.validation.query).map_err(|e| SyncError::Config {
            path: "validation.query".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_parts(config, query))
    }

    fn from_parts(config: &SyncConfig, query: QueryPath) -> Self {
        Self {
            budget: config.retry.budget.max(1),
            backoff: Backoff::from_config(&config.retry),
            lease_ttl: config.lease.ttl(),
            mode: config.validation.mode,
            query,
        }
    }
}

/// Why a run stopped without reaching a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// An operator asked for it.
    Requested,
    /// A different change for the same identifier is waiting.
    Superseded,
    /// Another worker took over the lease.
    LeaseLost,
    /// A newer generation was committed first.
    StaleGeneration { active_generation: u64 },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => write!(f, "cancellation requested"),
            CancelReason::Superseded => write!(f, "superseded by a newer event"),
            CancelReason::LeaseLost => write!(f, "lease lost to another worker"),
            CancelReason::StaleGeneration { active_generation } => {
                write!(f, "generation {} is already active", active_generation)
            }
        }
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// `None` when no run was created (duplicate or queued).
    pub run_id: Option<Uuid>,
    pub policy_id: String,
    pub outcome: RunOutcome,
    pub generation: Option<u64>,
    pub state: Option<SyncState>,
    pub translate_attempts: u32,
    pub validate_attempts: u32,
    pub last_error: Option<ErrorRecord>,
}

impl RunReport {
    fn from_run(run: &WorkflowRun) -> Self {
        Self {
            run_id: Some(run.run_id),
            policy_id: run.policy_id.clone(),
            outcome: run.outcome.unwrap_or(RunOutcome::Failed),
            generation: (run.generation > 0).then_some(run.generation),
            state: Some(run.state),
            translate_attempts: run.translate_attempts,
            validate_attempts: run.validate_attempts,
            last_error: run.last_error.clone(),
        }
    }

    fn without_run(policy_id: &str, outcome: RunOutcome, generation: Option<u64>) -> Self {
        Self {
            run_id: None,
            policy_id: policy_id.to_string(),
            outcome,
            generation,
            state: None,
            translate_attempts: 0,
            validate_attempts: 0,
            last_error: None,
        }
    }
}

pub struct Orchestrator {
    owner: String,
    store: SyncStore,
    translation: TranslationGateway,
    validator: DifferentialValidator,
    suite: ValidationSuite,
    sink: Arc<dyn RuleSink>,
    notifier: EventDispatcher,
    settings: RunSettings,
}

impl Orchestrator {
    /// Validation defaults to fidelity cases derived from each policy.
    pub fn new(
        store: SyncStore,
        translation: TranslationGateway,
        validator: DifferentialValidator,
        sink: Arc<dyn RuleSink>,
        notifier: EventDispatcher,
        settings: RunSettings,
    ) -> Self {
        Self {
            owner: default_owner(),
            store,
            translation,
            validator,
            suite: ValidationSuite::new().with_fidelity(CaseGenerator::new(ReferenceEvaluator::default())),
            sink,
            notifier,
            settings,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_suite(mut self, suite: ValidationSuite) -> Self {
        self.suite = suite;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    pub fn sink(&self) -> &dyn RuleSink {
        self.sink.as_ref()
    }

    /// Process one inbound event to a terminal outcome, then drain any event
    /// queued for the same identifier meanwhile. Returns the outcome of
    /// `event` itself.
    pub fn handle_event(&self, event: PolicyEvent) -> Result<RunReport, SyncError> {
        let policy_id = event.policy_id.clone();
        let run_id = Uuid::new_v4();

        match self
            .store
            .try_acquire(&policy_id, &self.owner, run_id, self.settings.lease_ttl, &event)?
        {
            LeaseAcquisition::Held(lease) => {
                tracing::info!(
                    policy_id = %policy_id,
                    holder = %lease.owner,
                    "identifier busy; event queued"
                );
                return Ok(RunReport::without_run(&policy_id, RunOutcome::Queued, None));
            }
            LeaseAcquisition::Acquired(_) => {}
        }

        let report = self.guarded(&policy_id, run_id, || self.process(event, run_id))?;
        self.drain(&policy_id, run_id)?;
        Ok(report)
    }

    /// Re-enter every interrupted run whose lease is free, expired, or ours.
    pub fn resume_incomplete(&self) -> Result<Vec<RunReport>, SyncError> {
        let mut reports = Vec::new();
        for mut run in self.store.incomplete_runs()? {
            let lease = self.store.acquire_for_resume(
                &run.policy_id,
                &self.owner,
                run.run_id,
                self.settings.lease_ttl,
            )?;
            if lease.is_none() {
                tracing::info!(
                    run_id = %run.run_id,
                    policy_id = %run.policy_id,
                    "run is leased by a live worker; skipping"
                );
                continue;
            }

            tracing::info!(
                run_id = %run.run_id,
                policy_id = %run.policy_id,
                state = %run.state,
                translate_attempts = run.translate_attempts,
                "resuming run"
            );
            run.owner = self.owner.clone();
            let policy_id = run.policy_id.clone();
            let run_id = run.run_id;
            self.guarded(&policy_id, run_id, || self.drive(&mut run))?;
            reports.push(RunReport::from_run(&run));
            reports.extend(self.drain(&policy_id, run_id)?);
        }
        Ok(reports)
    }

    /// Ask the in-flight run for `policy_id` to stop at its next checkpoint.
    pub fn request_cancel(&self, policy_id: &str) -> Result<(), SyncError> {
        self.store.request_cancel(policy_id)?;
        tracing::info!(policy_id = %policy_id, "cancellation requested");
        Ok(())
    }

    /// Run `f` under the lease, releasing it if `f` fails.
    fn guarded<T>(
        &self,
        policy_id: &str,
        run_id: Uuid,
        f: impl FnOnce() -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let result = f();
        if result.is_err() {
            if let Err(e) = self.store.release_lease(policy_id, &self.owner, run_id) {
                tracing::warn!(policy_id = %policy_id, "failed to release lease: {}", e);
            }
        }
        result
    }

    /// Release the lease, processing queued events until none remain.
    fn drain(&self, policy_id: &str, mut run_id: Uuid) -> Result<Vec<RunReport>, SyncError> {
        let mut reports = Vec::new();
        loop {
            let next_run_id = Uuid::new_v4();
            let next = self.store.release_or_handoff(
                policy_id,
                &self.owner,
                run_id,
                next_run_id,
                self.settings.lease_ttl,
            )?;
            let Some(event) = next else {
                return Ok(reports);
            };
            tracing::info!(policy_id = %policy_id, event = %event.event_name, "draining queued event");
            run_id = next_run_id;
            let report = self.guarded(policy_id, run_id, || self.process(event, run_id))?;
            tracing::info!(policy_id = %policy_id, outcome = %report.outcome, "queued event processed");
            reports.push(report);
        }
    }

    fn process(&self, event: PolicyEvent, run_id: Uuid) -> Result<RunReport, SyncError> {
        // A marker left from an earlier run does not apply to this one.
        self.store.clear_cancel(&event.policy_id)?;

        if !event.is_delete() {
            if let (Some(hash), Some(active)) = (event.content_hash(), self.sink.active(&event.policy_id)?) {
                if active.source_hash() == hash {
                    tracing::info!(
                        policy_id = %event.policy_id,
                        generation = active.generation(),
                        "content already active; nothing to do"
                    );
                    return Ok(RunReport::without_run(
                        &event.policy_id,
                        RunOutcome::Duplicate,
                        Some(active.generation()),
                    ));
                }
            }
        }

        let generation = if event.is_delete() {
            0
        } else {
            self.store.next_generation(&event.policy_id)?
        };
        let mut run = WorkflowRun::new(run_id, event, generation, &self.owner);
        self.store.save_run(&run)?;
        tracing::info!(
            run_id = %run.run_id,
            policy_id = %run.policy_id,
            generation,
            event = %run.event_name,
            "run started"
        );

        self.drive(&mut run)?;
        Ok(RunReport::from_run(&run))
    }

    fn drive(&self, run: &mut WorkflowRun) -> Result<(), SyncError> {
        loop {
            match run.state {
                SyncState::Idle if run.outcome.is_none() => {
                    if run.event.is_delete() {
                        self.retire(run)?;
                    } else {
                        self.advance(run, SyncState::Translating)?;
                    }
                }
                SyncState::Translating => self.translate(run)?,
                SyncState::Validating => self.validate(run)?,
                SyncState::Committing => self.commit(run)?,
                SyncState::Rejecting => self.reject(run)?,
                SyncState::Idle | SyncState::Failed => return Ok(()),
            }
        }
    }

    /// Transition and checkpoint.
    fn advance(&self, run: &mut WorkflowRun, next: SyncState) -> Result<(), SyncError> {
        let from = run.state;
        run.transition(next)?;
        self.store.save_run(run)?;
        tracing::info!(
            run_id = %run.run_id,
            policy_id = %run.policy_id,
            generation = run.generation,
            "{} -> {}",
            from,
            next
        );
        Ok(())
    }

    fn translate(&self, run: &mut WorkflowRun) -> Result<(), SyncError> {
        let policy = match run.event.to_policy() {
            Ok(policy) => policy,
            Err(e) => {
                run.translate_attempts += 1;
                let err = TranslationError::permanent(e.to_string());
                let record = ErrorRecord::new(
                    SyncState::Translating,
                    err.kind(),
                    err.to_string(),
                    run.translate_attempts,
                    false,
                );
                return self.fail(run, record);
            }
        };

        loop {
            if self.interrupted(run)? {
                return Ok(());
            }
            if run.translate_attempts >= self.settings.budget {
                return self.fail(run, self.exhausted(SyncState::Translating, run.translate_attempts));
            }

            run.translate_attempts += 1;
            let attempt = run.translate_attempts;
            tracing::debug!(
                policy_id = %run.policy_id,
                translator = self.translation.translator_name(),
                attempt,
                "translating"
            );

            match self.translation.translate(&policy) {
                Ok(text) => {
                    run.rule_set = Some(RuleSet::pending(&policy, run.generation, text));
                    return self.advance(run, SyncState::Validating);
                }
                Err(e) => {
                    let record = ErrorRecord::new(
                        SyncState::Translating,
                        e.kind(),
                        e.to_string(),
                        attempt,
                        e.is_transient(),
                    );
                    if !e.is_transient() || attempt >= self.settings.budget {
                        return self.fail(run, record);
                    }
                    tracing::warn!(
                        policy_id = %run.policy_id,
                        attempt,
                        budget = self.settings.budget,
                        "translation failed, retrying: {}",
                        e
                    );
                    run.record_error(record);
                    self.advance(run, SyncState::Translating)?;
                    self.settings.backoff.wait(attempt);
                }
            }
        }
    }

    fn validate(&self, run: &mut WorkflowRun) -> Result<(), SyncError> {
        let policy = run.event.to_policy()?;
        let Some(rule_set) = run.rule_set.clone() else {
            let record = ErrorRecord::new(
                SyncState::Validating,
                "missing_rule_set",
                "no rule set was recorded before validation",
                run.validate_attempts,
                false,
            );
            return self.fail(run, record);
        };

        loop {
            if self.interrupted(run)? {
                return Ok(());
            }
            if run.validate_attempts >= self.settings.budget {
                return self.fail(run, self.exhausted(SyncState::Validating, run.validate_attempts));
            }

            run.validate_attempts += 1;
            let attempt = run.validate_attempts;
            let report = match self.suite.run(
                &self.validator,
                &policy,
                &rule_set,
                self.settings.mode,
                &self.settings.query,
            ) {
                Ok(report) => report,
                Err(e) => {
                    let record = ErrorRecord::new(
                        SyncState::Validating,
                        "validation_setup",
                        e.to_string(),
                        attempt,
                        false,
                    );
                    return self.fail(run, record);
                }
            };

            tracing::info!(
                policy_id = %run.policy_id,
                generation = run.generation,
                status = %report.status,
                total = report.total(),
                mismatches = report.mismatches.len(),
                attempt,
                "validation stage complete"
            );

            match report.status {
                ReportStatus::Match => {
                    run.report = Some(report);
                    return self.advance(run, SyncState::Committing);
                }
                ReportStatus::Mismatch => {
                    run.report = Some(report);
                    return self.advance(run, SyncState::Rejecting);
                }
                ReportStatus::EvalError => {
                    let transient = report.is_transient_failure();
                    let (kind, message) = report
                        .failures()
                        .first()
                        .map(|f| (f.kind.clone(), f.message.clone()))
                        .unwrap_or_else(|| ("eval_error".to_string(), "evaluation failed".to_string()));
                    let record = ErrorRecord::new(SyncState::Validating, kind, message, attempt, transient);
                    run.report = Some(report);
                    if !transient || attempt >= self.settings.budget {
                        return self.fail(run, record);
                    }
                    tracing::warn!(
                        policy_id = %run.policy_id,
                        attempt,
                        budget = self.settings.budget,
                        "evaluation failed, retrying: {}",
                        record.message
                    );
                    run.record_error(record);
                    self.advance(run, SyncState::Validating)?;
                    self.settings.backoff.wait(attempt);
                }
            }
        }
    }

    fn commit(&self, run: &mut WorkflowRun) -> Result<(), SyncError> {
        if self.interrupted(run)? {
            return Ok(());
        }
        let Some(rule_set) = run.rule_set.clone() else {
            let record = ErrorRecord::new(
                SyncState::Committing,
                "missing_rule_set",
                "no rule set to commit",
                run.commit_attempts,
                false,
            );
            return self.fail(run, record);
        };

        let run_id = run.run_id;
        match self.persist(run, || self.sink.commit(&rule_set, run_id)) {
            Ok(CommitOutcome::Committed(receipt)) => {
                let superseded_generation = receipt.superseded.as_ref().map(|s| s.generation);
                run.rule_set = Some(receipt.committed);
                run.finish(RunOutcome::Committed);
                self.advance(run, SyncState::Idle)?;
                self.notifier.dispatch(&Notification::RuleSetCommitted {
                    run_id,
                    policy_id: run.policy_id.clone(),
                    policy_name: run.policy_name.clone(),
                    generation: run.generation,
                    source_hash: run.content_hash.clone(),
                    superseded_generation,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Ok(CommitOutcome::Stale { active_generation }) => {
                self.cancel(run, CancelReason::StaleGeneration { active_generation })
            }
            Err(e) => {
                let record = persistence_record(SyncState::Committing, &e, run.commit_attempts);
                self.fail(run, record)
            }
        }
    }

    fn reject(&self, run: &mut WorkflowRun) -> Result<(), SyncError> {
        let (Some(mut rule_set), Some(report)) = (run.rule_set.clone(), run.report.clone()) else {
            let record = ErrorRecord::new(
                SyncState::Rejecting,
                "missing_report",
                "no validation report to reject with",
                run.commit_attempts,
                false,
            );
            return self.fail(run, record);
        };
        if rule_set.status == RuleSetStatus::Pending {
            rule_set.transition(RuleSetStatus::Invalid)?;
        }

        let run_id = run.run_id;
        match self.persist(run, || self.sink.reject(&rule_set, run_id, &report)) {
            Ok(()) => {
                run.rule_set = Some(rule_set);
                run.finish(RunOutcome::Rejected);
                self.advance(run, SyncState::Idle)?;
                self.notifier.dispatch(&Notification::ViolationDetected {
                    run_id,
                    policy_id: run.policy_id.clone(),
                    policy_name: run.policy_name.clone(),
                    generation: run.generation,
                    status: report.status,
                    mismatches: report.mismatches,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                let record = persistence_record(SyncState::Rejecting, &e, run.commit_attempts);
                self.fail(run, record)
            }
        }
    }

    fn retire(&self, run: &mut WorkflowRun) -> Result<(), SyncError> {
        let run_id = run.run_id;
        let policy_id = run.policy_id.clone();
        match self.persist(run, || self.sink.retire(&policy_id, run_id)) {
            Ok(retired) => {
                let generation = retired.as_ref().map(|rs| rs.generation);
                run.finish(RunOutcome::Retired);
                self.store.save_run(run)?;
                tracing::info!(policy_id = %policy_id, generation = ?generation, "policy retired");
                self.notifier.dispatch(&Notification::PolicyRetired {
                    run_id,
                    policy_id,
                    policy_name: run.policy_name.clone(),
                    generation,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                let record = persistence_record(SyncState::Idle, &e, run.commit_attempts);
                self.fail(run, record)
            }
        }
    }

    /// Call a sink operation, retrying transient failures within the budget.
    fn persist<T>(
        &self,
        run: &mut WorkflowRun,
        mut op: impl FnMut() -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        loop {
            run.commit_attempts += 1;
            let attempt = run.commit_attempts;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.settings.budget => {
                    tracing::warn!(
                        policy_id = %run.policy_id,
                        attempt,
                        "persistence failed, retrying: {}",
                        e
                    );
                    self.settings.backoff.wait(attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Check the cancellation points. Cancels the run and returns true if
    /// it must stop.
    fn interrupted(&self, run: &mut WorkflowRun) -> Result<bool, SyncError> {
        let reason = if !self.store.renew_lease(
            &run.policy_id,
            &self.owner,
            run.run_id,
            self.settings.lease_ttl,
        )? {
            Some(CancelReason::LeaseLost)
        } else if self.store.cancel_requested(&run.policy_id) {
            Some(CancelReason::Requested)
        } else {
            match self.store.check_pending(&run.policy_id, &run.content_hash)? {
                PendingCheck::Empty => None,
                PendingCheck::Coalesced => {
                    tracing::info!(
                        policy_id = %run.policy_id,
                        "duplicate event coalesced onto in-flight run"
                    );
                    None
                }
                PendingCheck::Newer(_) => Some(CancelReason::Superseded),
            }
        };

        match reason {
            Some(reason) => {
                self.cancel(run, reason)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn cancel(&self, run: &mut WorkflowRun, reason: CancelReason) -> Result<(), SyncError> {
        let superseded = matches!(
            reason,
            CancelReason::Superseded | CancelReason::StaleGeneration { .. }
        );
        if let Some(rule_set) = run.rule_set.as_mut() {
            if superseded && rule_set.status == RuleSetStatus::Pending {
                rule_set.transition(RuleSetStatus::Superseded)?;
            }
        }
        if reason == CancelReason::Requested {
            self.store.clear_cancel(&run.policy_id)?;
        }

        tracing::info!(
            run_id = %run.run_id,
            policy_id = %run.policy_id,
            generation = run.generation,
            state = %run.state,
            "run cancelled: {}",
            reason
        );
        run.cancel_reason = Some(reason.to_string());
        run.finish(RunOutcome::Cancelled);
        self.advance(run, SyncState::Idle)?;
        self.notifier.dispatch(&Notification::RunCancelled {
            run_id: run.run_id,
            policy_id: run.policy_id.clone(),
            generation: run.generation,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn fail(&self, run: &mut WorkflowRun, record: ErrorRecord) -> Result<(), SyncError> {
        if record.state == SyncState::Validating && !record.transient {
            if let Some(rule_set) = run.rule_set.as_mut() {
                if rule_set.status == RuleSetStatus::Pending {
                    rule_set.transition(RuleSetStatus::Invalid)?;
                }
            }
        }

        tracing::error!(
            run_id = %run.run_id,
            policy_id = %run.policy_id,
            state = %record.state,
            kind = %record.kind,
            attempt = record.attempt,
            "run failed: {}",
            record.message
        );
        run.record_error(record.clone());
        run.finish(RunOutcome::Failed);
        self.advance(run, SyncState::Failed)?;

        if let Err(e) = self
            .sink
            .record_failure(&run.policy_id, run.run_id, run.rule_set.as_ref(), &record)
        {
            tracing::warn!(policy_id = %run.policy_id, "failed to record failure: {}", e);
        }
        self.notifier.dispatch(&Notification::RunFailed {
            run_id: run.run_id,
            policy_id: run.policy_id.clone(),
            policy_name: run.policy_name.clone(),
            state: record.state.to_string(),
            error_kind: record.kind,
            message: record.message,
            attempts: record.attempt,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn exhausted(&self, state: SyncState, attempts: u32) -> ErrorRecord {
        ErrorRecord::new(
            state,
            "retry_budget_exhausted",
            format!(
                "{} attempts spent; budget is {}",
                attempts, self.settings.budget
            ),
            attempts,
            false,
        )
    }
}

fn persistence_record(state: SyncState, err: &PersistenceError, attempt: u32) -> ErrorRecord {
    ErrorRecord::new(state, err.kind(), err.to_string(), attempt, err.is_transient())
}

fn default_owner() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("worker-{}-{}", std::process::id(), &id[..8])
}

// sink.rs — Persistence of committed rule sets.
//
// The sink owns the "active" record per policy identifier. Commits are a
// compare-and-swap on the generation: a rule set is only installed if its
// generation is strictly greater than the active one, so a slow run can
// never overwrite a newer commit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use gs_ledger::{FileLock, Ledger, LedgerAction, LedgerEntry};
use gs_policy::{RuleSet, RuleSetStatus};
use gs_validate::ValidationReport;

use crate::error::PersistenceError;
use crate::store::{policy_key, read_json, remove_if_exists, write_atomic, write_json};
use crate::workflow::ErrorRecord;

/// The rule set currently enforced for one policy identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub rule_set: RuleSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub committed_at: DateTime<Utc>,
}

impl ActiveRecord {
    pub fn policy_id(&self) -> &str {
        &self.rule_set.policy_id
    }

    pub fn generation(&self) -> u64 {
        self.rule_set.generation
    }

    pub fn source_hash(&self) -> &str {
        &self.rule_set.source_hash
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    /// The installed rule set, now VALID.
    pub committed: RuleSet,
    /// The previously active rule set, now SUPERSEDED.
    pub superseded: Option<RuleSet>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(CommitReceipt),
    /// A generation at least as new is already active.
    Stale { active_generation: u64 },
}

/// Where validated rule sets go.
pub trait RuleSink: Send + Sync {
    fn active(&self, policy_id: &str) -> Result<Option<ActiveRecord>, PersistenceError>;

    fn list_active(&self) -> Result<Vec<ActiveRecord>, PersistenceError>;

    /// Install a PENDING rule set if its generation beats the active one.
    /// Re-committing the already active rule set is a no-op success.
    fn commit(&self, rule_set: &RuleSet, run_id: Uuid) -> Result<CommitOutcome, PersistenceError>;

    /// Archive an INVALID rule set and the report that rejected it.
    fn reject(
        &self,
        rule_set: &RuleSet,
        run_id: Uuid,
        report: &ValidationReport,
    ) -> Result<(), PersistenceError>;

    /// Remove the active rule set for a deleted policy.
    fn retire(&self, policy_id: &str, run_id: Uuid) -> Result<Option<RuleSet>, PersistenceError>;

    fn record_failure(
        &self,
        policy_id: &str,
        run_id: Uuid,
        rule_set: Option<&RuleSet>,
        error: &ErrorRecord,
    ) -> Result<(), PersistenceError>;
}

/// File-backed sink.
///
/// ```text
/// <root>/active/<key>.json      ActiveRecord
/// <root>/active/<key>.rego      rule text of the active rule set
/// <root>/history/<key>/<rule-set-id>.json
/// <root>/locks/<key>.lock
/// ```
///
/// Every state change is also appended to the hash-chained ledger.
pub struct FileRuleStore {
    root: PathBuf,
    ledger: Ledger,
}

impl FileRuleStore {
    pub fn open(root: impl AsRef<Path>, ledger_path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let root = root.as_ref().to_path_buf();
        for dir in ["active", "history", "locks"] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| PersistenceError::io(&path, e))?;
        }
        let ledger = Ledger::open(ledger_path)?;
        Ok(Self { root, ledger })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Path of the exported rule text for `policy_id`.
    pub fn rule_text_path(&self, policy_id: &str) -> PathBuf {
        self.root.join("active").join(format!("{}.rego", policy_key(policy_id)))
    }

    /// Every archived rule set for `policy_id`, by generation.
    pub fn history(&self, policy_id: &str) -> Result<Vec<RuleSet>, PersistenceError> {
        let dir = self.root.join("history").join(policy_key(policy_id));
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&dir, e)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PersistenceError::io(&dir, e))?.path();
            if let Some(rs) = read_json::<RuleSet>(&path)? {
                out.push(rs);
            }
        }
        out.sort_by_key(|rs| rs.generation);
        Ok(out)
    }

    fn lock(&self, policy_id: &str) -> Result<FileLock, PersistenceError> {
        let path = self.root.join("locks").join(format!("{}.lock", policy_key(policy_id)));
        FileLock::acquire(&path, Duration::from_secs(5), Duration::from_secs(30))
            .map_err(|e| PersistenceError::io(&path, e))
    }

    fn active_path(&self, policy_id: &str) -> PathBuf {
        self.root.join("active").join(format!("{}.json", policy_key(policy_id)))
    }

    fn archive(&self, rule_set: &RuleSet) -> Result<(), PersistenceError> {
        let path = self
            .root
            .join("history")
            .join(policy_key(&rule_set.policy_id))
            .join(format!("{}.json", rule_set.rule_set_id));
        write_json(&path, rule_set)
    }

    fn ledger_records_commit(&self, rule_set: &RuleSet) -> Result<bool, PersistenceError> {
        let entries = Ledger::read_all(self.ledger.path())?;
        Ok(entries.iter().any(|e| {
            e.action == LedgerAction::Committed && e.rule_set_id == Some(rule_set.rule_set_id)
        }))
    }

    fn append(&self, mut entry: LedgerEntry) -> Result<(), PersistenceError> {
        self.ledger.append(&mut entry)?;
        Ok(())
    }
}

fn lifecycle(rule_set: &mut RuleSet, next: RuleSetStatus) -> Result<(), PersistenceError> {
    rule_set.transition(next).map_err(|e| PersistenceError::Permanent {
        path: rule_set.rule_set_id.to_string(),
        reason: e.to_string(),
    })
}

impl RuleSink for FileRuleStore {
    fn active(&self, policy_id: &str) -> Result<Option<ActiveRecord>, PersistenceError> {
        read_json(&self.active_path(policy_id))
    }

    fn list_active(&self) -> Result<Vec<ActiveRecord>, PersistenceError> {
        let dir = self.root.join("active");
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| PersistenceError::io(&dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(record) = read_json::<ActiveRecord>(&path)? {
                    out.push(record);
                }
            }
        }
        out.sort_by(|a, b| a.rule_set.policy_id.cmp(&b.rule_set.policy_id));
        Ok(out)
    }

    fn commit(&self, rule_set: &RuleSet, run_id: Uuid) -> Result<CommitOutcome, PersistenceError> {
        let _guard = self.lock(&rule_set.policy_id)?;
        let previous = self.active(&rule_set.policy_id)?;

        if let Some(active) = &previous {
            if active.rule_set.rule_set_id == rule_set.rule_set_id {
                return Ok(CommitOutcome::Committed(CommitReceipt {
                    committed: active.rule_set.clone(),
                    superseded: None,
                }));
            }
            if rule_set.generation <= active.generation() {
                tracing::info!(
                    policy_id = %rule_set.policy_id,
                    generation = rule_set.generation,
                    active_generation = active.generation(),
                    "commit rejected: newer generation already active"
                );
                return Ok(CommitOutcome::Stale {
                    active_generation: active.generation(),
                });
            }
        }

        let mut committed = rule_set.clone();
        lifecycle(&mut committed, RuleSetStatus::Valid)?;

        let superseded = match previous {
            Some(active) => {
                let mut old = active.rule_set;
                lifecycle(&mut old, RuleSetStatus::Superseded)?;
                Some(old)
            }
            None => None,
        };

        // Ledger first: a failed append leaves the previous generation active,
        // and a retry after a failed install finds the entries already there.
        if !self.ledger_records_commit(&committed)? {
            if let Some(old) = &superseded {
                self.append(
                    LedgerEntry::new(LedgerAction::Superseded, &old.policy_id)
                        .with_rule_set(old)
                        .with_run(run_id)
                        .with_metadata(json!({ "superseded_by": committed.generation })),
                )?;
            }
            self.append(
                LedgerEntry::new(LedgerAction::Committed, &committed.policy_id)
                    .with_rule_set(&committed)
                    .with_run(run_id),
            )?;
        }

        if let Some(old) = &superseded {
            self.archive(old)?;
        }
        self.archive(&committed)?;
        write_json(
            &self.active_path(&committed.policy_id),
            &ActiveRecord {
                rule_set: committed.clone(),
                run_id: Some(run_id),
                committed_at: Utc::now(),
            },
        )?;
        write_atomic(&self.rule_text_path(&committed.policy_id), committed.rule_text.as_bytes())?;

        Ok(CommitOutcome::Committed(CommitReceipt {
            committed,
            superseded,
        }))
    }

    fn reject(
        &self,
        rule_set: &RuleSet,
        run_id: Uuid,
        report: &ValidationReport,
    ) -> Result<(), PersistenceError> {
        self.archive(rule_set)?;
        self.append(
            LedgerEntry::new(LedgerAction::Rejected, &rule_set.policy_id)
                .with_rule_set(rule_set)
                .with_run(run_id)
                .with_metadata(json!({
                    "report_id": report.report_id,
                    "status": report.status.to_string(),
                    "mismatches": report.mismatches.len(),
                    "total": report.total(),
                })),
        )
    }

    fn retire(&self, policy_id: &str, run_id: Uuid) -> Result<Option<RuleSet>, PersistenceError> {
        let _guard = self.lock(policy_id)?;
        let Some(active) = self.active(policy_id)? else {
            return Ok(None);
        };
        let mut retired = active.rule_set;
        lifecycle(&mut retired, RuleSetStatus::Superseded)?;
        self.archive(&retired)?;
        remove_if_exists(&self.active_path(policy_id))?;
        remove_if_exists(&self.rule_text_path(policy_id))?;
        self.append(
            LedgerEntry::new(LedgerAction::Retired, policy_id)
                .with_rule_set(&retired)
                .with_run(run_id),
        )?;
        Ok(Some(retired))
    }

    fn record_failure(
        &self,
        policy_id: &str,
        run_id: Uuid,
        rule_set: Option<&RuleSet>,
        error: &ErrorRecord,
    ) -> Result<(), PersistenceError> {
        let mut entry = LedgerEntry::new(LedgerAction::Failed, policy_id)
            .with_run(run_id)
            .with_metadata(json!({
                "state": error.state.to_string(),
                "kind": error.kind,
                "message": error.message,
                "attempt": error.attempt,
            }));
        if let Some(rs) = rule_set {
            self.archive(rs)?;
            entry = entry.with_rule_set(rs);
        }
        self.append(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_policy::{GovernancePolicy, PolicyDocument, Statement};
    use tempfile::tempdir;

    fn policy(action: &str) -> GovernancePolicy {
        GovernancePolicy::new(
            "p-1",
            "deny",
            PolicyDocument::new(vec![Statement::deny(&[action])]),
        )
        .unwrap()
    }

    fn store(dir: &Path) -> FileRuleStore {
        FileRuleStore::open(dir.join("rules"), dir.join("ledger.jsonl")).unwrap()
    }

    #[test]
    fn first_commit_becomes_active() {
        let dir = tempdir().unwrap();
        let sink = store(dir.path());
        let rs = RuleSet::pending(&policy("s3:*"), 1, "package aws.scp");
        let outcome = sink.commit(&rs, Uuid::new_v4()).unwrap();
        match outcome {
            CommitOutcome::Committed(receipt) => {
                assert_eq!(receipt.committed.status, RuleSetStatus::Valid);
                assert!(receipt.superseded.is_none());
            }
            other => panic!("expected commit, got {:?}", other),
        }
        let active = sink.active("p-1").unwrap().unwrap();
        assert_eq!(active.generation(), 1);
        assert_eq!(
            std::fs::read_to_string(sink.rule_text_path("p-1")).unwrap(),
            "package aws.scp"
        );
    }

    #[test]
    fn newer_generation_supersedes() {
        let dir = tempdir().unwrap();
        let sink = store(dir.path());
        sink.commit(&RuleSet::pending(&policy("s3:*"), 1, "a"), Uuid::new_v4()).unwrap();
        let outcome = sink
            .commit(&RuleSet::pending(&policy("ec2:*"), 2, "b"), Uuid::new_v4())
            .unwrap();
        let CommitOutcome::Committed(receipt) = outcome else {
            panic!("expected commit");
        };
        let old = receipt.superseded.unwrap();
        assert_eq!(old.generation, 1);
        assert_eq!(old.status, RuleSetStatus::Superseded);
        assert_eq!(sink.active("p-1").unwrap().unwrap().generation(), 2);

        let history = sink.history("p-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, RuleSetStatus::Superseded);
        assert_eq!(history[1].status, RuleSetStatus::Valid);
    }

    #[test]
    fn older_generation_is_stale() {
        let dir = tempdir().unwrap();
        let sink = store(dir.path());
        sink.commit(&RuleSet::pending(&policy("ec2:*"), 2, "new"), Uuid::new_v4()).unwrap();
        let outcome = sink
            .commit(&RuleSet::pending(&policy("s3:*"), 1, "old"), Uuid::new_v4())
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Stale { active_generation: 2 });
        let active = sink.active("p-1").unwrap().unwrap();
        assert_eq!(active.generation(), 2);
        assert_eq!(active.rule_set.rule_text, "new");
    }

    #[test]
    fn recommit_is_idempotent() {
        let dir = tempdir().unwrap();
        let sink = store(dir.path());
        let rs = RuleSet::pending(&policy("s3:*"), 1, "a");
        sink.commit(&rs, Uuid::new_v4()).unwrap();
        let again = sink.commit(&rs, Uuid::new_v4()).unwrap();
        assert!(matches!(again, CommitOutcome::Committed(_)));
        let entries = Ledger::read_all(dir.path().join("ledger.jsonl")).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn ledger_failure_leaves_previous_generation_active() {
        let dir = tempdir().unwrap();
        let sink = store(dir.path());
        sink.commit(&RuleSet::pending(&policy("s3:*"), 1, "a"), Uuid::new_v4()).unwrap();

        let ledger_lock = dir.path().join("ledger.jsonl.lock");
        std::fs::write(&ledger_lock, "held elsewhere").unwrap();
        let next = RuleSet::pending(&policy("ec2:*"), 2, "b");
        let err = sink.commit(&next, Uuid::new_v4()).unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert_eq!(sink.active("p-1").unwrap().unwrap().generation(), 1);
        assert_eq!(std::fs::read_to_string(sink.rule_text_path("p-1")).unwrap(), "a");

        std::fs::remove_file(&ledger_lock).unwrap();
        let retried = sink.commit(&next, Uuid::new_v4()).unwrap();
        assert!(matches!(retried, CommitOutcome::Committed(_)));
        assert_eq!(sink.active("p-1").unwrap().unwrap().generation(), 2);

        let entries = Ledger::read_all(dir.path().join("ledger.jsonl")).unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![LedgerAction::Committed, LedgerAction::Superseded, LedgerAction::Committed]
        );
        assert_eq!(entries[2].rule_set_id, Some(next.rule_set_id));
    }

    #[test]
    fn install_retry_does_not_duplicate_ledger_entries() {
        let dir = tempdir().unwrap();
        let sink = store(dir.path());
        let rs = RuleSet::pending(&policy("s3:*"), 1, "a");
        let mut entry = LedgerEntry::new(LedgerAction::Committed, "p-1").with_rule_set(&rs);
        sink.ledger().append(&mut entry).unwrap();

        sink.commit(&rs, Uuid::new_v4()).unwrap();
        assert_eq!(sink.active("p-1").unwrap().unwrap().generation(), 1);
        let entries = Ledger::read_all(dir.path().join("ledger.jsonl")).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn retire_removes_active_and_logs() {
        let dir = tempdir().unwrap();
        let sink = store(dir.path());
        sink.commit(&RuleSet::pending(&policy("s3:*"), 1, "a"), Uuid::new_v4()).unwrap();
        let retired = sink.retire("p-1", Uuid::new_v4()).unwrap().unwrap();
        assert_eq!(retired.status, RuleSetStatus::Superseded);
        assert!(sink.active("p-1").unwrap().is_none());
        assert!(!sink.rule_text_path("p-1").exists());
        assert!(sink.retire("p-1", Uuid::new_v4()).unwrap().is_none());

        let entries = Ledger::read_all(dir.path().join("ledger.jsonl")).unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![LedgerAction::Committed, LedgerAction::Retired]);
        assert_eq!(Ledger::verify_chain(dir.path().join("ledger.jsonl")).unwrap(), 2);
    }

    #[test]
    fn list_active_sorted_by_policy() {
        let dir = tempdir().unwrap();
        let sink = store(dir.path());
        for id in ["p-b", "p-a"] {
            let p = GovernancePolicy::new(id, id, PolicyDocument::new(vec![Statement::deny(&["s3:*"])]))
                .unwrap();
            sink.commit(&RuleSet::pending(&p, 1, "x"), Uuid::new_v4()).unwrap();
        }
        let ids: Vec<_> = sink
            .list_active()
            .unwrap()
            .iter()
            .map(|r| r.policy_id().to_string())
            .collect();
        assert_eq!(ids, vec!["p-a", "p-b"]);
    }
}

// store.rs — File-backed durable state for the orchestrator.
//
// Layout under the state root:
//   runs/<run-id>.json          workflow checkpoints
//   leases/<key>.json           single-flight lease per policy
//   generations/<key>           last allocated generation
//   pending/<key>.json          latest queued event per policy
//   cancel/<key>                operator cancellation marker
//   locks/<key>.lock            guards every read-modify-write on <key>
//
// <key> is a filesystem-safe rendering of the policy identifier.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gs_ledger::FileLock;
use gs_policy::hash;

use crate::error::PersistenceError;
use crate::event::PolicyEvent;
use crate::workflow::WorkflowRun;

const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_STALE: Duration = Duration::from_secs(30);

/// Exclusive right to drive runs for one policy identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub policy_id: String,
    pub owner: String,
    pub run_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    fn held_by(&self, owner: &str, run_id: Uuid) -> bool {
        self.owner == owner && self.run_id == run_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaseAcquisition {
    Acquired(Lease),
    /// Someone else holds a live lease; the event was queued.
    Held(Lease),
}

/// Result of checking the pending slot against an in-flight run.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingCheck {
    Empty,
    /// The queued event carried the same content and was dropped.
    Coalesced,
    /// A different change is waiting.
    Newer(PolicyEvent),
}

pub struct SyncStore {
    root: PathBuf,
}

impl SyncStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let root = root.as_ref().to_path_buf();
        for dir in ["runs", "leases", "generations", "pending", "cancel", "locks"] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| PersistenceError::io(&path, e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Runs ──

    pub fn save_run(&self, run: &WorkflowRun) -> Result<(), PersistenceError> {
        write_json(&self.run_path(run.run_id), run)
    }

    pub fn load_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, PersistenceError> {
        read_json(&self.run_path(run_id))
    }

    /// All runs, oldest first.
    pub fn list_runs(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        let dir = self.root.join("runs");
        let mut runs = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| PersistenceError::io(&dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(run) = read_json::<WorkflowRun>(&path)? {
                    runs.push(run);
                }
            }
        }
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    pub fn runs_for(&self, policy_id: &str) -> Result<Vec<WorkflowRun>, PersistenceError> {
        Ok(self
            .list_runs()?
            .into_iter()
            .filter(|r| r.policy_id == policy_id)
            .collect())
    }

    /// Runs that were interrupted before reaching an outcome.
    pub fn incomplete_runs(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        Ok(self
            .list_runs()?
            .into_iter()
            .filter(|r| !r.is_finished())
            .collect())
    }

    // ── Leases ──

    /// Take the lease for `policy_id`, or queue `event` if a live lease is
    /// held by another run. Both happen under the same lock so a releasing
    /// holder always sees the queued event.
    pub fn try_acquire(
        &self,
        policy_id: &str,
        owner: &str,
        run_id: Uuid,
        ttl: Duration,
        event: &PolicyEvent,
    ) -> Result<LeaseAcquisition, PersistenceError> {
        let _guard = self.lock(policy_id)?;
        let now = Utc::now();
        if let Some(current) = self.lease(policy_id)? {
            if !current.is_expired(now) && !current.held_by(owner, run_id) {
                self.enqueue_locked(event)?;
                return Ok(LeaseAcquisition::Held(current));
            }
        }
        let lease = self.write_lease(policy_id, owner, run_id, ttl)?;
        Ok(LeaseAcquisition::Acquired(lease))
    }

    /// Take over the lease of an interrupted run. Fails if a live lease is
    /// held by anyone else.
    pub fn acquire_for_resume(
        &self,
        policy_id: &str,
        owner: &str,
        run_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<Lease>, PersistenceError> {
        let _guard = self.lock(policy_id)?;
        if let Some(current) = self.lease(policy_id)? {
            let ours = current.held_by(owner, run_id);
            if !current.is_expired(Utc::now()) && !ours {
                return Ok(None);
            }
        }
        self.write_lease(policy_id, owner, run_id, ttl).map(Some)
    }

    /// Extend the lease. Returns false if it was lost to another run.
    pub fn renew_lease(
        &self,
        policy_id: &str,
        owner: &str,
        run_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, PersistenceError> {
        let _guard = self.lock(policy_id)?;
        match self.lease(policy_id)? {
            Some(current) if current.held_by(owner, run_id) => {
                self.write_lease(policy_id, owner, run_id, ttl)?;
                Ok(true)
            }
            // No lease on file: nobody else holds the identifier.
            None => {
                self.write_lease(policy_id, owner, run_id, ttl)?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Release the lease, or hand it to `next_run_id` if an event is queued.
    /// Returns the queued event to process next.
    pub fn release_or_handoff(
        &self,
        policy_id: &str,
        owner: &str,
        run_id: Uuid,
        next_run_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<PolicyEvent>, PersistenceError> {
        let _guard = self.lock(policy_id)?;
        match self.lease(policy_id)? {
            Some(current) if current.held_by(owner, run_id) => {}
            _ => return Ok(None),
        }
        let pending_path = self.pending_path(policy_id);
        match read_json::<PolicyEvent>(&pending_path)? {
            Some(next) => {
                remove_if_exists(&pending_path)?;
                self.write_lease(policy_id, owner, next_run_id, ttl)?;
                Ok(Some(next))
            }
            None => {
                remove_if_exists(&self.lease_path(policy_id))?;
                Ok(None)
            }
        }
    }

    /// Release without draining; used on error paths.
    pub fn release_lease(&self, policy_id: &str, owner: &str, run_id: Uuid) -> Result<(), PersistenceError> {
        let _guard = self.lock(policy_id)?;
        match self.lease(policy_id)? {
            Some(current) if current.held_by(owner, run_id) => {
                remove_if_exists(&self.lease_path(policy_id))
            }
            _ => Ok(()),
        }
    }

    pub fn lease(&self, policy_id: &str) -> Result<Option<Lease>, PersistenceError> {
        read_json(&self.lease_path(policy_id))
    }

    fn write_lease(
        &self,
        policy_id: &str,
        owner: &str,
        run_id: Uuid,
        ttl: Duration,
    ) -> Result<Lease, PersistenceError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let lease = Lease {
            policy_id: policy_id.to_string(),
            owner: owner.to_string(),
            run_id,
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        write_json(&self.lease_path(policy_id), &lease)?;
        Ok(lease)
    }

    // ── Generations ──

    /// Allocate the next generation for `policy_id`. Strictly increasing.
    pub fn next_generation(&self, policy_id: &str) -> Result<u64, PersistenceError> {
        let _guard = self.lock(policy_id)?;
        let next = self.current_generation(policy_id)? + 1;
        let path = self.generation_path(policy_id);
        write_atomic(&path, next.to_string().as_bytes())?;
        Ok(next)
    }

    /// Last allocated generation, zero if none.
    pub fn current_generation(&self, policy_id: &str) -> Result<u64, PersistenceError> {
        let path = self.generation_path(policy_id);
        match std::fs::read_to_string(&path) {
            Ok(text) => text
                .trim()
                .parse::<u64>()
                .map_err(|e| PersistenceError::corrupt(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(PersistenceError::io(&path, e)),
        }
    }

    // ── Pending queue (one slot per policy, latest wins) ──

    pub fn enqueue(&self, event: &PolicyEvent) -> Result<(), PersistenceError> {
        let _guard = self.lock(&event.policy_id)?;
        self.enqueue_locked(event)
    }

    fn enqueue_locked(&self, event: &PolicyEvent) -> Result<(), PersistenceError> {
        let path = self.pending_path(&event.policy_id);
        if let Some(existing) = read_json::<PolicyEvent>(&path)? {
            if existing.timestamp > event.timestamp {
                tracing::debug!(
                    policy_id = %event.policy_id,
                    "queued event is newer; dropping older arrival"
                );
                return Ok(());
            }
        }
        write_json(&path, event)
    }

    pub fn peek_pending(&self, policy_id: &str) -> Result<Option<PolicyEvent>, PersistenceError> {
        read_json(&self.pending_path(policy_id))
    }

    pub fn take_pending(&self, policy_id: &str) -> Result<Option<PolicyEvent>, PersistenceError> {
        let _guard = self.lock(policy_id)?;
        let path = self.pending_path(policy_id);
        let event = read_json(&path)?;
        remove_if_exists(&path)?;
        Ok(event)
    }

    /// Drop a queued event that repeats the in-flight content, or report a
    /// different one.
    pub fn check_pending(&self, policy_id: &str, content_hash: &str) -> Result<PendingCheck, PersistenceError> {
        let _guard = self.lock(policy_id)?;
        let path = self.pending_path(policy_id);
        match read_json::<PolicyEvent>(&path)? {
            None => Ok(PendingCheck::Empty),
            Some(event) if event.content_hash().as_deref() == Some(content_hash) => {
                remove_if_exists(&path)?;
                Ok(PendingCheck::Coalesced)
            }
            Some(event) => Ok(PendingCheck::Newer(event)),
        }
    }

    // ── Cancellation markers ──

    pub fn request_cancel(&self, policy_id: &str) -> Result<(), PersistenceError> {
        write_atomic(&self.cancel_path(policy_id), Utc::now().to_rfc3339().as_bytes())
    }

    pub fn cancel_requested(&self, policy_id: &str) -> bool {
        self.cancel_path(policy_id).exists()
    }

    pub fn clear_cancel(&self, policy_id: &str) -> Result<(), PersistenceError> {
        remove_if_exists(&self.cancel_path(policy_id))
    }

    // ── Paths ──

    fn lock(&self, policy_id: &str) -> Result<FileLock, PersistenceError> {
        let path = self.root.join("locks").join(format!("{}.lock", policy_key(policy_id)));
        FileLock::acquire(&path, LOCK_WAIT, LOCK_STALE).map_err(|e| PersistenceError::io(&path, e))
    }

    fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.root.join("runs").join(format!("{}.json", run_id))
    }

    fn lease_path(&self, policy_id: &str) -> PathBuf {
        self.root.join("leases").join(format!("{}.json", policy_key(policy_id)))
    }

    fn generation_path(&self, policy_id: &str) -> PathBuf {
        self.root.join("generations").join(policy_key(policy_id))
    }

    fn pending_path(&self, policy_id: &str) -> PathBuf {
        self.root.join("pending").join(format!("{}.json", policy_key(policy_id)))
    }

    fn cancel_path(&self, policy_id: &str) -> PathBuf {
        self.root.join("cancel").join(policy_key(policy_id))
    }
}

/// Filesystem-safe, collision-free rendering of a policy identifier.
pub fn policy_key(policy_id: &str) -> String {
    let safe: String = policy_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    format!("{}-{}", safe, &hash::hash_str(policy_id)[..12])
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PersistenceError::corrupt(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistenceError::io(path, e)),
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| PersistenceError::corrupt(path, e))?;
    write_atomic(path, json.as_bytes())
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
    std::fs::write(&tmp, bytes).map_err(|e| PersistenceError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        PersistenceError::io(path, e)
    })
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<(), PersistenceError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PersistenceError::io(path, e)),
    }
}

// ledger.rs — Append-only JSONL ledger with a hash chain.
//
// One JSON object per line. Each entry's `previous_hash` is the SHA-256 of
// the raw preceding line. Appends hold a lock file and re-read the tail, so
// several workers (or processes) can share one ledger without forking the
// chain.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use gs_policy::hash;

use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use crate::lock::FileLock;

const LOCK_WAIT: Duration = Duration::from_secs(10);
const LOCK_STALE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Open (or create) the ledger at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| LedgerError::OpenFailed {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(open_err)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;
        Ok(Self { path })
    }

    /// Append an entry, linking it to the current last line.
    pub fn append(&self, entry: &mut LedgerEntry) -> Result<(), LedgerError> {
        let _lock = FileLock::acquire(&self.lock_path(), LOCK_WAIT, LOCK_STALE)?;

        entry.previous_hash = read_last_hash(&self.path)?;
        let json = serde_json::to_string(entry)?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| LedgerError::OpenFailed {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{}", json)?;
        file.flush()?;

        tracing::debug!(
            policy_id = %entry.policy_id,
            action = %entry.action,
            entry_id = %entry.entry_id,
            "ledger entry appended"
        );
        Ok(())
    }

    /// Read every entry, oldest first. Blank lines are skipped.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut entries = Vec::new();
        for line in lines(path.as_ref())? {
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    /// The last `n` entries, oldest first.
    pub fn tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut entries = Self::read_all(path)?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    /// Verify the hash chain. Returns the number of entries checked.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<usize, LedgerError> {
        let file = File::open(path.as_ref()).map_err(|source| LedgerError::OpenFailed {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        let mut previous_hash: Option<String> = None;
        let mut checked = 0;

        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LedgerEntry = serde_json::from_str(&line)?;
            if entry.previous_hash != previous_hash {
                return Err(LedgerError::IntegrityViolation {
                    line: line_num + 1,
                    expected: previous_hash.unwrap_or_else(|| "None".to_string()),
                    actual: entry.previous_hash.unwrap_or_else(|| "None".to_string()),
                });
            }
            // Hash the raw line; re-serializing could reorder fields.
            previous_hash = Some(hash::hash_str(&line));
            checked += 1;
        }
        Ok(checked)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}

fn lines(path: &Path) -> Result<Vec<String>, LedgerError> {
    let file = File::open(path).map_err(|source| LedgerError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            out.push(line);
        }
    }
    Ok(out)
}

fn read_last_hash(path: &Path) -> Result<Option<String>, LedgerError> {
    Ok(lines(path)?.last().map(|line| hash::hash_str(line)))
}

// fixtures.rs — Labelled fixture corpora.
//
// Layout:
//
//   <root>/allow/*.json|yaml   (alias: pass/)
//   <root>/deny/*.json|yaml    (alias: fail/)
//
// A fixture file holds one operation, a list of operations, or a full
// change set. The directory's label overrides any `expected` in the file.
// Other subdirectories are ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use gs_policy::change_set::is_yaml;
use gs_policy::{ChangeSet, Operation, Verdict};

use crate::error::ValidateError;

#[derive(Deserialize)]
#[serde(untagged)]
enum FixtureFile {
    Set(ChangeSet),
    Many(Vec<Operation>),
    One(Operation),
}

impl FixtureFile {
    fn into_operations(self) -> Vec<Operation> {
        match self {
            FixtureFile::Set(cs) => cs.operations,
            FixtureFile::Many(ops) => ops,
            FixtureFile::One(op) => vec![op],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixtureCorpus {
    root: PathBuf,
    change_set: ChangeSet,
}

impl FixtureCorpus {
    pub fn load(root: &Path) -> Result<Self, ValidateError> {
        let mut operations = Vec::new();
        for dir in sorted_entries(root)? {
            if !dir.is_dir() {
                continue;
            }
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let Ok(label) = name.parse::<Verdict>() else {
                tracing::warn!(dir = %dir.display(), "ignoring fixture directory without a verdict label");
                continue;
            };
            for file in sorted_entries(&dir)? {
                if !is_fixture_file(&file) {
                    continue;
                }
                for op in read_fixture(&file)? {
                    let description = if op.description.is_empty() {
                        file.display().to_string()
                    } else {
                        op.description.clone()
                    };
                    operations.push(op.with_expected(label).with_description(description));
                }
            }
        }
        if operations.is_empty() {
            return Err(ValidateError::EmptyCorpus(root.display().to_string()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            change_set: ChangeSet::new(operations).with_source(root.display().to_string()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn change_set(&self) -> &ChangeSet {
        &self.change_set
    }

    pub fn into_change_set(self) -> ChangeSet {
        self.change_set
    }

    pub fn len(&self) -> usize {
        self.change_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.change_set.is_empty()
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, ValidateError> {
    let io_err = |source| ValidateError::IoError {
        path: dir.display().to_string(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        paths.push(entry.map_err(io_err)?.path());
    }
    paths.sort();
    Ok(paths)
}

fn is_fixture_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json") | Some("yaml") | Some("yml")
        )
}

fn read_fixture(path: &Path) -> Result<Vec<Operation>, ValidateError> {
    let text = std::fs::read_to_string(path).map_err(|source| ValidateError::IoError {
        path: path.display().to_string(),
        source,
    })?;
    let invalid = |reason: String| ValidateError::InvalidFixture {
        path: path.display().to_string(),
        reason,
    };
    let file: FixtureFile = if is_yaml(path) {
        serde_yaml::from_str(&text).map_err(|e| invalid(e.to_string()))?
    } else {
        serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?
    };
    Ok(file.into_operations())
}

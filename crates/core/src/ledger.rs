use crate::config::write_atomic;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Persisted set of file identities the renamer has already handled.
#[derive(Debug, Default)]
pub struct RenamedLedger {
    path: Option<PathBuf>,
    keys: BTreeSet<String>,
}

impl RenamedLedger {
    /// Loads the ledger from `path`. A missing file starts empty; a corrupt
    /// one is logged and also starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let keys = match read_keys(&path) {
            Ok(keys) => keys,
            Err(err) => {
                warn!(path = %path.display(), "renamed-file ledger is unreadable, starting empty: {err:#}");
                BTreeSet::new()
            }
        };
        Self {
            path: Some(path),
            keys,
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Adds keys and writes the whole ledger out when anything changed.
    pub fn record<I>(&mut self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        let mut changed = false;
        for key in keys {
            changed |= self.keys.insert(key);
        }
        if changed {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let keys: Vec<&String> = self.keys.iter().collect();
        let body = serde_json::to_vec_pretty(&keys).context("could not serialize ledger")?;
        write_atomic(path, &body)
    }
}

/// Identity of a file as seen by the ledger: its name plus its creation
/// time in milliseconds.
pub fn identity_key(file_name: &str, created: SystemTime) -> String {
    let millis = created
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{file_name}|{millis}")
}

/// Creation time, or modification time on filesystems that do not record
/// creation.
pub fn creation_time(path: &Path) -> Result<SystemTime> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("could not read metadata: {}", path.display()))?;
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .with_context(|| format!("could not read file times: {}", path.display()))
}

fn read_keys(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read ledger: {}", path.display()))?;
    let keys = serde_json::from_str::<Vec<String>>(&raw)
        .with_context(|| format!("could not parse ledger: {}", path.display()))?;
    Ok(keys.into_iter().collect())
}

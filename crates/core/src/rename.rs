use crate::config::{AppConfig, ConfigStore};
use crate::counter::{next_counter, CounterPattern, NameHistory};
use crate::history::{RenameHistory, RenameRecord};
use crate::ledger::{creation_time, identity_key, RenamedLedger};
use crate::template::render_file_name;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Receives every successful rename, after it has been written to disk.
pub trait RenameListener: Send {
    fn on_renamed(&self, record: &RenameRecord);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Missing,
    NotAFile,
    ExtensionNotAllowed,
    AlreadyRenamed,
    NotFromToday,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenamedFile {
    pub from: PathBuf,
    pub to: PathBuf,
    pub counter: u32,
    /// The first computed name was taken and a later counter was used.
    pub probed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRename {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RenameOutcome {
    pub renamed: Vec<RenamedFile>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
    pub failed: Vec<FailedRename>,
}

impl RenameOutcome {
    pub fn is_empty(&self) -> bool {
        self.renamed.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    file_name: String,
    extension: String,
    created: SystemTime,
}

/// Renames newly arrived files in the active folder.
///
/// A `Renamer` is owned by exactly one thread at a time; batches are
/// serialized by `&mut self`.
pub struct Renamer {
    config: Arc<ConfigStore>,
    ledger: RenamedLedger,
    history: Option<RenameHistory>,
    listeners: Vec<Box<dyn RenameListener>>,
    session_sequence: u64,
}

impl Renamer {
    pub fn new(config: Arc<ConfigStore>, ledger: RenamedLedger) -> Self {
        Self {
            config,
            ledger,
            history: None,
            listeners: Vec::new(),
            session_sequence: 0,
        }
    }

    pub fn with_history(mut self, history: RenameHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn add_listener(&mut self, listener: Box<dyn RenameListener>) {
        self.listeners.push(listener);
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn history(&self) -> Option<&RenameHistory> {
        self.history.as_ref()
    }

    pub fn ledger(&self) -> &RenamedLedger {
        &self.ledger
    }

    pub fn rename(&mut self, paths: &[PathBuf]) -> RenameOutcome {
        self.rename_at(paths, Local::now())
    }

    /// Renames `paths` as if the current time were `now`.
    pub fn rename_at(&mut self, paths: &[PathBuf], now: DateTime<Local>) -> RenameOutcome {
        let config = self.config.snapshot();
        let today = now.date_naive();
        let mut outcome = RenameOutcome::default();

        let pattern = match CounterPattern::for_profile(&config, today) {
            Ok(pattern) => pattern,
            Err(err) => {
                error!("cannot rename batch: {err:#}");
                for path in paths {
                    outcome.failed.push(FailedRename {
                        path: path.clone(),
                        error: format!("{err:#}"),
                    });
                }
                return outcome;
            }
        };

        let mut candidates = self.collect_candidates(paths, &config, &pattern, today, &mut outcome);
        if candidates.is_empty() {
            return outcome;
        }
        candidates.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));

        let history = self.history.as_ref().map(|h| h as &dyn NameHistory);
        let mut counter = match next_counter(&config.folder, &config, today, history) {
            Ok(counter) => counter,
            Err(err) => {
                warn!("counter lookup failed, starting at 1: {err:#}");
                1
            }
        };

        for candidate in candidates {
            match self.rename_one(&candidate, &config, today, counter, now) {
                Ok(renamed) => {
                    counter = renamed.counter.saturating_add(1);
                    outcome.renamed.push(renamed);
                }
                Err(err) => {
                    error!(path = %candidate.path.display(), "rename failed: {err:#}");
                    outcome.failed.push(FailedRename {
                        path: candidate.path,
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        outcome
    }

    /// Renames every eligible file currently in the active folder.
    pub fn rename_folder(&mut self) -> RenameOutcome {
        self.rename_folder_at(Local::now())
    }

    pub fn rename_folder_at(&mut self, now: DateTime<Local>) -> RenameOutcome {
        let folder = self.config.snapshot().folder;
        match list_folder_files(&folder) {
            Ok(paths) => self.rename_at(&paths, now),
            Err(err) => {
                error!("{err:#}");
                RenameOutcome::default()
            }
        }
    }

    fn collect_candidates(
        &self,
        paths: &[PathBuf],
        config: &AppConfig,
        pattern: &CounterPattern,
        today: NaiveDate,
        outcome: &mut RenameOutcome,
    ) -> Vec<Candidate> {
        let allowed = config.allowed_extensions();
        let mut seen = HashSet::<PathBuf>::new();
        let mut candidates = Vec::with_capacity(paths.len());

        for path in paths {
            if !seen.insert(path.clone()) {
                continue;
            }
            match self.check_candidate(path, config, &allowed, pattern, today) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    info!(path = %path.display(), ?reason, "skipped");
                    outcome.skipped.push((path.clone(), reason));
                }
            }
        }
        candidates
    }

    fn check_candidate(
        &self,
        path: &Path,
        config: &AppConfig,
        allowed: &[String],
        pattern: &CounterPattern,
        today: NaiveDate,
    ) -> Result<Candidate, SkipReason> {
        if !path.exists() {
            return Err(SkipReason::Missing);
        }
        if !path.is_file() {
            return Err(SkipReason::NotAFile);
        }
        if !has_allowed_extension(path, allowed) {
            return Err(SkipReason::ExtensionNotAllowed);
        }

        let file_name = path
            .file_name()
            .map(|v| v.to_string_lossy().to_string())
            .ok_or(SkipReason::NotAFile)?;
        let created = creation_time(path).map_err(|_| SkipReason::Missing)?;
        if pattern.matches(&file_name) || self.ledger.contains(&identity_key(&file_name, created))
        {
            return Err(SkipReason::AlreadyRenamed);
        }

        if config.rename_only_today && DateTime::<Local>::from(created).date_naive() != today {
            return Err(SkipReason::NotFromToday);
        }

        Ok(Candidate {
            path: path.to_path_buf(),
            file_name,
            extension: extension_of(path),
            created,
        })
    }

    fn rename_one(
        &mut self,
        candidate: &Candidate,
        config: &AppConfig,
        today: NaiveDate,
        counter: u32,
        now: DateTime<Local>,
    ) -> Result<RenamedFile> {
        let parent = candidate
            .path
            .parent()
            .context("source file has no parent directory")?;

        let (target, used, probed) = resolve_free_target(parent, counter, |n| {
            render_file_name(config, today, n, &candidate.extension)
        })?;

        fs::rename(&candidate.path, &target).with_context(|| {
            format!(
                "could not rename {} -> {}",
                candidate.path.display(),
                target.display()
            )
        })?;

        let new_name = target
            .file_name()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default();
        if probed {
            info!("{} -> {} (counter advanced to {used})", candidate.file_name, new_name);
        } else {
            info!("{} -> {}", candidate.file_name, new_name);
        }

        self.after_rename(candidate, &new_name, &target, config, now);

        Ok(RenamedFile {
            from: candidate.path.clone(),
            to: target,
            counter: used,
            probed,
        })
    }

    fn after_rename(
        &mut self,
        candidate: &Candidate,
        new_name: &str,
        target: &Path,
        config: &AppConfig,
        now: DateTime<Local>,
    ) {
        let keys = [
            identity_key(&candidate.file_name, candidate.created),
            identity_key(new_name, candidate.created),
        ];
        if let Err(err) = self.ledger.record(keys) {
            warn!("could not persist renamed-file ledger: {err:#}");
        }

        self.session_sequence += 1;
        let stored = self.history.as_ref().map(|history| {
            history.add_record(now, &config.route, &candidate.file_name, new_name, target)
        });
        let record = match stored {
            Some(Ok(record)) => record,
            other => {
                if let Some(Err(err)) = other {
                    warn!("could not store rename record: {err:#}");
                }
                RenameRecord {
                    sequence: self.session_sequence,
                    created_at: now,
                    route: config.route.clone(),
                    original_name: candidate.file_name.clone(),
                    new_name: new_name.to_string(),
                    path: target.to_path_buf(),
                }
            }
        };

        for listener in &self.listeners {
            listener.on_renamed(&record);
        }
    }
}

/// Probes `counter`, `counter + 1`, ... until the rendered name is free.
/// Returns the path, the counter used and whether probing was needed.
fn resolve_free_target<F>(dir: &Path, counter: u32, render: F) -> Result<(PathBuf, u32, bool)>
where
    F: Fn(u32) -> String,
{
    let mut n = counter;
    let mut candidate = dir.join(render(n));
    while candidate.exists() {
        let next = n
            .checked_add(1)
            .context("counter space exhausted while probing for a free name")?;
        let next_candidate = dir.join(render(next));
        if next_candidate == candidate {
            anyhow::bail!(
                "target already exists and the template has no counter: {}",
                candidate.display()
            );
        }
        n = next;
        candidate = next_candidate;
    }
    Ok((candidate, n, n != counter))
}

pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    let extension = extension_of(path);
    allowed.iter().any(|ext| *ext == extension)
}

fn list_folder_files(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        anyhow::bail!("folder does not exist: {}", folder.display());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("could not list folder: {}", folder.display()))?;
        if entry.file_type().is_file() {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

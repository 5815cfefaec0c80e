use crate::config::ConfigStore;
use crate::rename::{has_allowed_extension, RenameOutcome, Renamer};
use anyhow::{anyhow, Context, Result};
use notify::event::CreateKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, SendError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    /// A file appeared; rename it once the debounce delay has passed.
    Detected(PathBuf),
    /// Rename these paths immediately.
    RenameNow(Vec<PathBuf>),
    /// Rename every eligible file in the active folder.
    RenameFolder,
    /// Flush pending detections and stop.
    Shutdown,
}

/// Non-recursive watch on one folder that forwards newly created files with
/// an allowed extension to the rename worker.
pub struct FolderWatcher {
    folder: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FolderWatcher {
    pub fn start(
        folder: &Path,
        config: Arc<ConfigStore>,
        sender: Sender<WorkerCommand>,
    ) -> Result<Self> {
        if !folder.is_dir() {
            anyhow::bail!("folder does not exist: {}", folder.display());
        }

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => forward_created(&event, &config, &sender),
                Err(err) => warn!("watch error: {err}"),
            }
        })
        .context("could not create folder watcher")?;

        watcher
            .watch(folder, RecursiveMode::NonRecursive)
            .with_context(|| format!("could not watch folder: {}", folder.display()))?;

        info!(folder = %folder.display(), "monitoring started");
        Ok(Self {
            folder: folder.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        info!(folder = %self.folder.display(), "monitoring stopped");
    }
}

fn forward_created(event: &Event, config: &ConfigStore, sender: &Sender<WorkerCommand>) {
    if !is_file_creation(&event.kind) {
        return;
    }
    let allowed = config.snapshot().allowed_extensions();
    for path in &event.paths {
        if path.is_dir() {
            continue;
        }
        if !has_allowed_extension(path, &allowed) {
            info!(path = %path.display(), "ignored: extension not allowed");
            continue;
        }
        debug!(path = %path.display(), "file detected");
        if sender.send(WorkerCommand::Detected(path.clone())).is_err() {
            warn!("rename worker is gone, dropping detection");
            return;
        }
    }
}

fn is_file_creation(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(k) if *k != CreateKind::Folder)
}

/// Starts and stops the folder watch, remembering the choice in settings.
pub struct Monitor {
    config: Arc<ConfigStore>,
    sender: Sender<WorkerCommand>,
    watcher: Option<FolderWatcher>,
}

impl Monitor {
    pub fn new(config: Arc<ConfigStore>, sender: Sender<WorkerCommand>) -> Self {
        Self {
            config,
            sender,
            watcher: None,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let folder = self.config.snapshot().folder;
        let watcher = FolderWatcher::start(&folder, self.config.clone(), self.sender.clone())?;
        self.watcher = Some(watcher);
        if let Err(err) = self.config.set_monitoring_enabled(true) {
            warn!("could not persist monitoring flag: {err:#}");
        }
        Ok(())
    }

    /// Stops new detections. A batch that is already running is not
    /// interrupted.
    pub fn stop(&mut self) {
        if self.watcher.take().is_none() {
            return;
        }
        if let Err(err) = self.config.set_monitoring_enabled(false) {
            warn!("could not persist monitoring flag: {err:#}");
        }
    }

    /// Switches the active folder, restarting the watch if it was running.
    pub fn change_folder(&mut self, folder: &Path) -> Result<()> {
        let was_running = self.is_monitoring();
        self.watcher = None;
        self.config.set_folder(folder)?;
        info!(folder = %folder.display(), "folder changed");
        if was_running {
            self.start()?;
        }
        Ok(())
    }
}

/// Single consumer that owns the [`Renamer`] and drains worker commands.
pub struct RenameWorker {
    sender: Sender<WorkerCommand>,
    handle: JoinHandle<Renamer>,
}

impl RenameWorker {
    pub fn spawn(renamer: Renamer, debounce: Duration) -> Result<Self> {
        let (sender, receiver) = channel();
        let handle = thread::Builder::new()
            .name("rename-worker".to_string())
            .spawn(move || run_worker(renamer, receiver, debounce))
            .context("could not start rename worker")?;
        Ok(Self { sender, handle })
    }

    pub fn sender(&self) -> Sender<WorkerCommand> {
        self.sender.clone()
    }

    pub fn send(&self, command: WorkerCommand) -> Result<(), SendError<WorkerCommand>> {
        self.sender.send(command)
    }

    /// Flushes pending detections, stops the worker and hands the renamer back.
    pub fn shutdown(self) -> Result<Renamer> {
        let _ = self.sender.send(WorkerCommand::Shutdown);
        self.handle
            .join()
            .map_err(|_| anyhow!("rename worker panicked"))
    }
}

fn run_worker(mut renamer: Renamer, receiver: Receiver<WorkerCommand>, debounce: Duration) -> Renamer {
    let mut pending: Vec<(PathBuf, Instant)> = Vec::new();

    loop {
        let received = match pending.iter().map(|(_, due)| *due).min() {
            Some(due) => receiver.recv_timeout(due.saturating_duration_since(Instant::now())),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(WorkerCommand::Detected(path)) => {
                if !pending.iter().any(|(p, _)| *p == path) {
                    pending.push((path, Instant::now() + debounce));
                }
            }
            Ok(WorkerCommand::RenameNow(paths)) => {
                report(&renamer.rename(&paths));
            }
            Ok(WorkerCommand::RenameFolder) => {
                report(&renamer.rename_folder());
            }
            Ok(WorkerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                let paths: Vec<PathBuf> = pending.drain(..).map(|(p, _)| p).collect();
                if !paths.is_empty() {
                    report(&renamer.rename(&paths));
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|(_, due)| *due <= now);
        pending = waiting;
        if !due.is_empty() {
            let paths: Vec<PathBuf> = due.into_iter().map(|(p, _)| p).collect();
            report(&renamer.rename(&paths));
        }
    }

    debug!("rename worker stopped");
    renamer
}

fn report(outcome: &RenameOutcome) {
    if outcome.is_empty() {
        return;
    }
    if outcome.failed.is_empty() {
        info!(
            renamed = outcome.renamed.len(),
            skipped = outcome.skipped.len(),
            "batch finished"
        );
    } else {
        error!(
            renamed = outcome.renamed.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "batch finished with failures"
        );
    }
}

//! Input directory watcher.
//!
//! notify delivers filesystem events on its own thread. That thread only
//! pushes candidate paths into an unbounded channel; the async consumer loop
//! ([`InputWatcher::run`]) owns all pipeline work. Nothing crosses back the
//! other way.
//!
//! The startup scan feeds the same channel and runs after the watch is
//! registered, so a file dropped while the service starts is seen at least
//! once. Duplicate notifications for a path already being ingested are
//! dropped.

use crate::config::PipelineConfig;
use crate::error::PaperPilotError;
use crate::pipeline::ingest::Ingestor;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A registered watch on the input directory plus its event queue.
pub struct InputWatcher {
    config: PipelineConfig,
    watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<PathBuf>,
}

impl InputWatcher {
    /// Register a non-recursive watch on the input directory and queue the
    /// files already in it.
    pub fn start(config: &PipelineConfig) -> Result<Self, PaperPilotError> {
        let dir = config.input_dir.as_path();
        let (tx, rx) = mpsc::unbounded_channel();

        let event_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in arrived_paths(event) {
                    // The receiver is gone only during shutdown.
                    let _ = event_tx.send(path);
                }
            }
            Err(e) => warn!("Watch error: {}", e),
        })
        .map_err(|source| PaperPilotError::Watch {
            path: dir.to_path_buf(),
            source,
        })?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| PaperPilotError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;
        info!("Watching '{}'", dir.display());

        for path in scan_existing(dir)? {
            let _ = tx.send(path);
        }

        Ok(Self {
            config: config.clone(),
            watcher,
            rx,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.config.input_dir
    }

    /// Ingest arriving files until `shutdown` resolves, then wait for the
    /// ingestions already in flight.
    pub async fn run<F>(self, ingestor: Ingestor, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            watcher,
            mut rx,
        } = self;
        let mut in_flight: HashSet<PathBuf> = HashSet::new();
        let mut tasks: JoinSet<PathBuf> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(path) = rx.recv() => {
                    if !config.is_eligible(&path) {
                        continue;
                    }
                    if !in_flight.insert(path.clone()) {
                        debug!("'{}' already in flight", path.display());
                        continue;
                    }
                    info!("New file detected: '{}'", path.display());
                    let ingestor = ingestor.clone();
                    tasks.spawn(async move {
                        if let Err(e) = ingestor.ingest(&path).await {
                            error!("Ingestion of '{}' failed: {}", path.display(), e);
                        }
                        path
                    });
                }
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    finish(&mut in_flight, done);
                }
            }
        }

        info!("Watcher stopping; {} ingestion(s) in flight", tasks.len());
        drop(watcher);
        while let Some(done) = tasks.join_next().await {
            finish(&mut in_flight, done);
        }
    }
}

fn finish(in_flight: &mut HashSet<PathBuf>, done: Result<PathBuf, tokio::task::JoinError>) {
    match done {
        Ok(path) => {
            in_flight.remove(&path);
        }
        Err(e) => error!("Ingestion task panicked: {}", e),
    }
}

/// Paths that may have just appeared in the watched directory.
fn arrived_paths(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) => event.paths,
        // Both: [from, to]; only the destination is new.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().last().into_iter().collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => event.paths,
        _ => Vec::new(),
    }
}

/// Regular files currently in `dir`, sorted by name.
pub fn scan_existing(dir: &Path) -> Result<Vec<PathBuf>, PaperPilotError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| PaperPilotError::io(dir, e))? {
        let entry = entry.map_err(|e| PaperPilotError::io(dir, e))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort();
    debug!("Startup scan of '{}': {} file(s)", dir.display(), files.len());
    Ok(files)
}

//! Config-file feed
//!
//! Watches the bootstrap file and pushes every saved version through the
//! reconfiguration engine. Pools are never created or removed here; ids the
//! registry does not know are skipped by the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dynpool_lib::{refresh::RefreshSummary, ConfigRefresher, NotifierDispatcher};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::load_bootstrap;

/// Editors often write a file in several steps; wait for them to settle
const SETTLE_DELAY: Duration = Duration::from_millis(250);

pub struct ConfigWatcher {
    path: PathBuf,
    refresher: Arc<ConfigRefresher>,
    dispatcher: Arc<NotifierDispatcher>,
}

/// Stops watching when dropped
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    _task: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn new(
        path: impl Into<PathBuf>,
        refresher: Arc<ConfigRefresher>,
        dispatcher: Arc<NotifierDispatcher>,
    ) -> Self {
        Self {
            path: path.into(),
            refresher,
            dispatcher,
        }
    }

    /// Re-read the file and apply it to the live pools
    pub async fn reload(&self) -> Result<RefreshSummary> {
        let bootstrap = load_bootstrap(&self.path)?;
        bootstrap.validate().context("Rejected configuration file")?;

        self.dispatcher.set_platform(bootstrap.platform());
        Ok(self.refresher.apply_all(bootstrap.updates()).await)
    }

    /// Start watching the file's directory.
    ///
    /// The directory is watched rather than the file so that atomic
    /// replacement by rename is seen too.
    pub async fn start(self) -> Result<WatcherHandle> {
        let (tx, mut rx) = mpsc::channel::<Event>(64);

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.try_send(event);
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create filesystem watcher")?;

        let dir = watch_dir(&self.path);
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        info!(path = %self.path.display(), "Watching configuration file");

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !self.concerns(&event) {
                    continue;
                }

                tokio::time::sleep(SETTLE_DELAY).await;
                while rx.try_recv().is_ok() {}

                debug!(path = %self.path.display(), "Configuration file changed");
                match self.reload().await {
                    Ok(summary) => {
                        for (pool_id, error) in &summary.failed {
                            warn!(pool_id = %pool_id, error = %error, "Pool rejected file update");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to reload configuration file"),
                }
            }
            debug!("Watcher channel closed");
        });

        Ok(WatcherHandle {
            _watcher: watcher,
            _task: task,
        })
    }

    fn concerns(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.path.file_name())
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

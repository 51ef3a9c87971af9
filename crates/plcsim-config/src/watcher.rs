//! ---
//! plcsim_section: "04-configuration"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Line directory change watcher emitting reload events."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::loader::{ConfigurationLoader, ConfigurationSet};
use crate::ConfigError;

/// Outcome of a reload attempt, delivered to the single subscriber.
#[derive(Debug, Clone)]
pub enum ReloadEvent {
    /// A new generation passed validation and should replace the running one.
    Reloaded(Arc<ConfigurationSet>),
    /// The directory changed but could not be loaded; the running generation stays.
    Failed(Arc<ConfigError>),
}

/// Watches a line directory through OS notifications with a polling fallback.
///
/// A reload is only attempted when the directory digest differs from the last one
/// seen, so unchanged files never produce events and a broken edit is reported once.
#[derive(Debug)]
pub struct ConfigWatcher {
    loader: ConfigurationLoader,
    poll_interval: Duration,
    debounce: Duration,
    last_seen: Option<String>,
}

impl ConfigWatcher {
    pub fn new(loader: ConfigurationLoader, poll_interval: Duration, debounce: Duration) -> Self {
        Self {
            loader,
            poll_interval,
            debounce,
            last_seen: None,
        }
    }

    /// Treat `digest` as already applied.
    pub fn with_baseline(mut self, digest: impl Into<String>) -> Self {
        self.last_seen = Some(digest.into());
        self
    }

    /// Check the directory once and report what changed, if anything.
    pub fn poll_once(&mut self) -> Option<ReloadEvent> {
        let marker = match self.loader.digest() {
            Ok(digest) => digest,
            Err(err) => format!("error:{err}"),
        };
        if self.last_seen.as_deref() == Some(marker.as_str()) {
            return None;
        }
        self.last_seen = Some(marker);
        match self.loader.load() {
            Ok(set) => {
                info!(digest = %set.digest, equipment = set.len(), "line configuration changed");
                self.last_seen = Some(set.digest.clone());
                Some(ReloadEvent::Reloaded(Arc::new(set)))
            }
            Err(err) => {
                warn!(dir = %self.loader.dir().display(), error = %err, "line configuration reload failed");
                Some(ReloadEvent::Failed(Arc::new(err)))
            }
        }
    }

    /// Run the watch loop on the tokio runtime until `shutdown` fires or the
    /// receiver is dropped.
    pub fn spawn(
        mut self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> (mpsc::Receiver<ReloadEvent>, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move {
            let (nudge_tx, mut nudge_rx) = mpsc::channel::<()>(1);
            let _os_watcher = match self.os_watcher(nudge_tx) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    warn!(error = %err, "filesystem notifications unavailable, polling only");
                    None
                }
            };
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {}
                    Some(()) = nudge_rx.recv() => {
                        sleep(self.debounce).await;
                        while nudge_rx.try_recv().is_ok() {}
                    }
                }
                if let Some(event) = self.poll_once() {
                    if events_tx.send(event).await.is_err() {
                        debug!("reload receiver dropped, stopping watcher");
                        break;
                    }
                }
            }
            debug!(dir = %self.loader.dir().display(), "configuration watcher stopped");
        });
        (events_rx, handle)
    }

    fn os_watcher(&self, nudge: mpsc::Sender<()>) -> Result<RecommendedWatcher, ConfigError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
                Ok(_) => {
                    let _ = nudge.try_send(());
                }
                Err(err) => warn!(error = %err, "filesystem watch error"),
            }
        })?;
        watcher.watch(self.loader.dir(), RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

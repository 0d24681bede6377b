//! File-backed settings with change notification.
//!
//! `FileConfigSource` re-reads its document on a fixed cadence (and on
//! `SIGHUP` where available) and publishes a new revision through a
//! `tokio::sync::watch` channel whenever the file content changed. A revision
//! carries either the parsed settings or the error that prevented parsing, so
//! subscribers can report rejected updates.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ConfigError, ConfigurationSettings};

/// One published state of the settings document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRevision {
    /// Monotonic revision number, starting at 1 for the initial load.
    pub revision: u64,
    /// Parsed settings, or why the document could not be parsed.
    pub settings: Result<ConfigurationSettings, ConfigError>,
}

/// Settings document on disk, watched for changes.
#[derive(Debug)]
pub struct FileConfigSource {
    path: PathBuf,
    poll_interval: Duration,
    tx: watch::Sender<ConfigRevision>,
    last_content: Mutex<String>,
}

impl FileConfigSource {
    /// Loads the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. The initial
    /// load is fail-fast; later changes are published as failed revisions.
    pub async fn load(path: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = read(&path).await?;
        let settings = ConfigurationSettings::from_json(&content)?;

        let (tx, _rx) = watch::channel(ConfigRevision {
            revision: 1,
            settings: Ok(settings),
        });

        tracing::info!(path = %path.display(), "Loaded settings document");

        Ok(Self {
            path,
            poll_interval,
            tx,
            last_content: Mutex::new(content),
        })
    }

    /// Path of the watched document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The latest revision.
    #[must_use]
    pub fn current(&self) -> ConfigRevision {
        self.tx.borrow().clone()
    }

    /// Subscribes to revisions. The returned receiver has already seen the current one.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConfigRevision> {
        self.tx.subscribe()
    }

    /// Re-reads the document and publishes a revision if its content changed.
    ///
    /// Returns true if a revision was published.
    pub async fn refresh(&self) -> bool {
        let content = match read(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to re-read settings document");
                return false;
            }
        };

        {
            let mut last = self.last_content.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == content {
                return false;
            }
            last.clone_from(&content);
        }

        let settings = ConfigurationSettings::from_json(&content);
        self.tx.send_modify(|current| {
            current.revision += 1;
            current.settings = settings;
        });
        tracing::info!(
            path = %self.path.display(),
            revision = self.tx.borrow().revision,
            "Settings document changed"
        );
        true
    }

    /// Watches the document until `token` is cancelled.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            let mut hangup = Hangup::install();

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    () = hangup.recv() => {
                        tracing::info!("SIGHUP received, re-reading settings document");
                    }
                }
                self.refresh().await;
            }

            tracing::debug!("Settings watcher stopped");
        })
    }
}

async fn read(path: &Path) -> Result<String, ConfigError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))
}

struct Hangup {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

impl Hangup {
    #[cfg(unix)]
    fn install() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::hangup()) {
            Ok(signal) => Self {
                signal: Some(signal),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGHUP handler");
                Self { signal: None }
            }
        }
    }

    #[cfg(not(unix))]
    fn install() -> Self {
        Self {}
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        match self.signal.as_mut() {
            Some(signal) => {
                if signal.recv().await.is_none() {
                    self.signal = None;
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending().await,
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending().await
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};

/// Reads notifications the server under test appends to a file, one per
/// line.
///
/// The harness creates (or truncates) the file before the server starts and
/// passes its path to the server. Reads wake on file-system events and fall
/// back to polling, so a watcher that misses an event only costs one poll
/// interval.
pub struct NotificationChannel {
    path: PathBuf,
    reader: BufReader<File>,
    pending: Vec<u8>,
    poll_interval: Duration,
    /// Wake-ups from the file watcher; `None` when only polling.
    events: Option<mpsc::Receiver<()>>,
    /// Kept alive for as long as the channel; dropping it stops the events.
    _watcher: Option<RecommendedWatcher>,
}

impl NotificationChannel {
    /// Creates an empty notification file at `path` and opens it for
    /// reading.
    pub async fn create(path: impl AsRef<Path>, poll_interval: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let file = File::open(&path).await?;

        let (tx, events) = mpsc::channel(16);
        let (watcher, events) = match Self::watch(&path, tx) {
            Ok(watcher) => (Some(watcher), Some(events)),
            Err(e) => {
                warn!("Watching {:?} failed, falling back to polling: {}", path, e);
                (None, None)
            }
        };

        info!("Notification channel ready at {:?}", path);
        Ok(Self {
            path,
            reader: BufReader::new(file),
            pending: Vec::new(),
            poll_interval,
            events,
            _watcher: watcher,
        })
    }

    fn watch(path: &Path, tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    // A full channel already holds a wake-up.
                    let _ = tx.try_send(());
                }
                Ok(_) => {}
                Err(e) => warn!("Notification watch error: {}", e),
            },
            notify::Config::default(),
        )?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    /// Returns the next complete notification line, without its line ending.
    ///
    /// A line the server has only partly written is held back until its
    /// newline arrives. Fails with [`HarnessError::Timeout`] if no complete
    /// line shows up within `limit`.
    pub async fn next_line(&mut self, limit: Duration) -> Result<String> {
        let what = format!("a notification in {:?}", self.path);
        match timeout(limit, self.read_line()).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::timeout(what, limit)),
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending).await?;
            if self.pending.ends_with(b"\n") {
                let line = String::from_utf8_lossy(&self.pending)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                self.pending.clear();
                debug!("Notification: {}", line);
                return Ok(line);
            }
            if read == 0 {
                self.wait_for_change().await;
            }
        }
    }

    async fn wait_for_change(&mut self) {
        match self.events.as_mut() {
            // A closed channel disables its branch, leaving the poll sleep.
            Some(events) => select! {
                Some(_) = events.recv() => {}
                _ = sleep(self.poll_interval) => {}
            },
            None => sleep(self.poll_interval).await,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("path", &self.path)
            .field("pending", &self.pending.len())
            .field("watching", &self._watcher.is_some())
            .finish()
    }
}

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use regex::Regex;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::error::{HarnessError, Result};

/// Append-only capture of a process's output.
///
/// The reader task of a [`crate::ProcessHandle`] is the only writer; it
/// appends whole lines under the lock, so a snapshot never splits a line
/// except for a final line the process has not terminated yet. Clones share
/// the same buffer.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    bytes: Mutex<Vec<u8>>,
    appended: Notify,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one chunk (normally one line including its newline) and wakes
    /// anyone waiting in [`OutputBuffer::wait_for`].
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.lock().extend_from_slice(chunk);
        self.shared.appended.notify_waiters();
    }

    /// Appends `line` followed by a newline.
    pub fn append_line(&self, line: &str) {
        let mut chunk = Vec::with_capacity(line.len() + 1);
        chunk.extend_from_slice(line.as_bytes());
        chunk.push(b'\n');
        self.append(&chunk);
    }

    /// Point-in-time copy of the raw bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Point-in-time text snapshot; invalid UTF-8 is replaced.
    pub fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// Text appended after the first `offset` bytes.
    pub fn since(&self, offset: usize) -> String {
        let bytes = self.lock();
        let start = offset.min(bytes.len());
        String::from_utf8_lossy(&bytes[start..]).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.snapshot().lines().map(str::to_owned).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.snapshot().contains(needle)
    }

    pub fn matches(&self, pattern: &Regex) -> bool {
        pattern.is_match(&self.snapshot())
    }

    /// Waits until `predicate` holds for the captured text.
    ///
    /// Re-evaluated after every append; fails with
    /// [`HarnessError::Timeout`] if it is still false after `limit`.
    pub async fn wait_for<F>(&self, what: &str, limit: Duration, mut predicate: F) -> Result<()>
    where
        F: FnMut(&str) -> bool,
    {
        let wait = async {
            loop {
                let notified = self.shared.appended.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if predicate(&self.snapshot()) {
                    return;
                }
                notified.await;
            }
        };

        timeout(limit, wait)
            .await
            .map_err(|_| HarnessError::timeout(what, limit))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panicking appender cannot leave a half-written line behind, the
        // bytes are still consistent.
        self.shared
            .bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

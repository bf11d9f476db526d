//! The ordered conversation log.
//!
//! Entries are appended or, for the newest streaming reply, grown in place.
//! Every mutation bumps a version published on a `watch` channel so a
//! renderer can redraw without polling.

use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use serde::Serialize;
use tokio::sync::watch;

/// Which side of the conversation produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub content: String,
    pub direction: Direction,
    /// Local wall-clock time of creation, `HH:MM:SS`
    pub timestamp: String,
}

impl Message {
    pub fn new(content: impl Into<String>, direction: Direction) -> Self {
        Self {
            content: content.into(),
            direction,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        }
    }

    pub fn sent(content: impl Into<String>) -> Self {
        Self::new(content, Direction::Sent)
    }

    pub fn received(content: impl Into<String>) -> Self {
        Self::new(content, Direction::Received)
    }
}

/// Refers to one entry appended during a particular log epoch.
///
/// A clear starts a new epoch, after which handles from the old one no
/// longer resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    epoch: u64,
    index: usize,
}

#[derive(Debug, Default)]
struct LogInner {
    entries: Vec<Message>,
    epoch: u64,
}

#[derive(Debug)]
pub struct MessageLog {
    inner: Mutex<LogInner>,
    version: watch::Sender<u64>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Mutex::new(LogInner::default()),
            version,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        // A panic while holding the lock cannot leave the Vec half-written
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Append a message and return a handle to it.
    pub fn push(&self, message: Message) -> EntryHandle {
        let handle = {
            let mut inner = self.lock();
            inner.entries.push(message);
            EntryHandle {
                epoch: inner.epoch,
                index: inner.entries.len() - 1,
            }
        };
        self.bump();
        handle
    }

    /// Append only if the log has not been cleared since `epoch`.
    pub fn push_if_epoch(&self, epoch: u64, message: Message) -> Option<EntryHandle> {
        let handle = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return None;
            }
            inner.entries.push(message);
            EntryHandle {
                epoch,
                index: inner.entries.len() - 1,
            }
        };
        self.bump();
        Some(handle)
    }

    /// Grow the content of an existing entry.
    ///
    /// Returns `false` if the entry no longer exists because the log was
    /// cleared after the handle was issued.
    pub fn append_to(&self, handle: EntryHandle, fragment: &str) -> bool {
        {
            let mut inner = self.lock();
            if inner.epoch != handle.epoch {
                return false;
            }
            match inner.entries.get_mut(handle.index) {
                Some(entry) => entry.content.push_str(fragment),
                None => return false,
            }
        }
        self.bump();
        true
    }

    /// Remove every entry and start a new epoch.
    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            inner.entries.clear();
            inner.epoch += 1;
        }
        self.bump();
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Receiver that changes whenever the log does.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_wall_clock_format() {
        let msg = Message::sent("hi");
        assert_eq!(msg.timestamp.len(), 8);
        let parts: Vec<&str> = msg.timestamp.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 2 && p.parse::<u8>().is_ok()));
    }

    #[test]
    fn push_keeps_order_and_direction() {
        let log = MessageLog::new();
        log.push(Message::sent("a"));
        log.push(Message::received("b"));

        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "a");
        assert_eq!(entries[0].direction, Direction::Sent);
        assert_eq!(entries[1].content, "b");
        assert_eq!(entries[1].direction, Direction::Received);
    }

    #[test]
    fn append_grows_entry_in_place() {
        let log = MessageLog::new();
        let handle = log.push(Message::received(""));
        assert!(log.append_to(handle, "Hel"));
        assert!(log.append_to(handle, "lo"));

        let entries = log.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "Hello");
    }

    #[test]
    fn clear_invalidates_old_handles() {
        let log = MessageLog::new();
        let handle = log.push(Message::received("partial"));
        log.clear();

        assert!(log.is_empty());
        assert!(!log.append_to(handle, "more"));
        assert!(log.is_empty());
    }

    #[test]
    fn handle_from_old_epoch_does_not_touch_new_entry_at_same_index() {
        let log = MessageLog::new();
        let stale = log.push(Message::received("old"));
        log.clear();
        log.push(Message::received("new"));

        assert!(!log.append_to(stale, "!"));
        assert_eq!(log.snapshot()[0].content, "new");
    }

    #[test]
    fn push_if_epoch_rejects_after_clear() {
        let log = MessageLog::new();
        let epoch = log.epoch();
        log.clear();

        assert!(log.push_if_epoch(epoch, Message::received("late")).is_none());
        assert!(log.is_empty());

        let current = log.epoch();
        assert!(log.push_if_epoch(current, Message::received("ok")).is_some());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn every_mutation_bumps_version() {
        let log = MessageLog::new();
        let rx = log.subscribe();
        assert_eq!(*rx.borrow(), 0);

        let handle = log.push(Message::sent("x"));
        log.append_to(handle, "y");
        log.clear();
        assert_eq!(log.version(), 3);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn rejected_mutations_leave_version_alone() {
        let log = MessageLog::new();
        let handle = log.push(Message::sent("x"));
        log.clear();
        let before = log.version();

        log.append_to(handle, "y");
        log.push_if_epoch(0, Message::sent("z"));
        assert_eq!(log.version(), before);
    }
}

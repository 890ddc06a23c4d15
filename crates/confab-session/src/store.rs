//! Shared message history.
//!
//! The store is the single owner of [`Message`] values. Audio for a given
//! message index only ever grows (invariant I3), and external readers
//! always receive clones, never references into live state.

use std::sync::Mutex;

use confab_core::Message;

/// Thread-safe append-mostly message history.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Mutex<Vec<Message>>,
}

impl MessageStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, returning its index.
    pub fn push(&self, message: Message) -> usize {
        let mut messages = self.messages.lock().expect("message store poisoned");
        messages.push(message);
        messages.len() - 1
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().expect("message store poisoned").len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the most recent message, if any.
    #[must_use]
    pub fn last_index(&self) -> Option<usize> {
        self.len().checked_sub(1)
    }

    /// Mutate the message at `index`. Returns false when out of range.
    pub fn update(&self, index: usize, f: impl FnOnce(&mut Message)) -> bool {
        let mut messages = self.messages.lock().expect("message store poisoned");
        match messages.get_mut(index) {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        }
    }

    /// Append consolidated audio to the message at `index` (monotone grow).
    pub fn extend_audio(&self, index: usize, chunk: &[u8]) -> bool {
        self.update(index, |message| message.extend_audio(chunk))
    }

    /// Append text content to the message at `index`.
    pub fn append_text(&self, index: usize, text: &str) -> bool {
        self.update(index, |message| message.content.push_str(text))
    }

    /// Clone of the message at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Message> {
        self.messages
            .lock()
            .expect("message store poisoned")
            .get(index)
            .cloned()
    }

    /// Clone of the entire history.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages
            .lock()
            .expect("message store poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_returns_sequential_indices() {
        let store = MessageStore::new();
        assert_eq!(store.push(Message::user("a")), 0);
        assert_eq!(store.push(Message::model()), 1);
        assert_eq!(store.last_index(), Some(1));
    }

    #[test]
    fn audio_grows_monotonically_across_flushes() {
        let store = MessageStore::new();
        let idx = store.push(Message::model());
        assert!(store.extend_audio(idx, &[1, 2, 3]));
        assert!(store.extend_audio(idx, &[4]));
        let message = store.get(idx).unwrap();
        assert_eq!(message.audio_data.as_deref(), Some(&[1, 2, 3, 4][..]));
    }

    #[test]
    fn out_of_range_updates_are_rejected() {
        let store = MessageStore::new();
        assert!(!store.extend_audio(5, &[1]));
        assert!(!store.append_text(0, "x"));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = MessageStore::new();
        let idx = store.push(Message::model());
        let snapshot = store.snapshot();
        store.append_text(idx, "later");
        assert!(snapshot[0].content.is_empty());
    }
}

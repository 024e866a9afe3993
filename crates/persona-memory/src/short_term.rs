//! Short-Term Memory.
//!
//! Keeps the most recent turns of every channel in a fixed-capacity FIFO
//! window and renders them as the conversation block of a prompt.
//!
//! # Concurrency
//!
//! The store is shared between concurrently running chat turns on a
//! multi-threaded runtime, so every mutation is lock-protected:
//!
//! * the channel map sits behind an [`RwLock`] – the write lock is only taken
//!   when a channel is seen for the first time or when everything is cleared;
//! * each channel's window sits behind its own [`Mutex`], so turns on
//!   different channels never contend with each other.
//!
//! # Example
//!
//! ```rust
//! use persona_memory::short_term::ShortTermStore;
//!
//! let store = ShortTermStore::new(3);
//! store.add_message("A", "hi", 7);
//! store.add_message("B", "yo", 7);
//! store.add_message("C", "sup", 7);
//! store.add_message("D", "hey", 7);
//!
//! assert_eq!(store.get_context(7, None), "B: yo\nC: sup\nD: hey");
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use persona_types::{ChannelId, Turn};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default number of turns retained per channel.
pub const DEFAULT_WINDOW_SIZE: usize = 20;

// ─────────────────────────────────────────────────────────────────────────────
// ChannelHistory
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded ring buffer of the turns seen in one channel (oldest first).
#[derive(Debug)]
struct ChannelHistory {
    capacity: usize,
    turns: VecDeque<Turn>,
}

impl ChannelHistory {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    /// Append `turn`, evicting the oldest entry when the window is full.
    fn push(&mut self, turn: Turn) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// The last `count` turns, oldest first.
    fn tail(&self, count: usize) -> impl Iterator<Item = &Turn> {
        let skip = self.turns.len().saturating_sub(count);
        self.turns.iter().skip(skip)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

/// Occupancy snapshot of a [`ShortTermStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortTermStats {
    pub total_channels: usize,
    pub window_size: usize,
    /// Number of turns currently held per channel.
    pub channels: BTreeMap<ChannelId, usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ShortTermStore
// ─────────────────────────────────────────────────────────────────────────────

/// Per-channel sliding window of recent turns.
pub struct ShortTermStore {
    window_size: usize,
    channels: RwLock<HashMap<ChannelId, Arc<Mutex<ChannelHistory>>>>,
}

impl ShortTermStore {
    /// Create a store keeping the last `window_size` turns of every channel.
    ///
    /// A window of `0` is clamped to `1`.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        info!(window_size, "short-term memory initialized");
        Self {
            window_size,
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Append a turn to `channel_id`'s history, creating the history on first
    /// use.  The oldest turn is evicted once the window is full.
    pub fn add_message(&self, author: &str, content: &str, channel_id: ChannelId) {
        let history = self.history_or_create(channel_id);
        let mut history = history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push(Turn::new(author, content));
        debug!(channel_id, size = history.turns.len(), "message added to short-term memory");
    }

    /// Render the last `max_messages` turns as `"{author}: {content}"` lines,
    /// oldest first.
    ///
    /// `None` (or `Some(0)`) renders the whole window.  An unknown channel
    /// yields an empty string.
    pub fn get_context(&self, channel_id: ChannelId, max_messages: Option<usize>) -> String {
        let Some(history) = self.history(channel_id) else {
            return String::new();
        };
        let history = history.lock().unwrap_or_else(PoisonError::into_inner);
        let count = match max_messages {
            Some(n) if n > 0 => n,
            _ => history.turns.len(),
        };
        let lines: Vec<String> = history.tail(count).map(Turn::render).collect();
        debug!(channel_id, messages = lines.len(), "short-term context rendered");
        lines.join("\n")
    }

    /// Return the last `count` turns of `channel_id`, oldest first.
    pub fn get_recent_messages(&self, channel_id: ChannelId, count: usize) -> Vec<Turn> {
        let Some(history) = self.history(channel_id) else {
            return Vec::new();
        };
        let history = history.lock().unwrap_or_else(PoisonError::into_inner);
        history.tail(count).cloned().collect()
    }

    /// Drop every turn recorded for `channel_id`.  The (empty) history is kept.
    pub fn clear_channel(&self, channel_id: ChannelId) {
        if let Some(history) = self.history(channel_id) {
            history.lock().unwrap_or_else(PoisonError::into_inner).turns.clear();
            info!(channel_id, "cleared short-term memory for channel");
        }
    }

    /// Forget every channel.
    pub fn clear_all(&self) {
        self.channels.write().unwrap_or_else(PoisonError::into_inner).clear();
        info!("cleared all short-term memory");
    }

    pub fn get_stats(&self) -> ShortTermStats {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        ShortTermStats {
            total_channels: channels.len(),
            window_size: self.window_size,
            channels: channels
                .iter()
                .map(|(id, h)| (*id, h.lock().unwrap_or_else(PoisonError::into_inner).turns.len()))
                .collect(),
        }
    }

    fn history(&self, channel_id: ChannelId) -> Option<Arc<Mutex<ChannelHistory>>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel_id)
            .cloned()
    }

    fn history_or_create(&self, channel_id: ChannelId) -> Arc<Mutex<ChannelHistory>> {
        if let Some(history) = self.history(channel_id) {
            return history;
        }
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            channels
                .entry(channel_id)
                .or_insert_with(|| Arc::new(Mutex::new(ChannelHistory::new(self.window_size)))),
        )
    }
}

impl Default for ShortTermStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── window bounds ────────────────────────────────────────────────────────

    #[test]
    fn history_length_is_min_of_calls_and_window() {
        for calls in 0..8usize {
            let store = ShortTermStore::new(5);
            for i in 0..calls {
                store.add_message("u", &format!("m{i}"), 1);
            }
            let stored = store.get_recent_messages(1, usize::MAX);
            assert_eq!(stored.len(), calls.min(5));

            // Oldest entries are evicted first; order matches insertion.
            let expected: Vec<String> = (calls.saturating_sub(5)..calls).map(|i| format!("m{i}")).collect();
            let actual: Vec<String> = stored.iter().map(|t| t.content().to_string()).collect();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn window_of_three_evicts_oldest() {
        let store = ShortTermStore::new(3);
        store.add_message("A", "hi", 9);
        store.add_message("B", "yo", 9);
        store.add_message("C", "sup", 9);
        store.add_message("D", "hey", 9);
        assert_eq!(store.get_context(9, None), "B: yo\nC: sup\nD: hey");
    }

    #[test]
    fn zero_window_is_clamped_to_one() {
        let store = ShortTermStore::new(0);
        store.add_message("A", "first", 1);
        store.add_message("B", "second", 1);
        assert_eq!(store.window_size(), 1);
        assert_eq!(store.get_context(1, None), "B: second");
    }

    // ── get_context ──────────────────────────────────────────────────────────

    #[test]
    fn unknown_channel_context_is_empty() {
        let store = ShortTermStore::default();
        assert_eq!(store.get_context(42, None), "");
        assert_eq!(store.get_context(42, Some(3)), "");
    }

    #[test]
    fn context_limited_to_last_k_in_order() {
        let store = ShortTermStore::new(10);
        for (a, c) in [("A", "1"), ("B", "2"), ("C", "3"), ("D", "4")] {
            store.add_message(a, c, 5);
        }
        assert_eq!(store.get_context(5, Some(2)), "C: 3\nD: 4");
        // k larger than the history returns everything.
        assert_eq!(store.get_context(5, Some(99)), "A: 1\nB: 2\nC: 3\nD: 4");
        // k = 0 behaves like "no limit".
        assert_eq!(store.get_context(5, Some(0)), "A: 1\nB: 2\nC: 3\nD: 4");
    }

    #[test]
    fn identical_histories_render_identically() {
        let a = ShortTermStore::new(4);
        let b = ShortTermStore::new(4);
        for store in [&a, &b] {
            store.add_message("x", "one", 1);
            store.add_message("y", "two", 1);
        }
        assert_eq!(a.get_context(1, None), b.get_context(1, None));
    }

    #[test]
    fn channels_are_isolated() {
        let store = ShortTermStore::new(4);
        store.add_message("A", "in one", 1);
        store.add_message("B", "in two", 2);
        assert_eq!(store.get_context(1, None), "A: in one");
        assert_eq!(store.get_context(2, None), "B: in two");
    }

    // ── get_recent_messages ──────────────────────────────────────────────────

    #[test]
    fn recent_messages_returns_structured_tail() {
        let store = ShortTermStore::new(10);
        store.add_message("A", "hi", 3);
        store.add_message("B", "yo", 3);
        store.add_message("C", "sup", 3);

        let recent = store.get_recent_messages(3, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].author(), "B");
        assert_eq!(recent[1].author(), "C");
        assert!(recent[0].timestamp() <= recent[1].timestamp());
        assert!(store.get_recent_messages(404, 2).is_empty());
    }

    // ── clearing ─────────────────────────────────────────────────────────────

    #[test]
    fn clear_channel_is_idempotent_and_scoped() {
        let store = ShortTermStore::new(4);
        store.add_message("A", "keep", 1);
        store.add_message("B", "drop", 2);

        store.clear_channel(2);
        store.clear_channel(2);
        store.clear_channel(77);

        assert_eq!(store.get_context(1, None), "A: keep");
        assert_eq!(store.get_context(2, None), "");
        // The emptied channel is still tracked.
        assert_eq!(store.get_stats().channels.get(&2), Some(&0));
    }

    #[test]
    fn clear_all_forgets_every_channel() {
        let store = ShortTermStore::new(4);
        store.add_message("A", "x", 1);
        store.add_message("B", "y", 2);
        store.clear_all();
        store.clear_all();
        assert_eq!(store.get_stats().total_channels, 0);
        assert_eq!(store.get_context(1, None), "");
    }

    // ── stats ────────────────────────────────────────────────────────────────

    #[test]
    fn stats_report_occupancy_per_channel() {
        let store = ShortTermStore::new(2);
        store.add_message("A", "1", 10);
        store.add_message("A", "2", 10);
        store.add_message("A", "3", 10);
        store.add_message("B", "1", 11);

        let stats = store.get_stats();
        assert_eq!(stats.total_channels, 2);
        assert_eq!(stats.window_size, 2);
        assert_eq!(stats.channels.get(&10), Some(&2));
        assert_eq!(stats.channels.get(&11), Some(&1));
    }

    // ── concurrency ──────────────────────────────────────────────────────────

    #[test]
    fn concurrent_inserts_respect_window() {
        let store = Arc::new(ShortTermStore::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.add_message(&format!("t{t}"), &format!("{i}"), 1);
                        store.add_message(&format!("t{t}"), &format!("{i}"), t);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = store.get_stats();
        assert_eq!(stats.channels.get(&1), Some(&16));
        assert!(stats.channels.values().all(|&n| n <= 16));
    }
}

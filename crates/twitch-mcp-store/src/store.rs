use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};
use twitch_mcp_core::types::{normalize_channel, ChatMessage, MessageFilter};

use crate::history::ChannelHistory;

/// Default number of messages returned by [`MessageStore::recent_messages`] callers.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// In-memory chat history, isolated per channel with a cross-channel view.
///
/// Every channel keeps at most `max_per_channel` messages; the oldest are
/// dropped first. That bound is the only thing limiting memory use, so worst
/// case is `channels × max_per_channel` messages.
///
/// The only writer is the connection manager's event loop; the lock is held
/// for plain in-memory work and never across an `.await`.
pub struct MessageStore {
    max_per_channel: usize,
    channels: Mutex<BTreeMap<String, ChannelHistory>>,
}

impl MessageStore {
    pub fn new(max_per_channel: usize) -> Self {
        Self {
            max_per_channel: max_per_channel.max(1),
            channels: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn max_per_channel(&self) -> usize {
        self.max_per_channel
    }

    /// Append a message to its channel's history, evicting the oldest on overflow.
    pub fn add_message(&self, message: ChatMessage) {
        let channel = normalize_channel(&message.channel);
        let mut channels = self.lock();
        let history = channels
            .entry(channel.clone())
            .or_insert_with(|| ChannelHistory::new(self.max_per_channel));
        let evicted = history.push(message);
        if evicted > 0 {
            debug!(channel = %channel, evicted, "history bound reached, evicted oldest");
        }
    }

    /// Up to `limit` most recent messages of `channel`, oldest first.
    ///
    /// Unknown channels yield an empty list.
    pub fn recent_messages(&self, channel: &str, limit: usize) -> Vec<ChatMessage> {
        self.lock()
            .get(&normalize_channel(channel))
            .map(|h| h.last_n(limit))
            .unwrap_or_default()
    }

    /// Full retained history of one channel, or of all channels merged by timestamp.
    ///
    /// The merge is a stable sort: equal timestamps keep their per-channel
    /// order, and channels are visited in name order.
    pub fn all_messages(&self, channel: Option<&str>) -> Vec<ChatMessage> {
        let channels = self.lock();
        match channel {
            Some(name) => channels
                .get(&normalize_channel(name))
                .map(|h| h.iter().cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut all: Vec<ChatMessage> = channels
                    .values()
                    .flat_map(|h| h.iter().cloned())
                    .collect();
                all.sort_by_key(|m| m.timestamp);
                all
            }
        }
    }

    /// Apply `filter` to the retained history.
    ///
    /// Criteria are intersected; the result is ascending by timestamp and
    /// sliced to one page when both page and page size are given.
    pub fn filter_messages(&self, filter: &MessageFilter) -> Vec<ChatMessage> {
        let mut matched: Vec<ChatMessage> = self
            .all_messages(filter.channel.as_deref())
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        matched.sort_by_key(|m| m.timestamp);

        match filter.page_window() {
            Some((offset, len)) => matched.into_iter().skip(offset).take(len).collect(),
            None => matched,
        }
    }

    /// Retained message count for one channel, or across all channels.
    pub fn message_count(&self, channel: Option<&str>) -> usize {
        let channels = self.lock();
        match channel {
            Some(name) => channels
                .get(&normalize_channel(name))
                .map(ChannelHistory::len)
                .unwrap_or(0),
            None => channels.values().map(ChannelHistory::len).sum(),
        }
    }

    /// `(channel, retained count)` for every channel seen so far, sorted by name.
    pub fn channel_counts(&self) -> Vec<(String, usize)> {
        self.lock()
            .iter()
            .map(|(name, h)| (name.clone(), h.len()))
            .collect()
    }

    /// Administrative reset of one channel or of everything.
    pub fn clear_messages(&self, channel: Option<&str>) {
        let mut channels = self.lock();
        match channel {
            Some(name) => {
                let name = normalize_channel(name);
                if let Some(history) = channels.get_mut(&name) {
                    history.clear();
                }
                info!(channel = %name, "message history cleared");
            }
            None => {
                channels.clear();
                info!("all message history cleared");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ChannelHistory>> {
        // A panic elsewhere cannot leave a history half-written; keep serving.
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

use std::collections::VecDeque;

use twitch_mcp_core::types::ChatMessage;

/// Ring buffer of one channel's messages, oldest at the front.
#[derive(Debug, Clone)]
pub struct ChannelHistory {
    messages: VecDeque<ChatMessage>,
    max_messages: usize,
}

impl ChannelHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// Append and evict from the front until the bound holds again.
    ///
    /// Returns how many messages were evicted.
    pub fn push(&mut self, message: ChatMessage) -> usize {
        self.messages.push_back(message);
        let overflow = self.messages.len().saturating_sub(self.max_messages);
        self.messages.drain(..overflow);
        overflow
    }

    /// The last `n` messages, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(n);
        self.messages.range(start..).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: usize) -> ChatMessage {
        ChatMessage::new("foo", "ann", format!("m{n}"))
    }

    #[test]
    fn never_exceeds_bound() {
        let mut h = ChannelHistory::new(3);
        for n in 1..=10 {
            h.push(msg(n));
            assert!(h.len() <= 3);
        }
        let texts: Vec<_> = h.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m8", "m9", "m10"]);
    }

    #[test]
    fn push_reports_evictions() {
        let mut h = ChannelHistory::new(1);
        assert_eq!(h.push(msg(1)), 0);
        assert_eq!(h.push(msg(2)), 1);
    }

    #[test]
    fn last_n_larger_than_history_returns_everything() {
        let mut h = ChannelHistory::new(10);
        h.push(msg(1));
        h.push(msg(2));
        assert_eq!(h.last_n(5).len(), 2);
        assert_eq!(h.last_n(1)[0].text, "m2");
    }
}

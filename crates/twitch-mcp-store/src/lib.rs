//! Bounded, per-channel chat history kept in memory for the process lifetime.

pub mod history;
pub mod store;

pub use history::ChannelHistory;
pub use store::MessageStore;

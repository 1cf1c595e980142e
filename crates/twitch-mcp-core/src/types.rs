use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, TwitchMcpError};

/// Username recorded when neither a display name nor a login is available.
pub const ANONYMOUS: &str = "anonymous";

/// Page size applied when a filter asks for a page with a non-positive size.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// A single chat line observed on a channel.
///
/// Values are never mutated once built; the store hands out clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Transport-supplied message id, or `<millis>-<random>` when absent.
    pub id: String,
    /// Normalized channel name (lower-case, no leading `#`).
    pub channel: String,
    pub username: String,
    /// Raw message body, unmodified.
    pub text: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Protocol tags, preserved but not interpreted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl ChatMessage {
    /// Build a message captured now.
    pub fn new(channel: &str, username: &str, text: impl Into<String>) -> Self {
        Self::at(channel, username, text, Utc::now())
    }

    /// Build a message with an explicit capture time.
    pub fn at(
        channel: &str,
        username: &str,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let username = if username.trim().is_empty() {
            ANONYMOUS.to_string()
        } else {
            username.to_string()
        };
        Self {
            id: generate_message_id(timestamp),
            channel: normalize_channel(channel),
            username,
            text: text.into(),
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    /// Use the transport's id instead of the generated one (empty ids are ignored).
    pub fn with_id(mut self, id: Option<&str>) -> Self {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            self.id = id.to_string();
        }
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Pick the name to record for a sender: display name, then login, then [`ANONYMOUS`].
pub fn resolve_username(display_name: Option<&str>, login: Option<&str>) -> String {
    display_name
        .filter(|s| !s.trim().is_empty())
        .or(login.filter(|s| !s.trim().is_empty()))
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// `<epoch millis>-<8 hex chars>`; unique even for bursts inside one millisecond.
pub fn generate_message_id(timestamp: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", timestamp.timestamp_millis(), &suffix[..8])
}

/// Lower-case a channel name and strip any leading `#` markers and whitespace.
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

/// Return the token in the `oauth:<token>` form IRC expects.
///
/// Accepts the bare token or one that already carries the prefix (any case).
pub fn normalize_oauth_token(token: &str) -> String {
    let token = token.trim();
    let bare = match token.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("oauth:") => &token[6..],
        _ => token,
    };
    format!("oauth:{bare}")
}

/// Parse a timestamp-like string.
///
/// Accepted forms: RFC 3339 (`2024-05-01T12:00:00Z`), `YYYY-MM-DD HH:MM:SS`
/// and `YYYY-MM-DDTHH:MM:SS` (UTC), `YYYY-MM-DD` (midnight UTC) and integer
/// epoch milliseconds.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let s = input.trim();
    let invalid = || TwitchMcpError::InvalidTimestamp {
        input: input.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(millis) = s.parse::<i64>() {
        return from_epoch_millis(millis).ok_or_else(invalid);
    }
    Err(invalid())
}

/// Convert epoch milliseconds; `None` when out of chrono's range.
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Query-time filter over retained messages.
///
/// Text criteria are case-insensitive substring matches; time bounds are
/// inclusive. Pagination applies only when both `page` and `page_size` are set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFilter {
    pub channel: Option<String>,
    pub username: Option<String>,
    pub contains: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl MessageFilter {
    pub fn matches(&self, msg: &ChatMessage) -> bool {
        if let Some(ref needle) = self.username {
            if !contains_ignore_case(&msg.username, needle) {
                return false;
            }
        }
        if let Some(ref needle) = self.contains {
            if !contains_ignore_case(&msg.text, needle) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if msg.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if msg.timestamp > until {
                return false;
            }
        }
        true
    }

    /// `(offset, len)` of the requested page, clamped: a negative page is
    /// page 0 and a non-positive size is [`DEFAULT_PAGE_SIZE`].
    pub fn page_window(&self) -> Option<(usize, usize)> {
        let (page, size) = (self.page?, self.page_size?);
        let page = usize::try_from(page).unwrap_or(0);
        let size = usize::try_from(size)
            .ok()
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Some((page.saturating_mul(size), size))
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_normalized() {
        assert_eq!(normalize_channel("#SomeStreamer"), "somestreamer");
        assert_eq!(normalize_channel("  ##Foo "), "foo");
        assert_eq!(normalize_channel("bar"), "bar");
    }

    #[test]
    fn oauth_prefix_is_added_once() {
        assert_eq!(normalize_oauth_token("abc123"), "oauth:abc123");
        assert_eq!(normalize_oauth_token("oauth:abc123"), "oauth:abc123");
        assert_eq!(normalize_oauth_token("OAuth:abc123"), "oauth:abc123");
        assert_eq!(normalize_oauth_token(" abc123\n"), "oauth:abc123");
    }

    #[test]
    fn username_fallback_chain() {
        assert_eq!(resolve_username(Some("Ann"), Some("ann")), "Ann");
        assert_eq!(resolve_username(Some(""), Some("ann")), "ann");
        assert_eq!(resolve_username(None, None), ANONYMOUS);
        assert_eq!(ChatMessage::new("#x", " ", "hi").username, ANONYMOUS);
    }

    #[test]
    fn generated_ids_differ_within_same_millisecond() {
        let ts = Utc::now();
        let a = ChatMessage::at("foo", "a", "x", ts);
        let b = ChatMessage::at("foo", "a", "x", ts);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with(&ts.timestamp_millis().to_string()));
    }

    #[test]
    fn transport_id_wins_over_generated() {
        let msg = ChatMessage::new("foo", "a", "x").with_id(Some("abc-def"));
        assert_eq!(msg.id, "abc-def");
        let msg = ChatMessage::new("foo", "a", "x").with_id(Some(""));
        assert_ne!(msg.id, "");
    }

    #[test]
    fn timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:30:00Z").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2024-05-01T14:30:00+02:00").unwrap(),
            expected
        );
        assert_eq!(parse_timestamp("2024-05-01 12:30:00").unwrap(), expected);
        assert_eq!(
            parse_timestamp(&expected.timestamp_millis().to_string()).unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("2024-05-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        let err = parse_timestamp("yesterday-ish").unwrap_err();
        assert_eq!(err.code(), "INVALID_TIMESTAMP");
    }

    #[test]
    fn filter_is_case_insensitive_and_inclusive() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let msg = ChatMessage::at("foo", "AnnieB", "Hello World", ts);
        let filter = MessageFilter {
            username: Some("annie".into()),
            contains: Some("WORLD".into()),
            since: Some(ts),
            until: Some(ts),
            ..Default::default()
        };
        assert!(filter.matches(&msg));

        let filter = MessageFilter {
            contains: Some("bye".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&msg));
    }

    #[test]
    fn page_window_clamps() {
        let f = |page, size| MessageFilter {
            page,
            page_size: size,
            ..Default::default()
        };
        assert_eq!(f(Some(1), Some(2)).page_window(), Some((2, 2)));
        assert_eq!(f(Some(-3), Some(5)).page_window(), Some((0, 5)));
        assert_eq!(f(Some(2), Some(0)).page_window(), Some((20, 10)));
        assert_eq!(f(Some(1), None).page_window(), None);
        assert_eq!(f(None, Some(4)).page_window(), None);
    }
}

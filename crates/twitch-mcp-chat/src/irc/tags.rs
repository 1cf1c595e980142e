//! IRCv3 message tags as stored metadata.
//!
//! The chat client parses lines itself; this only re-reads the tag section of
//! a message's raw form so every tag Twitch sent ends up on the stored message.

use std::collections::BTreeMap;

use serde_json::Value;

/// Tags Twitch sends as `0`/`1` flags; surfaced as booleans in message metadata.
const FLAG_TAGS: &[&str] = &[
    "first-msg",
    "mod",
    "returning-chatter",
    "subscriber",
    "turbo",
    "vip",
];

/// Tags of a raw `@k=v;... :prefix COMMAND ...` line as metadata.
///
/// Empty values become `null`, flag tags become booleans, everything else
/// stays a string. A line without tags yields an empty map.
pub fn metadata(raw: &str) -> BTreeMap<String, Value> {
    let Some(raw_tags) = raw
        .strip_prefix('@')
        .and_then(|rest| rest.split_once(' '))
        .map(|(tags, _)| tags)
    else {
        return BTreeMap::new();
    };

    raw_tags
        .split(';')
        .filter(|t| !t.is_empty())
        .map(|tag| {
            let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
            let value = unescape_tag_value(value);
            let value = if value.is_empty() {
                Value::Null
            } else if FLAG_TAGS.contains(&key) {
                Value::Bool(value == "1")
            } else {
                Value::String(value)
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Undo IRCv3 tag escaping (`\:` `\s` `\\` `\r` `\n`).
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

//! Tool namespacing.
//!
//! Federated tool names are `<escapedServer>-<rawTool>`. Server ids are
//! escaped so the prefix only contains `[A-Za-z0-9_]` and escape sequences,
//! which keeps the `-` separator unambiguous: the first `-` in a prefixed name
//! always ends the server part. Tool names are carried verbatim and may
//! themselves contain `-`.
//!
//! ```rust
//! use federated_chat::mcp::namespace::{compose, dispatch, escape};
//!
//! assert_eq!(escape("my.server"), "my_x2eserver");
//! let name = compose("my.server", "get-time");
//! assert_eq!(name, "my_x2eserver-get-time");
//! assert_eq!(dispatch(&name), Some(("my_x2eserver", "get-time")));
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;

use super::error::ConfigError;

/// Separator between the escaped server id and the raw tool name.
///
/// Must stay outside the pass-through set of [`escape`].
pub const SEPARATOR: char = '-';

/// Marker that starts an escaped code point.
pub const ESCAPE_MARKER: &str = "_x";

fn passes_through(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Escape a raw server identifier.
///
/// Pure and total: `[A-Za-z0-9_]` pass through, every other character becomes
/// `_x` plus its code point in lowercase hex.
#[must_use]
pub fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if passes_through(c) {
            out.push(c);
        } else {
            out.push_str(ESCAPE_MARKER);
            // Writing to a String cannot fail.
            let _ = write!(out, "{:x}", u32::from(c));
        }
    }
    out
}

/// Build the prefixed name for `tool_name` on `server_id`.
#[must_use]
pub fn compose(server_id: &str, tool_name: &str) -> String {
    format!("{}{SEPARATOR}{tool_name}", escape(server_id))
}

/// Split a prefixed name into `(escaped_server_id, tool_name)`.
///
/// Splits on the first separator only. Returns `None` if there is none.
#[must_use]
pub fn dispatch(prefixed_name: &str) -> Option<(&str, &str)> {
    prefixed_name.split_once(SEPARATOR)
}

/// Raw ↔ escaped server id table for one session.
#[derive(Debug, Clone, Default)]
pub struct NameMapping {
    to_escaped: HashMap<String, String>,
    to_raw: HashMap<String, String>,
}

impl NameMapping {
    /// Build the table, failing on any escaped-id collision.
    pub fn build<I, S>(ids: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mapping = Self::default();
        for id in ids {
            let raw = id.as_ref();
            if mapping.to_escaped.contains_key(raw) {
                continue;
            }
            let escaped = escape(raw);
            if let Some(existing) = mapping.to_raw.get(&escaped) {
                return Err(ConfigError::EscapedIdCollision {
                    first: existing.clone(),
                    second: raw.to_string(),
                    escaped,
                });
            }
            mapping.to_raw.insert(escaped.clone(), raw.to_string());
            mapping.to_escaped.insert(raw.to_string(), escaped);
        }
        Ok(mapping)
    }

    #[must_use]
    pub fn escaped(&self, raw: &str) -> Option<&str> {
        self.to_escaped.get(raw).map(String::as_str)
    }

    #[must_use]
    pub fn raw(&self, escaped: &str) -> Option<&str> {
        self.to_raw.get(escaped).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_raw.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_is_identity_for_safe_ids() {
        for id in ["time", "Tavily_2", "a_b_c", "ABC123", ""] {
            assert_eq!(escape(id), id);
        }
    }

    #[test]
    fn test_escape_replaces_other_chars() {
        assert_eq!(escape("my server"), "my_x20server");
        assert_eq!(escape("a-b"), "a_x2db");
        assert_eq!(escape("café"), "caf_xe9");
        assert_eq!(escape("🦀"), "_x1f980");
    }

    #[test]
    fn test_escape_is_stable() {
        let once = escape("weird/id:1");
        assert_eq!(once, escape("weird/id:1"));
        // Output only uses the pass-through alphabet.
        assert!(once.chars().all(passes_through));
    }

    #[test]
    fn test_separator_is_always_escaped() {
        assert!(!passes_through(SEPARATOR));
        assert!(!escape("a-b-c").contains(SEPARATOR));
    }

    #[test]
    fn test_dispatch_inverts_compose() {
        let cases = [
            ("time", "now"),
            ("my.server", "get-time"),
            ("a-b", "x-y-z"),
            ("srv", "-leading"),
            ("srv", ""),
        ];
        for (server, tool) in cases {
            let prefixed = compose(server, tool);
            let escaped = escape(server);
            assert_eq!(dispatch(&prefixed), Some((escaped.as_str(), tool)));
        }
    }

    #[test]
    fn test_dispatch_without_separator() {
        assert_eq!(dispatch("current_time"), None);
    }

    #[test]
    fn test_mapping_roundtrip() {
        let mapping = NameMapping::build(["time", "my.server"]).unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.escaped("my.server"), Some("my_x2eserver"));
        assert_eq!(mapping.raw("my_x2eserver"), Some("my.server"));
        assert_eq!(mapping.raw("nope"), None);
    }

    #[test]
    fn test_mapping_detects_collision() {
        // "a.b" escapes to "a_x2eb", which is also a valid raw id.
        let err = NameMapping::build(["a.b", "a_x2eb"]).unwrap_err();
        match err {
            ConfigError::EscapedIdCollision { escaped, .. } => assert_eq!(escaped, "a_x2eb"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_mapping_ignores_duplicate_raw_ids() {
        let mapping = NameMapping::build(["time", "time"]).unwrap();
        assert_eq!(mapping.len(), 1);
    }
}

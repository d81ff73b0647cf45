//! IPC request messages
//!
//! A `Message` is parsed from a URI of the form
//! `ipc://<name>?seq=<seq>&index=<n>&key=<value>...`, optionally paired with a
//! raw binary body. Parsing never fails: malformed input yields a message with
//! an empty `name` which the router reports as "not found".

use crate::codec::decode_uri_component;
use crate::types::Seq;
use std::collections::BTreeMap;
use tracing::warn;

/// Scheme used by the web view for IPC requests
pub const DEFAULT_SCHEME: &str = "ipc";

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// A parsed IPC request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Handler name, taken from the second non-empty path segment
    pub name: String,
    /// Correlation sequence (URI-decoded)
    pub seq: Seq,
    /// Window index, `-1` when absent or not an integer
    pub index: i32,
    /// The `value` parameter (URI-decoded)
    pub value: String,
    /// The original request string
    pub uri: String,
    /// Optional binary body
    pub buffer: Option<Vec<u8>>,
    args: BTreeMap<String, String>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            name: String::new(),
            seq: Seq::default(),
            index: -1,
            value: String::new(),
            uri: String::new(),
            buffer: None,
            args: BTreeMap::new(),
        }
    }
}

impl Message {
    /// Parse a request URI using the default `ipc` scheme
    pub fn parse(uri: &str) -> Self {
        Self::parse_with_scheme(uri, DEFAULT_SCHEME)
    }

    /// Parse a request URI along with its binary body
    pub fn with_buffer(uri: &str, buffer: Vec<u8>) -> Self {
        let mut message = Self::parse(uri);
        message.buffer = Some(buffer);
        message
    }

    /// Parse a request URI against an explicit scheme
    pub fn parse_with_scheme(uri: &str, scheme: &str) -> Self {
        let mut message = Self {
            uri: uri.to_string(),
            ..Self::default()
        };

        let prefix = format!("{}://", scheme);
        if !uri.contains(&prefix) {
            return message;
        }

        // bare prefix, with or without an empty query
        if uri == prefix || uri.strip_prefix(prefix.as_str()) == Some("?") {
            return message;
        }

        let raw: Vec<&str> = uri.split('?').filter(|s| !s.is_empty()).collect();
        let path = raw.first().copied().unwrap_or_default();

        // "ipc://name" splits to ["ipc:", "name"]; the name is the second segment
        message.name = path
            .split('/')
            .filter(|s| !s.is_empty())
            .nth(1)
            .unwrap_or_default()
            .to_string();

        if raw.len() != 2 {
            return message;
        }

        for pair in raw[1].split('&').filter(|s| !s.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };

            if key.is_empty() || value.is_empty() {
                continue;
            }

            match key {
                "index" => match value.parse::<i32>() {
                    Ok(index) => message.index = index,
                    Err(_) => warn!("Received non-integer index: {}", value),
                },
                "value" => message.value = decode_uri_component(value),
                "seq" => message.seq = Seq::new(decode_uri_component(value)),
                _ => {}
            }

            message.args.insert(key.to_string(), value.to_string());
        }

        message
    }

    /// True if the query carried `key`
    pub fn has(&self, key: &str) -> bool {
        self.args.contains_key(key)
    }

    /// Decoded value for `key`, or an empty string
    pub fn get(&self, key: &str) -> String {
        self.get_or(key, "")
    }

    /// Decoded value for `key`, or `fallback` when absent
    pub fn get_or(&self, key: &str, fallback: &str) -> String {
        self.args
            .get(key)
            .map(|value| decode_uri_component(value))
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Raw (still encoded) query pairs
    pub fn args(&self) -> impl Iterator<Item = (&str, &str)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Key under which a staged `buffer.map` body is stored for this request
    pub fn buffer_key(&self) -> (i32, Seq) {
        (self.index, self.seq.clone())
    }

    pub fn is_malformed(&self) -> bool {
        self.name.is_empty()
    }
}

impl core::fmt::Display for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_request() {
        let message = Message::parse("ipc://fs.open?seq=7&id=1&path=%2Ftmp%2Fa&flags=0&mode=438");
        assert_eq!(message.name, "fs.open");
        assert_eq!(message.seq.as_str(), "7");
        assert_eq!(message.index, -1);
        assert_eq!(message.get("path"), "/tmp/a");
        assert_eq!(message.get("mode"), "438");
        assert!(message.has("flags"));
        assert!(!message.has("missing"));
        assert_eq!(message.get_or("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_malformed_requests_have_no_name() {
        for uri in ["", "fs.open?seq=1", "ipc://", "ipc://?", "http://fs.open?seq=1"] {
            let message = Message::parse(uri);
            assert!(message.name.is_empty(), "{}", uri);
            assert!(message.seq.is_empty(), "{}", uri);
            assert_eq!(message.uri, uri);
        }
    }

    #[test]
    fn test_name_is_positional_segment() {
        assert_eq!(Message::parse("ipc://ping").name, "ping");
        assert_eq!(Message::parse("ipc://udp.bind/extra?id=1").name, "udp.bind");
        assert_eq!(Message::parse("ipc:///?seq=1").name, "");
    }

    #[test]
    fn test_non_integer_index_is_ignored() {
        let message = Message::parse("ipc://ping?index=abc&seq=2");
        assert_eq!(message.index, -1);
        assert_eq!(message.seq.as_str(), "2");
        assert!(message.has("index"));

        let message = Message::parse("ipc://ping?index=3");
        assert_eq!(message.index, 3);
    }

    #[test]
    fn test_pairs_without_value_are_skipped() {
        let message = Message::parse("ipc://log?value=&flag&x==y");
        assert!(!message.has("value"));
        assert!(!message.has("flag"));
        assert_eq!(message.get("x"), "=y");
    }

    #[test]
    fn test_value_and_seq_are_decoded() {
        let message = Message::parse("ipc://log?value=hello%20world&seq=R%201");
        assert_eq!(message.value, "hello world");
        assert_eq!(message.seq.as_str(), "R 1");
    }

    #[test]
    fn test_buffer_key() {
        let message = Message::with_buffer("ipc://fs.write?index=0&seq=12", vec![1, 2, 3]);
        assert_eq!(message.buffer_key(), (0, Seq::from("12")));
        assert_eq!(message.buffer.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_buffer_keys_do_not_collide() {
        let first = Message::parse("ipc://buffer.map?seq=23&index=1");
        let second = Message::parse("ipc://fs.write?seq=3&index=12");
        assert_ne!(first.buffer_key(), second.buffer_key());
    }
}

//! Binary payloads awaiting retrieval by the web view
//!
//! A `Data` carries bytes that are too large or unsuited for inline JSON. It is
//! stored under a random 64-bit id and fetched by the page with a secondary
//! request (`ipc://data?id=` or `ipc://post?id=`).

use core::fmt;

// ----------------------------------------------------------------------------
// Headers
// ----------------------------------------------------------------------------

/// Ordered response headers attached to a payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers for a raw byte payload of `length` bytes
    pub fn octet_stream(length: usize) -> Self {
        let mut headers = Self::new();
        headers.set("content-type", "application/octet-stream");
        headers.set("content-length", length.to_string());
        headers
    }

    /// Set a header, replacing an existing value with the same name
    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse newline separated `key: value` lines
    pub fn parse(raw: &str) -> Self {
        let mut headers = Self::new();
        for line in raw.lines() {
            if let Some((key, value)) = line.trim().split_once(':') {
                headers.set(key.trim(), value.trim());
            }
        }
        headers
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Data
// ----------------------------------------------------------------------------

/// A binary payload stored until fetched or expired
///
/// The body is owned by the payload and released when the entry is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Data {
    /// Payload id, `0` until assigned
    pub id: u64,
    /// Expiry as milliseconds since the unix epoch
    pub ttl: u64,
    pub body: Option<Vec<u8>>,
    pub headers: Headers,
}

impl Data {
    /// A payload wrapping raw bytes with octet-stream headers
    pub fn octet_stream(body: Vec<u8>) -> Self {
        Self {
            headers: Headers::octet_stream(body.len()),
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Byte length of the body
    pub fn length(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

//! Core types for the sockrt runtime
//!
//! Newtypes for the identifiers that cross the IPC boundary: caller-chosen
//! resource ids (peers, descriptors, payloads) and reply correlation sequences.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Resource Identifier
// ----------------------------------------------------------------------------

/// Caller-chosen 64-bit id naming a peer, descriptor or payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(u64);

impl ResourceId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Generate a random non-zero id
    pub fn random() -> Self {
        loop {
            let id = rand::random::<u64>();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

// ----------------------------------------------------------------------------
// Sequence
// ----------------------------------------------------------------------------

/// Correlation id matching a reply to its pending request
///
/// `"-1"` marks a broadcast with no waiter; an empty sequence means the
/// request carried none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seq(String);

impl Seq {
    pub const BROADCAST: &'static str = "-1";

    pub fn new<T: Into<String>>(seq: T) -> Self {
        Self(seq.into())
    }

    /// Sequence used for uncorrelated replies
    pub fn broadcast() -> Self {
        Self(Self::BROADCAST.to_string())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when a promise on the page is waiting for this sequence
    pub fn is_correlated(&self) -> bool {
        !self.is_empty() && !self.is_broadcast()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Seq {
    fn from(seq: &str) -> Self {
        Self(seq.to_string())
    }
}

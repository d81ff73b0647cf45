//! Replies to IPC messages

use crate::data::Data;
use crate::errors::IpcError;
use crate::message::Message;
use crate::types::Seq;
use serde_json::{json, Map, Value};

// ----------------------------------------------------------------------------
// IPC Result
// ----------------------------------------------------------------------------

/// A reply to a `Message`
///
/// At most one of `data`/`err` is populated. A reply with `seq == "-1"` has no
/// waiting promise and is delivered as a broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct IpcResult {
    pub seq: Seq,
    pub source: String,
    pub data: Value,
    pub err: Value,
    /// Explicit value replacing the generated JSON envelope
    pub value: Option<Value>,
    /// Binary payload delivered through a secondary fetch
    pub post: Option<Data>,
}

impl IpcResult {
    /// An empty reply correlated to `seq`
    pub fn new(seq: Seq, source: impl Into<String>) -> Self {
        Self {
            seq,
            source: source.into(),
            data: Value::Null,
            err: Value::Null,
            value: None,
            post: None,
        }
    }

    /// Successful reply to `message`
    pub fn data(message: &Message, data: Value) -> Self {
        Self {
            data,
            ..Self::new(message.seq.clone(), message.name.clone())
        }
    }

    /// Failed reply to `message` with a raw error value
    pub fn err(message: &Message, err: Value) -> Self {
        Self {
            err,
            ..Self::new(message.seq.clone(), message.name.clone())
        }
    }

    /// Failed reply to `message`
    pub fn error(message: &Message, err: &IpcError) -> Self {
        Self::err(message, err.to_json())
    }

    /// Reply whose serialized form is exactly `value`
    pub fn raw(message: &Message, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::new(message.seq.clone(), message.name.clone())
        }
    }

    /// An uncorrelated broadcast reply
    pub fn broadcast(source: impl Into<String>, data: Value) -> Self {
        Self {
            data,
            ..Self::new(Seq::broadcast(), source)
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_seq(mut self, seq: Seq) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_post(mut self, post: Data) -> Self {
        self.post = Some(post);
        self
    }

    pub fn is_err(&self) -> bool {
        !self.err.is_null()
    }

    /// JSON envelope delivered to the page
    pub fn json(&self) -> Value {
        if let Some(value) = &self.value {
            return value.clone();
        }

        let mut envelope = Map::new();
        envelope.insert("source".to_string(), json!(self.source));
        if !self.err.is_null() {
            envelope.insert("err".to_string(), self.err.clone());
        } else if !self.data.is_null() {
            envelope.insert("data".to_string(), self.data.clone());
        }
        Value::Object(envelope)
    }

    pub fn str(&self) -> String {
        self.json().to_string()
    }
}

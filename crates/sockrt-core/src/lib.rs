//! sockrt Core
//!
//! I/O-free building blocks of the sockrt runtime:
//! - `Message`: a parsed `ipc://` request
//! - `IpcResult`: the reply to a message
//! - `Data`: a binary payload fetched by the page in a second request
//! - Script builders that turn replies into JavaScript for the web view
//! - Error taxonomy and configuration
//!
//! `sockrt-runtime` drives these types from its reactor thread.

pub mod codec;
pub mod config;
pub mod data;
pub mod errors;
pub mod message;
pub mod result;
pub mod script;
pub mod types;

pub use codec::{decode_uri_component, encode_uri_component};
pub use config::{DataConfig, DescriptorConfig, LoopConfig, RouterConfig, RuntimeConfig};
pub use data::{Data, Headers};
pub use errors::{ErrorType, IpcError, RuntimeError, RuntimeResult, SocketError};
pub use message::{Message, DEFAULT_SCHEME};
pub use result::IpcResult;
pub use types::{ResourceId, Seq};

/// Milliseconds since the unix epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

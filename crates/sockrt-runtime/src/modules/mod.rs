//! Handler modules
//!
//! Each module is a stateless façade: it validates a `Message`, runs the
//! native operation against the managers held by `ModuleContext`, and turns
//! the outcome into an `IpcResult`. I/O handlers return a boxed future after
//! validating their parameters so a bad request is answered without ever
//! reaching the event loop.

pub mod dns;
pub mod fs;
pub mod os;
pub mod platform;
pub mod udp;

use crate::delivery::Delivery;
use crate::event_loop::EventLoop;
use crate::host::WebViewHost;
use crate::managers::{DataManager, DescriptorManager, PeerManager};
use sockrt_core::{IpcError, Message, ResourceId};
use std::io;
use std::str::FromStr;
use std::sync::Arc;

/// Shared state every handler runs against
pub struct ModuleContext {
    pub event_loop: EventLoop,
    pub data: Arc<DataManager>,
    pub descriptors: Arc<DescriptorManager>,
    pub peers: Arc<PeerManager>,
    pub delivery: Arc<Delivery>,
    pub host: Arc<dyn WebViewHost>,
}

// ----------------------------------------------------------------------------
// Parameter Helpers
// ----------------------------------------------------------------------------

/// Decoded, non-empty value of `key`
pub(crate) fn require(message: &Message, key: &str) -> Result<String, IpcError> {
    let value = message.get(key);
    if value.is_empty() {
        return Err(IpcError::missing_parameter(key));
    }
    Ok(value)
}

/// Required parameter parsed as `T`
pub(crate) fn parse<T: FromStr>(message: &Message, key: &str) -> Result<T, IpcError> {
    require(message, key)?
        .parse()
        .map_err(|_| IpcError::invalid_parameter(key))
}

/// Optional parameter parsed as `T`, `default` when absent
pub(crate) fn parse_or<T: FromStr>(message: &Message, key: &str, default: T) -> Result<T, IpcError> {
    if !message.has(key) {
        return Ok(default);
    }
    message
        .get(key)
        .parse()
        .map_err(|_| IpcError::invalid_parameter(key))
}

/// Optional boolean flag; only `true` turns it on
pub(crate) fn flag(message: &Message, key: &str, default: bool) -> bool {
    if !message.has(key) {
        return default;
    }
    message.get(key) == "true"
}

/// The `id` parameter every resource-targeting call carries
pub(crate) fn resource_id(message: &Message) -> Result<ResourceId, IpcError> {
    parse(message, "id")
}

// ----------------------------------------------------------------------------
// Error Mapping
// ----------------------------------------------------------------------------

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn errno_name(raw: i32) -> String {
            format!("{:?}", nix::errno::Errno::from_raw(raw))
        }
    } else {
        fn errno_name(raw: i32) -> String {
            format!("OS_ERROR_{}", raw)
        }
    }
}

/// Native failure as an error object with the errno name as `code`
pub(crate) fn io_error(err: &io::Error) -> IpcError {
    let code = match err.raw_os_error() {
        Some(raw) => errno_name(raw),
        None => format!("{:?}", err.kind()),
    };
    IpcError::message(err.to_string()).with_code(code)
}

/// Context wired to a `ChannelHost`, plus the receiver of evaluated scripts
#[cfg(test)]
pub(crate) fn create_test_context() -> (Arc<ModuleContext>, tokio::sync::mpsc::UnboundedReceiver<String>) {
    use crate::host::ChannelHost;
    use sockrt_core::{DataConfig, DescriptorConfig, LoopConfig};

    let event_loop = EventLoop::new(LoopConfig::default());
    let (host, scripts) = ChannelHost::new();
    let host: Arc<dyn WebViewHost> = Arc::new(host);
    let data = Arc::new(DataManager::new(DataConfig::default(), "ipc"));
    let ctx = Arc::new(ModuleContext {
        data: Arc::clone(&data),
        descriptors: Arc::new(DescriptorManager::new(DescriptorConfig::default())),
        peers: Arc::new(PeerManager::new(event_loop.clone())),
        delivery: Arc::new(Delivery::new(Arc::clone(&host), data)),
        host,
        event_loop,
    });
    (ctx, scripts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_missing_and_empty() {
        let message = Message::parse("ipc://fs.open?seq=1&path=");
        assert_eq!(
            require(&message, "path").unwrap_err().message,
            "Expecting 'path' in parameters"
        );
        assert!(require(&message, "id").is_err());
    }

    #[test]
    fn test_parse_reports_invalid_values() {
        let message = Message::parse("ipc://udp.bind?seq=1&id=abc&port=41234");
        assert_eq!(
            resource_id(&message).unwrap_err().message,
            "Invalid 'id' given in parameters"
        );
        assert_eq!(parse::<u16>(&message, "port").unwrap(), 41234);
        assert_eq!(parse_or::<u32>(&message, "size", 7).unwrap(), 7);
    }

    #[test]
    fn test_flag_defaults() {
        let message = Message::parse("ipc://udp.send?seq=1&ephemeral=true&reuseAddr=false");
        assert!(flag(&message, "ephemeral", false));
        assert!(!flag(&message, "reuseAddr", true));
        assert!(flag(&message, "missing", true));
    }

    #[cfg(unix)]
    #[test]
    fn test_io_error_uses_errno_name() {
        let err = io::Error::from_raw_os_error(libc::ENOENT);
        let ipc = io_error(&err);
        assert_eq!(ipc.code.as_deref(), Some("ENOENT"));
    }
}

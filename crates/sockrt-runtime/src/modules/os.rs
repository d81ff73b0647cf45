//! Operating system handlers

use super::{io_error, parse_or, resource_id, ModuleContext};
use crate::managers::{BufferKind, PeerError};
use serde_json::{json, Map, Value};
use sockrt_core::{IpcError, IpcResult, Message};
use std::sync::Arc;

/// `os.platform`: `darwin`, `linux`, `win32` or the raw target os
pub fn platform(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let name = match std::env::consts::OS {
        "macos" | "ios" => "darwin",
        "windows" => "win32",
        other => other,
    };
    IpcResult::data(message, json!(name))
}

/// `os.type`: the kernel name as `uname` reports it
pub fn os_type(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let name = match std::env::consts::OS {
        "macos" | "ios" => "Darwin",
        "windows" => "Windows_NT",
        "linux" | "android" => "Linux",
        other => other,
    };
    IpcResult::data(message, json!(name))
}

/// `os.arch`: `x64`, `arm64` or the raw target arch
pub fn arch(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let name = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        other => other,
    };
    IpcResult::data(message, json!(name))
}

/// `process.cwd`: current working directory
pub fn cwd(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    match std::env::current_dir() {
        Ok(dir) => IpcResult::data(message, json!(dir.to_string_lossy())),
        Err(e) => IpcResult::error(message, &io_error(&e)),
    }
}

/// `os.bufferSize`: get, or set when `size > 0`, a peer's kernel buffer size
///
/// `buffer=0` addresses the send buffer, `buffer=1` the receive buffer.
pub fn buffer_size(ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let mut message = message.clone();
    message.name = "bufferSize".to_string();

    let params = resource_id(&message).and_then(|id| {
        let size: usize = parse_or(&message, "size", 0)?;
        let buffer: u8 = parse_or(&message, "buffer", 0)?;
        Ok((id, size, buffer))
    });
    let (id, size, buffer) = match params {
        Ok(params) => params,
        Err(e) => return IpcResult::error(&message, &e),
    };

    let Some(peer) = ctx.peers.get(id) else {
        let err = IpcError::not_found("No peer with specified id")
            .with_id(id)
            .with_code("NOT_FOUND_ERR");
        return IpcResult::error(&message, &err);
    };

    let kind = if buffer == 0 {
        BufferKind::Send
    } else {
        BufferKind::Receive
    };
    let requested = if size > 0 { Some(size) } else { None };

    match peer.buffer_size(kind, requested) {
        Ok(size) => IpcResult::data(&message, json!({ "id": id.to_string(), "size": size })),
        Err(PeerError::Io(e)) => IpcResult::error(&message, &io_error(&e).with_id(id)),
        Err(e) => IpcResult::error(&message, &IpcError::internal(e.to_string()).with_id(id)),
    }
}

/// `os.networkInterfaces`: addresses grouped by family and interface name
pub fn network_interfaces(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    match interfaces_json() {
        Ok(value) => IpcResult::data(message, value),
        Err(e) => IpcResult::error(message, &io_error(&e)),
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn interfaces_json() -> std::io::Result<Value> {
            use nix::ifaddrs::getifaddrs;
            use nix::net::if_::InterfaceFlags;
            use std::collections::HashMap;
            use std::net::{SocketAddrV4, SocketAddrV6};

            let entries: Vec<_> = getifaddrs().map_err(std::io::Error::from)?.collect();

            let mut macs: HashMap<String, String> = HashMap::new();
            for entry in &entries {
                if let Some(mac) = entry.address.as_ref().and_then(link_address) {
                    macs.insert(entry.interface_name.clone(), mac);
                }
            }

            let mut ipv4 = Map::new();
            let mut ipv6 = Map::new();
            for entry in &entries {
                let Some(address) = entry.address.as_ref() else {
                    continue;
                };
                let internal = entry.flags.contains(InterfaceFlags::IFF_LOOPBACK);
                let mac = macs
                    .get(&entry.interface_name)
                    .cloned()
                    .unwrap_or_else(|| "00:00:00:00:00:00".to_string());

                if let Some(sin) = address.as_sockaddr_in() {
                    let ip = SocketAddrV4::from(*sin).ip().to_string();
                    ipv4.insert(
                        entry.interface_name.clone(),
                        json!({ "internal": internal, "address": ip, "mac": mac }),
                    );
                } else if let Some(sin6) = address.as_sockaddr_in6() {
                    let ip = SocketAddrV6::from(*sin6).ip().to_string();
                    ipv6.insert(
                        entry.interface_name.clone(),
                        json!({ "internal": internal, "address": ip, "mac": mac }),
                    );
                }
            }

            Ok(json!({ "ipv4": ipv4, "ipv6": ipv6 }))
        }
    } else {
        fn interfaces_json() -> std::io::Result<Value> {
            Ok(json!({ "ipv4": Map::new(), "ipv6": Map::new() }))
        }
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
))]
fn link_address(address: &nix::sys::socket::SockaddrStorage) -> Option<String> {
    let bytes = address.as_link_addr()?.addr()?;
    Some(
        bytes
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    ))
))]
fn link_address(_address: &nix::sys::socket::SockaddrStorage) -> Option<String> {
    None
}

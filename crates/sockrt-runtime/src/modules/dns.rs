//! DNS handlers

use super::{parse_or, require, ModuleContext};
use crate::router::HandlerFuture;
use futures::FutureExt;
use serde_json::json;
use sockrt_core::{IpcError, IpcResult, Message};
use std::net::SocketAddr;
use std::sync::Arc;

/// Address family accepted by `lookup`; `0` means either
fn matches_family(address: &SocketAddr, family: u8) -> bool {
    match family {
        4 => address.is_ipv4(),
        6 => address.is_ipv6(),
        _ => true,
    }
}

/// `dns.lookup`: resolve `hostname` to its first address of `family`
pub fn lookup(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let hostname = require(message, "hostname")?;
    let family: u8 = parse_or(message, "family", 0)?;
    if !matches!(family, 0 | 4 | 6) {
        return Err(IpcError::invalid_parameter("family"));
    }

    let message = message.clone();
    Ok(async move {
        let resolved = tokio::net::lookup_host((hostname.as_str(), 0))
            .await
            .map(|mut addresses| addresses.find(|address| matches_family(address, family)));

        match resolved {
            Ok(Some(address)) => IpcResult::data(
                &message,
                json!({
                    "address": address.ip().to_string(),
                    "family": if address.is_ipv4() { 4 } else { 6 },
                }),
            ),
            Ok(None) => IpcResult::error(
                &message,
                &IpcError::message(format!("No address found for {}", hostname))
                    .with_code("ENOTFOUND"),
            ),
            Err(e) => IpcResult::error(
                &message,
                &IpcError::message(e.to_string()).with_code("ENOTFOUND"),
            ),
        }
    }
    .boxed())
}

//! Platform and process handlers

use super::{require, resource_id, ModuleContext};
use crate::router::ReplyCallback;
use serde_json::{json, Value};
use sockrt_core::{IpcError, IpcResult, Message};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `ping`: liveness check
pub fn ping(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    IpcResult::data(message, json!("pong"))
}

/// `platform.event`: lifecycle notifications from the page
///
/// `domcontentloaded` means a new document replaced the old one, so every
/// descriptor the old page held becomes a GC candidate.
pub fn event(ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let name = message.value.as_str();
    if name == "domcontentloaded" {
        ctx.descriptors.mark_all_stale();
        debug!("Marked {} descriptors stale", ctx.descriptors.count());
    }
    IpcResult::data(message, json!({})).with_source("event")
}

/// `log`: write `value` to the runtime log
pub fn log(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    info!(target: "sockrt::page", "{}", message.value);
    IpcResult::data(message, Value::Null)
}

/// `stdout`: write `value` to standard output
pub fn stdout(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    write_line(std::io::stdout().lock(), "stdout", &message.value);
    IpcResult::data(message, Value::Null)
}

/// `stderr`: write `value` to standard error
pub fn stderr(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    write_line(std::io::stderr().lock(), "stderr", &message.value);
    IpcResult::data(message, Value::Null)
}

/// Write one line, logging instead of failing the call when the stream is gone
fn write_line<W: Write>(mut out: W, stream: &str, value: &str) -> bool {
    match writeln!(out, "{}", value).and_then(|_| out.flush()) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to write to {}: {}", stream, e);
            false
        }
    }
}

/// `post`: redeliver stored payload `id` through a fresh fetch script
pub fn post(ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let id = match resource_id(message) {
        Ok(id) => id,
        Err(e) => return IpcResult::error(message, &e),
    };
    match ctx.data.get(id.get()) {
        Some(data) => IpcResult::data(message, json!({ "id": id.to_string() })).with_post(data),
        None => IpcResult::error(
            message,
            &IpcError::not_found("No post with specified id").with_id(id),
        ),
    }
}

/// `platform.notify`: show a system notification on the main thread
pub fn notify(ctx: &Arc<ModuleContext>, message: Message, reply: ReplyCallback) {
    let title = match require(&message, "title") {
        Ok(title) => title,
        Err(e) => return reply(IpcResult::error(&message, &e)),
    };
    let body = message.get("body");

    let host = Arc::clone(&ctx.host);
    ctx.host.dispatch(Box::new(move || {
        let result = if host.notify(&title, &body) {
            IpcResult::data(&message, json!({}))
        } else {
            IpcResult::error(&message, &IpcError::internal("Notifications are not supported"))
        };
        reply(result);
    }));
}

/// `platform.openExternal`: open `value` with the system URL handler
pub fn open_external(ctx: &Arc<ModuleContext>, message: Message, reply: ReplyCallback) {
    let url = message.value.clone();
    if url.is_empty() {
        return reply(IpcResult::error(&message, &IpcError::missing_parameter("value")));
    }

    let host = Arc::clone(&ctx.host);
    ctx.host.dispatch(Box::new(move || {
        let result = if host.open_external(&url) {
            IpcResult::data(&message, json!({ "url": url }))
        } else {
            IpcResult::error(&message, &IpcError::internal("Opening external URLs is not supported"))
        };
        reply(result);
    }));
}

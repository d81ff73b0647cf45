//! Handler table
//!
//! Binds every IPC name the page may call to its module function.

use crate::modules::{dns, fs, os, platform, udp, ModuleContext};
use crate::router::{HandlerFuture, ReplyCallback, Router};
use sockrt_core::{IpcError, IpcResult, Message};
use std::sync::Arc;

type SyncFn = fn(&Arc<ModuleContext>, &Message) -> IpcResult;
type TaskFn = fn(&Arc<ModuleContext>, &Message) -> Result<HandlerFuture, IpcError>;
type CallbackFn = fn(&Arc<ModuleContext>, Message, ReplyCallback);

const SYNC_HANDLERS: &[(&str, SyncFn)] = &[
    ("fs.constants", fs::constants),
    ("fs.getOpenDescriptors", fs::get_open_descriptors),
    ("fs.retainOpenDescriptor", fs::retain_open_descriptor),
    ("log", platform::log),
    ("os.arch", os::arch),
    ("os.bufferSize", os::buffer_size),
    ("os.networkInterfaces", os::network_interfaces),
    ("os.platform", os::platform),
    ("os.type", os::os_type),
    ("ping", platform::ping),
    ("platform.event", platform::event),
    ("post", platform::post),
    ("process.cwd", os::cwd),
    ("stderr", platform::stderr),
    ("stdout", platform::stdout),
    ("udp.getPeerName", udp::get_peer_name),
    ("udp.getSockName", udp::get_sock_name),
    ("udp.getState", udp::get_state),
];

const TASK_HANDLERS: &[(&str, TaskFn)] = &[
    ("dns.lookup", dns::lookup),
    ("fs.access", fs::access),
    ("fs.chmod", fs::chmod),
    ("fs.close", fs::close),
    ("fs.closedir", fs::closedir),
    ("fs.closeOpenDescriptor", fs::close_open_descriptor),
    ("fs.closeOpenDescriptors", fs::close_open_descriptors),
    ("fs.copyFile", fs::copy_file),
    ("fs.fstat", fs::fstat),
    ("fs.lstat", fs::lstat),
    ("fs.mkdir", fs::mkdir),
    ("fs.open", fs::open),
    ("fs.opendir", fs::opendir),
    ("fs.read", fs::read),
    ("fs.readdir", fs::readdir),
    ("fs.rename", fs::rename),
    ("fs.rmdir", fs::rmdir),
    ("fs.stat", fs::stat),
    ("fs.unlink", fs::unlink),
    ("fs.write", fs::write),
    ("udp.bind", udp::bind),
    ("udp.close", udp::close),
    ("udp.connect", udp::connect),
    ("udp.disconnect", udp::disconnect),
    ("udp.readStart", udp::read_start),
    ("udp.readStop", udp::read_stop),
    ("udp.send", udp::send),
];

// main-thread work is handed to the host, so these never block the caller
const CALLBACK_HANDLERS: &[(&str, CallbackFn)] = &[
    ("platform.notify", platform::notify),
    ("platform.openExternal", platform::open_external),
];

/// Register every module handler on `router`
pub fn register(router: &Router, ctx: &Arc<ModuleContext>) {
    for &(name, handler) in SYNC_HANDLERS {
        let ctx = Arc::clone(ctx);
        router.map(name, false, move |message, reply| reply(handler(&ctx, &message)));
    }

    for &(name, handler) in TASK_HANDLERS {
        let ctx = Arc::clone(ctx);
        router.map_task(name, move |message| handler(&ctx, message));
    }

    for &(name, handler) in CALLBACK_HANDLERS {
        let ctx = Arc::clone(ctx);
        router.map(name, false, move |message, reply| handler(&ctx, message, reply));
    }

    tracing::debug!("Registered {} IPC handlers", router.names().len());
}

/// Every name `register` installs, plus the router's own `buffer.map`
pub fn handler_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = SYNC_HANDLERS
        .iter()
        .map(|(name, _)| *name)
        .chain(TASK_HANDLERS.iter().map(|(name, _)| *name))
        .chain(CALLBACK_HANDLERS.iter().map(|(name, _)| *name))
        .chain(std::iter::once(crate::router::BUFFER_MAP))
        .collect();
    names.sort_unstable();
    names
}

//! UDP handlers
//!
//! Peers are created on demand by `udp.bind`, `udp.connect` and `udp.send`;
//! every other call requires an existing peer and answers
//! `ERR_SOCKET_DGRAM_NOT_RUNNING` otherwise.

use super::{flag, io_error, parse, resource_id, ModuleContext};
use crate::delivery::Delivery;
use crate::managers::{Peer, PeerError, PeerKind, ReceiveCallback, ReceiveEvent};
use crate::router::HandlerFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use sockrt_core::{Data, IpcError, IpcResult, Message, ResourceId, Seq, SocketError};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

const READ_SOURCE: &str = "udp.readStart";

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn peer_error(id: ResourceId, err: PeerError) -> IpcError {
    match err {
        PeerError::Socket(socket) => IpcError::socket(id, socket),
        PeerError::Io(e) => io_error(&e).with_id(id),
        other => IpcError::internal(other.to_string()).with_id(id),
    }
}

fn existing_peer(ctx: &ModuleContext, id: ResourceId) -> Result<Arc<Peer>, IpcError> {
    ctx.peers
        .get(id)
        .ok_or_else(|| IpcError::socket(id, SocketError::NotRunning))
}

/// Peer lookup for calls that only make sense on an associated socket
fn associated_peer(ctx: &ModuleContext, id: ResourceId) -> Result<Arc<Peer>, IpcError> {
    ctx.peers
        .get(id)
        .ok_or_else(|| IpcError::socket(id, SocketError::NotConnected))
}

/// Existing peer that is neither closed nor closing
fn running_peer(ctx: &ModuleContext, id: ResourceId) -> Result<Arc<Peer>, IpcError> {
    let peer = existing_peer(ctx, id)?;
    if peer.is_closed() {
        return Err(IpcError::socket(id, SocketError::Closed));
    }
    if peer.is_closing() {
        return Err(IpcError::socket(id, SocketError::Closing));
    }
    Ok(peer)
}

fn socket_address(message: &Message, default_address: &str) -> Result<SocketAddr, IpcError> {
    let address = message.get_or("address", default_address);
    let ip: IpAddr = address
        .parse()
        .map_err(|_| IpcError::invalid_parameter("address"))?;
    let port: u16 = parse(message, "port")?;
    Ok(SocketAddr::new(ip, port))
}

fn family(address: &SocketAddr) -> &'static str {
    match address {
        SocketAddr::V4(_) => "IPv4",
        SocketAddr::V6(_) => "IPv6",
    }
}

fn address_json(id: ResourceId, address: &SocketAddr) -> Value {
    json!({
        "id": id.to_string(),
        "address": address.ip().to_string(),
        "port": address.port(),
        "family": family(address),
    })
}

fn run<F>(message: &Message, operation: F) -> HandlerFuture
where
    F: FnOnce(&Message) -> IpcResult + Send + 'static,
{
    let message = message.clone();
    async move { operation(&message) }.boxed()
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

/// `udp.bind`: bind peer `id` to `address:port`
pub fn bind(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let address = socket_address(message, "0.0.0.0")?;
    let reuse_addr = flag(message, "reuseAddr", false);
    let ctx = Arc::clone(ctx);

    Ok(run(message, move |message| {
        let peer = ctx.peers.create_peer(PeerKind::Udp, id, false);
        match peer.bind(address, reuse_addr) {
            Ok(()) => {
                let local = peer.local_address().unwrap_or(address);
                IpcResult::data(message, address_json(id, &local))
            }
            Err(e) => IpcResult::error(message, &peer_error(id, e)),
        }
    }))
}

/// `udp.connect`: associate peer `id` with `address:port`
pub fn connect(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let address = socket_address(message, "127.0.0.1")?;
    let ctx = Arc::clone(ctx);

    Ok(run(message, move |message| {
        let peer = ctx.peers.create_peer(PeerKind::Udp, id, false);
        match peer.connect(address) {
            Ok(()) => IpcResult::data(message, address_json(id, &address)),
            Err(e) => IpcResult::error(message, &peer_error(id, e)),
        }
    }))
}

/// `udp.disconnect`: drop the association of peer `id`
pub fn disconnect(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let peer = associated_peer(ctx, id)?;

    Ok(run(message, move |message| match peer.disconnect() {
        Ok(()) => IpcResult::data(message, json!({ "id": id.to_string() })),
        Err(e) => IpcResult::error(message, &peer_error(id, e)),
    }))
}

/// `udp.getPeerName`: remote address of a connected peer
pub fn get_peer_name(ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let lookup = resource_id(message).and_then(|id| Ok((id, associated_peer(ctx, id)?)));
    match lookup {
        Ok((id, peer)) => match peer.remote_address() {
            Some(remote) => IpcResult::data(message, address_json(id, &remote)),
            None => IpcResult::error(message, &IpcError::socket(id, SocketError::NotConnected)),
        },
        Err(e) => IpcResult::error(message, &e),
    }
}

/// `udp.getSockName`: local address of a bound peer
pub fn get_sock_name(ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let lookup = resource_id(message).and_then(|id| Ok((id, existing_peer(ctx, id)?)));
    match lookup {
        Ok((id, peer)) => match peer.local_address().filter(|_| peer.is_bound()) {
            Some(local) => IpcResult::data(message, address_json(id, &local)),
            None => IpcResult::error(message, &IpcError::socket(id, SocketError::NotRunning)),
        },
        Err(e) => IpcResult::error(message, &e),
    }
}

/// `udp.getState`: state flags of peer `id`
pub fn get_state(ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let lookup = resource_id(message).and_then(|id| Ok((id, existing_peer(ctx, id)?)));
    match lookup {
        Ok((id, peer)) => {
            let info = peer.info();
            IpcResult::data(
                message,
                json!({
                    "id": id.to_string(),
                    "type": info.kind.as_str(),
                    "bound": info.bound,
                    "active": info.active,
                    "closed": info.closed,
                    "closing": info.closing,
                    "connected": info.connected,
                    "ephemeral": info.ephemeral,
                }),
            )
        }
        Err(e) => IpcResult::error(message, &e),
    }
}

/// `udp.send`: send the request body, creating the peer when needed
pub fn send(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let ephemeral = flag(message, "ephemeral", false);
    let destination = if message.has("port") {
        Some(socket_address(message, "127.0.0.1")?)
    } else {
        None
    };
    let bytes = message.buffer.clone().unwrap_or_default();

    if let Some(peer) = ctx.peers.get(id) {
        if peer.is_closed() {
            return Err(IpcError::socket(id, SocketError::Closed));
        }
        if peer.is_closing() {
            return Err(IpcError::socket(id, SocketError::Closing));
        }
        if destination.is_none() && !peer.is_connected() {
            return Err(IpcError::missing_parameter("port"));
        }
    } else if destination.is_none() {
        return Err(IpcError::missing_parameter("port"));
    }

    let ctx = Arc::clone(ctx);
    let message = message.clone();
    Ok(async move {
        let peer = ctx.peers.create_peer(PeerKind::Udp, id, ephemeral);
        match peer.send(&bytes, destination).await {
            Ok(sent) => IpcResult::data(&message, json!({ "id": id.to_string(), "result": sent })),
            Err(e) => IpcResult::error(&message, &peer_error(id, e)),
        }
    }
    .boxed())
}

/// `udp.readStart`: stream received datagrams to the page
///
/// Each datagram arrives as an uncorrelated `udp.readStart` reply carrying the
/// bytes as a payload and `{id, port, bytes, address}` as its JSON.
pub fn read_start(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let peer = running_peer(ctx, id)?;
    if peer.is_receiving() {
        return Err(IpcError::message("Socket is already receiving").with_id(id));
    }

    let callback = receive_callback(id, Arc::clone(&ctx.delivery));
    Ok(run(message, move |message| match peer.recvstart(callback) {
        Ok(()) => IpcResult::data(message, json!({ "id": id.to_string() })),
        Err(e) => IpcResult::error(message, &peer_error(id, e)),
    }))
}

/// `udp.readStop`: stop streaming datagrams
pub fn read_stop(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let peer = running_peer(ctx, id)?;
    if !peer.is_receiving() {
        return Err(IpcError::message("Socket is not receiving").with_id(id));
    }

    Ok(run(message, move |message| match peer.recvstop() {
        Ok(()) => IpcResult::data(message, json!({ "id": id.to_string() })),
        Err(e) => IpcResult::error(message, &peer_error(id, e)),
    }))
}

/// `udp.close`: close peer `id`, replying once the native close completes
pub fn close(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let peer = existing_peer(ctx, id)?;

    let message = message.clone();
    Ok(async move {
        let (tx, rx) = oneshot::channel();
        peer.close(Some(Box::new(move || {
            let _ = tx.send(());
        })));

        match rx.await {
            Ok(()) => IpcResult::data(&message, json!({ "id": id.to_string() })),
            Err(_) => IpcResult::error(
                &message,
                &IpcError::internal("Close did not complete").with_id(id),
            ),
        }
    }
    .boxed())
}

// ----------------------------------------------------------------------------
// Receive Streaming
// ----------------------------------------------------------------------------

fn receive_callback(id: ResourceId, delivery: Arc<Delivery>) -> ReceiveCallback {
    Arc::new(move |event: ReceiveEvent| {
        let seq = Seq::broadcast();
        match event {
            ReceiveEvent::Datagram { bytes, from } => {
                let result = IpcResult::broadcast(
                    READ_SOURCE,
                    json!({
                        "id": id.to_string(),
                        "port": from.port(),
                        "bytes": bytes.len().to_string(),
                        "address": from.ip().to_string(),
                    }),
                );
                delivery.send(&seq, &result.str(), Data::octet_stream(bytes));
            }
            ReceiveEvent::Error(e) => {
                let mut result = IpcResult::new(seq.clone(), READ_SOURCE);
                result.err = io_error(&e).with_id(id).to_json();
                delivery.send(&seq, &result.str(), Data::default());
            }
            ReceiveEvent::Eof => {
                debug!("Peer {} reached end of stream", id);
                let result = IpcResult::broadcast(
                    READ_SOURCE,
                    json!({ "id": id.to_string(), "EOF": true }),
                );
                delivery.send(&seq, &result.str(), Data::default());
            }
        }
    })
}

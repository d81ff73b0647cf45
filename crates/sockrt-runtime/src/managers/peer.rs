//! Network peers
//!
//! A `Peer` is a logical socket identified by a caller-chosen id. The native
//! handle behind it may be dropped and recreated (pause/resume, rebind) while
//! the id stays stable for the page. All state transitions go through the
//! peer's own mutex; the `PeerManager` only guards the id table.
//!
//! Operations that create or poll native sockets need the reactor context and
//! must run on the event loop thread. `close` may be called from anywhere: the
//! native teardown is dispatched onto the loop.

use crate::event_loop::EventLoop;
use parking_lot::Mutex;
use serde::Serialize;
use sockrt_core::{ResourceId, SocketError};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::BitOr;
use std::sync::{Arc, Weak};
use tokio::net::{TcpSocket, UdpSocket};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

// ----------------------------------------------------------------------------
// Peer State
// ----------------------------------------------------------------------------

/// Bitmask of peer state flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerState(u32);

impl PeerState {
    pub const NONE: PeerState = PeerState(0);
    pub const CLOSED: PeerState = PeerState(1 << 1);
    pub const CLOSING: PeerState = PeerState(1 << 2);
    pub const UDP_BOUND: PeerState = PeerState(1 << 10);
    pub const UDP_CONNECTED: PeerState = PeerState(1 << 11);
    pub const UDP_RECV_STARTED: PeerState = PeerState(1 << 12);
    pub const UDP_PAUSED: PeerState = PeerState(1 << 13);
    pub const TCP_BOUND: PeerState = PeerState(1 << 20);
    pub const TCP_CONNECTED: PeerState = PeerState(1 << 21);
    pub const TCP_PAUSED: PeerState = PeerState(1 << 22);

    pub fn bits(self) -> u32 {
        self.0
    }

    /// All bits of `other` are set
    pub fn contains(self, other: PeerState) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set
    pub fn intersects(self, other: PeerState) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: PeerState) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PeerState) {
        self.0 &= !other.0;
    }
}

impl BitOr for PeerState {
    type Output = PeerState;

    fn bitor(self, rhs: PeerState) -> PeerState {
        PeerState(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Udp,
    Tcp,
}

impl PeerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerKind::Udp => "udp",
            PeerKind::Tcp => "tcp",
        }
    }
}

/// Native handle owned by a peer
enum PeerHandle {
    Udp(Arc<UdpSocket>),
    Tcp(TcpSocket),
}

/// Which kernel buffer `buffer_size` addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Send,
    Receive,
}

/// Errors raised by peer operations
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("{}", .0.message())]
    Socket(SocketError),
    #[error("Socket is already receiving")]
    AlreadyReceiving,
    #[error("Socket is not receiving")]
    NotReceiving,
    #[error("operation is not supported on {} peers", .0.as_str())]
    Unsupported(PeerKind),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<SocketError> for PeerError {
    fn from(err: SocketError) -> Self {
        PeerError::Socket(err)
    }
}

/// Events delivered to a receive callback
#[derive(Debug)]
pub enum ReceiveEvent {
    Datagram { bytes: Vec<u8>, from: SocketAddr },
    Error(io::Error),
    /// Receiving ended because the peer closed
    Eof,
}

pub type ReceiveCallback = Arc<dyn Fn(ReceiveEvent) + Send + Sync + 'static>;
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Snapshot of a peer's observable state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: ResourceId,
    pub kind: PeerKind,
    pub bound: bool,
    pub active: bool,
    pub closed: bool,
    pub closing: bool,
    pub connected: bool,
    pub paused: bool,
    pub ephemeral: bool,
    pub local: Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
}

// ----------------------------------------------------------------------------
// Peer
// ----------------------------------------------------------------------------

struct PeerInner {
    state: PeerState,
    ephemeral: bool,
    reuse_addr: bool,
    handle: Option<PeerHandle>,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    on_recv: Option<ReceiveCallback>,
    recv_task: Option<AbortHandle>,
    on_close: Vec<CloseCallback>,
}

type PeerTable = Mutex<HashMap<ResourceId, Arc<Peer>>>;

/// A logical network socket
pub struct Peer {
    pub id: ResourceId,
    pub kind: PeerKind,
    inner: Mutex<PeerInner>,
    registry: Weak<PeerTable>,
    event_loop: EventLoop,
}

impl Peer {
    fn new(
        id: ResourceId,
        kind: PeerKind,
        ephemeral: bool,
        registry: Weak<PeerTable>,
        event_loop: EventLoop,
    ) -> Self {
        Self {
            id,
            kind,
            inner: Mutex::new(PeerInner {
                state: PeerState::NONE,
                ephemeral,
                reuse_addr: false,
                handle: None,
                local: None,
                remote: None,
                on_recv: None,
                recv_task: None,
                on_close: Vec::new(),
            }),
            registry,
            event_loop,
        }
    }

    pub fn state(&self) -> PeerState {
        self.inner.lock().state
    }

    pub fn is_ephemeral(&self) -> bool {
        self.inner.lock().ephemeral
    }

    pub fn set_ephemeral(&self, ephemeral: bool) {
        self.inner.lock().ephemeral = ephemeral;
    }

    pub fn is_bound(&self) -> bool {
        self.state()
            .intersects(PeerState::UDP_BOUND | PeerState::TCP_BOUND)
    }

    pub fn is_connected(&self) -> bool {
        self.state()
            .intersects(PeerState::UDP_CONNECTED | PeerState::TCP_CONNECTED)
    }

    pub fn is_paused(&self) -> bool {
        self.state()
            .intersects(PeerState::UDP_PAUSED | PeerState::TCP_PAUSED)
    }

    pub fn is_receiving(&self) -> bool {
        self.state().contains(PeerState::UDP_RECV_STARTED)
    }

    pub fn is_closed(&self) -> bool {
        self.state().contains(PeerState::CLOSED)
    }

    pub fn is_closing(&self) -> bool {
        self.state().contains(PeerState::CLOSING)
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.lock().local
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.inner.lock().remote
    }

    pub fn info(&self) -> PeerInfo {
        let inner = self.inner.lock();
        let state = inner.state;
        PeerInfo {
            id: self.id,
            kind: self.kind,
            bound: state.intersects(PeerState::UDP_BOUND | PeerState::TCP_BOUND),
            active: state.contains(PeerState::UDP_RECV_STARTED),
            closed: state.contains(PeerState::CLOSED),
            closing: state.contains(PeerState::CLOSING),
            connected: state.intersects(PeerState::UDP_CONNECTED | PeerState::TCP_CONNECTED),
            paused: state.intersects(PeerState::UDP_PAUSED | PeerState::TCP_PAUSED),
            ephemeral: inner.ephemeral,
            local: inner.local,
            remote: inner.remote,
        }
    }

    /// Bind the native socket to `address`
    pub fn bind(&self, address: SocketAddr, reuse_addr: bool) -> Result<(), PeerError> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        if inner
            .state
            .intersects(PeerState::UDP_BOUND | PeerState::TCP_BOUND)
        {
            return Err(SocketError::AlreadyBound.into());
        }

        inner.reuse_addr = reuse_addr;
        self.bind_locked(&mut inner, address)?;
        info!("Peer {} bound to {}", self.id, address);
        Ok(())
    }

    /// Associate the peer with `address`; later sends go there and only its
    /// datagrams are received
    pub fn connect(&self, address: SocketAddr) -> Result<(), PeerError> {
        if self.kind == PeerKind::Tcp {
            return Err(PeerError::Unsupported(self.kind));
        }

        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        if inner.state.contains(PeerState::UDP_CONNECTED) {
            return Err(SocketError::IsConnected.into());
        }

        if inner.handle.is_none() {
            self.bind_locked(&mut inner, unspecified_for(&address))?;
        }

        inner.remote = Some(address);
        inner.state.insert(PeerState::UDP_CONNECTED);
        debug!("Peer {} connected to {}", self.id, address);
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), PeerError> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        if !inner.state.contains(PeerState::UDP_CONNECTED) {
            return Err(SocketError::NotConnected.into());
        }

        inner.remote = None;
        inner.state.remove(PeerState::UDP_CONNECTED);
        Ok(())
    }

    /// Send `bytes`; a connected peer ignores `destination` and uses its remote
    ///
    /// An ephemeral peer closes itself once the send finishes, whatever the
    /// outcome.
    pub async fn send(
        self: &Arc<Self>,
        bytes: &[u8],
        destination: Option<SocketAddr>,
    ) -> Result<usize, PeerError> {
        let result = self.send_inner(bytes, destination).await;
        if self.is_ephemeral() {
            self.close(None);
        }
        result
    }

    async fn send_inner(
        &self,
        bytes: &[u8],
        destination: Option<SocketAddr>,
    ) -> Result<usize, PeerError> {
        let (socket, target) = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;

            if self.kind == PeerKind::Tcp {
                return Err(PeerError::Unsupported(self.kind));
            }

            let target = if inner.state.contains(PeerState::UDP_CONNECTED) {
                inner.remote
            } else {
                destination
            }
            .ok_or(PeerError::Socket(SocketError::NotConnected))?;

            if inner.handle.is_none() {
                if inner.state.contains(PeerState::UDP_PAUSED) {
                    return Err(SocketError::NotRunning.into());
                }
                self.bind_locked(&mut inner, unspecified_for(&target))?;
            }

            match &inner.handle {
                Some(PeerHandle::Udp(socket)) => (Arc::clone(socket), target),
                _ => return Err(SocketError::NotRunning.into()),
            }
        };

        Ok(socket.send_to(bytes, target).await?)
    }

    /// Start delivering received datagrams to `callback`
    ///
    /// On a paused peer the callback is stored and receiving begins on
    /// `resume`. An unbound peer is bound to an ephemeral port first.
    pub fn recvstart(self: &Arc<Self>, callback: ReceiveCallback) -> Result<(), PeerError> {
        if self.kind == PeerKind::Tcp {
            return Err(PeerError::Unsupported(self.kind));
        }

        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        if Self::receive_requested(&inner) {
            return Err(PeerError::AlreadyReceiving);
        }

        if inner.state.contains(PeerState::UDP_PAUSED) {
            inner.on_recv = Some(callback);
            debug!("Peer {} will start receiving on resume", self.id);
            return Ok(());
        }

        if inner.handle.is_none() {
            self.bind_locked(&mut inner, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        }

        inner.on_recv = Some(callback);
        self.spawn_receiver(&mut inner);
        Ok(())
    }

    /// Stop receiving and forget the receive callback
    pub fn recvstop(&self) -> Result<(), PeerError> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        if !Self::receive_requested(&inner) {
            return Err(PeerError::NotReceiving);
        }

        Self::stop_receiving(&mut inner);
        inner.on_recv = None;
        Ok(())
    }

    /// Recreate the native socket at its previous local address
    ///
    /// Receiving resumes if a receive callback is stored. The new socket is
    /// bound on the next loop turn, once the old one is fully released.
    pub fn rebind(self: &Arc<Self>) -> Result<(), PeerError> {
        {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            Self::stop_receiving(&mut inner);
            inner.handle = None;
        }
        self.schedule_rebind();
        Ok(())
    }

    /// Release the native socket, keeping the logical state for `resume`
    pub fn pause(&self) -> Result<(), PeerError> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        let paused = match self.kind {
            PeerKind::Udp => PeerState::UDP_PAUSED,
            PeerKind::Tcp => PeerState::TCP_PAUSED,
        };
        if inner.state.contains(paused) {
            return Ok(());
        }

        Self::stop_receiving(&mut inner);
        inner.handle = None;
        inner.state.insert(paused);
        debug!("Peer {} paused", self.id);
        Ok(())
    }

    pub fn resume(self: &Arc<Self>) -> Result<(), PeerError> {
        let needs_rebind = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;

            let paused = match self.kind {
                PeerKind::Udp => PeerState::UDP_PAUSED,
                PeerKind::Tcp => PeerState::TCP_PAUSED,
            };
            if !inner.state.contains(paused) {
                return Ok(());
            }

            inner.state.remove(paused);
            inner.on_recv.is_some()
                || inner.state.intersects(
                    PeerState::UDP_BOUND | PeerState::UDP_CONNECTED | PeerState::TCP_BOUND,
                )
        };

        if needs_rebind {
            self.schedule_rebind();
        }
        debug!("Peer {} resumed", self.id);
        Ok(())
    }

    /// Get or set the kernel send/receive buffer size
    pub fn buffer_size(&self, kind: BufferKind, size: Option<usize>) -> Result<usize, PeerError> {
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        let socket = match &inner.handle {
            Some(PeerHandle::Udp(socket)) => SockRef::from(socket.as_ref()),
            Some(PeerHandle::Tcp(socket)) => SockRef::from(socket),
            None => return Err(SocketError::NotRunning.into()),
        };

        match (kind, size) {
            (BufferKind::Send, Some(size)) => socket.set_send_buffer_size(size)?,
            (BufferKind::Receive, Some(size)) => socket.set_recv_buffer_size(size)?,
            _ => {}
        }

        Ok(match kind {
            BufferKind::Send => socket.send_buffer_size()?,
            BufferKind::Receive => socket.recv_buffer_size()?,
        })
    }

    /// Close the peer, invoking `on_close` once the native close completes
    ///
    /// Closing a closed peer invokes `on_close` immediately. Closing a peer that
    /// is already closing queues `on_close` behind the pending close.
    pub fn close(self: &Arc<Self>, on_close: Option<CloseCallback>) {
        let mut inner = self.inner.lock();

        if inner.state.contains(PeerState::CLOSED) {
            drop(inner);
            self.forget();
            if let Some(callback) = on_close {
                callback();
            }
            return;
        }

        if let Some(callback) = on_close {
            inner.on_close.push(callback);
        }

        if inner.state.contains(PeerState::CLOSING) {
            return;
        }

        inner.state.insert(PeerState::CLOSING);
        drop(inner);

        let peer = Arc::clone(self);
        self.event_loop.dispatch(move || peer.finish_close());
    }

    fn finish_close(&self) {
        let (callbacks, receiver) = {
            let mut inner = self.inner.lock();
            let receiving = inner.state.contains(PeerState::UDP_RECV_STARTED);
            Self::stop_receiving(&mut inner);
            inner.handle = None;
            inner.state = PeerState::CLOSED;
            let receiver = inner.on_recv.take().filter(|_| receiving);
            (std::mem::take(&mut inner.on_close), receiver)
        };

        self.forget();
        info!("Peer {} closed", self.id);

        if let Some(receiver) = receiver {
            receiver(ReceiveEvent::Eof);
        }
        for callback in callbacks {
            callback();
        }
    }

    fn ensure_open(inner: &PeerInner) -> Result<(), PeerError> {
        if inner.state.contains(PeerState::CLOSED) {
            return Err(SocketError::Closed.into());
        }
        if inner.state.contains(PeerState::CLOSING) {
            return Err(SocketError::Closing.into());
        }
        Ok(())
    }

    fn bind_locked(&self, inner: &mut PeerInner, address: SocketAddr) -> Result<(), PeerError> {
        match self.kind {
            PeerKind::Udp => {
                let socket = Socket::new(
                    Domain::for_address(address),
                    Type::DGRAM,
                    Some(Protocol::UDP),
                )?;
                if inner.reuse_addr {
                    socket.set_reuse_address(true)?;
                }
                socket.set_nonblocking(true)?;
                socket.bind(&address.into())?;

                let socket = UdpSocket::from_std(socket.into())?;
                inner.local = Some(socket.local_addr()?);
                inner.handle = Some(PeerHandle::Udp(Arc::new(socket)));
                inner.state.insert(PeerState::UDP_BOUND);
            }
            PeerKind::Tcp => {
                let socket = match address {
                    SocketAddr::V4(_) => TcpSocket::new_v4()?,
                    SocketAddr::V6(_) => TcpSocket::new_v6()?,
                };
                socket.set_reuseaddr(inner.reuse_addr)?;
                socket.bind(address)?;

                inner.local = Some(socket.local_addr()?);
                inner.handle = Some(PeerHandle::Tcp(socket));
                inner.state.insert(PeerState::TCP_BOUND);
            }
        }
        Ok(())
    }

    fn spawn_receiver(self: &Arc<Self>, inner: &mut PeerInner) {
        let (Some(PeerHandle::Udp(socket)), Some(callback)) = (&inner.handle, &inner.on_recv)
        else {
            return;
        };

        let socket = Arc::clone(socket);
        let callback = Arc::clone(callback);
        let weak = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let received = socket.recv_from(&mut buffer).await;
                let Some(peer) = weak.upgrade() else {
                    break;
                };

                match received {
                    Ok((size, from)) => {
                        if peer.remote_address().is_some_and(|remote| remote != from) {
                            continue;
                        }
                        callback(ReceiveEvent::Datagram {
                            bytes: buffer[..size].to_vec(),
                            from,
                        });
                        if peer.is_ephemeral() {
                            peer.close(None);
                            break;
                        }
                    }
                    Err(e) if is_transient(&e) => {
                        debug!("Peer {} ignored receive error: {}", peer.id, e);
                    }
                    Err(e) => {
                        warn!("Peer {} stopped receiving: {}", peer.id, e);
                        let mut inner = peer.inner.lock();
                        inner.state.remove(PeerState::UDP_RECV_STARTED);
                        inner.recv_task = None;
                        drop(inner);
                        callback(ReceiveEvent::Error(e));
                        break;
                    }
                }
            }
        });

        inner.recv_task = Some(task.abort_handle());
        inner.state.insert(PeerState::UDP_RECV_STARTED);
    }

    // receiving, or waiting to receive once a pause ends
    fn receive_requested(inner: &PeerInner) -> bool {
        inner.state.contains(PeerState::UDP_RECV_STARTED)
            || (inner.state.contains(PeerState::UDP_PAUSED) && inner.on_recv.is_some())
    }

    fn stop_receiving(inner: &mut PeerInner) {
        if let Some(task) = inner.recv_task.take() {
            task.abort();
        }
        inner.state.remove(PeerState::UDP_RECV_STARTED);
    }

    fn schedule_rebind(self: &Arc<Self>) {
        let peer = Arc::clone(self);
        self.event_loop.dispatch(move || {
            let mut inner = peer.inner.lock();
            if Self::ensure_open(&inner).is_err()
                || inner.handle.is_some()
                || inner
                    .state
                    .intersects(PeerState::UDP_PAUSED | PeerState::TCP_PAUSED)
            {
                return;
            }

            let address = inner
                .local
                .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
            inner.state.remove(PeerState::UDP_BOUND | PeerState::TCP_BOUND);

            if let Err(e) = peer.bind_locked(&mut inner, address) {
                warn!("Peer {} failed to rebind to {}: {}", peer.id, address, e);
                return;
            }
            peer.spawn_receiver(&mut inner);
        });
    }

    // drop the registry entry only if it still refers to this peer
    fn forget(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut peers = registry.lock();
        if peers
            .get(&self.id)
            .is_some_and(|current| std::ptr::eq(current.as_ref(), self))
        {
            peers.remove(&self.id);
        }
    }
}

fn unspecified_for(address: &SocketAddr) -> SocketAddr {
    let ip = match address.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

// ----------------------------------------------------------------------------
// Peer Manager
// ----------------------------------------------------------------------------

/// Registry of peers keyed by caller-chosen ids
pub struct PeerManager {
    peers: Arc<PeerTable>,
    event_loop: EventLoop,
    stats: Mutex<PeerStats>,
}

impl PeerManager {
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            event_loop,
            stats: Mutex::new(PeerStats::default()),
        }
    }

    /// Peer for `id`, creating it if absent
    ///
    /// An existing peer is returned as is, except that it becomes ephemeral
    /// when `ephemeral` is requested.
    pub fn create_peer(&self, kind: PeerKind, id: ResourceId, ephemeral: bool) -> Arc<Peer> {
        let mut peers = self.peers.lock();
        if let Some(peer) = peers.get(&id) {
            if ephemeral {
                peer.set_ephemeral(true);
            }
            return Arc::clone(peer);
        }

        let peer = Arc::new(Peer::new(
            id,
            kind,
            ephemeral,
            Arc::downgrade(&self.peers),
            self.event_loop.clone(),
        ));
        peers.insert(id, Arc::clone(&peer));
        self.stats.lock().created += 1;
        debug!("Created {} peer {}", kind.as_str(), id);
        peer
    }

    pub fn get(&self, id: ResourceId) -> Option<Arc<Peer>> {
        self.peers.lock().get(&id).cloned()
    }

    pub fn has(&self, id: ResourceId) -> bool {
        self.peers.lock().contains_key(&id)
    }

    /// Drop `id` from the registry without closing it
    pub fn remove(&self, id: ResourceId) -> Option<Arc<Peer>> {
        self.peers.lock().remove(&id)
    }

    pub fn count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Pause every bound or connected peer
    pub fn pause_all(&self) {
        let mut paused = 0;
        for peer in self.active_peers() {
            match peer.pause() {
                Ok(()) => paused += 1,
                Err(e) => warn!("Failed to pause peer {}: {}", peer.id, e),
            }
        }
        self.stats.lock().pauses += paused;
        info!("Paused {} peers", paused);
    }

    /// Resume every bound or connected peer
    pub fn resume_all(&self) {
        let mut resumed = 0;
        for peer in self.active_peers() {
            match peer.resume() {
                Ok(()) => resumed += 1,
                Err(e) => warn!("Failed to resume peer {}: {}", peer.id, e),
            }
        }
        self.stats.lock().resumes += resumed;
        info!("Resumed {} peers", resumed);
    }

    /// Close every peer
    pub fn close_all(&self) {
        let peers: Vec<Arc<Peer>> = self.peers.lock().values().cloned().collect();
        for peer in peers {
            peer.close(None);
        }
    }

    /// Get peer statistics
    pub fn get_statistics(&self) -> PeerStats {
        self.stats.lock().clone()
    }

    fn active_peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .lock()
            .values()
            .filter(|peer| peer.is_bound() || peer.is_connected())
            .cloned()
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Statistics for peer management
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerStats {
    /// Number of peers created
    pub created: u64,
    /// Number of peers paused by `pause_all`
    pub pauses: u64,
    /// Number of peers resumed by `resume_all`
    pub resumes: u64,
}

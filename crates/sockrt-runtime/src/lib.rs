//! sockrt Runtime Engine
//!
//! This crate contains the native side of the sockrt web view runtime:
//! - `EventLoop`: the single reactor thread and its dispatch queue
//! - `Timers`: named timers driving payload expiry and descriptor GC
//! - Payload, descriptor and peer managers
//! - DNS, filesystem, OS, platform and UDP handler modules
//! - `Router`: the handler table, reply delivery and scheme request entry point
//! - `Runtime`/`RuntimeBuilder`: the owned object tying everything together
//!
//! `sockrt-core` provides the I/O-free message, reply and error types.

pub mod bridge;
pub mod delivery;
pub mod event_loop;
pub mod host;
pub mod managers;
pub mod modules;
pub mod router;
mod runtime;
pub mod timers;

pub use delivery::Delivery;
pub use event_loop::{EventLoop, LoopCallback, LoopStats};
pub use host::{ChannelHost, WebViewHost};
pub use managers::*;
pub use modules::ModuleContext;
pub use router::{HandlerFuture, ReplyCallback, Router, RouterStats, SchemeResponse};
pub use runtime::*;
pub use timers::{Timer, TimerCallback, Timers};

// Re-export core types for convenience
pub use sockrt_core::{
    Data, Headers, IpcError, IpcResult, Message, ResourceId, RuntimeConfig, RuntimeError,
    RuntimeResult, Seq,
};

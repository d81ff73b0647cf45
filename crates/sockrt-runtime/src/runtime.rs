//! sockrt Runtime
//!
//! The [`Runtime`] owns every component of the native side: the event loop,
//! its timers, the payload/descriptor/peer managers, reply delivery and the
//! router with the full handler table. A windowing layer builds one per
//! web view and forwards intercepted requests to it:
//!
//! ```rust,no_run
//! use sockrt_runtime::{ChannelHost, RuntimeBuilder};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (host, mut scripts) = ChannelHost::new();
//! let runtime = RuntimeBuilder::new()
//!     .with_host(Arc::new(host))
//!     .build_and_start()?;
//!
//! runtime.handle_message("ipc://ping?seq=1", None);
//! # let _ = scripts.try_recv();
//! runtime.shutdown();
//! # Ok(())
//! # }
//! ```

use crate::bridge;
use crate::delivery::Delivery;
use crate::event_loop::EventLoop;
use crate::host::WebViewHost;
use crate::managers::{DataManager, DescriptorManager, PeerManager};
use crate::modules::ModuleContext;
use crate::router::{Router, SchemeResponse};
use crate::timers::{Timer, Timers};
use sockrt_core::{RuntimeConfig, RuntimeError, RuntimeResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DATA_EXPIRE_TIMER: &str = "data.expire";
const DESCRIPTOR_GC_TIMER: &str = "descriptors.gc";

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder wiring a `Runtime` to its configuration and web view host
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    host: Option<Arc<dyn WebViewHost>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime configuration
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the host that evaluates scripts on the main thread
    pub fn with_host(mut self, host: Arc<dyn WebViewHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Construct every component without starting the loop
    pub fn build(self) -> RuntimeResult<Runtime> {
        self.config.validate()?;
        let host = self
            .host
            .ok_or_else(|| RuntimeError::config_error("a web view host is required"))?;
        let config = self.config;

        let event_loop = EventLoop::new(config.event_loop.clone());
        let timers = Timers::new(event_loop.clone());
        let data = Arc::new(DataManager::new(config.data.clone(), config.router.scheme.clone()));
        let descriptors = Arc::new(DescriptorManager::new(config.descriptors.clone()));
        let peers = Arc::new(PeerManager::new(event_loop.clone()));
        let delivery = Arc::new(Delivery::new(Arc::clone(&host), Arc::clone(&data)));

        let context = Arc::new(ModuleContext {
            event_loop: event_loop.clone(),
            data: Arc::clone(&data),
            descriptors: Arc::clone(&descriptors),
            peers,
            delivery: Arc::clone(&delivery),
            host,
        });

        let router = Arc::new(Router::new(
            event_loop.clone(),
            delivery,
            Arc::clone(&data),
            config.router.clone(),
        ));
        bridge::register(&router, &context);

        let store = Arc::clone(&data);
        let staging = Arc::clone(&router);
        timers.add(
            DATA_EXPIRE_TIMER,
            Timer::repeating(config.data.expire_interval(), move || {
                store.expire();
                staging.expire_staged_buffers();
            }),
        );

        timers.add(
            DESCRIPTOR_GC_TIMER,
            Timer::repeating(config.descriptors.gc_interval(), move || {
                let descriptors = Arc::clone(&descriptors);
                tokio::spawn(async move {
                    descriptors.sweep().await;
                });
            }),
        );

        Ok(Runtime {
            config,
            event_loop,
            timers,
            context,
            router,
            running: AtomicBool::new(false),
        })
    }

    /// Build and start the runtime
    pub fn build_and_start(self) -> RuntimeResult<Runtime> {
        let runtime = self.build()?;
        runtime.start()?;
        Ok(runtime)
    }
}

// ----------------------------------------------------------------------------
// Runtime
// ----------------------------------------------------------------------------

/// An owned native runtime serving one web view
pub struct Runtime {
    config: RuntimeConfig,
    event_loop: EventLoop,
    timers: Timers,
    context: Arc<ModuleContext>,
    router: Arc<Router>,
    running: AtomicBool,
}

impl Runtime {
    /// Start the loop and every background timer
    pub fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(e) = self.event_loop.start() {
            self.running.store(false, Ordering::Release);
            return Err(e);
        }
        self.timers.start();

        info!(
            "Runtime started with {} handlers on scheme {}",
            self.router.names().len(),
            self.config.router.scheme
        );
        Ok(())
    }

    /// Close every resource and stop the loop
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        self.timers.stop();
        self.context.peers.close_all();

        let descriptors = Arc::clone(&self.context.descriptors);
        let closed = self
            .event_loop
            .spawn(async move { descriptors.close_all(false).await.len() });
        if !self.event_loop.is_loop_thread() {
            match futures::executor::block_on(closed) {
                Ok(count) => debug!("Closed {} descriptors on shutdown", count),
                Err(_) => warn!("Event loop stopped before descriptors were closed"),
            }
        }

        self.context.data.clear();
        self.event_loop.stop();
        info!("Runtime stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop timer-driven work and pause every peer while the app is backgrounded
    pub fn suspend(&self) {
        self.timers.stop();
        self.pause_all_peers();
    }

    /// Undo `suspend`
    pub fn resume(&self) {
        self.resume_all_peers();
        self.timers.start();
    }

    pub fn pause_all_peers(&self) {
        self.context.peers.pause_all();
    }

    pub fn resume_all_peers(&self) {
        self.context.peers.resume_all();
    }

    /// Route a request; false when no handler matched
    pub fn handle_message(&self, uri: &str, buffer: Option<Vec<u8>>) -> bool {
        self.router.handle_message(uri, buffer)
    }

    /// Answer an intercepted scheme request
    pub fn handle_scheme_request<F>(&self, method: &str, uri: &str, body: Option<Vec<u8>>, respond: F)
    where
        F: FnOnce(SchemeResponse) + Send + 'static,
    {
        self.router.handle_scheme_request(method, uri, body, respond);
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn context(&self) -> &Arc<ModuleContext> {
        &self.context
    }

    pub fn data(&self) -> &Arc<DataManager> {
        &self.context.data
    }

    pub fn descriptors(&self) -> &Arc<DescriptorManager> {
        &self.context.descriptors
    }

    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.context.peers
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

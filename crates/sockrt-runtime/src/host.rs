//! Web view host collaborator
//!
//! The windowing layer supplies a `WebViewHost` through which the runtime
//! evaluates scripts in the page and hops onto the GUI main thread.

use tokio::sync::mpsc;
use tracing::warn;

/// Main-thread services supplied by the windowing layer
pub trait WebViewHost: Send + Sync + 'static {
    /// Evaluate `script` in the web view; only called on the main thread
    fn evaluate_javascript(&self, script: &str);

    /// Run `task` on the main thread
    fn dispatch(&self, task: Box<dyn FnOnce() + Send + 'static>);

    /// Show a system notification; returns false when unsupported
    fn notify(&self, _title: &str, _body: &str) -> bool {
        false
    }

    /// Open a URL with the system handler; returns false when unsupported
    fn open_external(&self, _url: &str) -> bool {
        false
    }
}

// ----------------------------------------------------------------------------
// Channel Host
// ----------------------------------------------------------------------------

/// Host that forwards every evaluated script into a channel
///
/// There is no separate GUI thread: `dispatch` runs the task inline. Used by
/// the command-line host and by tests.
pub struct ChannelHost {
    scripts: mpsc::UnboundedSender<String>,
    allow_external: bool,
}

impl ChannelHost {
    /// Create a host and the receiver of its evaluated scripts
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (scripts, receiver) = mpsc::unbounded_channel();
        (
            Self {
                scripts,
                allow_external: false,
            },
            receiver,
        )
    }

    /// Report `notify`/`open_external` as supported
    pub fn with_external_actions(mut self) -> Self {
        self.allow_external = true;
        self
    }
}

impl WebViewHost for ChannelHost {
    fn evaluate_javascript(&self, script: &str) {
        if self.scripts.send(script.to_string()).is_err() {
            warn!("Script receiver dropped; discarding evaluation");
        }
    }

    fn dispatch(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }

    fn notify(&self, _title: &str, _body: &str) -> bool {
        self.allow_external
    }

    fn open_external(&self, _url: &str) -> bool {
        self.allow_external
    }
}

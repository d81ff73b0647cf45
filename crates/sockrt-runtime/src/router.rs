//! IPC router
//!
//! The `Router` owns the name → handler table. It parses requests into
//! `Message`s, splices staged `buffer.map` bodies, runs each handler either on
//! the calling thread or on the event loop, and hands the resulting
//! `IpcResult` to `Delivery`. It is also the entry point for intercepted
//! scheme requests, including the secondary `data`/`post` payload fetches.

use crate::delivery::Delivery;
use crate::event_loop::EventLoop;
use crate::managers::DataManager;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use sockrt_core::{Data, Headers, IpcError, IpcResult, Message, RouterConfig, Seq};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Future produced by a loop-scheduled handler
pub type HandlerFuture = BoxFuture<'static, IpcResult>;

/// Receives the single reply to an invocation
pub type ReplyCallback = Box<dyn FnOnce(IpcResult) + Send + 'static>;

/// Handler invoked with the message and its reply callback
pub type CallbackHandler = Arc<dyn Fn(Message, ReplyCallback) + Send + Sync + 'static>;

/// Handler that validates synchronously and returns the work to run on the loop
pub type TaskHandler =
    Arc<dyn Fn(&Message) -> Result<HandlerFuture, IpcError> + Send + Sync + 'static>;

/// Name of the pseudo-call staging a body for the next matching request
pub const BUFFER_MAP: &str = "buffer.map";

/// Body staged by `buffer.map`, keyed by the `(index, seq)` of its consumer
struct StagedBuffer {
    bytes: Vec<u8>,
    staged_at: Instant,
}

type StagedBuffers = Arc<Mutex<HashMap<(i32, Seq), StagedBuffer>>>;

#[derive(Clone)]
enum Handler {
    /// Runs inline, or as a dispatched loop callback when `is_async`
    Callback {
        is_async: bool,
        invoke: CallbackHandler,
    },
    /// Validated inline, completed as a loop task
    Task(TaskHandler),
}

// ----------------------------------------------------------------------------
// Scheme Response
// ----------------------------------------------------------------------------

/// Response to an intercepted scheme request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl SchemeResponse {
    /// Empty response carrying only the CORS header
    pub fn empty(status: u16) -> Self {
        let mut headers = Headers::new();
        headers.set("access-control-allow-origin", "*");
        Self {
            status,
            headers,
            body: Vec::new(),
        }
    }

    /// JSON response with CORS and length headers
    pub fn json(status: u16, body: String) -> Self {
        let mut response = Self::empty(status);
        response.headers.set("content-type", "application/json");
        response.headers.set("content-length", body.len().to_string());
        response.body = body.into_bytes();
        response
    }

    /// Response streaming a stored payload with its own headers
    pub fn payload(data: Data) -> Self {
        let mut headers = data.headers;
        headers.set("access-control-allow-origin", "*");
        let body = data.body.unwrap_or_default();
        headers.set("content-length", body.len().to_string());
        Self {
            status: 200,
            headers,
            body,
        }
    }

    /// The body as UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ----------------------------------------------------------------------------
// Router
// ----------------------------------------------------------------------------

/// Counters describing router activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub invoked: u64,
    pub not_found: u64,
    pub buffers_staged: u64,
    pub payloads_served: u64,
    pub buffers_expired: u64,
    pub handler_panics: u64,
}

pub struct Router {
    table: DashMap<String, Handler>,
    buffers: StagedBuffers,
    buffer_ttl: Duration,
    event_loop: EventLoop,
    delivery: Arc<Delivery>,
    data: Arc<DataManager>,
    config: RouterConfig,
    fetch_grace: Duration,
    stats: Arc<Mutex<RouterStats>>,
}

impl Router {
    /// Create a router with only `buffer.map` registered
    pub fn new(
        event_loop: EventLoop,
        delivery: Arc<Delivery>,
        data: Arc<DataManager>,
        config: RouterConfig,
    ) -> Self {
        let fetch_grace = data.config().fetch_grace();
        let buffer_ttl = data.config().ttl();
        let router = Self {
            table: DashMap::new(),
            buffers: Arc::new(Mutex::new(HashMap::new())),
            buffer_ttl,
            event_loop,
            delivery,
            data,
            config,
            fetch_grace,
            stats: Arc::new(Mutex::new(RouterStats::default())),
        };

        let buffers = Arc::clone(&router.buffers);
        let stats = Arc::clone(&router.stats);
        // fire-and-forget: the staging call never replies
        router.map(BUFFER_MAP, false, move |message, _reply| {
            let key = message.buffer_key();
            if let Some(bytes) = message.buffer {
                trace!("Staged {} byte buffer for {:?}", bytes.len(), key);
                let staged = StagedBuffer {
                    bytes,
                    staged_at: Instant::now(),
                };
                buffers.lock().insert(key, staged);
                stats.lock().buffers_staged += 1;
            }
        });

        router
    }

    /// Register `handler` under `name`, replacing any previous entry
    ///
    /// When `is_async` is set the handler runs as a dispatched loop callback;
    /// otherwise it runs on the invoking thread and must not block.
    pub fn map<F>(&self, name: &str, is_async: bool, handler: F)
    where
        F: Fn(Message, ReplyCallback) + Send + Sync + 'static,
    {
        let previous = self.table.insert(
            name.to_string(),
            Handler::Callback {
                is_async,
                invoke: Arc::new(handler),
            },
        );
        if previous.is_some() {
            debug!("Replaced handler for {}", name);
        }
    }

    /// Register a handler whose returned future is completed on the loop
    ///
    /// The handler itself runs on the invoking thread, so parameter errors are
    /// answered without touching the loop.
    pub fn map_task<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Message) -> Result<HandlerFuture, IpcError> + Send + Sync + 'static,
    {
        if self
            .table
            .insert(name.to_string(), Handler::Task(Arc::new(handler)))
            .is_some()
        {
            debug!("Replaced handler for {}", name);
        }
    }

    /// Remove the handler for `name`; returns whether one was registered
    pub fn unmap(&self, name: &str) -> bool {
        self.table.remove(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Registered handler names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Parse `uri` with the configured scheme
    pub fn parse(&self, uri: &str) -> Message {
        Message::parse_with_scheme(uri, &self.config.scheme)
    }

    /// Run the handler for `message`; false when no handler is registered
    ///
    /// `reply` is called exactly once for every handler except `buffer.map`.
    pub fn invoke(&self, mut message: Message, reply: ReplyCallback) -> bool {
        let handler = self
            .table
            .get(&message.name)
            .map(|entry| entry.value().clone());
        let Some(handler) = handler else {
            self.stats.lock().not_found += 1;
            return false;
        };

        if message.buffer.is_none() {
            if let Some(staged) = self.buffers.lock().remove(&message.buffer_key()) {
                message.buffer = Some(staged.bytes);
            }
        }

        self.stats.lock().invoked += 1;
        trace!("Invoking {} (seq {})", message.name, message.seq);

        match handler {
            Handler::Callback {
                is_async: false,
                invoke,
            } => run_callback(&invoke, message, reply, &self.stats),
            Handler::Callback {
                is_async: true,
                invoke,
            } => {
                let stats = Arc::clone(&self.stats);
                self.event_loop
                    .dispatch(move || run_callback(&invoke, message, reply, &stats));
            }
            Handler::Task(task) => match task(&message) {
                Err(err) => reply(IpcResult::error(&message, &err)),
                Ok(future) => {
                    let stats = Arc::clone(&self.stats);
                    self.event_loop.dispatch(move || {
                        tokio::spawn(async move {
                            let result = match AssertUnwindSafe(future).catch_unwind().await {
                                Ok(result) => result,
                                Err(_) => {
                                    error!("Handler {} panicked", message.name);
                                    stats.lock().handler_panics += 1;
                                    handler_failed(message.seq.clone(), &message.name)
                                }
                            };
                            reply(result);
                        });
                    });
                }
            },
        }

        true
    }

    /// Parse and invoke `uri`, delivering the reply to the page
    ///
    /// An unregistered name with a sequence is answered with a `NotFoundError`.
    pub fn handle_message(&self, uri: &str, buffer: Option<Vec<u8>>) -> bool {
        let mut message = self.parse(uri);
        message.buffer = buffer;
        let seq = message.seq.clone();

        let delivery = Arc::clone(&self.delivery);
        let handled = self.invoke(message, Box::new(move |result| delivery.send_result(result)));

        if !handled {
            warn!("No handler for {}", uri);
            if !seq.is_empty() {
                self.delivery.send(&seq, &not_found(uri), Data::default());
            }
        }
        handled
    }

    /// Answer an intercepted scheme request
    ///
    /// `respond` is called exactly once, possibly from the loop thread.
    pub fn handle_scheme_request<F>(&self, method: &str, uri: &str, body: Option<Vec<u8>>, respond: F)
    where
        F: FnOnce(SchemeResponse) + Send + 'static,
    {
        if method.eq_ignore_ascii_case("OPTIONS") {
            respond(SchemeResponse::empty(200));
            return;
        }

        let mut message = self.parse(uri);
        if message.name == "data" || message.name == "post" {
            respond(self.serve_payload(&message));
            return;
        }
        message.buffer = body;

        // staging never replies through the handler, so answer it here
        if message.name == BUFFER_MAP {
            self.invoke(message, Box::new(|_| {}));
            respond(SchemeResponse::empty(200));
            return;
        }

        let respond = Arc::new(Mutex::new(Some(respond)));
        let slot = Arc::clone(&respond);
        let handled = self.invoke(
            message,
            Box::new(move |result| {
                if let Some(respond) = slot.lock().take() {
                    respond(response_for(result));
                }
            }),
        );

        if !handled {
            if let Some(respond) = respond.lock().take() {
                respond(SchemeResponse::json(404, not_found(uri)));
            }
        }
    }

    /// Serve `data?id=` / `post?id=` and drop the entry after the grace window
    fn serve_payload(&self, message: &Message) -> SchemeResponse {
        if !message.has("id") {
            let err = json!({ "err": { "message": "Missing 'id' in message" } });
            return SchemeResponse::json(400, err.to_string());
        }

        let Ok(id) = message.get("id").parse::<u64>() else {
            let err = json!({ "err": { "message": "Invalid 'id' given in message" } });
            return SchemeResponse::json(400, err.to_string());
        };

        let Some(data) = self.data.get(id) else {
            let err = IpcError::not_found("No data with specified id").with_id(id);
            return SchemeResponse::json(404, json!({ "err": err.to_json() }).to_string());
        };

        self.stats.lock().payloads_served += 1;
        let store = Arc::clone(&self.data);
        let grace = self.fetch_grace;
        self.event_loop.dispatch(move || {
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                store.remove(id);
            });
        });

        SchemeResponse::payload(data)
    }

    /// Deliver `json` for `seq` with an optional payload
    pub fn send(&self, seq: &Seq, json: &str, post: Data) {
        self.delivery.send(seq, json, post);
    }

    /// Fire a window event on the page
    pub fn emit(&self, name: &str, data: &str) {
        self.delivery.emit(name, data);
    }

    /// Store `post` and return the script that fetches it
    pub fn create_post(&self, seq: &Seq, params: &str, post: Data) -> String {
        self.delivery.create_post(seq, params, post)
    }

    /// Number of staged `buffer.map` bodies not yet consumed
    pub fn staged_buffers(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Drop staged bodies that no request claimed within the payload TTL
    pub fn expire_staged_buffers(&self) -> usize {
        self.expire_staged_buffers_at(Instant::now())
    }

    /// `expire_staged_buffers` against an explicit clock
    pub fn expire_staged_buffers_at(&self, now: Instant) -> usize {
        let ttl = self.buffer_ttl;
        let mut buffers = self.buffers.lock();
        let before = buffers.len();
        buffers.retain(|_, staged| now.saturating_duration_since(staged.staged_at) <= ttl);
        let expired = before - buffers.len();
        drop(buffers);

        if expired > 0 {
            debug!("Expired {} unclaimed staged buffers", expired);
            self.stats.lock().buffers_expired += expired as u64;
        }
        expired
    }

    pub fn get_statistics(&self) -> RouterStats {
        self.stats.lock().clone()
    }
}

fn not_found(uri: &str) -> String {
    json!({
        "err": {
            "message": "Not found",
            "type": "NotFoundError",
            "url": uri,
        }
    })
    .to_string()
}

fn handler_failed(seq: Seq, name: &str) -> IpcResult {
    let mut result = IpcResult::new(seq, name);
    result.err = IpcError::internal(format!("Handler '{}' failed", name)).to_json();
    result
}

/// Run a callback handler, answering with an `InternalError` if it panics
/// before replying
fn run_callback(
    invoke: &CallbackHandler,
    message: Message,
    reply: ReplyCallback,
    stats: &Mutex<RouterStats>,
) {
    let seq = message.seq.clone();
    let name = message.name.clone();
    let slot = Arc::new(Mutex::new(Some(reply)));
    let guarded = Arc::clone(&slot);
    let once: ReplyCallback = Box::new(move |result| {
        let reply = guarded.lock().take();
        if let Some(reply) = reply {
            reply(result);
        }
    });

    if std::panic::catch_unwind(AssertUnwindSafe(|| invoke(message, once))).is_err() {
        error!("Handler {} panicked", name);
        stats.lock().handler_panics += 1;
        let reply = slot.lock().take();
        if let Some(reply) = reply {
            reply(handler_failed(seq, &name));
        }
    }
}

fn response_for(result: IpcResult) -> SchemeResponse {
    match result.post {
        Some(post) if post.has_body() => SchemeResponse::payload(post),
        _ => SchemeResponse::json(200, result.str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ChannelHost;
    use sockrt_core::RuntimeConfig;
    use std::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn create_test_router() -> (Router, UnboundedReceiver<String>) {
        let config = RuntimeConfig::testing();
        let (host, scripts) = ChannelHost::new();
        let data = Arc::new(DataManager::new(config.data.clone(), "ipc"));
        let delivery = Arc::new(Delivery::new(Arc::new(host), Arc::clone(&data)));
        let router = Router::new(
            EventLoop::new(config.event_loop.clone()),
            delivery,
            data,
            config.router,
        );
        (router, scripts)
    }

    fn recv<T>(rx: &mpsc::Receiver<T>) -> T {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_unregistered_name_is_not_handled() {
        let (router, _scripts) = create_test_router();
        let (tx, rx) = mpsc::channel();
        let handled = router.invoke(
            Message::parse("ipc://nope?seq=1"),
            Box::new(move |result| tx.send(result).unwrap()),
        );
        assert!(!handled);
        assert!(rx.try_recv().is_err());
        assert_eq!(router.get_statistics().not_found, 1);
        assert!(!router.event_loop.is_running());
    }

    #[test]
    fn test_sync_handler_runs_on_calling_thread() {
        let (router, _scripts) = create_test_router();
        router.map("ping", false, |message, reply| {
            reply(IpcResult::data(&message, json!(format!("{:?}", std::thread::current().id()))));
        });

        let (tx, rx) = mpsc::channel();
        assert!(router.invoke(
            Message::parse("ipc://ping?seq=1"),
            Box::new(move |result| tx.send(result).unwrap()),
        ));
        let result = recv(&rx);
        assert_eq!(result.data, json!(format!("{:?}", std::thread::current().id())));
    }

    #[test]
    fn test_async_handler_runs_once_on_loop_thread() {
        let (router, _scripts) = create_test_router();
        let reactor = router.event_loop.clone();
        router.map("reactor", true, move |message, reply| {
            reply(IpcResult::data(&message, json!(reactor.is_loop_thread())));
        });

        let (tx, rx) = mpsc::channel();
        router.invoke(
            Message::parse("ipc://reactor?seq=2"),
            Box::new(move |result| tx.send(result).unwrap()),
        );
        assert_eq!(recv(&rx).data, json!(true));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        router.event_loop.stop();
    }

    #[test]
    fn test_task_validation_error_replies_without_loop() {
        let (router, _scripts) = create_test_router();
        router.map_task("fs.open", |_message| Err(IpcError::missing_parameter("path")));

        let (tx, rx) = mpsc::channel();
        router.invoke(
            Message::parse("ipc://fs.open?seq=3&id=1"),
            Box::new(move |result| tx.send(result).unwrap()),
        );
        let result = recv(&rx);
        assert_eq!(result.err["message"], "Expecting 'path' in parameters");
        assert!(!router.event_loop.is_running());
    }

    #[test]
    fn test_task_future_completes_on_loop() {
        let (router, _scripts) = create_test_router();
        let reactor = router.event_loop.clone();
        router.map_task("work", move |message| {
            let message = message.clone();
            let reactor = reactor.clone();
            Ok(async move { IpcResult::data(&message, json!(reactor.is_loop_thread())) }.boxed())
        });

        let (tx, rx) = mpsc::channel();
        router.invoke(
            Message::parse("ipc://work?seq=4"),
            Box::new(move |result| tx.send(result).unwrap()),
        );
        assert_eq!(recv(&rx).data, json!(true));
        router.event_loop.stop();
    }

    #[test]
    fn test_panicking_task_replies_internal_error() {
        let (router, _scripts) = create_test_router();
        router.map_task("boom", |message| {
            let message = message.clone();
            Ok(async move {
                if message.seq.is_correlated() {
                    panic!("boom");
                }
                IpcResult::data(&message, json!(null))
            }
            .boxed())
        });

        let (tx, rx) = mpsc::channel();
        router.invoke(
            Message::parse("ipc://boom?seq=5"),
            Box::new(move |result| tx.send(result).unwrap()),
        );
        assert_eq!(recv(&rx).err["type"], "InternalError");
        router.event_loop.stop();
    }

    #[test]
    fn test_panicking_async_callback_replies_internal_error() {
        let (router, _scripts) = create_test_router();
        router.map("boom", true, |message, _reply| {
            if message.seq.is_correlated() {
                panic!("boom");
            }
        });

        let (tx, rx) = mpsc::channel();
        router.invoke(
            Message::parse("ipc://boom?seq=5"),
            Box::new(move |result| tx.send(result).unwrap()),
        );
        let result = recv(&rx);
        assert_eq!(result.seq.as_str(), "5");
        assert_eq!(result.source, "boom");
        assert_eq!(result.err["type"], "InternalError");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(router.get_statistics().handler_panics, 1);
        router.event_loop.stop();
    }

    #[test]
    fn test_callback_panicking_after_reply_replies_once() {
        let (router, _scripts) = create_test_router();
        router.map("late", false, |message, reply| {
            reply(IpcResult::data(&message, json!("done")));
            if message.seq.is_correlated() {
                panic!("after reply");
            }
        });

        let (tx, rx) = mpsc::channel();
        assert!(router.invoke(
            Message::parse("ipc://late?seq=6"),
            Box::new(move |result| tx.send(result).unwrap()),
        ));
        assert_eq!(recv(&rx).data, json!("done"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remap_overwrites_and_unmap_removes() {
        let (router, _scripts) = create_test_router();
        router.map("x", false, |message, reply| reply(IpcResult::data(&message, json!(1))));
        router.map("x", false, |message, reply| reply(IpcResult::data(&message, json!(2))));

        let (tx, rx) = mpsc::channel();
        router.invoke(Message::parse("ipc://x?seq=1"), Box::new(move |r| tx.send(r).unwrap()));
        assert_eq!(recv(&rx).data, json!(2));

        assert!(router.unmap("x"));
        assert!(!router.unmap("x"));
        assert!(!router.has("x"));
        assert!(router.has(BUFFER_MAP));
    }

    #[test]
    fn test_staged_buffer_is_spliced_once() {
        let (router, _scripts) = create_test_router();
        router.map("fs.write", false, |message, reply| {
            reply(IpcResult::data(&message, json!(message.buffer.clone())));
        });

        router.invoke(
            Message::with_buffer("ipc://buffer.map?seq=5&index=0", vec![1, 2, 3]),
            Box::new(|_| panic!("buffer.map must not reply")),
        );
        assert_eq!(router.staged_buffers(), 1);

        let (tx, rx) = mpsc::channel();
        let reply_tx = tx.clone();
        router.invoke(
            Message::parse("ipc://fs.write?seq=5&index=0"),
            Box::new(move |r| reply_tx.send(r).unwrap()),
        );
        assert_eq!(recv(&rx).data, json!([1, 2, 3]));
        assert_eq!(router.staged_buffers(), 0);

        router.invoke(
            Message::parse("ipc://fs.write?seq=5&index=0"),
            Box::new(move |r| tx.send(r).unwrap()),
        );
        assert_eq!(recv(&rx).data, json!(null));
    }

    #[test]
    fn test_staged_buffer_keyed_by_index_and_seq() {
        let (router, _scripts) = create_test_router();
        router.map("fs.write", false, |message, reply| {
            reply(IpcResult::data(&message, json!(message.buffer.is_some())));
        });
        router.invoke(
            Message::with_buffer("ipc://buffer.map?seq=5&index=1", vec![9]),
            Box::new(|_| {}),
        );

        let (tx, rx) = mpsc::channel();
        router.invoke(
            Message::parse("ipc://fs.write?seq=5&index=0"),
            Box::new(move |r| tx.send(r).unwrap()),
        );
        assert_eq!(recv(&rx).data, json!(false));
        assert_eq!(router.staged_buffers(), 1);
    }

    #[test]
    fn test_staged_buffer_not_claimed_by_colliding_pair() {
        let (router, _scripts) = create_test_router();
        router.map("fs.write", false, |message, reply| {
            reply(IpcResult::data(&message, json!(message.buffer.clone())));
        });
        router.invoke(
            Message::with_buffer("ipc://buffer.map?seq=23&index=1", vec![9, 9]),
            Box::new(|_| {}),
        );

        let (tx, rx) = mpsc::channel();
        let reply_tx = tx.clone();
        router.invoke(
            Message::parse("ipc://fs.write?seq=3&index=12"),
            Box::new(move |r| reply_tx.send(r).unwrap()),
        );
        assert_eq!(recv(&rx).data, json!(null));
        assert_eq!(router.staged_buffers(), 1);

        router.invoke(
            Message::parse("ipc://fs.write?seq=23&index=1"),
            Box::new(move |r| tx.send(r).unwrap()),
        );
        assert_eq!(recv(&rx).data, json!([9, 9]));
    }

    #[test]
    fn test_unclaimed_staged_buffers_expire() {
        let (router, _scripts) = create_test_router();
        router.invoke(
            Message::with_buffer("ipc://buffer.map?seq=1&index=0", vec![1]),
            Box::new(|_| {}),
        );
        assert_eq!(router.expire_staged_buffers(), 0);
        assert_eq!(router.staged_buffers(), 1);

        let later = Instant::now() + router.buffer_ttl + Duration::from_millis(1);
        assert_eq!(router.expire_staged_buffers_at(later), 1);
        assert_eq!(router.staged_buffers(), 0);
        assert_eq!(router.get_statistics().buffers_expired, 1);
    }

    #[test]
    fn test_scheme_buffer_map_responds_and_stages() {
        let (router, _scripts) = create_test_router();
        let (tx, rx) = mpsc::channel();
        router.handle_scheme_request(
            "POST",
            "ipc://buffer.map?seq=2&index=0",
            Some(vec![4, 2]),
            move |r| tx.send(r).unwrap(),
        );

        let response = recv(&rx);
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
        assert_eq!(router.staged_buffers(), 1);
    }

    #[test]
    fn test_handle_message_unknown_name_sends_not_found() {
        let (router, mut scripts) = create_test_router();
        assert!(!router.handle_message("ipc://missing?seq=9", None));

        let script = scripts.try_recv().unwrap();
        assert!(script.contains("const seq = String('9');"));
        assert!(script.contains("NotFoundError"));
    }

    #[test]
    fn test_handle_message_malformed_without_seq_is_silent() {
        let (router, mut scripts) = create_test_router();
        assert!(!router.handle_message("fs.open?seq=1", None));
        assert!(scripts.try_recv().is_err());
    }

    #[test]
    fn test_scheme_options_and_unknown() {
        let (router, _scripts) = create_test_router();
        let (tx, rx) = mpsc::channel();
        let options_tx = tx.clone();
        router.handle_scheme_request("OPTIONS", "ipc://anything", None, move |r| {
            options_tx.send(r).unwrap()
        });
        let response = recv(&rx);
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("access-control-allow-origin"), Some("*"));

        router.handle_scheme_request("GET", "ipc://missing?seq=1", None, move |r| {
            tx.send(r).unwrap()
        });
        let response = recv(&rx);
        assert_eq!(response.status, 404);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["err"]["url"], "ipc://missing?seq=1");
    }

    #[test]
    fn test_scheme_data_fetch_validates_id() {
        let (router, _scripts) = create_test_router();
        let (tx, rx) = mpsc::channel();

        for uri in ["ipc://data", "ipc://data?id=abc", "ipc://post?id=77"] {
            let tx = tx.clone();
            router.handle_scheme_request("GET", uri, None, move |r| tx.send(r).unwrap());
        }

        let missing = recv(&rx);
        assert_eq!(missing.status, 400);
        assert!(missing.text().contains("Missing 'id' in message"));

        let invalid = recv(&rx);
        assert_eq!(invalid.status, 400);
        assert!(invalid.text().contains("Invalid 'id' given in message"));

        let unknown = recv(&rx);
        assert_eq!(unknown.status, 404);
        assert!(unknown.text().contains("NotFoundError"));
    }

    #[test]
    fn test_scheme_data_fetch_serves_then_removes() {
        let (router, _scripts) = create_test_router();
        router.data.put(42, Data::octet_stream(vec![7, 8, 9]));

        let (tx, rx) = mpsc::channel();
        router.handle_scheme_request("GET", "ipc://post?id=42", None, move |r| {
            tx.send(r).unwrap()
        });
        let response = recv(&rx);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, vec![7, 8, 9]);
        assert_eq!(response.headers.get("content-length"), Some("3"));
        assert_eq!(response.headers.get("content-type"), Some("application/octet-stream"));
        assert_eq!(response.headers.get("access-control-allow-origin"), Some("*"));
        assert!(router.data.has(42));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while router.data.has(42) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!router.data.has(42));
        router.event_loop.stop();
    }

    #[test]
    fn test_scheme_request_invokes_handler() {
        let (router, _scripts) = create_test_router();
        router.map("ping", false, |message, reply| {
            reply(IpcResult::data(&message, json!("pong")))
        });

        let (tx, rx) = mpsc::channel();
        router.handle_scheme_request("GET", "ipc://ping?seq=1", None, move |r| {
            tx.send(r).unwrap()
        });
        let response = recv(&rx);
        assert_eq!(response.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, json!({ "source": "ping", "data": "pong" }));
    }
}

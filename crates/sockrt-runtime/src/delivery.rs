//! Reply delivery into the web view
//!
//! Every reply ends up as a script evaluated on the main thread. `Delivery`
//! picks the script: a payload fetch for binary or uncorrelated replies, a
//! promise resolution for correlated ones, and a plain event otherwise.

use crate::host::WebViewHost;
use crate::managers::DataManager;
use sockrt_core::{encode_uri_component, script, Data, IpcResult, Seq};
use std::sync::Arc;
use tracing::trace;

/// Route under which reply payloads are fetched
pub const POST_ROUTE: &str = "post";

/// Sends replies and events to the page through the host
pub struct Delivery {
    host: Arc<dyn WebViewHost>,
    data: Arc<DataManager>,
}

impl Delivery {
    pub fn new(host: Arc<dyn WebViewHost>, data: Arc<DataManager>) -> Self {
        Self { host, data }
    }

    /// Evaluate `script` in the web view on the main thread
    pub fn evaluate(&self, script: String) {
        let host = Arc::clone(&self.host);
        self.host
            .dispatch(Box::new(move || host.evaluate_javascript(&script)));
    }

    /// Deliver the reply `json` for `seq`, with an optional binary payload
    pub fn send(&self, seq: &Seq, json: &str, post: Data) {
        if post.has_body() || seq.is_broadcast() {
            let script = self.create_post(seq, json, post);
            self.evaluate(script);
            return;
        }

        if seq.is_correlated() {
            trace!("Resolving seq {}", seq);
            let value = encode_uri_component(json);
            self.evaluate(script::resolve_to_render_process(seq, "0", &value));
            return;
        }

        if json.is_empty() {
            return;
        }

        // uncorrelated JSON surfaces as a `data` event; anything else is a script
        if serde_json::from_str::<serde_json::Value>(json).is_ok() {
            self.evaluate(script::emit_to_render_process(
                "data",
                &encode_uri_component(json),
            ));
        } else {
            self.evaluate(json.to_string());
        }
    }

    /// Deliver `result`, routing any payload it carries
    pub fn send_result(&self, result: IpcResult) {
        let json = result.str();
        let post = result.post.unwrap_or_default();
        self.send(&result.seq, &json, post);
    }

    /// Fire a window `CustomEvent` named `name`, independent of any promise
    pub fn emit(&self, name: &str, data: &str) {
        self.evaluate(script::emit_to_render_process(
            name,
            &encode_uri_component(data),
        ));
    }

    /// Store `post` and return the script that fetches it
    pub fn create_post(&self, seq: &Seq, params: &str, post: Data) -> String {
        self.data.create_for_route(POST_ROUTE, seq, params, post)
    }
}

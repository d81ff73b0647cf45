//! Integration tests for the runtime
//!
//! Requests go in through `Runtime::handle_message` or the scheme entry
//! point, and replies are read back from the scripts the host evaluates.

use serde_json::Value;
use sockrt_core::{decode_uri_component, encode_uri_component, Data, ResourceId, RuntimeConfig};
use sockrt_runtime::{ChannelHost, Runtime, RuntimeBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration};

fn create_test_runtime() -> (Runtime, UnboundedReceiver<String>) {
    let (host, scripts) = ChannelHost::new();
    let runtime = RuntimeBuilder::new()
        .with_config(RuntimeConfig::testing())
        .with_host(Arc::new(host))
        .build_and_start()
        .expect("Failed to start runtime");
    (runtime, scripts)
}

fn create_test_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "sockrt-it-{}-{}-{}",
        name,
        std::process::id(),
        ResourceId::random()
    ))
}

async fn next_script(scripts: &mut UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(2), scripts.recv())
        .await
        .expect("Timed out waiting for a script")
        .expect("Script channel closed")
}

/// Decoded reply embedded in a promise resolution script
fn resolved_value(script: &str) -> Value {
    let start = script.find("const value = '").expect("Not a resolve script") + 15;
    let end = start + script[start..].find("';").expect("Unterminated value");
    let raw = script[start..end].replace("\\'", "'");
    serde_json::from_str(&decode_uri_component(&raw)).expect("Reply is not JSON")
}

#[tokio::test]
async fn test_fs_open_resolves_promise() {
    let (runtime, mut scripts) = create_test_runtime();
    let path = create_test_path("open");
    std::fs::write(&path, b"hello").unwrap();

    let uri = format!(
        "ipc://fs.open?seq=7&id=1&path={}&flags=0&mode=438",
        encode_uri_component(&path.to_string_lossy())
    );
    assert!(runtime.handle_message(&uri, None));

    let script = next_script(&mut scripts).await;
    assert!(script.contains("const seq = String('7');"));
    let reply = resolved_value(&script);
    assert_eq!(reply["source"], "fs.open");
    assert_eq!(reply["data"]["id"], "1");
    assert!(reply["data"]["fd"].is_number());
    assert!(runtime.descriptors().has(ResourceId::new(1)));

    runtime.shutdown();
    assert!(!runtime.descriptors().has(ResourceId::new(1)));
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_fs_read_delivers_payload_fetch() {
    let (runtime, mut scripts) = create_test_runtime();
    let path = create_test_path("read");
    std::fs::write(&path, b"payload").unwrap();

    let open = format!(
        "ipc://fs.open?seq=1&id=2&path={}",
        encode_uri_component(&path.to_string_lossy())
    );
    runtime.handle_message(&open, None);
    next_script(&mut scripts).await;

    runtime.handle_message("ipc://fs.read?seq=2&id=2&size=64&offset=0", None);
    let script = next_script(&mut scripts).await;
    assert!(script.contains("ipc://post?id="));
    assert_eq!(runtime.data().len(), 1);

    let start = script.find("ipc://post?id=").unwrap();
    let end = start + script[start..].find('\'').unwrap();
    let fetch = script[start..end].to_string();

    let (tx, rx) = tokio::sync::oneshot::channel();
    runtime.handle_scheme_request("GET", &fetch, None, move |response| {
        let _ = tx.send(response);
    });
    let response = timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"payload".to_vec());

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_udp_bind_twice_reports_already_bound() {
    let (runtime, mut scripts) = create_test_runtime();

    runtime.handle_message("ipc://udp.bind?seq=3&id=5&address=127.0.0.1&port=0", None);
    let first = resolved_value(&next_script(&mut scripts).await);
    assert_eq!(first["source"], "udp.bind");
    assert!(first["data"]["port"].as_u64().unwrap() > 0);

    runtime.handle_message("ipc://udp.bind?seq=4&id=5&address=127.0.0.1&port=0", None);
    let second = resolved_value(&next_script(&mut scripts).await);
    assert_eq!(second["err"]["code"], "ERR_SOCKET_ALREADY_BOUND");
}

#[tokio::test]
async fn test_unknown_close_is_not_found() {
    let (runtime, mut scripts) = create_test_runtime();
    runtime.handle_message("ipc://fs.close?seq=9&id=404", None);

    let reply = resolved_value(&next_script(&mut scripts).await);
    assert_eq!(reply["err"]["type"], "NotFoundError");
    assert_eq!(runtime.descriptors().get_statistics().closed, 0);
}

#[tokio::test]
async fn test_unregistered_name_is_not_handled() {
    let (runtime, mut scripts) = create_test_runtime();
    assert!(!runtime.handle_message("ipc://nothing.here?seq=11", None));

    let reply = resolved_value(&next_script(&mut scripts).await);
    assert_eq!(reply["err"]["type"], "NotFoundError");
    assert_eq!(reply["err"]["url"], "ipc://nothing.here?seq=11");
}

#[cfg(unix)]
#[tokio::test]
async fn test_buffer_map_feeds_next_write() {
    let (runtime, mut scripts) = create_test_runtime();
    let path = create_test_path("write");

    let open = format!(
        "ipc://fs.open?seq=1&index=0&id=3&path={}&flags={}&mode=420",
        encode_uri_component(&path.to_string_lossy()),
        libc::O_CREAT | libc::O_WRONLY
    );
    runtime.handle_message(&open, None);
    let opened = resolved_value(&next_script(&mut scripts).await);
    assert!(opened["err"].is_null(), "{}", opened);

    runtime.handle_message("ipc://buffer.map?seq=2&index=0", Some(b"staged".to_vec()));
    runtime.handle_message("ipc://fs.write?seq=2&index=0&id=3&offset=0", None);
    let written = resolved_value(&next_script(&mut scripts).await);
    assert_eq!(written["data"]["result"], 6);
    assert_eq!(runtime.router().staged_buffers(), 0);

    runtime.handle_message("ipc://fs.close?seq=3&id=3", None);
    next_script(&mut scripts).await;
    assert_eq!(std::fs::read(&path).unwrap(), b"staged".to_vec());
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_navigation_leaves_retained_descriptors_open() {
    let (runtime, mut scripts) = create_test_runtime();
    let path = create_test_path("gc");
    std::fs::write(&path, b"x").unwrap();
    let encoded = encode_uri_component(&path.to_string_lossy());

    for id in [10, 11] {
        runtime.handle_message(&format!("ipc://fs.open?seq={}&id={}&path={}", id, id, encoded), None);
        next_script(&mut scripts).await;
    }
    runtime.handle_message("ipc://fs.retainOpenDescriptor?seq=12&id=11", None);
    next_script(&mut scripts).await;

    runtime.handle_message("ipc://platform.event?seq=13&value=domcontentloaded", None);
    next_script(&mut scripts).await;

    let descriptors = Arc::clone(runtime.descriptors());
    timeout(Duration::from_secs(2), async {
        while descriptors.has(ResourceId::new(10)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Stale descriptor was never collected");
    assert!(descriptors.has(ResourceId::new(11)));
    assert_eq!(descriptors.get_statistics().collected, 1);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_scheme_fetch_of_stored_payload() {
    let (runtime, _scripts) = create_test_runtime();
    runtime.data().put(77, Data::octet_stream(vec![4, 5, 6]));

    let (tx, rx) = tokio::sync::oneshot::channel();
    runtime.handle_scheme_request("GET", "ipc://data?id=77", None, move |response| {
        let _ = tx.send(response);
    });
    let response = tokio_test::block_on(rx).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, vec![4, 5, 6]);
    assert_eq!(response.headers.get("access-control-allow-origin"), Some("*"));
}

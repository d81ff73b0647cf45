//! JavaScript snippets evaluated in the web view
//!
//! Every reply crosses back into the page as a self-invoking script. These
//! builders produce the resolve, emit and payload-fetch snippets.

use crate::data::Headers;
use crate::types::Seq;

/// Wrap `source` in an isolated, named script
pub fn create_javascript(name: &str, source: &str) -> String {
    format!(
        ";(() => {{\n{}\n}})();\n//# sourceURL={}\n",
        source.trim(),
        name
    )
}

/// Escape text embedded in a template literal
fn escape_template(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${")
}

/// Escape text embedded in a single quoted string literal
fn escape_single(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Script dispatching a `CustomEvent` named `event` on `window`
///
/// `value` is expected to be URI-encoded; the page decodes and JSON-parses it.
pub fn emit_to_render_process(event: &str, value: &str) -> String {
    create_javascript(
        "emit-to-render-process.js",
        &format!(
            r#"
const name = decodeURIComponent(`{event}`);
const value = `{value}`;
const target = window;
let detail = value;

if (typeof value === 'string') {{
  try {{
    detail = decodeURIComponent(value);
    detail = JSON.parse(detail);
  }} catch (err) {{
    if (!detail) {{
      console.error(`${{err.message}} (${{value}})`);
      return;
    }}
  }}
}}

const event = new window.CustomEvent(name, {{ detail }});
target.dispatchEvent(event);
"#,
            event = escape_template(event),
            value = escape_template(value),
        ),
    )
}

/// Script resolving the pending promise registered for `seq`
///
/// `value` is expected to be URI-encoded JSON.
pub fn resolve_to_render_process(seq: &Seq, state: &str, value: &str) -> String {
    create_javascript(
        "resolve-to-render-process.js",
        &format!(
            r#"
const seq = String('{seq}');
const value = '{value}';
const index = window.__args.index;
const state = Number('{state}');
const eventName = `resolve-${{index}}-${{seq}}`;
let detail = value;

if (typeof value === 'string') {{
  try {{
    detail = decodeURIComponent(value);
    detail = JSON.parse(detail);
  }} catch (err) {{
    if (!detail) {{
      console.error(`${{err.message}} (${{value}})`);
      return;
    }}
  }}
}}

if (detail?.err) {{
  let err = detail?.err ?? detail;
  if (typeof err === 'string') {{
    err = new Error(err);
  }}

  detail = {{ err }};
}} else if (detail?.data) {{
  detail = {{ ...detail }};
}} else {{
  detail = {{ data: detail }};
}}

if (window._ipc && window._ipc['R' + seq]) {{
  const pending = window._ipc['R' + seq];
  delete window._ipc['R' + seq];
  if (detail.err) pending.reject(detail.err);
  else pending.resolve(detail.data);
}}

const event = new CustomEvent(eventName, {{ detail }});
window.dispatchEvent(event);
"#,
            seq = escape_single(seq.as_str()),
            value = escape_single(value),
            state = escape_single(state),
        ),
    )
}

/// Script fetching a stored payload from `<scheme>://<route>?id=<id>`
///
/// On load it dispatches a `data` event carrying the bytes, the payload id,
/// the stored headers and the reply JSON in `params`.
pub fn fetch_payload(
    scheme: &str,
    route: &str,
    seq: &Seq,
    params: &str,
    id: u64,
    headers: &Headers,
) -> String {
    create_javascript(
        "post-data.js",
        &format!(
            r#"
const xhr = new XMLHttpRequest();
xhr.responseType = 'arraybuffer';
xhr.onload = e => {{
  let params = `{params}`;

  try {{
    params = JSON.parse(params);
    params.seq = `{seq}`;
  }} catch (err) {{
    console.error(err.stack || err, params);
  }}

  const headers = `{headers}`
    .trim()
    .split(/[\r\n]+/)
    .filter(Boolean);

  const detail = {{
    data: xhr.response,
    sid: '{id}',
    headers: Object.fromEntries(
      headers.map(l => l.split(/\s*:\s*/))
    ),
    params: params
  }};

  queueMicrotask(() => {{
    const event = new window.CustomEvent('data', {{ detail }});
    window.dispatchEvent(event);
  }});
}};

xhr.open('GET', '{scheme}://{route}?id={id}');
xhr.send();
"#,
            params = escape_template(params),
            seq = escape_template(seq.as_str()),
            headers = escape_template(&headers.to_string()),
            id = id,
            scheme = scheme,
            route = route,
        ),
    )
}

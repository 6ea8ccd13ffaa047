use serde_json::Value;
use tracing::debug;

use crate::models::{StreamResult, StreamSource};

/// Convert the raw value returned by a module's stream extraction into the
/// canonical [`StreamResult`].
///
/// Modules historically return one of four shapes: a bare URL string, an
/// array of URL strings, an array of `{url, headers, ...}` sources, or an
/// envelope object with `streams`/`stream` and `subtitles` keys. The decode
/// happens exactly once here; downstream never special-cases module output
/// again. A value matching none of the shapes yields an empty result, not an
/// error.
pub fn normalize_stream_result(raw: &Value) -> StreamResult {
    match raw {
        Value::String(s) => {
            // A JSON-encoded payload hides behind a string often enough that
            // parsing is tried first; anything else is a bare stream URL.
            match serde_json::from_str::<Value>(s) {
                Ok(parsed) => normalize_stream_result(&parsed),
                Err(_) if !s.trim().is_empty() => StreamResult {
                    streams: Some(vec![s.clone()]),
                    ..Default::default()
                },
                Err(_) => StreamResult::empty(),
            }
        }
        Value::Array(items) => normalize_stream_array(items),
        Value::Object(map) => {
            let mut out = StreamResult::empty();

            // Plural key wins over the singular legacy one.
            match map.get("streams").or_else(|| map.get("stream")) {
                Some(Value::Array(items)) => {
                    let inner = normalize_stream_array(items);
                    out.streams = inner.streams;
                    out.sources = inner.sources;
                }
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    out.streams = Some(vec![s.clone()]);
                }
                _ => {}
            }

            match map.get("subtitles") {
                Some(Value::Array(items)) => {
                    let subs = string_list(items);
                    if !subs.is_empty() {
                        out.subtitles = Some(subs);
                    }
                }
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    out.subtitles = Some(vec![s.clone()]);
                }
                _ => {}
            }

            out
        }
        other => {
            debug!(kind = value_kind(other), "unusable stream result shape");
            StreamResult::empty()
        }
    }
}

/// Arrays carry either plain URL strings or `{url, ...}` source objects; the
/// first element decides which. Source objects carry per-stream headers and
/// quality labels and take priority in the result.
fn normalize_stream_array(items: &[Value]) -> StreamResult {
    let headed = items
        .first()
        .map(|v| v.is_object() && v.get("url").is_some())
        .unwrap_or(false);

    if headed {
        let sources: Vec<StreamSource> = items
            .iter()
            .filter_map(|v| serde_json::from_value::<StreamSource>(v.clone()).ok())
            .filter(|s| !s.url.trim().is_empty())
            .collect();
        if sources.is_empty() {
            return StreamResult::empty();
        }
        return StreamResult {
            sources: Some(sources),
            ..Default::default()
        };
    }

    let urls = string_list(items);
    if urls.is_empty() {
        return StreamResult::empty();
    }
    StreamResult {
        streams: Some(urls),
        ..Default::default()
    }
}

fn string_list(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

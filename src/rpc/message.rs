//! JSON-RPC v1 frame codec.
//!
//! A [`Frame`] is one complete wire message: a request, a response, or a
//! notification. [`encode_frame`] writes exactly one JSON object followed
//! by `\n`, with no HTML escaping (the `serde_json` default) and the exact
//! field presence rules below. [`decode_frame`] classifies one already-read
//! line and disallows unknown fields.
//!
//! Wire shapes:
//!
//! - Request: `{"id":<id>,"method":<method>,"params":<params>}`
//! - Notification: the same shape with `id` forced to `null`.
//! - Response (error): `{"id":<id>,"error":<error>}` — no `result` field.
//! - Response (result, including when there is no error):
//!   `{"id":<id>,"result":<result>,"error":null}`.
//!
//! Classification of a decoded object, in order: `method` present and
//! non-empty with `id` present and non-null is a Request; `method` present
//! and non-empty with `id` absent or null is a Notification; otherwise an
//! `error` field present and non-null makes it a Response in error form;
//! anything else is a Response in result form (`result` may be null).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One complete JSON-RPC v1 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request { id: Value, method: String, params: Value },
    Notification { method: String, params: Value },
    Response { id: Value, outcome: ResponseOutcome },
}

/// The payload of a [`Frame::Response`]: exactly one of a result or an
/// error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Value),
    Error(Value),
}

#[derive(Serialize)]
struct WireRequestShape<'a> {
    id: &'a Value,
    method: &'a str,
    params: &'a Value,
}

#[derive(Serialize)]
struct WireResponseError<'a> {
    id: &'a Value,
    error: &'a Value,
}

#[derive(Serialize)]
struct WireResponseResult<'a> {
    id: &'a Value,
    result: &'a Value,
    error: &'a Value,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct WireMessage {
    id: Value,
    method: Value,
    params: Value,
    result: Value,
    error: Value,
}

/// Encodes `frame` as a single JSON object followed by `\n`.
pub fn encode_frame(frame: &Frame) -> serde_json::Result<Vec<u8>> {
    let mut buf = match frame {
        Frame::Request { id, method, params } => {
            serde_json::to_vec(&WireRequestShape { id, method, params })?
        }
        Frame::Notification { method, params } => {
            serde_json::to_vec(&WireRequestShape { id: &Value::Null, method, params })?
        }
        Frame::Response { id, outcome: ResponseOutcome::Error(error) } => {
            serde_json::to_vec(&WireResponseError { id, error })?
        }
        Frame::Response { id, outcome: ResponseOutcome::Result(result) } => {
            serde_json::to_vec(&WireResponseResult { id, result, error: &Value::Null })?
        }
    };
    buf.push(b'\n');
    Ok(buf)
}

/// Decodes one JSON object (without its trailing newline, though a
/// trailing newline is tolerated since `serde_json` ignores trailing
/// whitespace) into a [`Frame`].
pub fn decode_frame(line: &str) -> serde_json::Result<Frame> {
    let raw: WireMessage = serde_json::from_str(line.trim_end_matches(['\n', '\r']))?;

    let method = raw.method.as_str().unwrap_or("");
    if !method.is_empty() {
        if !raw.id.is_null() {
            return Ok(Frame::Request { id: raw.id, method: method.to_string(), params: raw.params });
        }
        return Ok(Frame::Notification { method: method.to_string(), params: raw.params });
    }

    if !raw.error.is_null() {
        return Ok(Frame::Response { id: raw.id, outcome: ResponseOutcome::Error(raw.error) });
    }
    Ok(Frame::Response { id: raw.id, outcome: ResponseOutcome::Result(raw.result) })
}

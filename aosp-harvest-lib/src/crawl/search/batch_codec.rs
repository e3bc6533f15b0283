//! The multipart "batch" envelope spoken by Google's JS API clients.
//!
//! A search is not a plain JSON POST: the JSON request is wrapped as an
//! embedded HTTP request inside a `multipart/mixed` body, and the answer comes
//! back wrapped the same way. Only single-request batches are produced here.

use crate::Result;
use ohno::{IntoAppError, app_err, bail};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Path and query of the embedded search call.
pub const SEARCH_CALL: &str = "/v1/contents/search?alt=json";

const TOKEN_MODULUS: u128 = 1_000_000_000_000_000_000;

/// A fresh boundary token, `batch` followed by a random number below 10^18.
///
/// Every request gets its own boundary so it cannot collide with text in the JSON payload.
#[must_use]
pub fn new_boundary() -> String {
    format!("batch{}", Uuid::new_v4().as_u128() % TOKEN_MODULUS)
}

/// Wrap a JSON request body into a single-part batch envelope.
#[must_use]
pub fn encode_request(boundary: &str, api_key: &str, json_body: &str) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Type: application/http\r\n\
         Content-ID: <{boundary}+gapiRequest@googleapis.com>\r\n\
         \r\n\
         POST {SEARCH_CALL}&key={api_key}\r\n\
         Content-Type: application/json\r\n\
         \r\n\
         {json_body}\r\n\
         --{boundary}--"
    )
}

/// Whether an embedded status line reports HTTP 200.
fn is_success_status(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    matches!((parts.next(), parts.next()), (Some(version), Some("200")) if version.starts_with("HTTP/"))
}

/// The pieces of an envelope the decoder cares about.
#[derive(Debug, Default)]
struct Envelope<'a> {
    succeeded: bool,
    saw_boundary: bool,
    body: Vec<&'a str>,
}

/// Walk the envelope line by line.
///
/// The first non-empty `--` line is the opening boundary. Blank lines separate
/// parts: part 1 holds the embedded status line and headers, and part 2 holds
/// the JSON body, which runs until the closing boundary.
fn split_envelope(text: &str) -> Envelope<'_> {
    let mut envelope = Envelope::default();
    let mut closing: Option<String> = None;
    let mut part = 0usize;

    for line in text.lines().map(str::trim) {
        let Some(end) = closing.as_deref() else {
            if line.starts_with("--") {
                closing = Some(format!("{line}--"));
                envelope.saw_boundary = true;
            }
            continue;
        };

        if line == end {
            break;
        } else if line.is_empty() {
            part += 1;
        } else if part == 1 && is_success_status(line) {
            envelope.succeeded = true;
        } else if part == 2 {
            envelope.body.push(line);
        }
    }

    envelope
}

/// Unwrap a single-part batch response and decode its JSON payload.
///
/// A non-200 embedded status fails with the decoded body as detail.
pub fn decode_response<T: DeserializeOwned>(text: &str) -> Result<T> {
    let envelope = split_envelope(text);
    if !envelope.saw_boundary {
        bail!("malformed batch response: no multipart boundary found");
    }

    let body = envelope.body.join("\n");

    if !envelope.succeeded {
        let detail = serde_json::from_str::<serde_json::Value>(&body).map_or_else(|_| body.clone(), |value| value.to_string());
        return Err(app_err!("search request failed: {detail}"));
    }

    serde_json::from_str(&body).into_app_err("decoding search response payload")
}

use core::time::Duration;
use reqwest::StatusCode;

/// Classified result of a single remote fetch.
///
/// Transport failures are reported separately as errors; this type covers
/// every case where the remote answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    /// The document was retrieved.
    Found(T),

    /// The remote says the document does not exist.
    Absent,

    /// The remote asked us to slow down; the request may be repeated.
    Retryable {
        /// How long the remote asked us to wait, when it said.
        retry_after: Option<Duration>,
    },

    /// Any other non-success status. Repeating the request will not help.
    Fatal(StatusCode),
}

/// Classify a non-success status code.
///
/// 404 is absence, 429 is retryable, and anything else is fatal.
#[must_use]
pub fn classify_status<T>(status: StatusCode, retry_after: Option<Duration>) -> FetchOutcome<T> {
    match status {
        StatusCode::NOT_FOUND => FetchOutcome::Absent,
        StatusCode::TOO_MANY_REQUESTS => FetchOutcome::Retryable { retry_after },
        other => FetchOutcome::Fatal(other),
    }
}

/// Parse a `Retry-After` header given in whole seconds.
#[must_use]
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

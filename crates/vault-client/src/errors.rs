use serde_json::Value;

/// Broad category of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorKind {
    /// No response was received (DNS, connect, reset, timeout). Status is `0`.
    Transport,
    /// The server answered with a non-success status.
    Http,
    /// The caller aborted the request before it finished. Status is `0`.
    Aborted,
    /// A body could not be encoded or decoded. Status is the response
    /// status, or `0` when the request body failed to serialize and nothing
    /// was sent.
    Protocol,
}

/// The single error type returned by the transport client and carried by
/// `StreamEvent::Error`.
///
/// `status_code` is `0` for failures where no HTTP response was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{message}")]
pub struct ClientError {
    /// Human-readable message, suitable for showing in the UI.
    pub message: String,
    /// HTTP status code, or `0` when the request never got a response.
    pub status_code: u16,
    /// Detail string extracted from the error body, when one was present.
    pub detail: Option<String>,
    /// Failure category.
    pub kind: ClientErrorKind,
}

impl ClientError {
    /// Creates a transport-level error (status `0`).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: 0,
            detail: None,
            kind: ClientErrorKind::Transport,
        }
    }

    /// Creates an HTTP failure for `status`, using `detail` as the message when
    /// present.
    pub fn http(status_code: u16, detail: Option<String>) -> Self {
        let message = detail
            .clone()
            .unwrap_or_else(|| format!("Request failed with status {status_code}"));
        Self {
            message,
            status_code,
            detail,
            kind: ClientErrorKind::Http,
        }
    }

    /// Creates the error returned when the caller aborts a request.
    pub fn aborted() -> Self {
        Self {
            message: "request aborted".into(),
            status_code: 0,
            detail: None,
            kind: ClientErrorKind::Aborted,
        }
    }

    /// Creates an error for a successful response whose body was unusable.
    pub fn protocol(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code,
            detail: None,
            kind: ClientErrorKind::Protocol,
        }
    }

    /// Creates the error for a request body that could not be serialized.
    ///
    /// Status is `0` because nothing was sent; the kind is `Protocol`, so it
    /// is never mistaken for a network failure.
    pub fn serialization(err: &serde_json::Error) -> Self {
        Self::protocol(0, format!("failed to serialize request body: {err}"))
    }

    /// Classifies an error body returned with a non-success status.
    ///
    /// The body does not need to be valid JSON; an unparseable body simply
    /// produces the generic message.
    pub fn from_error_body(status_code: u16, body: &[u8]) -> Self {
        let detail = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|value| extract_detail(&value));
        Self::http(status_code, detail)
    }

    /// Returns `true` when this error was caused by the caller aborting.
    pub fn is_aborted(&self) -> bool {
        self.kind == ClientErrorKind::Aborted
    }

    /// Returns `true` when the failure happened before any response arrived.
    pub fn is_transport(&self) -> bool {
        self.kind == ClientErrorKind::Transport
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::transport(format!("request timed out: {err}"));
        }
        if err.is_connect() {
            return Self::transport(format!("connection failed: {err}"));
        }
        Self::transport(format!("network error: {err}"))
    }
}

type DetailExtractor = fn(&Value) -> Option<String>;

/// Known error-body shapes, tried in order.
const DETAIL_EXTRACTORS: &[DetailExtractor] = &[top_level_detail, nested_error_message];

fn top_level_detail(value: &Value) -> Option<String> {
    value.get("detail")?.as_str().map(ToOwned::to_owned)
}

fn nested_error_message(value: &Value) -> Option<String> {
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(ToOwned::to_owned)
}

pub(crate) fn extract_detail(value: &Value) -> Option<String> {
    DETAIL_EXTRACTORS
        .iter()
        .find_map(|extract| extract(value))
        .filter(|detail| !detail.trim().is_empty())
}

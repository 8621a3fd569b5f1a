use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt as _;
use reqwest::header::{ACCEPT, AsHeaderName, CONTENT_TYPE, HeaderMap};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cancel::{AbortSignal, is_aborted, wait_aborted};
use crate::config::ClientConfig;
use crate::credentials::CredentialProvider;
use crate::errors::ClientError;

/// Response body as a stream of raw reads.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, ClientError>> + Send + 'static>>;

/// Status metadata returned alongside a streaming body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub content_type: Option<String>,
    /// `x-request-id` header, when the server sent one.
    pub request_id: Option<String>,
}

/// An open response whose body has not been read yet.
pub struct StreamResponse {
    pub meta: ResponseMeta,
    pub body: ByteStream,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// HTTP client shared by the JSON helpers and the streaming call.
///
/// Cheap to clone; clones share the connection pool and credential provider.
#[derive(Clone)]
pub struct TransportClient {
    http: reqwest::Client,
    config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl TransportClient {
    /// Creates a client from configuration and a credential source.
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.idle_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ClientError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            credentials,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs one JSON exchange.
    ///
    /// Returns `Value::Null` for `204 No Content` (the body is never read) and
    /// for empty success bodies. The whole exchange is bounded by
    /// [`ClientConfig::timeout`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        signal: Option<AbortSignal>,
    ) -> Result<Value, ClientError> {
        let mut signal = signal;
        debug!(event = "http.request", method = %method, path, "sending request");
        let builder = self
            .prepare(method.clone(), path, body, "application/json")
            .await
            .timeout(self.config.timeout);
        let response = self.send(builder, &mut signal).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(self.classify_failure(response, &mut signal, path).await);
        }
        if status == StatusCode::NO_CONTENT {
            debug!(event = "http.no_content", method = %method, path, "request succeeded without body");
            return Ok(Value::Null);
        }

        let bytes = read_body(response, &mut signal).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            ClientError::protocol(status.as_u16(), format!("invalid JSON response: {e}"))
        })
    }

    pub async fn get(&self, path: &str, signal: Option<AbortSignal>) -> Result<Value, ClientError> {
        self.request(Method::GET, path, None, signal).await
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        signal: Option<AbortSignal>,
    ) -> Result<Value, ClientError> {
        let body = to_json_body(body)?;
        self.request(Method::POST, path, Some(&body), signal).await
    }

    pub async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        signal: Option<AbortSignal>,
    ) -> Result<Value, ClientError> {
        let body = to_json_body(body)?;
        self.request(Method::PUT, path, Some(&body), signal).await
    }

    pub async fn delete(
        &self,
        path: &str,
        signal: Option<AbortSignal>,
    ) -> Result<Value, ClientError> {
        self.request(Method::DELETE, path, None, signal).await
    }

    /// POSTs `body` and returns the still-open response body.
    ///
    /// Non-success responses are classified exactly like [`Self::request`];
    /// their body is read and discarded first. An open stream has no overall
    /// deadline, only [`ClientConfig::idle_timeout`] between reads.
    pub async fn stream<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        signal: Option<AbortSignal>,
    ) -> Result<StreamResponse, ClientError> {
        let mut signal = signal;
        let body = to_json_body(body)?;
        debug!(event = "http.stream_request", path, "opening event stream");
        let builder = self
            .prepare(Method::POST, path, Some(&body), "text/event-stream")
            .await;
        let response = self.send(builder, &mut signal).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(self.classify_failure(response, &mut signal, path).await);
        }

        let meta = ResponseMeta {
            status: status.as_u16(),
            content_type: header_string(response.headers(), CONTENT_TYPE),
            request_id: header_string(response.headers(), "x-request-id"),
        };
        debug!(event = "http.stream_opened", path, status = meta.status, content_type = ?meta.content_type, "event stream opened");
        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|read| read.map_err(ClientError::from)),
        );
        Ok(StreamResponse { meta, body })
    }

    async fn prepare(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        accept: &'static str,
    ) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, self.config.url_for(path))
            .header(ACCEPT, accept);
        if let Some(token) = self.credentials.bearer_token().await {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        signal: &mut Option<AbortSignal>,
    ) -> Result<Response, ClientError> {
        if is_aborted(signal) {
            return Err(ClientError::aborted());
        }
        tokio::select! {
            biased;
            () = wait_aborted(signal) => Err(ClientError::aborted()),
            sent = builder.send() => sent.map_err(|e| {
                warn!(event = "http.transport_failed", error = %e, "request did not get a response");
                ClientError::from(e)
            }),
        }
    }

    async fn classify_failure(
        &self,
        response: Response,
        signal: &mut Option<AbortSignal>,
        path: &str,
    ) -> ClientError {
        let status = response.status().as_u16();
        let body = match read_body(response, signal).await {
            Ok(body) => body,
            Err(err) if err.is_aborted() => return err,
            Err(_) => Bytes::new(),
        };
        let err = ClientError::from_error_body(status, &body);
        warn!(event = "http.request_failed", path, status, message = %err.message, "request failed");
        err
    }
}

async fn read_body(
    response: Response,
    signal: &mut Option<AbortSignal>,
) -> Result<Bytes, ClientError> {
    tokio::select! {
        biased;
        () = wait_aborted(signal) => Err(ClientError::aborted()),
        body = response.bytes() => body.map_err(ClientError::from),
    }
}

fn to_json_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ClientError> {
    serde_json::to_value(body).map_err(|e| ClientError::serialization(&e))
}

fn header_string<K: AsHeaderName>(headers: &HeaderMap, key: K) -> Option<String> {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

use futures::StreamExt as _;
use futures::{Stream, stream};
use tracing::debug;

use crate::cancel::AbortSignal;
use crate::decoder::{EventStream, decode_event_stream};
use crate::errors::ClientError;
use crate::event::StreamEvent;
use crate::request::CompletionRequest;
use crate::transport::TransportClient;

/// Path of the completion endpoint relative to the configured base URL.
pub const DEFAULT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Chat completion calls on top of a [`TransportClient`].
#[derive(Clone)]
pub struct CompletionClient {
    transport: TransportClient,
    path: String,
}

impl CompletionClient {
    pub fn new(transport: TransportClient) -> Self {
        Self {
            transport,
            path: DEFAULT_COMPLETIONS_PATH.to_string(),
        }
    }

    /// Overrides the completion endpoint path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    /// Streams a completion.
    ///
    /// Nothing is sent until the returned stream is first polled. If the
    /// stream cannot be opened the sequence is a single `Error` event, or
    /// empty when `signal` aborted the request.
    pub fn stream(&self, request: &CompletionRequest, signal: Option<AbortSignal>) -> EventStream {
        let transport = self.transport.clone();
        let path = self.path.clone();
        let body = serde_json::to_value(request);
        let model = request.model.clone();

        let opened = async move {
            let body = body.map_err(|e| ClientError::serialization(&e))?;
            debug!(event = "completion.stream_start", model = %model, path = %path, "starting completion stream");
            let response = transport.stream(&path, &body, signal.clone()).await?;
            Ok::<_, ClientError>((response, signal))
        };

        Box::pin(stream::once(opened).flat_map(|opened| -> EventStream {
            match opened {
                Ok((response, signal)) => decode_event_stream(response.body, signal),
                Err(err) if err.is_aborted() => Box::pin(stream::empty()),
                Err(cause) => Box::pin(stream::iter([StreamEvent::Error { cause }])),
            }
        }))
    }

    /// Requests a single, non-streamed completion object.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        signal: Option<AbortSignal>,
    ) -> Result<serde_json::Value, ClientError> {
        let request = CompletionRequest {
            stream: false,
            ..request.clone()
        };
        self.transport.post(&self.path, &request, signal).await
    }

    /// Streams a completion and returns the concatenated text.
    pub async fn collect_text(
        &self,
        request: &CompletionRequest,
        signal: Option<AbortSignal>,
    ) -> Result<String, ClientError> {
        collect_content(self.stream(request, signal)).await
    }
}

/// Drains `events`, concatenating every content delta in order.
///
/// Fails with the carried error on `Error`, and with an abort error when the
/// sequence stops without any terminal event.
pub async fn collect_content<S>(events: S) -> Result<String, ClientError>
where
    S: Stream<Item = StreamEvent>,
{
    let mut events = std::pin::pin!(events);
    let mut text = String::new();
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Chunk { content_delta, .. } => {
                if let Some(delta) = content_delta {
                    text.push_str(&delta);
                }
            }
            StreamEvent::Done => return Ok(text),
            StreamEvent::Error { cause } => return Err(cause),
        }
    }
    Err(ClientError::aborted())
}

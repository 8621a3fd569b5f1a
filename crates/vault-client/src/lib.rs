//! HTTP transport and streaming completion client for the Vault AI dashboard.
//!
//! The transport performs JSON exchanges and opens event-stream responses with
//! one error type ([`ClientError`]). The decoder turns an event-stream body
//! into a lazy sequence of [`StreamEvent`]s, tolerating arbitrary chunk
//! boundaries and ending on `Done` or `Error`.
//!
//! # Streaming a completion
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt as _;
//! use vault_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TransportClient::new(ClientConfig::from_env()?, Arc::new(EnvToken::default()))?;
//! let client = CompletionClient::new(transport);
//! let abort = AbortHandle::new();
//!
//! let request = CompletionRequest::new("vault-default").user("Say hello");
//! let mut events = client.stream(&request, Some(abort.signal()));
//! while let Some(event) = events.next().await {
//!     match event {
//!         StreamEvent::Chunk { content_delta: Some(text), .. } => print!("{text}"),
//!         StreamEvent::Chunk { .. } => {}
//!         StreamEvent::Done => println!(),
//!         StreamEvent::Error { cause } => eprintln!("interrupted: {cause}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Cancellation tokens shared by the transport and the decoder.
pub mod cancel;
/// Chat completion facade over the transport and decoder.
pub mod completion;
/// Transport client configuration.
pub mod config;
/// Bearer-token providers.
pub mod credentials;
pub mod decoder;
/// Error type shared by every operation.
pub mod errors;
/// Decoded stream events.
pub mod event;
pub mod fixture;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Completion request envelope.
pub mod request;
/// HTTP transport client.
pub mod transport;

#[cfg(test)]
mod test_support;

pub use cancel::{AbortHandle, AbortSignal};
pub use completion::{CompletionClient, DEFAULT_COMPLETIONS_PATH, collect_content};
pub use config::{ClientConfig, ConfigError};
pub use credentials::{CredentialProvider, EnvToken, NoCredentials, StaticToken};
pub use decoder::{DONE_SENTINEL, EventStream, FrameDecoder, decode_event_stream};
pub use errors::{ClientError, ClientErrorKind};
pub use event::StreamEvent;
pub use observability::init_observability;
pub use request::{ChatMessage, CompletionRequest, Role};
pub use transport::{ByteStream, ResponseMeta, StreamResponse, TransportClient};

//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, AbortSignal, ChatMessage, ClientConfig, ClientError, CompletionClient,
    CompletionRequest, EnvToken, Role, StaticToken, StreamEvent, TransportClient,
};

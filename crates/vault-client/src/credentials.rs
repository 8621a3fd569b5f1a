//! Bearer-token sources injected into the transport client.

/// Supplies the bearer token attached to outgoing requests.
///
/// Called once per request, so implementations may rotate tokens freely.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the current token, or `None` to send the request unauthenticated.
    async fn bearer_token(&self) -> Option<String>;
}

/// Never attaches credentials.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCredentials;

#[async_trait::async_trait]
impl CredentialProvider for NoCredentials {
    async fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// A fixed token.
#[derive(Clone, Debug)]
pub struct StaticToken(pub String);

#[async_trait::async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        non_blank(self.0.clone())
    }
}

/// Reads the token from an environment variable on every request.
#[derive(Clone, Debug)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    /// Reads from the named variable.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new("VAULT_API_TOKEN")
    }
}

#[async_trait::async_trait]
impl CredentialProvider for EnvToken {
    async fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().and_then(non_blank)
    }
}

fn non_blank(token: String) -> Option<String> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::credentials::NoCredentials;
use crate::transport::TransportClient;

/// Serves `app` on an ephemeral local port and returns its base URL.
pub(crate) async fn spawn_server(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test app");
    });
    format!("http://{addr}")
}

/// Base URL of a port that was just released, so connecting is refused.
pub(crate) async fn refused_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe listener");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    format!("http://{addr}")
}

pub(crate) fn client_for(base_url: &str) -> TransportClient {
    TransportClient::new(ClientConfig::new(base_url), Arc::new(NoCredentials)).expect("client")
}

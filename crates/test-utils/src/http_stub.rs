use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use jobrunner::remote::RemoteService;

/// HTTP front for a [`RemoteService`], shaped like a real execution service:
/// `GET|POST /<command>?<args>`. Service errors become `500`.
pub struct StubServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(service: Arc<dyn RemoteService>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .route("/{command}", any(dispatch))
            .with_state(service);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "stub server stopped");
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn dispatch(
    State(service): State<Arc<dyn RemoteService>>,
    Path(command): Path<String>,
    Query(args): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Response {
    let body = (!body.is_empty()).then_some(body);
    match service.handle(&command, &args, body) {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

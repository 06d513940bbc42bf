// src/remote/transport.rs

//! Transports carrying remote execution requests.
//!
//! A request is a command name, a flat set of string arguments, an optional
//! body and, for commands that return a file, the local path the response
//! should be written to.
//!
//! - [`HttpTransport`] maps that onto `GET|POST <url>/<command>?<args>`.
//! - [`InProcessTransport`] hands it to a [`RemoteService`] living in the
//!   same process.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use crate::errors::{Result, RunnerError};
use crate::exec::RunnerFuture;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub command: String,
    pub args: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Bytes(Bytes),
    /// Local file, streamed from disk when the request is sent.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteResponse {
    /// Decoded response body, for status and metadata commands.
    Body(Bytes),
    /// The response was streamed to `path`.
    File { path: PathBuf, bytes: u64 },
}

impl RemoteResponse {
    pub fn into_body(self) -> Option<Bytes> {
        match self {
            RemoteResponse::Body(bytes) => Some(bytes),
            RemoteResponse::File { .. } => None,
        }
    }
}

pub trait Transport: Send + Sync {
    /// One full round trip. Errors are never retried here.
    fn call(&self, request: RemoteRequest) -> RunnerFuture<'_, Result<RemoteResponse>>;
}

/// HTTP transport backed by `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(
        url: &str,
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| RunnerError::Config(format!("invalid remote url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RunnerError::Config(format!(
                "remote url '{url}' must use http or https"
            )));
        }

        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| RunnerError::Config(format!("building http client: {e}")))?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn round_trip(&self, request: RemoteRequest) -> Result<RemoteResponse> {
        let url = format!("{}/{}", self.base_url, request.command);
        let command = request.command.as_str();

        let builder = match request.body {
            Some(RequestBody::Bytes(body)) => self.client.post(&url).body(body),
            Some(RequestBody::File(path)) => {
                let file = tokio::fs::File::open(&path).await?;
                trace!(command, path = %path.display(), "streaming request body from file");
                self.client
                    .post(&url)
                    .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            }
            None => self.client.get(&url),
        };

        debug!(command, url = %url, "remote request");
        let response = builder
            .query(&request.args)
            .send()
            .await
            .map_err(|e| transport_error(command, e))?
            .error_for_status()
            .map_err(|e| transport_error(command, e))?;

        match request.output_path {
            Some(path) => {
                let bytes = stream_to_file(command, response, &path).await?;
                Ok(RemoteResponse::File { path, bytes })
            }
            None => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| transport_error(command, e))?;
                trace!(command, len = body.len(), "remote response body");
                Ok(RemoteResponse::Body(body))
            }
        }
    }
}

impl Transport for HttpTransport {
    fn call(&self, request: RemoteRequest) -> RunnerFuture<'_, Result<RemoteResponse>> {
        Box::pin(self.round_trip(request))
    }
}

async fn stream_to_file(command: &str, mut response: reqwest::Response, path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| transport_error(command, e))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    debug!(command, path = %path.display(), bytes = written, "remote file received");
    Ok(written)
}

fn transport_error(command: &str, err: reqwest::Error) -> RunnerError {
    RunnerError::Transport(format!("{command}: {err}"))
}

/// Server side of the remote protocol, callable in-process.
pub trait RemoteService: Send + Sync {
    fn handle(
        &self,
        command: &str,
        args: &BTreeMap<String, String>,
        body: Option<Bytes>,
    ) -> Result<Bytes>;
}

/// Transport that calls a [`RemoteService`] directly.
pub struct InProcessTransport {
    service: Arc<dyn RemoteService>,
}

impl InProcessTransport {
    pub fn new(service: Arc<dyn RemoteService>) -> Self {
        Self { service }
    }
}

impl Transport for InProcessTransport {
    fn call(&self, request: RemoteRequest) -> RunnerFuture<'_, Result<RemoteResponse>> {
        Box::pin(async move {
            let body = match request.body {
                Some(RequestBody::Bytes(bytes)) => Some(bytes),
                Some(RequestBody::File(path)) => Some(Bytes::from(tokio::fs::read(&path).await?)),
                None => None,
            };
            let body = self
                .service
                .handle(&request.command, &request.args, body)?;
            match request.output_path {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&path, &body).await?;
                    Ok(RemoteResponse::File {
                        path,
                        bytes: body.len() as u64,
                    })
                }
                None => Ok(RemoteResponse::Body(body)),
            }
        })
    }
}

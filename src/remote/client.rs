// src/remote/client.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{Result, RunnerError};
use crate::remote::transport::{
    HttpTransport, RemoteRequest, RemoteResponse, RequestBody, Transport,
};

/// Argument name carrying the shared private token.
pub const PRIVATE_KEY_ARG: &str = "private_key";

/// Connection settings for a remote execution service.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the service, e.g. `http://cluster-head:8913`.
    pub url: Option<String>,
    /// Shared token appended to every request as `private_key`.
    pub private_token: Option<String>,
    pub connect_timeout: Duration,
    /// Bound on a whole round trip, uploads and downloads included.
    pub request_timeout: Option<Duration>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            private_token: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
        }
    }
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_private_token(mut self, token: impl Into<String>) -> Self {
        self.private_token = Some(token.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Request payload. At most one of inline bytes or a local file.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Data(Bytes),
    /// Local file streamed as the request body.
    File(PathBuf),
}

/// RPC-style client for a remote execution service.
///
/// Every call is one round trip; transport failures are returned to the
/// caller as-is and never retried here.
#[derive(Clone)]
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    private_token: Option<String>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("authenticated", &self.private_token.is_some())
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    /// HTTP client for the configured service. A missing URL is a
    /// configuration error here, not at the first call.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| RunnerError::Config("remote runner requires a url".to_string()))?;

        let transport = HttpTransport::new(url, config.connect_timeout, config.request_timeout)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            config.private_token.clone(),
        ))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, private_token: Option<String>) -> Self {
        Self {
            transport,
            private_token,
        }
    }

    /// Run `command` on the service.
    ///
    /// When `output_path` is given the response is written there instead of
    /// being returned in memory.
    pub async fn execute(
        &self,
        command: &str,
        args: &[(&str, &str)],
        payload: Payload,
        output_path: Option<&Path>,
    ) -> Result<RemoteResponse> {
        let mut arg_map: BTreeMap<String, String> = args
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if let Some(token) = &self.private_token {
            arg_map.insert(PRIVATE_KEY_ARG.to_string(), token.clone());
        }

        let body = match payload {
            Payload::Empty => None,
            Payload::Data(bytes) => Some(RequestBody::Bytes(bytes)),
            Payload::File(path) => Some(RequestBody::File(path)),
        };

        debug!(
            command,
            nargs = args.len(),
            body = ?body.as_ref().map(body_kind),
            "executing remote command"
        );

        self.transport
            .call(RemoteRequest {
                command: command.to_string(),
                args: arg_map,
                body,
                output_path: output_path.map(Path::to_path_buf),
            })
            .await
    }

    /// `execute` for commands answering with a JSON document.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        command: &str,
        args: &[(&str, &str)],
    ) -> Result<T> {
        let response = self.execute(command, args, Payload::Empty, None).await?;
        let body = response.into_body().ok_or_else(|| {
            RunnerError::Transport(format!("{command}: expected a response body, got a file"))
        })?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn body_kind(body: &RequestBody) -> String {
    match body {
        RequestBody::Bytes(bytes) => format!("{} bytes", bytes.len()),
        RequestBody::File(path) => format!("file {}", path.display()),
    }
}

//! The remote store collaborator.

use crate::config::{ConfigError, EngineConfig};
use async_trait::async_trait;
use quill_engine::{RemoteOperation, RemoteOutcome};
use reqwest::{StatusCode, Url};

/// Applies queued operations to the remote copy of the documents.
///
/// Implementations never fail with an error: every failure is classified into
/// a [`RemoteOutcome`] so the orchestrator can decide between retrying,
/// resolving a conflict or giving up.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn apply(&self, operation: RemoteOperation) -> RemoteOutcome;
}

/// [`RemoteStore`] speaking JSON over HTTP to `quill-server`.
///
/// `POST {base}/documents/{id}/apply` with the operation as body. The server
/// answers `200` with an applied outcome, `409` with a conflict outcome, and
/// `401`/`403` for permission failures.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, ConfigError> {
        let base = Url::parse(base_url).map_err(|e| ConfigError::InvalidRemoteUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::InvalidRemoteUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidRemoteUrl(e.to_string()))?;

        Ok(Self {
            client,
            base,
            token,
        })
    }

    /// Build from the remote settings of an [`EngineConfig`].
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let url = config
            .remote_url
            .as_deref()
            .ok_or(ConfigError::MissingRemoteUrl)?;
        Self::new(url, config.auth_token.clone(), config.request_timeout)
    }

    fn apply_url(&self, document_id: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["documents", document_id, "apply"]);
        }
        url
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn apply(&self, operation: RemoteOperation) -> RemoteOutcome {
        let url = self.apply_url(&operation.document_id);
        let mut request = self.client.post(url).json(&operation);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return RemoteOutcome::transient(e.to_string()),
        };

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::CONFLICT => match response.json::<RemoteOutcome>().await {
                Ok(outcome) => outcome,
                Err(e) => RemoteOutcome::transient(format!("malformed response: {e}")),
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                RemoteOutcome::rejected(format!("permission denied ({status})"))
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                RemoteOutcome::transient(status.to_string())
            }
            s if s.is_server_error() => RemoteOutcome::transient(s.to_string()),
            s => RemoteOutcome::rejected(format!("unexpected status {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn apply_url_escapes_ids() {
        let remote =
            HttpRemote::new("http://localhost:3000/api/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            remote.apply_url("notes/a b").as_str(),
            "http://localhost:3000/api/documents/notes%2Fa%20b/apply"
        );
    }

    #[test]
    fn rejects_unusable_urls() {
        assert!(HttpRemote::new("not a url", None, Duration::from_secs(1)).is_err());
        assert!(HttpRemote::new("mailto:me@example.com", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn requires_remote_url() {
        assert!(matches!(
            HttpRemote::from_config(&EngineConfig::default()),
            Err(ConfigError::MissingRemoteUrl)
        ));
    }

    #[tokio::test]
    async fn unreachable_remote_is_transient() {
        let remote =
            HttpRemote::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
        let doc = quill_engine::Document::from_draft(
            quill_engine::DocumentDraft::new("d1", "T", "x"),
            0,
        );
        let outcome = remote
            .apply(RemoteOperation::new(quill_engine::OperationKind::Create, doc, 0))
            .await;
        assert!(matches!(outcome, RemoteOutcome::Transient { .. }));
    }
}

//! HTTP client for the hosted persistence backend.

use std::time::Duration;

use async_trait::async_trait;
use models::{comment::Comment, version::Snapshot};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use uuid::Uuid;

/// Failures from the persistence backend. The `Display` strings double as
/// input to the retry classifier, so the permanent variants carry their
/// category token verbatim.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("authentication rejected")]
    Authentication,
    #[error("authorization denied")]
    Authorization,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("bad_request: {0}")]
    BadRequest(String),
    #[error("json error: {0}")]
    Serde(String),
}

impl RemoteError {
    /// Returns true if the error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Seam to the hosted CRUD backend for sections, versions and comments.
/// Production talks JSON over HTTP; tests substitute an in-memory double.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), RemoteError>;
    async fn list_snapshots(&self, section_id: Uuid) -> Result<Vec<Snapshot>, RemoteError>;
    async fn insert_comment(&self, comment: &Comment) -> Result<(), RemoteError>;
    async fn update_comment(&self, comment: &Comment) -> Result<(), RemoteError>;
    async fn delete_comment(&self, id: Uuid) -> Result<(), RemoteError>;
    async fn list_comments(&self, section_id: Uuid) -> Result<Vec<Comment>, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    http: Client,
    base_url: String,
}

impl HttpRemoteStore {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("draftline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(res: Response) -> Result<Response, RemoteError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => RemoteError::Authentication,
            StatusCode::FORBIDDEN => RemoteError::Authorization,
            StatusCode::NOT_FOUND => RemoteError::NotFound(body),
            StatusCode::BAD_REQUEST => RemoteError::BadRequest(body),
            StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Validation(body),
            s => RemoteError::Http {
                status: s.as_u16(),
                body,
            },
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(res: Response) -> Result<T, RemoteError> {
        Self::check(res)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Serde(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), RemoteError> {
        let res = self
            .http
            .post(self.url(&format!("/sections/{}/versions", snapshot.section_id)))
            .json(snapshot)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::check(res).await.map(|_| ())
    }

    async fn list_snapshots(&self, section_id: Uuid) -> Result<Vec<Snapshot>, RemoteError> {
        let res = self
            .http
            .get(self.url(&format!("/sections/{section_id}/versions")))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::read_json(res).await
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), RemoteError> {
        let res = self
            .http
            .post(self.url("/comments"))
            .json(comment)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::check(res).await.map(|_| ())
    }

    async fn update_comment(&self, comment: &Comment) -> Result<(), RemoteError> {
        let res = self
            .http
            .put(self.url(&format!("/comments/{}", comment.id)))
            .json(comment)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::check(res).await.map(|_| ())
    }

    async fn delete_comment(&self, id: Uuid) -> Result<(), RemoteError> {
        let res = self
            .http
            .delete(self.url(&format!("/comments/{id}")))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::check(res).await.map(|_| ())
    }

    async fn list_comments(&self, section_id: Uuid) -> Result<Vec<Comment>, RemoteError> {
        let res = self
            .http
            .get(self.url(&format!("/sections/{section_id}/comments")))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::read_json(res).await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(e.to_string())
    }
}

// reqwest client for the persistence service's REST routes.

use std::time::Duration;

use annotator_common::ids::{DocumentId, HighlightId};
use annotator_common::protocol::service::{
    AiSuggestionsRequest, AiSuggestionsResponse, DocumentCreateRequest, DocumentResponse,
    ErrorBody, HealthResponse, HighlightCreateRequest, HighlightPatchRequest, HighlightResponse,
    SessionCompleteResponse, SessionCreateRequest, SessionExport,
};
use annotator_common::types::{DocumentReview, DocumentSummary, Session};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::{PersistenceService, RemoteError};

#[derive(Debug, Clone)]
pub struct HttpPersistence {
    client: reqwest::Client,
    base: Url,
}

impl HttpPersistence {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url.trim()).map_err(|error| {
            RemoteError::Transport(format!("invalid service url `{base_url}`: {error}"))
        })?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Transport(format!(
                "service url `{base_url}` cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RemoteError::Transport(error.to_string()))?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Base URL with `segments` appended, each percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!(url = %response.url(), status = status.as_u16(), "service response");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(rejection(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, RemoteError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|error| RemoteError::Decode(error.to_string()))
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), RemoteError> {
        self.send(request).await.map(|_| ())
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_decode() {
        RemoteError::Decode(error.to_string())
    } else {
        RemoteError::Transport(error.to_string())
    }
}

/// Map a non-success response. The service reports its reason in `detail`.
pub(crate) fn rejection(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.detail)
        .ok()
        .filter(|detail| !detail.is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                trimmed.to_string()
            }
        });
    if status == StatusCode::NOT_FOUND {
        RemoteError::NotFound(message)
    } else {
        RemoteError::Rejected { status: status.as_u16(), message }
    }
}

impl PersistenceService for HttpPersistence {
    async fn health(&self) -> Result<HealthResponse, RemoteError> {
        self.send_json(self.client.get(self.endpoint(&["healthz"]))).await
    }

    async fn create_session(&self, request: &SessionCreateRequest) -> Result<Session, RemoteError> {
        self.send_json(self.client.post(self.endpoint(&["sessions"])).json(request)).await
    }

    async fn complete_session(
        &self,
        session_id: &str,
    ) -> Result<SessionCompleteResponse, RemoteError> {
        let url = self.endpoint(&["sessions", session_id, "complete"]);
        self.send_json(self.client.post(url)).await
    }

    async fn get_or_create_document(
        &self,
        session_id: &str,
        request: &DocumentCreateRequest,
    ) -> Result<DocumentResponse, RemoteError> {
        let url = self.endpoint(&["sessions", session_id, "documents"]);
        self.send_json(self.client.post(url).json(request)).await
    }

    async fn create_highlight(
        &self,
        session_id: &str,
        document_id: &DocumentId,
        request: &HighlightCreateRequest,
    ) -> Result<HighlightResponse, RemoteError> {
        let url = self.endpoint(&[
            "sessions",
            session_id,
            "documents",
            document_id.as_str(),
            "highlights",
        ]);
        self.send_json(self.client.post(url).json(request)).await
    }

    async fn patch_highlight(
        &self,
        session_id: &str,
        highlight_id: &HighlightId,
        request: &HighlightPatchRequest,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint(&["sessions", session_id, "highlights", highlight_id.as_str()]);
        self.send_empty(self.client.patch(url).json(request)).await
    }

    async fn delete_highlight(
        &self,
        session_id: &str,
        highlight_id: &HighlightId,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint(&["sessions", session_id, "highlights", highlight_id.as_str()]);
        self.send_empty(self.client.delete(url)).await
    }

    async fn save_review(
        &self,
        session_id: &str,
        document_id: &DocumentId,
        review: &DocumentReview,
    ) -> Result<(), RemoteError> {
        let url =
            self.endpoint(&["sessions", session_id, "documents", document_id.as_str(), "review"]);
        self.send_empty(self.client.put(url).json(review)).await
    }

    async fn save_summary(
        &self,
        session_id: &str,
        document_id: &DocumentId,
        summary: &DocumentSummary,
    ) -> Result<(), RemoteError> {
        let url =
            self.endpoint(&["sessions", session_id, "documents", document_id.as_str(), "summary"]);
        self.send_empty(self.client.put(url).json(summary)).await
    }

    async fn suggestions(
        &self,
        request: &AiSuggestionsRequest,
    ) -> Result<AiSuggestionsResponse, RemoteError> {
        self.send_json(self.client.post(self.endpoint(&["ai", "suggestions"])).json(request)).await
    }

    async fn export_session(&self, session_id: &str) -> Result<SessionExport, RemoteError> {
        self.send_json(self.client.get(self.endpoint(&["export", session_id]))).await
    }
}

// Remote persistence service: the panel's only network dependency.

pub mod http;
pub mod memory;

use std::future::Future;

use annotator_common::ids::{DocumentId, HighlightId};
use annotator_common::protocol::service::{
    AiSuggestionsRequest, AiSuggestionsResponse, DocumentCreateRequest, DocumentResponse,
    HealthResponse, HighlightCreateRequest, HighlightPatchRequest, HighlightResponse,
    SessionCompleteResponse, SessionCreateRequest, SessionExport,
};
use annotator_common::types::{DocumentReview, DocumentSummary, Session};
use thiserror::Error;

use crate::retry::Transient;

pub use http::HttpPersistence;
pub use memory::{MemoryService, ServiceOp};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Non-success status with the service's own message.
    #[error("service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The service's own message, e.g. "Highlight not found".
    #[error("{0}")]
    NotFound(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Text suitable for a user-visible notice.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } | Self::NotFound(message) => message.clone(),
            Self::Transport(_) => "the annotation service is unreachable".to_string(),
            Self::Decode(_) => "the annotation service sent an unexpected response".to_string(),
        }
    }
}

impl Transient for RemoteError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub trait PersistenceService: Send + Sync + 'static {
    fn health(&self) -> impl Future<Output = Result<HealthResponse, RemoteError>> + Send;

    fn create_session(
        &self,
        request: &SessionCreateRequest,
    ) -> impl Future<Output = Result<Session, RemoteError>> + Send;

    fn complete_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<SessionCompleteResponse, RemoteError>> + Send;

    /// Idempotent get-or-create keyed by URL.
    fn get_or_create_document(
        &self,
        session_id: &str,
        request: &DocumentCreateRequest,
    ) -> impl Future<Output = Result<DocumentResponse, RemoteError>> + Send;

    fn create_highlight(
        &self,
        session_id: &str,
        document_id: &DocumentId,
        request: &HighlightCreateRequest,
    ) -> impl Future<Output = Result<HighlightResponse, RemoteError>> + Send;

    fn patch_highlight(
        &self,
        session_id: &str,
        highlight_id: &HighlightId,
        request: &HighlightPatchRequest,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn delete_highlight(
        &self,
        session_id: &str,
        highlight_id: &HighlightId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn save_review(
        &self,
        session_id: &str,
        document_id: &DocumentId,
        review: &DocumentReview,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn save_summary(
        &self,
        session_id: &str,
        document_id: &DocumentId,
        summary: &DocumentSummary,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn suggestions(
        &self,
        request: &AiSuggestionsRequest,
    ) -> impl Future<Output = Result<AiSuggestionsResponse, RemoteError>> + Send;

    fn export_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<SessionExport, RemoteError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_transient() {
        assert!(RemoteError::Transport("reset".into()).is_transient());
        assert!(!RemoteError::NotFound("highlight".into()).is_transient());
        assert!(!RemoteError::Rejected { status: 422, message: "bad".into() }.is_transient());
    }

    #[test]
    fn rejected_notice_uses_service_detail() {
        let error = RemoteError::Rejected { status: 404, message: "Session not found".into() };
        assert_eq!(error.user_message(), "Session not found");
    }

    #[test]
    fn not_found_notice_is_the_service_message_verbatim() {
        let error = RemoteError::NotFound("Session not found".into());
        assert_eq!(error.user_message(), "Session not found");
        assert_eq!(error.to_string(), "Session not found");
    }
}

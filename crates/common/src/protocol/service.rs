// Request/response bodies of the remote persistence service.
//
// Routes (relative to the service base URL):
//   GET    /healthz
//   POST   /sessions
//   POST   /sessions/{sid}/complete
//   POST   /sessions/{sid}/documents                      get-or-create by url
//   POST   /sessions/{sid}/documents/{did}/highlights
//   PATCH  /sessions/{sid}/highlights/{hid}
//   DELETE /sessions/{sid}/highlights/{hid}
//   PUT    /sessions/{sid}/documents/{did}/review
//   PUT    /sessions/{sid}/documents/{did}/summary
//   POST   /ai/suggestions
//   GET    /export/{sid}

use serde::{Deserialize, Serialize};

use crate::ids::{DocumentId, HighlightId};
use crate::types::{
    DocumentReview, DocumentSummary, DocumentType, SearchEpisode, Selector, Sentiment, Session,
    UserJudgment,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreateRequest {
    pub expert_name: String,
    pub topic: String,
    pub research_goal: String,
}

pub type SessionResponse = Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCompleteResponse {
    pub session_id: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCreateRequest {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub accessed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub document_id: DocumentId,
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub accessed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightCreateRequest {
    pub text: String,
    pub selector: Selector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub ai_suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_judgment: Option<UserJudgment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightResponse {
    pub highlight_id: HighlightId,
    pub text: String,
    pub selector: Selector,
    #[serde(default)]
    pub ai_suggestions: Vec<String>,
    #[serde(default)]
    pub user_judgment: Option<UserJudgment>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightPatchRequest {
    pub user_judgment: UserJudgment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSuggestionsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_meta: Option<serde_json::Value>,
    pub highlight_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSuggestionsResponse {
    pub suggestions: Vec<String>,
}

pub type ReviewSaveRequest = DocumentReview;
pub type SummarySaveRequest = DocumentSummary;

/// Error body returned by the service on non-success statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightExport {
    pub highlight_id: HighlightId,
    pub text: String,
    #[serde(default)]
    pub context: Option<String>,
    pub selector: Selector,
    #[serde(default)]
    pub ai_suggestions: Vec<String>,
    #[serde(default)]
    pub user_judgment: Option<UserJudgment>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentExport {
    pub document_id: DocumentId,
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub accessed_at: String,
    #[serde(default)]
    pub highlights: Vec<HighlightExport>,
    #[serde(default)]
    pub global_judgment: Option<DocumentSummary>,
    #[serde(default)]
    pub pdf_review: Option<DocumentReview>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    #[serde(flatten)]
    pub session: Session,
    #[serde(default)]
    pub documents: Vec<DocumentExport>,
    #[serde(default)]
    pub search_episodes: Vec<SearchEpisode>,
}

// Lifecycle messages exchanged between execution contexts.
//
// Every message is `{ "type": "<Variant>", "payload": { ... } }`. The set
// of types is closed: unknown types decode to `DecodeError::UnknownType`
// and every context ignores them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::NormalizedRect;
use crate::ids::{HighlightId, LocalId, PageId};
use crate::selector::Fingerprint;
use crate::types::{
    DocumentMeta, DocumentReview, DocumentSummary, Interaction, SearchEpisode, Selector, Sentiment,
    UserJudgment,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    SelectionCommitted(SelectionCommitted),
    HighlightConfirmed(HighlightConfirmed),
    HighlightSaveFailed(HighlightSaveFailed),
    HighlightRemoveRequested(HighlightRef),
    HighlightRemoved(HighlightRef),
    HighlightRemoveFailed(HighlightRemoveFailed),
    HighlightUpdateRequested(HighlightUpdate),
    HighlightUpdated(HighlightUpdate),
    HighlightUpdateFailed(HighlightUpdateFailed),
    PdfMarkCreated(PdfMarkCreated),
    PdfMarkCancelled(PdfMarkCancelled),
    SearchQueryDetected(SearchQueryDetected),
    SearchEpisodeRecorded(SearchEpisodeRecorded),
    InteractionRecorded(InteractionRecorded),
    DocumentReviewRequested(DocumentReviewRequested),
    DocumentReviewSaved(DocumentReviewSaved),
    DocumentSummaryRequested(DocumentSummaryUpdate),
    DocumentSummarySaved(DocumentSummaryUpdate),
}

/// Every `type` tag the protocol knows.
pub const MESSAGE_TYPES: &[&str] = &[
    "SelectionCommitted",
    "HighlightConfirmed",
    "HighlightSaveFailed",
    "HighlightRemoveRequested",
    "HighlightRemoved",
    "HighlightRemoveFailed",
    "HighlightUpdateRequested",
    "HighlightUpdated",
    "HighlightUpdateFailed",
    "PdfMarkCreated",
    "PdfMarkCancelled",
    "SearchQueryDetected",
    "SearchEpisodeRecorded",
    "InteractionRecorded",
    "DocumentReviewRequested",
    "DocumentReviewSaved",
    "DocumentSummaryRequested",
    "DocumentSummarySaved",
];

/// Where the coordinator sends a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Forward to the registered control panel.
    ToPanel,
    /// Fan out to every registered port except the sender.
    Broadcast,
    /// Consumed by the coordinator itself.
    Coordinator,
}

// ── Payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionCommitted {
    pub local_id: LocalId,
    pub document: DocumentMeta,
    pub selector: Selector,
    pub sentiment: Sentiment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgment: Option<UserJudgment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<PageId>,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightConfirmed {
    pub local_id: LocalId,
    pub highlight_id: HighlightId,
    pub document_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightSaveFailed {
    pub local_id: LocalId,
    pub document_url: String,
    pub reason: String,
}

/// Identifies a highlight by whichever ids the sender knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_id: Option<HighlightId>,
    pub document_url: String,
}

impl HighlightRef {
    pub fn is_empty(&self) -> bool {
        self.local_id.is_none() && self.highlight_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRemoveFailed {
    #[serde(flatten)]
    pub target: HighlightRef,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightUpdate {
    pub highlight_id: HighlightId,
    pub document_url: String,
    pub judgment: UserJudgment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightUpdateFailed {
    pub highlight_id: HighlightId,
    pub document_url: String,
    pub reason: String,
}

/// An overlay mark for a paginated document, in page-normalized space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfMarkCreated {
    pub document_url: String,
    pub page: u32,
    pub rect: NormalizedRect,
    pub sentiment: Sentiment,
    pub fingerprint: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_id: Option<HighlightId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfMarkCancelled {
    pub document_url: String,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQueryDetected {
    pub page_id: PageId,
    pub platform: String,
    pub query: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchEpisodeRecorded {
    pub episode: SearchEpisode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecorded {
    pub interaction: Interaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReviewRequested {
    pub document_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub highlight_order: Vec<HighlightId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReviewSaved {
    pub document_url: String,
    pub review: DocumentReview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummaryUpdate {
    pub document_url: String,
    pub summary: DocumentSummary,
}

// ── Routing & codec ────────────────────────────────────────────────

impl Message {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SelectionCommitted(_) => "SelectionCommitted",
            Self::HighlightConfirmed(_) => "HighlightConfirmed",
            Self::HighlightSaveFailed(_) => "HighlightSaveFailed",
            Self::HighlightRemoveRequested(_) => "HighlightRemoveRequested",
            Self::HighlightRemoved(_) => "HighlightRemoved",
            Self::HighlightRemoveFailed(_) => "HighlightRemoveFailed",
            Self::HighlightUpdateRequested(_) => "HighlightUpdateRequested",
            Self::HighlightUpdated(_) => "HighlightUpdated",
            Self::HighlightUpdateFailed(_) => "HighlightUpdateFailed",
            Self::PdfMarkCreated(_) => "PdfMarkCreated",
            Self::PdfMarkCancelled(_) => "PdfMarkCancelled",
            Self::SearchQueryDetected(_) => "SearchQueryDetected",
            Self::SearchEpisodeRecorded(_) => "SearchEpisodeRecorded",
            Self::InteractionRecorded(_) => "InteractionRecorded",
            Self::DocumentReviewRequested(_) => "DocumentReviewRequested",
            Self::DocumentReviewSaved(_) => "DocumentReviewSaved",
            Self::DocumentSummaryRequested(_) => "DocumentSummaryRequested",
            Self::DocumentSummarySaved(_) => "DocumentSummarySaved",
        }
    }

    pub fn route(&self) -> Route {
        match self {
            Self::SelectionCommitted(_)
            | Self::HighlightRemoveRequested(_)
            | Self::HighlightUpdateRequested(_)
            | Self::DocumentReviewRequested(_)
            | Self::DocumentSummaryRequested(_) => Route::ToPanel,
            Self::SearchQueryDetected(_) | Self::InteractionRecorded(_) => Route::Coordinator,
            Self::HighlightConfirmed(_)
            | Self::HighlightSaveFailed(_)
            | Self::HighlightRemoved(_)
            | Self::HighlightRemoveFailed(_)
            | Self::HighlightUpdated(_)
            | Self::HighlightUpdateFailed(_)
            | Self::PdfMarkCreated(_)
            | Self::PdfMarkCancelled(_)
            | Self::SearchEpisodeRecorded(_)
            | Self::DocumentReviewSaved(_)
            | Self::DocumentSummarySaved(_) => Route::Broadcast,
        }
    }

    /// Document this message concerns, when it concerns one.
    pub fn document_url(&self) -> Option<&str> {
        let url = match self {
            Self::SelectionCommitted(payload) => &payload.document.url,
            Self::HighlightConfirmed(payload) => &payload.document_url,
            Self::HighlightSaveFailed(payload) => &payload.document_url,
            Self::HighlightRemoveRequested(payload) | Self::HighlightRemoved(payload) => {
                &payload.document_url
            }
            Self::HighlightRemoveFailed(payload) => &payload.target.document_url,
            Self::HighlightUpdateRequested(payload) | Self::HighlightUpdated(payload) => {
                &payload.document_url
            }
            Self::HighlightUpdateFailed(payload) => &payload.document_url,
            Self::PdfMarkCreated(payload) => &payload.document_url,
            Self::PdfMarkCancelled(payload) => &payload.document_url,
            Self::DocumentReviewRequested(payload) => &payload.document_url,
            Self::DocumentReviewSaved(payload) => &payload.document_url,
            Self::DocumentSummaryRequested(payload) | Self::DocumentSummarySaved(payload) => {
                &payload.document_url
            }
            Self::SearchQueryDetected(_)
            | Self::SearchEpisodeRecorded(_)
            | Self::InteractionRecorded(_) => return None,
        };
        Some(url.as_str())
    }

    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        serde_json::to_vec(self).map_err(|error| DecodeError::InvalidJson(error.to_string()))
    }

    /// Decode a raw `{type, payload}` frame.
    pub fn decode(raw: &[u8]) -> Result<Message, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|error| DecodeError::InvalidJson(error.to_string()))?;
        let type_name = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(DecodeError::MissingType)?;
        if !MESSAGE_TYPES.contains(&type_name) {
            return Err(DecodeError::UnknownType(type_name.to_string()));
        }
        let type_name = type_name.to_string();
        serde_json::from_value(value)
            .map_err(|error| DecodeError::Malformed { type_name, reason: error.to_string() })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("message has no string `type` field")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("malformed `{type_name}` payload: {reason}")]
    Malformed { type_name: String, reason: String },
}

impl DecodeError {
    /// Unknown types are expected from newer peers and are skipped silently.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}

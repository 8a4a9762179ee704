// Core domain types shared by every execution context.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::geometry::{NormalizedRect, PageSize, Rect};
use crate::ids::{DocumentId, HighlightId, LocalId, PageId};
use crate::selector::fingerprint::Fingerprint;

// ── Selectors ──────────────────────────────────────────────────────

/// Location-independent description of a highlighted span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Selector {
    /// Quote with bounded context, for flat documents.
    #[serde(rename = "TextQuote")]
    TextQuote {
        exact: String,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        suffix: String,
    },
    /// Page + rect list, for paginated surfaces.
    #[serde(rename = "PdfArea")]
    PdfArea {
        page: u32,
        text: String,
        primary_rect: Rect,
        rects: Vec<Rect>,
        /// Page size at capture-time scale, used for normalization.
        page_width: f64,
        page_height: f64,
    },
}

impl Selector {
    /// The highlighted text.
    pub fn text(&self) -> &str {
        match self {
            Self::TextQuote { exact, .. } => exact,
            Self::PdfArea { text, .. } => text,
        }
    }

    pub fn page(&self) -> Option<u32> {
        match self {
            Self::TextQuote { .. } => None,
            Self::PdfArea { page, .. } => Some(*page),
        }
    }

    pub fn page_size(&self) -> Option<PageSize> {
        match self {
            Self::TextQuote { .. } => None,
            Self::PdfArea { page_width, page_height, .. } => {
                Some(PageSize::new(*page_width, *page_height))
            }
        }
    }

    pub fn is_area(&self) -> bool {
        matches!(self, Self::PdfArea { .. })
    }

    /// Page and page-normalized primary rect of an area selector.
    pub fn normalized_area(&self) -> Option<(u32, NormalizedRect)> {
        match self {
            Self::TextQuote { .. } => None,
            Self::PdfArea { page, primary_rect, page_width, page_height, .. } => {
                Some((*page, primary_rect.normalize(PageSize::new(*page_width, *page_height))))
            }
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::for_selector(self)
    }
}

// ── Judgment ───────────────────────────────────────────────────────

/// Reviewer sentiment attached to a highlight or a whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    #[serde(alias = "thumbs_up")]
    Thumbsup,
    #[serde(alias = "thumbs_down")]
    Thumbsdown,
    Neutral,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Thumbsup => "thumbsup",
            Self::Thumbsdown => "thumbsdown",
            Self::Neutral => "neutral",
        };
        f.write_str(label)
    }
}

/// Category a reviewer may assign in a judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JudgmentLabel {
    #[serde(rename = "Core Concept")]
    CoreConcept,
    #[serde(rename = "Not Relevant")]
    NotRelevant,
    #[serde(rename = "Method Weakness")]
    MethodWeakness,
    #[serde(rename = "Generate New Search")]
    GenerateNewSearch,
}

/// Reasoning attached to a highlight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJudgment {
    pub chosen_label: JudgmentLabel,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl UserJudgment {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.confidence {
            Some(value) if !(0.0..=1.0).contains(&value) => {
                Err(ValidationError::ConfidenceOutOfRange(value))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("selection text is empty")]
    EmptyText,
    #[error("selection has no client rectangles")]
    NoRects,
    #[error("page box has invalid dimensions {width}x{height}")]
    InvalidPageBox { width: f64, height: f64 },
    #[error("confidence must be within [0, 1], got {0}")]
    ConfidenceOutOfRange(f64),
    #[error("document url is empty")]
    EmptyUrl,
}

// ── Highlights ─────────────────────────────────────────────────────

/// Lifecycle state of a highlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightState {
    PendingLocal,
    Confirmed,
    Failed,
    Removed,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal highlight transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: HighlightState,
    pub to: HighlightState,
}

impl HighlightState {
    /// Validate `self -> next`. Re-entering the current state is accepted so
    /// duplicated broadcasts stay idempotent.
    pub fn transition(self, next: HighlightState) -> Result<HighlightState, TransitionError> {
        use HighlightState::*;
        let allowed = self == next
            || matches!(
                (self, next),
                (PendingLocal, Confirmed)
                    | (PendingLocal, Failed)
                    | (PendingLocal, Removed)
                    | (Failed, Removed)
                    | (Confirmed, Removed)
            );
        if allowed {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == HighlightState::Removed
    }
}

/// A reviewer highlight as tracked by the control panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub local_id: LocalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_id: Option<HighlightId>,
    pub sentiment: Sentiment,
    pub text: String,
    pub selector: Selector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgment: Option<UserJudgment>,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub ai_suggestions: Vec<String>,
    pub state: HighlightState,
    pub created_at: DateTime<Utc>,
}

impl Highlight {
    /// Does this highlight answer to either identifier?
    pub fn is_identified_by(
        &self,
        local_id: Option<&LocalId>,
        highlight_id: Option<&HighlightId>,
    ) -> bool {
        if let (Some(wanted), Some(own)) = (highlight_id, self.highlight_id.as_ref()) {
            if wanted == own {
                return true;
            }
        }
        local_id.is_some_and(|wanted| wanted == &self.local_id)
    }
}

// ── Documents ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DocumentType {
    #[default]
    #[serde(rename = "html", alias = "flat")]
    Flat,
    #[serde(rename = "pdf", alias = "paginated")]
    Paginated,
}

/// Page metadata sent alongside a committed selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub doc_type: DocumentType,
}

impl DocumentMeta {
    pub fn key(&self) -> String {
        document_key(&self.url)
    }
}

/// Cache key for a document URL: parsed, fragment stripped. Unparseable
/// input is used trimmed as-is.
pub fn document_key(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DocumentReview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub highlight_order: Vec<HighlightId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocumentSummary {
    #[serde(default)]
    pub final_thoughts: String,
    #[serde(default)]
    pub next_steps: String,
}

/// Authoritative per-document state held by the control panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    #[serde(default)]
    pub highlights: Vec<Highlight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<DocumentReview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DocumentSummary>,
}

impl DocumentRecord {
    pub fn new(meta: &DocumentMeta) -> Self {
        Self {
            url: meta.key(),
            document_id: None,
            title: meta.title.clone(),
            doc_type: meta.doc_type,
            highlights: Vec::new(),
            review: None,
            summary: None,
        }
    }

    pub fn find(
        &self,
        local_id: Option<&LocalId>,
        highlight_id: Option<&HighlightId>,
    ) -> Option<usize> {
        // Canonical id wins over the local one.
        if let Some(wanted) = highlight_id {
            if let Some(index) =
                self.highlights.iter().position(|h| h.highlight_id.as_ref() == Some(wanted))
            {
                return Some(index);
            }
        }
        local_id.and_then(|wanted| self.highlights.iter().position(|h| &h.local_id == wanted))
    }

    pub fn highlight_mut(&mut self, local_id: &LocalId) -> Option<&mut Highlight> {
        self.highlights.iter_mut().find(|h| &h.local_id == local_id)
    }
}

// ── Session & trajectory ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub expert_name: String,
    pub topic: String,
    pub research_goal: String,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
}

/// A search performed by the reviewer on some search platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchEpisode {
    pub page_id: PageId,
    pub platform: String,
    pub query: String,
    #[serde(default)]
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// Any other reviewer action worth replaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub interaction_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrajectoryEntry {
    SearchEpisode(SearchEpisode),
    Interaction(Interaction),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_local_can_confirm_fail_or_be_removed() {
        use HighlightState::*;
        assert_eq!(PendingLocal.transition(Confirmed), Ok(Confirmed));
        assert_eq!(PendingLocal.transition(Failed), Ok(Failed));
        assert_eq!(PendingLocal.transition(Removed), Ok(Removed));
        assert_eq!(Failed.transition(Removed), Ok(Removed));
        assert_eq!(Confirmed.transition(Removed), Ok(Removed));
    }

    #[test]
    fn confirmed_cannot_fall_back_to_pending_or_failed() {
        use HighlightState::*;
        assert!(Confirmed.transition(PendingLocal).is_err());
        assert!(Confirmed.transition(Failed).is_err());
        assert!(Removed.transition(Confirmed).is_err());
        assert_eq!(Confirmed.transition(Confirmed), Ok(Confirmed));
    }

    #[test]
    fn judgment_labels_use_service_spelling() {
        let json = serde_json::to_string(&JudgmentLabel::MethodWeakness).unwrap();
        assert_eq!(json, "\"Method Weakness\"");
        assert!(serde_json::from_str::<JudgmentLabel>("\"Made Up\"").is_err());
    }

    #[test]
    fn confidence_outside_unit_interval_is_rejected() {
        let judgment = UserJudgment {
            chosen_label: JudgmentLabel::CoreConcept,
            reasoning: "central claim".into(),
            confidence: Some(1.5),
        };
        assert_eq!(judgment.validate(), Err(ValidationError::ConfidenceOutOfRange(1.5)));
    }

    #[test]
    fn document_key_strips_fragment() {
        assert_eq!(
            document_key(" https://example.org/paper.pdf#page=3 "),
            "https://example.org/paper.pdf"
        );
        assert_eq!(document_key("not a url"), "not a url");
    }

    #[test]
    fn document_type_accepts_both_spellings() {
        let flat: DocumentType = serde_json::from_str("\"flat\"").unwrap();
        let pdf: DocumentType = serde_json::from_str("\"pdf\"").unwrap();
        assert_eq!(flat, DocumentType::Flat);
        assert_eq!(pdf, DocumentType::Paginated);
        assert_eq!(serde_json::to_string(&DocumentType::Flat).unwrap(), "\"html\"");
    }

    #[test]
    fn sentiment_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Sentiment::Thumbsup).unwrap(), "\"thumbsup\"");
        let parsed: Sentiment = serde_json::from_str("\"thumbs_down\"").unwrap();
        assert_eq!(parsed, Sentiment::Thumbsdown);
    }
}

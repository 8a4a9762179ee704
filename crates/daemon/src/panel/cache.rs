// Control panel cache: the single writer of authoritative highlight state.
//
// Every method is a synchronous reducer. Remote calls are described by the
// returned plans and their outcomes fed back in later, possibly after the
// highlight they concern has already been removed locally.

use std::collections::HashSet;
use std::mem;

use annotator_common::ids::{DocumentId, HighlightId, LocalId};
use annotator_common::protocol::messages::{
    DocumentReviewRequested, DocumentReviewSaved, DocumentSummaryUpdate, HighlightConfirmed,
    HighlightRef, HighlightRemoveFailed, HighlightSaveFailed, HighlightUpdate,
    HighlightUpdateFailed, PdfMarkCreated, SelectionCommitted,
};
use annotator_common::protocol::service::{HighlightCreateRequest, HighlightResponse};
use annotator_common::protocol::Message;
use annotator_common::types::{
    document_key, DocumentMeta, DocumentRecord, DocumentReview, DocumentSummary, DocumentType,
    Highlight, HighlightState, UserJudgment, ValidationError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::ordering::{dedupe_order, order_highlights};
use super::remote::RemoteError;
use crate::store::DocumentMap;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PanelError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("unknown document `{0}`")]
    UnknownDocument(String),
    #[error("document `{0}` is not paginated")]
    NotPaginated(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("{operation} failed: {reason}")]
    Failed { operation: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// User-visible status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// Document a remote call is about; the id is filled in once known.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTarget {
    pub meta: DocumentMeta,
    pub document_id: Option<DocumentId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Staged {
    Create { document: DocumentTarget, local_id: LocalId, request: HighlightCreateRequest },
    /// Already staged under this `local_id`.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Confirmed(Vec<Message>),
    /// The highlight was removed locally while its create was in flight;
    /// the server copy must be deleted.
    Orphaned { target: HighlightRef, highlight_id: HighlightId },
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemovalPlan {
    /// Nothing to ask the service; broadcast right away.
    Resolved(Message),
    Remote { target: HighlightRef, highlight_id: HighlightId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchPlan {
    Remote { update: HighlightUpdate, previous: Option<UserJudgment> },
    /// Target unknown locally: treated as already resolved.
    Resolved,
    Rejected(Message),
}

#[derive(Debug, Default)]
pub struct PanelCache {
    documents: DocumentMap,
    in_flight: HashSet<LocalId>,
    tombstones: HashSet<LocalId>,
    notices: Vec<Notice>,
    dirty: bool,
}

impl PanelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a stored document map. Highlights that never reached
    /// `Confirmed` cannot be reconciled and are dropped.
    pub fn restore(documents: DocumentMap) -> Self {
        let mut documents = documents;
        for record in documents.values_mut() {
            record.highlights.retain(|highlight| highlight.state == HighlightState::Confirmed);
        }
        Self { documents, ..Self::default() }
    }

    pub fn documents(&self) -> &DocumentMap {
        &self.documents
    }

    pub fn document(&self, url: &str) -> Option<&DocumentRecord> {
        self.documents.get(&document_key(url))
    }

    pub fn document_id(&self, url: &str) -> Option<DocumentId> {
        self.document(url).and_then(|record| record.document_id.clone())
    }

    pub fn highlights(&self, url: &str) -> &[Highlight] {
        self.document(url).map(|record| record.highlights.as_slice()).unwrap_or(&[])
    }

    pub fn find_highlight(&self, url: &str, local_id: &LocalId) -> Option<&Highlight> {
        self.document(url)?.highlights.iter().find(|highlight| &highlight.local_id == local_id)
    }

    pub fn in_flight_creates(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_tombstoned(&self, local_id: &LocalId) -> bool {
        self.tombstones.contains(local_id)
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        mem::take(&mut self.notices)
    }

    /// True once after any change that should reach the shared store.
    pub fn take_dirty(&mut self) -> bool {
        mem::replace(&mut self.dirty, false)
    }

    pub fn notify(&mut self, level: NoticeLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            NoticeLevel::Info => info!(notice = %text, "panel notice"),
            NoticeLevel::Error => warn!(notice = %text, "panel notice"),
        }
        self.notices.push(Notice { level, text });
    }

    // ── Documents ──────────────────────────────────────────────────

    /// Record a service-assigned document id, creating the record if needed.
    pub fn memoize_document(&mut self, meta: &DocumentMeta, document_id: DocumentId) {
        let record =
            self.documents.entry(meta.key()).or_insert_with(|| DocumentRecord::new(meta));
        if record.document_id.as_ref() != Some(&document_id) {
            record.document_id = Some(document_id);
            self.dirty = true;
        }
    }

    fn target_for(record: &DocumentRecord) -> DocumentTarget {
        DocumentTarget {
            meta: DocumentMeta {
                url: record.url.clone(),
                title: record.title.clone(),
                doc_type: record.doc_type,
            },
            document_id: record.document_id.clone(),
        }
    }

    // ── Create ─────────────────────────────────────────────────────

    pub fn stage_selection(
        &mut self,
        committed: &SelectionCommitted,
    ) -> Result<Staged, PanelError> {
        let key = committed.document.key();
        if key.is_empty() {
            return Err(ValidationError::EmptyUrl.into());
        }
        if committed.selector.text().trim().is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        if let Some(judgment) = &committed.judgment {
            judgment.validate()?;
        }
        if self.tombstones.contains(&committed.local_id) {
            return Ok(Staged::Duplicate);
        }

        let record = self
            .documents
            .entry(key.clone())
            .or_insert_with(|| DocumentRecord::new(&committed.document));
        if record.find(Some(&committed.local_id), None).is_some() {
            debug!(local_id = %committed.local_id, "duplicate selection ignored");
            return Ok(Staged::Duplicate);
        }
        if record.title.is_empty() {
            record.title = committed.document.title.clone();
        }

        let selector = committed.selector.clone();
        let text = selector.text().to_string();
        record.highlights.push(Highlight {
            local_id: committed.local_id.clone(),
            highlight_id: None,
            sentiment: committed.sentiment,
            text: text.clone(),
            fingerprint: selector.fingerprint(),
            selector: selector.clone(),
            context: committed.context.clone(),
            judgment: committed.judgment.clone(),
            ai_suggestions: Vec::new(),
            state: HighlightState::PendingLocal,
            created_at: committed.committed_at,
        });
        let document = Self::target_for(record);
        self.in_flight.insert(committed.local_id.clone());
        self.dirty = true;
        debug!(document = %key, local_id = %committed.local_id, "highlight staged");

        Ok(Staged::Create {
            document,
            local_id: committed.local_id.clone(),
            request: HighlightCreateRequest {
                text,
                selector,
                context: committed.context.clone(),
                ai_suggestions: Vec::new(),
                user_judgment: committed.judgment.clone(),
                sentiment: Some(committed.sentiment),
            },
        })
    }

    /// A selection the panel will not stage; the capture agent unwraps it.
    pub fn reject_selection(
        &mut self,
        committed: &SelectionCommitted,
        error: &PanelError,
    ) -> Vec<Message> {
        self.notify(NoticeLevel::Error, format!("Highlight discarded: {error}"));
        vec![Message::HighlightSaveFailed(HighlightSaveFailed {
            local_id: committed.local_id.clone(),
            document_url: committed.document.key(),
            reason: error.to_string(),
        })]
    }

    pub fn confirm(
        &mut self,
        document_url: &str,
        local_id: &LocalId,
        response: HighlightResponse,
    ) -> ConfirmOutcome {
        let key = document_key(document_url);
        self.in_flight.remove(local_id);
        if self.tombstones.remove(local_id) {
            info!(
                local_id = %local_id,
                highlight_id = %response.highlight_id,
                "create landed after local removal"
            );
            return ConfirmOutcome::Orphaned {
                target: HighlightRef {
                    local_id: Some(local_id.clone()),
                    highlight_id: Some(response.highlight_id.clone()),
                    document_url: key,
                },
                highlight_id: response.highlight_id,
            };
        }

        let Some(highlight) =
            self.documents.get_mut(&key).and_then(|record| record.highlight_mut(local_id))
        else {
            debug!(local_id = %local_id, "confirmation for unknown highlight");
            return ConfirmOutcome::Unknown;
        };
        match highlight.state.transition(HighlightState::Confirmed) {
            Ok(state) => highlight.state = state,
            Err(error) => {
                warn!(%error, local_id = %local_id, "confirmation rejected");
                return ConfirmOutcome::Unknown;
            }
        }
        highlight.highlight_id = Some(response.highlight_id.clone());
        if !response.ai_suggestions.is_empty() {
            highlight.ai_suggestions = response.ai_suggestions;
        }
        self.dirty = true;
        info!(local_id = %local_id, highlight_id = %response.highlight_id, "highlight confirmed");

        let mut messages = vec![Message::HighlightConfirmed(HighlightConfirmed {
            local_id: local_id.clone(),
            highlight_id: response.highlight_id.clone(),
            document_url: key.clone(),
        })];
        if let Some((page, rect)) = highlight.selector.normalized_area() {
            messages.push(Message::PdfMarkCreated(PdfMarkCreated {
                document_url: key,
                page,
                rect,
                sentiment: highlight.sentiment,
                fingerprint: highlight.fingerprint.clone(),
                local_id: Some(local_id.clone()),
                highlight_id: Some(response.highlight_id),
            }));
        }
        ConfirmOutcome::Confirmed(messages)
    }

    pub fn fail_create(
        &mut self,
        document_url: &str,
        local_id: &LocalId,
        error: &RemoteError,
    ) -> Vec<Message> {
        let key = document_key(document_url);
        self.in_flight.remove(local_id);
        if self.tombstones.remove(local_id) {
            // Already removed and broadcast.
            return Vec::new();
        }
        if let Some(record) = self.documents.get_mut(&key) {
            // Failed highlights are not kept; the capture agent unwraps its mark.
            if let Some(index) = record.find(Some(local_id), None) {
                record.highlights.remove(index);
                self.dirty = true;
            }
        }
        self.notify(
            NoticeLevel::Error,
            format!("Could not save highlight: {}", error.user_message()),
        );
        vec![Message::HighlightSaveFailed(HighlightSaveFailed {
            local_id: local_id.clone(),
            document_url: key,
            reason: error.to_string(),
        })]
    }

    // ── Remove ─────────────────────────────────────────────────────

    pub fn stage_removal(&mut self, request: &HighlightRef) -> RemovalPlan {
        let key = document_key(&request.document_url);
        let echo = || {
            Message::HighlightRemoved(HighlightRef {
                local_id: request.local_id.clone(),
                highlight_id: request.highlight_id.clone(),
                document_url: key.clone(),
            })
        };
        let Some(record) = self.documents.get_mut(&key) else {
            debug!(document = %key, "removal for unknown document treated as resolved");
            return RemovalPlan::Resolved(echo());
        };
        let Some(index) = record.find(request.local_id.as_ref(), request.highlight_id.as_ref())
        else {
            debug!(document = %key, "removal for unknown highlight treated as resolved");
            return RemovalPlan::Resolved(echo());
        };

        let highlight = &record.highlights[index];
        let target = HighlightRef {
            local_id: Some(highlight.local_id.clone()),
            highlight_id: highlight.highlight_id.clone(),
            document_url: key.clone(),
        };
        if let Some(highlight_id) = highlight.highlight_id.clone() {
            return RemovalPlan::Remote { target, highlight_id };
        }

        // Never confirmed: resolve locally without a network call.
        let removed = record.highlights.remove(index);
        if self.in_flight.contains(&removed.local_id) {
            self.tombstones.insert(removed.local_id.clone());
        }
        self.dirty = true;
        info!(document = %key, local_id = %removed.local_id, "local-only highlight removed");
        RemovalPlan::Resolved(Message::HighlightRemoved(target))
    }

    pub fn finish_removal(
        &mut self,
        target: &HighlightRef,
        result: &Result<(), RemoteError>,
    ) -> Vec<Message> {
        match result {
            Ok(()) | Err(RemoteError::NotFound(_)) => {
                self.prune(target);
                vec![Message::HighlightRemoved(target.clone())]
            }
            Err(error) => {
                self.notify(
                    NoticeLevel::Error,
                    format!("Could not remove highlight: {}", error.user_message()),
                );
                vec![Message::HighlightRemoveFailed(HighlightRemoveFailed {
                    target: target.clone(),
                    reason: error.to_string(),
                })]
            }
        }
    }

    fn prune(&mut self, target: &HighlightRef) {
        let Some(record) = self.documents.get_mut(&document_key(&target.document_url)) else {
            return;
        };
        if let Some(index) = record.find(target.local_id.as_ref(), target.highlight_id.as_ref()) {
            record.highlights.remove(index);
            self.dirty = true;
        }
        if let (Some(review), Some(highlight_id)) = (record.review.as_mut(), &target.highlight_id) {
            let before = review.highlight_order.len();
            review.highlight_order.retain(|id| id != highlight_id);
            self.dirty |= review.highlight_order.len() != before;
        }
    }

    // ── Patch ──────────────────────────────────────────────────────

    pub fn stage_patch(&mut self, update: &HighlightUpdate) -> PatchPlan {
        let key = document_key(&update.document_url);
        if let Err(error) = update.judgment.validate() {
            self.notify(NoticeLevel::Error, format!("Judgment not saved: {error}"));
            return PatchPlan::Rejected(Message::HighlightUpdateFailed(HighlightUpdateFailed {
                highlight_id: update.highlight_id.clone(),
                document_url: key,
                reason: error.to_string(),
            }));
        }
        let Some(highlight) = self.documents.get_mut(&key).and_then(|record| {
            let index = record.find(None, Some(&update.highlight_id))?;
            record.highlights.get_mut(index)
        }) else {
            debug!(highlight_id = %update.highlight_id, "patch for unknown highlight ignored");
            return PatchPlan::Resolved;
        };

        let previous = highlight.judgment.replace(update.judgment.clone());
        self.dirty = true;
        PatchPlan::Remote {
            update: HighlightUpdate { document_url: key, ..update.clone() },
            previous,
        }
    }

    pub fn finish_patch(
        &mut self,
        update: &HighlightUpdate,
        previous: Option<UserJudgment>,
        result: &Result<(), RemoteError>,
    ) -> Vec<Message> {
        let Err(error) = result else {
            return vec![Message::HighlightUpdated(update.clone())];
        };

        let key = document_key(&update.document_url);
        if let Some(highlight) = self.documents.get_mut(&key).and_then(|record| {
            let index = record.find(None, Some(&update.highlight_id))?;
            record.highlights.get_mut(index)
        }) {
            highlight.judgment = previous;
            self.dirty = true;
        }
        self.notify(
            NoticeLevel::Error,
            format!("Could not update highlight: {}", error.user_message()),
        );
        vec![Message::HighlightUpdateFailed(HighlightUpdateFailed {
            highlight_id: update.highlight_id.clone(),
            document_url: key,
            reason: error.to_string(),
        })]
    }

    // ── Review & summary ───────────────────────────────────────────

    pub fn stage_review(
        &mut self,
        request: &DocumentReviewRequested,
    ) -> Result<(DocumentTarget, DocumentReview), PanelError> {
        let key = document_key(&request.document_url);
        let record =
            self.documents.get(&key).ok_or_else(|| PanelError::UnknownDocument(key.clone()))?;
        if record.doc_type != DocumentType::Paginated {
            return Err(PanelError::NotPaginated(key));
        }
        let review = DocumentReview {
            sentiment: request.sentiment,
            highlight_order: dedupe_order(&request.highlight_order),
        };
        Ok((Self::target_for(record), review))
    }

    pub fn finish_review(
        &mut self,
        document_url: &str,
        review: DocumentReview,
        result: &Result<(), RemoteError>,
    ) -> Vec<Message> {
        let key = document_key(document_url);
        if let Err(error) = result {
            let text = format!("Could not save review: {}", error.user_message());
            self.notify(NoticeLevel::Error, text);
            return Vec::new();
        }
        let Some(record) = self.documents.get_mut(&key) else {
            return Vec::new();
        };
        order_highlights(&mut record.highlights, &review.highlight_order);
        record.review = Some(review.clone());
        self.dirty = true;
        info!(document = %key, ordered = review.highlight_order.len(), "review saved");
        vec![Message::DocumentReviewSaved(DocumentReviewSaved { document_url: key, review })]
    }

    pub fn stage_summary(&mut self, update: &DocumentSummaryUpdate) -> DocumentTarget {
        let meta = DocumentMeta {
            url: update.document_url.clone(),
            title: String::new(),
            doc_type: DocumentType::default(),
        };
        let record = self.documents.entry(meta.key()).or_insert_with(|| DocumentRecord::new(&meta));
        Self::target_for(record)
    }

    pub fn finish_summary(
        &mut self,
        document_url: &str,
        summary: DocumentSummary,
        result: &Result<(), RemoteError>,
    ) -> Vec<Message> {
        let key = document_key(document_url);
        if let Err(error) = result {
            let text = format!("Could not save summary: {}", error.user_message());
            self.notify(NoticeLevel::Error, text);
            return Vec::new();
        }
        if let Some(record) = self.documents.get_mut(&key) {
            record.summary = Some(summary.clone());
            self.dirty = true;
        }
        vec![Message::DocumentSummarySaved(DocumentSummaryUpdate { document_url: key, summary })]
    }
}

#[cfg(test)]
mod tests {
    use annotator_common::geometry::Rect;
    use annotator_common::types::{JudgmentLabel, Selector, Sentiment};
    use chrono::Utc;

    use super::*;

    const URL: &str = "https://example.org/trial.pdf";

    fn meta(doc_type: DocumentType) -> DocumentMeta {
        DocumentMeta { url: URL.into(), title: "Trial".into(), doc_type }
    }

    fn quote_selection(local: &str) -> SelectionCommitted {
        SelectionCommitted {
            local_id: LocalId::new(local),
            document: meta(DocumentType::Flat),
            selector: Selector::TextQuote {
                exact: "Effect size is modest".into(),
                prefix: String::new(),
                suffix: String::new(),
            },
            sentiment: Sentiment::Thumbsup,
            context: None,
            judgment: None,
            page_id: None,
            committed_at: Utc::now(),
        }
    }

    fn area_selection(local: &str) -> SelectionCommitted {
        SelectionCommitted {
            document: meta(DocumentType::Paginated),
            selector: Selector::PdfArea {
                page: 3,
                text: "Effect size is modest".into(),
                primary_rect: Rect::from_corners(100.0, 200.0, 300.0, 220.0),
                rects: vec![Rect::from_corners(100.0, 200.0, 300.0, 220.0)],
                page_width: 1000.0,
                page_height: 1000.0,
            },
            ..quote_selection(local)
        }
    }

    fn response(id: &str) -> HighlightResponse {
        HighlightResponse {
            highlight_id: HighlightId::new(id),
            text: "Effect size is modest".into(),
            selector: Selector::TextQuote {
                exact: "Effect size is modest".into(),
                prefix: String::new(),
                suffix: String::new(),
            },
            ai_suggestions: vec!["Check the confidence interval.".into()],
            user_judgment: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn staged(cache: &mut PanelCache, selection: &SelectionCommitted) {
        assert!(matches!(cache.stage_selection(selection), Ok(Staged::Create { .. })));
    }

    fn confirmed(cache: &mut PanelCache, local: &str, id: &str) {
        staged(cache, &quote_selection(local));
        assert!(matches!(
            cache.confirm(URL, &LocalId::new(local), response(id)),
            ConfirmOutcome::Confirmed(_)
        ));
    }

    #[test]
    fn duplicate_selection_is_ignored() {
        let mut cache = PanelCache::new();
        let selection = quote_selection("local-1");
        staged(&mut cache, &selection);
        assert_eq!(cache.stage_selection(&selection), Ok(Staged::Duplicate));
        assert_eq!(cache.highlights(URL).len(), 1);
        assert_eq!(cache.in_flight_creates(), 1);
    }

    #[test]
    fn invalid_judgment_is_rejected_before_staging() {
        let mut cache = PanelCache::new();
        let selection = SelectionCommitted {
            judgment: Some(UserJudgment {
                chosen_label: JudgmentLabel::NotRelevant,
                reasoning: String::new(),
                confidence: Some(2.0),
            }),
            ..quote_selection("local-1")
        };
        let error = cache.stage_selection(&selection).unwrap_err();
        assert_eq!(error, PanelError::Invalid(ValidationError::ConfidenceOutOfRange(2.0)));
        let messages = cache.reject_selection(&selection, &error);
        assert!(matches!(&messages[..], [Message::HighlightSaveFailed(_)]));
        assert!(cache.highlights(URL).is_empty());
    }

    #[test]
    fn confirmation_attaches_id_and_suggestions() {
        let mut cache = PanelCache::new();
        confirmed(&mut cache, "local-1", "hl-42");
        let highlight = &cache.highlights(URL)[0];
        assert_eq!(highlight.state, HighlightState::Confirmed);
        assert_eq!(highlight.highlight_id, Some(HighlightId::new("hl-42")));
        assert_eq!(highlight.ai_suggestions.len(), 1);
        assert_eq!(cache.in_flight_creates(), 0);
        assert!(cache.take_dirty());
        assert!(!cache.take_dirty());
    }

    #[test]
    fn area_confirmation_also_announces_identified_mark() {
        let mut cache = PanelCache::new();
        staged(&mut cache, &area_selection("local-9"));
        match cache.confirm(URL, &LocalId::new("local-9"), response("hl-9")) {
            ConfirmOutcome::Confirmed(messages) => match &messages[..] {
                [Message::HighlightConfirmed(_), Message::PdfMarkCreated(mark)] => {
                    assert_eq!(mark.highlight_id, Some(HighlightId::new("hl-9")));
                    assert_eq!(mark.local_id, Some(LocalId::new("local-9")));
                    assert_eq!(mark.page, 3);
                }
                other => panic!("unexpected messages {other:?}"),
            },
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn failed_create_removes_highlight_and_notifies() {
        let mut cache = PanelCache::new();
        staged(&mut cache, &quote_selection("local-1"));
        let error = RemoteError::Rejected { status: 422, message: "selector is invalid".into() };
        let messages = cache.fail_create(URL, &LocalId::new("local-1"), &error);
        assert!(matches!(
            &messages[..],
            [Message::HighlightSaveFailed(f)] if f.local_id.as_str() == "local-1"
        ));
        assert!(cache.highlights(URL).is_empty());
        let notices = cache.drain_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(notices[0].text.contains("selector is invalid"));
    }

    #[test]
    fn local_only_removal_resolves_without_network_and_tombstones() {
        let mut cache = PanelCache::new();
        staged(&mut cache, &quote_selection("local-1"));
        let request = HighlightRef {
            local_id: Some(LocalId::new("local-1")),
            highlight_id: None,
            document_url: URL.into(),
        };
        assert!(matches!(
            cache.stage_removal(&request),
            RemovalPlan::Resolved(Message::HighlightRemoved(_))
        ));
        assert!(cache.highlights(URL).is_empty());
        assert!(cache.is_tombstoned(&LocalId::new("local-1")));

        match cache.confirm(URL, &LocalId::new("local-1"), response("hl-7")) {
            ConfirmOutcome::Orphaned { highlight_id, .. } => {
                assert_eq!(highlight_id.as_str(), "hl-7")
            }
            other => panic!("expected orphan, got {other:?}"),
        }
        assert!(!cache.is_tombstoned(&LocalId::new("local-1")));
    }

    #[test]
    fn removal_prefers_highlight_id_over_local_id() {
        let mut cache = PanelCache::new();
        confirmed(&mut cache, "l1", "h1");
        confirmed(&mut cache, "l2", "h2");
        let request = HighlightRef {
            local_id: Some(LocalId::new("l2")),
            highlight_id: Some(HighlightId::new("h1")),
            document_url: URL.into(),
        };
        match cache.stage_removal(&request) {
            RemovalPlan::Remote { highlight_id, target } => {
                assert_eq!(highlight_id.as_str(), "h1");
                assert_eq!(target.local_id, Some(LocalId::new("l1")));
            }
            other => panic!("expected remote removal, got {other:?}"),
        }
    }

    #[test]
    fn unknown_removal_target_is_resolved_quietly() {
        let mut cache = PanelCache::new();
        let request = HighlightRef {
            local_id: None,
            highlight_id: Some(HighlightId::new("ghost")),
            document_url: URL.into(),
        };
        assert!(matches!(cache.stage_removal(&request), RemovalPlan::Resolved(_)));
        assert!(cache.notices().is_empty());
    }

    #[test]
    fn remote_removal_prunes_review_order_or_reports_failure() {
        let mut cache = PanelCache::new();
        confirmed(&mut cache, "l1", "h1");
        confirmed(&mut cache, "l2", "h2");
        cache.documents.get_mut(URL).unwrap().review = Some(DocumentReview {
            sentiment: None,
            highlight_order: vec![HighlightId::new("h2"), HighlightId::new("h1")],
        });
        let target = HighlightRef {
            local_id: Some(LocalId::new("l1")),
            highlight_id: Some(HighlightId::new("h1")),
            document_url: URL.into(),
        };

        let failed = cache.finish_removal(&target, &Err(RemoteError::Transport("reset".into())));
        assert!(matches!(&failed[..], [Message::HighlightRemoveFailed(_)]));
        assert_eq!(cache.highlights(URL).len(), 2);

        let removed = cache.finish_removal(&target, &Ok(()));
        assert!(matches!(&removed[..], [Message::HighlightRemoved(_)]));
        assert_eq!(cache.highlights(URL).len(), 1);
        let review = cache.document(URL).and_then(|r| r.review.clone()).unwrap();
        assert_eq!(review.highlight_order, vec![HighlightId::new("h2")]);
    }

    #[test]
    fn failed_patch_rolls_back_judgment() {
        let mut cache = PanelCache::new();
        confirmed(&mut cache, "l1", "h1");
        let update = HighlightUpdate {
            highlight_id: HighlightId::new("h1"),
            document_url: URL.into(),
            judgment: UserJudgment {
                chosen_label: JudgmentLabel::MethodWeakness,
                reasoning: "small sample".into(),
                confidence: Some(0.6),
            },
        };
        let PatchPlan::Remote { update, previous } = cache.stage_patch(&update) else {
            panic!("expected remote patch");
        };
        assert!(cache.highlights(URL)[0].judgment.is_some());

        let failure = Err(RemoteError::Transport("reset".into()));
        let messages = cache.finish_patch(&update, previous, &failure);
        assert!(matches!(&messages[..], [Message::HighlightUpdateFailed(_)]));
        assert!(cache.highlights(URL)[0].judgment.is_none());
    }

    #[test]
    fn review_requires_paginated_document_and_reorders() {
        let mut cache = PanelCache::new();
        confirmed(&mut cache, "l1", "h1");
        let request = DocumentReviewRequested {
            document_url: URL.into(),
            sentiment: Some(Sentiment::Thumbsup),
            highlight_order: vec![HighlightId::new("h1")],
        };
        assert_eq!(cache.stage_review(&request), Err(PanelError::NotPaginated(URL.into())));

        let mut cache = PanelCache::new();
        for (local, id) in [("l1", "h1"), ("l2", "h2"), ("l3", "h3")] {
            staged(&mut cache, &area_selection(local));
            cache.confirm(URL, &LocalId::new(local), response(id));
        }
        let request = DocumentReviewRequested {
            highlight_order: ["h2", "h1", "h2"].into_iter().map(HighlightId::new).collect(),
            ..request
        };
        let (_, review) = cache.stage_review(&request).expect("paginated review should stage");
        assert_eq!(review.highlight_order.len(), 2);
        let messages = cache.finish_review(URL, review, &Ok(()));
        assert!(matches!(&messages[..], [Message::DocumentReviewSaved(_)]));
        let order: Vec<&str> = cache
            .highlights(URL)
            .iter()
            .filter_map(|h| h.highlight_id.as_ref().map(HighlightId::as_str))
            .collect();
        assert_eq!(order, vec!["h2", "h1", "h3"]);
    }

    #[test]
    fn restore_drops_unconfirmed_highlights() {
        let mut cache = PanelCache::new();
        confirmed(&mut cache, "l1", "h1");
        staged(&mut cache, &quote_selection("l2"));
        let restored = PanelCache::restore(cache.documents().clone());
        assert_eq!(restored.highlights(URL).len(), 1);
        assert_eq!(restored.in_flight_creates(), 0);
    }
}

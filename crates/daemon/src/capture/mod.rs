// Capture agent: per-page selection state machine.
//
//   Idle ──selection──▶ PendingSelection ──commit──▶ Idle (mark applied)
//                              │
//                              └──cancel/replace──▶ Idle (mark reverted)
//
// The agent paints optimistically and reconciles from broadcasts. It never
// talks to the remote service and never fails across the message boundary:
// broadcasts for marks it does not hold are no-ops.

pub mod surface;

use annotator_common::ids::{HighlightId, LocalId, PageId};
use annotator_common::protocol::messages::{
    HighlightRef, InteractionRecorded, PdfMarkCancelled, PdfMarkCreated, SearchQueryDetected,
    SelectionCommitted,
};
use annotator_common::protocol::Message;
use annotator_common::selector::{PageSelection, SelectionSignature, SelectorBuilder, TextRange};
use annotator_common::types::{
    document_key, DocumentMeta, Interaction, Selector, Sentiment, UserJudgment, ValidationError,
};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

pub use surface::{CaptureMark, HeadlessSurface, MarkSurface, PaintedMark};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    PendingSelection,
}

/// A selection as reported by the page.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSelection {
    Text(TextRange),
    Area(PageSelection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Dismissed,
    Navigation,
    Hidden,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// Entered `PendingSelection`; carries cancellations for a replaced
    /// pending selection.
    Pending { messages: Vec<Message> },
    /// Same signature as the last selection; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    #[error("no pending selection to commit")]
    NothingPending,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone)]
struct PendingSelection {
    selector: Selector,
}

pub struct CaptureAgent<M> {
    document: DocumentMeta,
    document_key: String,
    page_id: Option<PageId>,
    builder: SelectorBuilder,
    surface: M,
    pending: Option<PendingSelection>,
    last_signature: Option<SelectionSignature>,
    marks: Vec<CaptureMark>,
    /// Optimistically unwrapped, awaiting `HighlightRemoved` or a failure.
    removing: Vec<CaptureMark>,
}

impl<M: MarkSurface> CaptureAgent<M> {
    pub fn new(document: DocumentMeta, builder: SelectorBuilder, surface: M) -> Self {
        let document_key = document.key();
        Self {
            document,
            document_key,
            page_id: None,
            builder,
            surface,
            pending: None,
            last_signature: None,
            marks: Vec::new(),
            removing: Vec::new(),
        }
    }

    pub fn with_page_id(mut self, page_id: PageId) -> Self {
        self.page_id = Some(page_id);
        self
    }

    pub fn state(&self) -> CaptureState {
        if self.pending.is_some() {
            CaptureState::PendingSelection
        } else {
            CaptureState::Idle
        }
    }

    pub fn document_url(&self) -> &str {
        &self.document_key
    }

    pub fn surface(&self) -> &M {
        &self.surface
    }

    pub fn marks(&self) -> &[CaptureMark] {
        &self.marks
    }

    pub fn pending_selector(&self) -> Option<&Selector> {
        self.pending.as_ref().map(|pending| &pending.selector)
    }

    // ── Selection lifecycle ────────────────────────────────────────

    pub fn on_selection(
        &mut self,
        selection: &RawSelection,
    ) -> Result<SelectionOutcome, ValidationError> {
        let selector = match selection {
            RawSelection::Text(range) => self.builder.quote(range)?,
            RawSelection::Area(area) => self.builder.area(area)?,
        };
        let signature = SelectionSignature::of(&selector);
        if self.last_signature.as_ref() == Some(&signature) {
            return Ok(SelectionOutcome::Duplicate);
        }

        let messages = self.discard_pending();
        if selector.is_area() {
            self.surface.show_provisional(&selector);
        }
        debug!(document = %self.document_key, %signature, "selection pending");
        self.last_signature = Some(signature);
        self.pending = Some(PendingSelection { selector });
        Ok(SelectionOutcome::Pending { messages })
    }

    /// Commit the pending selection. The mark is applied before any message
    /// leaves the page.
    pub fn commit(
        &mut self,
        sentiment: Sentiment,
        judgment: Option<UserJudgment>,
        context: Option<String>,
    ) -> Result<Vec<Message>, CaptureError> {
        if let Some(judgment) = &judgment {
            judgment.validate()?;
        }
        let PendingSelection { selector } =
            self.pending.take().ok_or(CaptureError::NothingPending)?;
        self.last_signature = None;

        let local_id = LocalId::generate();
        let mark = CaptureMark {
            local_id: local_id.clone(),
            highlight_id: None,
            sentiment,
            fingerprint: selector.fingerprint(),
            selector: selector.clone(),
        };
        self.surface.clear_provisional();
        self.surface.apply_mark(&mark);

        let mut messages = vec![Message::SelectionCommitted(SelectionCommitted {
            local_id: local_id.clone(),
            document: DocumentMeta { url: self.document_key.clone(), ..self.document.clone() },
            selector: selector.clone(),
            sentiment,
            context,
            judgment,
            page_id: self.page_id.clone(),
            committed_at: Utc::now(),
        })];
        if let Some((page, rect)) = selector.normalized_area() {
            messages.push(Message::PdfMarkCreated(PdfMarkCreated {
                document_url: self.document_key.clone(),
                page,
                rect,
                sentiment,
                fingerprint: mark.fingerprint.clone(),
                local_id: Some(local_id.clone()),
                highlight_id: None,
            }));
        }

        info!(
            document = %self.document_key,
            local_id = %local_id,
            %sentiment,
            "selection committed"
        );
        self.marks.push(mark);
        Ok(messages)
    }

    pub fn cancel(&mut self, reason: CancelReason) -> Vec<Message> {
        if self.pending.is_some() {
            debug!(document = %self.document_key, ?reason, "pending selection cancelled");
        }
        let messages = self.discard_pending();
        self.last_signature = None;
        messages
    }

    fn discard_pending(&mut self) -> Vec<Message> {
        let Some(PendingSelection { selector }) = self.pending.take() else {
            return Vec::new();
        };
        self.surface.clear_provisional();
        match selector.page() {
            Some(page) => vec![Message::PdfMarkCancelled(PdfMarkCancelled {
                document_url: self.document_key.clone(),
                page,
                local_id: None,
                fingerprint: selector.fingerprint(),
            })],
            None => Vec::new(),
        }
    }

    // ── Removal ────────────────────────────────────────────────────

    /// User asked to remove the mark `local_id`: unwrap now, ask the panel.
    pub fn request_removal(&mut self, local_id: &LocalId) -> Vec<Message> {
        let Some(index) = self.marks.iter().position(|mark| &mark.local_id == local_id) else {
            debug!(local_id = %local_id, "removal requested for unknown mark");
            return Vec::new();
        };
        let mark = self.marks.remove(index);
        self.surface.unwrap_mark(&mark.local_id);
        self.last_signature = None;
        let request = HighlightRef {
            local_id: Some(mark.local_id.clone()),
            highlight_id: mark.highlight_id.clone(),
            document_url: self.document_key.clone(),
        };
        self.removing.push(mark);
        vec![Message::HighlightRemoveRequested(request)]
    }

    // ── Trajectory signals ─────────────────────────────────────────

    pub fn observe_search(&self, platform: &str, query: &str) -> Option<Message> {
        let page_id = self.page_id.clone()?;
        if query.trim().is_empty() {
            return None;
        }
        Some(Message::SearchQueryDetected(SearchQueryDetected {
            page_id,
            platform: platform.to_string(),
            query: query.to_string(),
            url: self.document_key.clone(),
        }))
    }

    pub fn record_interaction(
        &self,
        interaction_type: &str,
        payload: serde_json::Value,
    ) -> Message {
        Message::InteractionRecorded(InteractionRecorded {
            interaction: Interaction {
                interaction_type: interaction_type.to_string(),
                payload,
                timestamp: Utc::now(),
            },
        })
    }

    // ── Reconciliation ─────────────────────────────────────────────

    /// Apply a broadcast. Returns whether local state changed.
    pub fn apply(&mut self, message: &Message) -> bool {
        match message.document_url() {
            Some(url) if document_key(url) == self.document_key => {}
            _ => return false,
        }

        match message {
            Message::HighlightConfirmed(confirmed) => {
                self.attach_highlight_id(&confirmed.local_id, &confirmed.highlight_id)
            }
            Message::HighlightSaveFailed(failed) => {
                debug!(
                    local_id = %failed.local_id,
                    reason = %failed.reason,
                    "save failed, unwrapping"
                );
                self.forget(Some(&failed.local_id), None)
            }
            Message::HighlightRemoved(removed) => {
                self.forget(removed.local_id.as_ref(), removed.highlight_id.as_ref())
            }
            Message::HighlightRemoveFailed(failed) => self.restore(&failed.target),
            _ => false,
        }
    }

    fn attach_highlight_id(&mut self, local_id: &LocalId, highlight_id: &HighlightId) -> bool {
        if let Some(mark) = self.removing.iter_mut().find(|mark| &mark.local_id == local_id) {
            mark.highlight_id = Some(highlight_id.clone());
        }
        let Some(mark) = self.marks.iter_mut().find(|mark| &mark.local_id == local_id) else {
            return false;
        };
        if mark.highlight_id.as_ref() == Some(highlight_id) {
            return false;
        }
        mark.highlight_id = Some(highlight_id.clone());
        self.surface.set_highlight_id(local_id, highlight_id);
        true
    }

    fn forget(&mut self, local_id: Option<&LocalId>, highlight_id: Option<&HighlightId>) -> bool {
        let mut changed = false;
        if let Some(index) = find_mark(&self.marks, local_id, highlight_id) {
            let mark = self.marks.remove(index);
            self.surface.unwrap_mark(&mark.local_id);
            self.last_signature = None;
            changed = true;
        }
        if let Some(index) = find_mark(&self.removing, local_id, highlight_id) {
            self.removing.remove(index);
            changed = true;
        }
        changed
    }

    fn restore(&mut self, target: &HighlightRef) -> bool {
        let Some(index) =
            find_mark(&self.removing, target.local_id.as_ref(), target.highlight_id.as_ref())
        else {
            return false;
        };
        let mark = self.removing.remove(index);
        self.surface.apply_mark(&mark);
        info!(local_id = %mark.local_id, "removal failed, mark restored");
        self.marks.push(mark);
        true
    }
}

/// `highlight_id` match first, then `local_id`.
fn find_mark(
    marks: &[CaptureMark],
    local_id: Option<&LocalId>,
    highlight_id: Option<&HighlightId>,
) -> Option<usize> {
    if let Some(wanted) = highlight_id {
        let found = marks.iter().position(|mark| mark.highlight_id.as_ref() == Some(wanted));
        if let Some(index) = found {
            return Some(index);
        }
    }
    marks.iter().position(|mark| mark.matches(local_id, None))
}

#[cfg(test)]
mod tests {
    use annotator_common::protocol::messages::{HighlightConfirmed, HighlightRemoveFailed};
    use annotator_common::selector::ClientRect;
    use annotator_common::types::{DocumentType, JudgmentLabel};

    use super::*;

    const URL: &str = "https://example.org/paper";

    fn flat_agent() -> CaptureAgent<HeadlessSurface> {
        let meta =
            DocumentMeta { url: URL.into(), title: "Paper".into(), doc_type: DocumentType::Flat };
        CaptureAgent::new(meta, SelectorBuilder::default(), HeadlessSurface::default())
    }

    fn pdf_agent() -> CaptureAgent<HeadlessSurface> {
        let meta = DocumentMeta {
            url: "https://example.org/paper.pdf".into(),
            title: "Paper".into(),
            doc_type: DocumentType::Paginated,
        };
        CaptureAgent::new(meta, SelectorBuilder::default(), HeadlessSurface::default())
    }

    fn text(exact: &str) -> RawSelection {
        RawSelection::Text(TextRange {
            text_before: "We report that ".into(),
            exact: exact.into(),
            text_after: " in all arms.".into(),
        })
    }

    fn area(page: u32) -> RawSelection {
        RawSelection::Area(PageSelection {
            page,
            page_box: ClientRect::new(0.0, 0.0, 1000.0, 1000.0),
            client_rects: vec![ClientRect::new(100.0, 200.0, 200.0, 20.0)],
            text: "Effect size is modest".into(),
        })
    }

    fn committed_local_id(messages: &[Message]) -> LocalId {
        match &messages[0] {
            Message::SelectionCommitted(committed) => committed.local_id.clone(),
            other => panic!("expected SelectionCommitted, got {other:?}"),
        }
    }

    #[test]
    fn commit_applies_mark_before_sending() {
        let mut agent = flat_agent();
        agent.on_selection(&text("Effect size is modest")).expect("selection should build");
        assert_eq!(agent.state(), CaptureState::PendingSelection);

        let messages =
            agent.commit(Sentiment::Thumbsup, None, None).expect("commit should succeed");
        assert_eq!(messages.len(), 1);
        assert_eq!(agent.state(), CaptureState::Idle);
        assert_eq!(agent.surface().painted().len(), 1);
        assert!(agent.surface().painted()[0].highlight_id.is_none());
        assert!(committed_local_id(&messages).as_str().starts_with("local-"));
    }

    #[test]
    fn repeated_selection_event_is_suppressed() {
        let mut agent = flat_agent();
        agent.on_selection(&text("Effect size is modest")).unwrap();
        assert_eq!(
            agent.on_selection(&text("Effect size is modest")).unwrap(),
            SelectionOutcome::Duplicate
        );
    }

    #[test]
    fn whitespace_selection_is_rejected_without_state_change() {
        let mut agent = flat_agent();
        assert_eq!(agent.on_selection(&text("   ")), Err(ValidationError::EmptyText));
        assert_eq!(agent.state(), CaptureState::Idle);
    }

    #[test]
    fn invalid_judgment_keeps_selection_pending() {
        let mut agent = flat_agent();
        agent.on_selection(&text("Effect size is modest")).unwrap();
        let judgment = UserJudgment {
            chosen_label: JudgmentLabel::CoreConcept,
            reasoning: String::new(),
            confidence: Some(-0.1),
        };
        let error = agent.commit(Sentiment::Neutral, Some(judgment), None).unwrap_err();
        assert_eq!(error, CaptureError::Invalid(ValidationError::ConfidenceOutOfRange(-0.1)));
        assert_eq!(agent.state(), CaptureState::PendingSelection);
    }

    #[test]
    fn area_commit_also_announces_pdf_mark() {
        let mut agent = pdf_agent();
        agent.on_selection(&area(3)).unwrap();
        assert!(agent.surface().provisional().is_some());

        let messages = agent.commit(Sentiment::Thumbsdown, None, None).unwrap();
        assert!(agent.surface().provisional().is_none());
        match &messages[1] {
            Message::PdfMarkCreated(created) => {
                assert_eq!(created.page, 3);
                assert_eq!(created.fingerprint.as_str(), "p3:0.1000:0.2000:0.3000:0.2200");
                assert_eq!(created.local_id, Some(committed_local_id(&messages)));
                assert!(created.highlight_id.is_none());
            }
            other => panic!("expected PdfMarkCreated, got {other:?}"),
        }
    }

    #[test]
    fn new_selection_cancels_pending_area() {
        let mut agent = pdf_agent();
        agent.on_selection(&area(3)).unwrap();
        let outcome = agent.on_selection(&area(4)).unwrap();
        match outcome {
            SelectionOutcome::Pending { messages } => {
                assert!(matches!(&messages[..], [Message::PdfMarkCancelled(c)] if c.page == 3));
            }
            other => panic!("expected pending, got {other:?}"),
        }
        assert_eq!(agent.pending_selector().and_then(Selector::page), Some(4));
    }

    #[test]
    fn cancel_allows_reselecting_same_range() {
        let mut agent = flat_agent();
        agent.on_selection(&text("Effect size is modest")).unwrap();
        assert!(agent.cancel(CancelReason::Navigation).is_empty());
        assert_eq!(agent.state(), CaptureState::Idle);
        assert!(matches!(
            agent.on_selection(&text("Effect size is modest")).unwrap(),
            SelectionOutcome::Pending { .. }
        ));
    }

    #[test]
    fn removed_passage_can_be_highlighted_again() {
        let mut agent = flat_agent();
        agent.on_selection(&text("Effect size is modest")).unwrap();
        let local_id = committed_local_id(&agent.commit(Sentiment::Thumbsup, None, None).unwrap());
        assert!(matches!(
            agent.on_selection(&text("Effect size is modest")).unwrap(),
            SelectionOutcome::Pending { .. }
        ));

        let requested = agent.request_removal(&local_id);
        assert_eq!(requested.len(), 1);
        assert!(agent.apply(&Message::HighlightRemoved(HighlightRef {
            local_id: Some(local_id),
            highlight_id: None,
            document_url: URL.into(),
        })));
        assert!(agent.marks().is_empty());
        assert!(matches!(
            agent.on_selection(&text("Effect size is modest")).unwrap(),
            SelectionOutcome::Pending { .. }
        ));
    }

    #[test]
    fn confirmation_is_idempotent() {
        let mut agent = flat_agent();
        agent.on_selection(&text("Effect size is modest")).unwrap();
        let local_id = committed_local_id(&agent.commit(Sentiment::Thumbsup, None, None).unwrap());
        let confirmed = Message::HighlightConfirmed(HighlightConfirmed {
            local_id,
            highlight_id: HighlightId::new("hl-42"),
            document_url: URL.into(),
        });

        assert!(agent.apply(&confirmed));
        assert!(!agent.apply(&confirmed));
        assert_eq!(agent.surface().painted().len(), 1);
        assert_eq!(agent.surface().count_with_highlight_id(&HighlightId::new("hl-42")), 1);
    }

    #[test]
    fn broadcasts_for_other_documents_or_unknown_marks_are_ignored() {
        let mut agent = flat_agent();
        let elsewhere = Message::HighlightRemoved(HighlightRef {
            local_id: Some(LocalId::new("local-x")),
            highlight_id: None,
            document_url: "https://other.example/".into(),
        });
        let unknown = Message::HighlightRemoved(HighlightRef {
            local_id: Some(LocalId::new("local-x")),
            highlight_id: None,
            document_url: URL.into(),
        });
        assert!(!agent.apply(&elsewhere));
        assert!(!agent.apply(&unknown));
    }

    #[test]
    fn failed_removal_restores_mark() {
        let mut agent = flat_agent();
        agent.on_selection(&text("Effect size is modest")).unwrap();
        let local_id = committed_local_id(&agent.commit(Sentiment::Thumbsup, None, None).unwrap());

        let request = agent.request_removal(&local_id);
        assert!(matches!(
            &request[..],
            [Message::HighlightRemoveRequested(r)] if r.local_id.as_ref() == Some(&local_id)
        ));
        assert!(agent.surface().painted().is_empty());

        let failed = Message::HighlightRemoveFailed(HighlightRemoveFailed {
            target: HighlightRef {
                local_id: Some(local_id),
                highlight_id: None,
                document_url: URL.into(),
            },
            reason: "service unavailable".into(),
        });
        assert!(agent.apply(&failed));
        assert_eq!(agent.surface().painted().len(), 1);
        assert_eq!(agent.marks().len(), 1);
    }

    #[test]
    fn search_signal_requires_page_id_and_query() {
        let agent = flat_agent();
        assert!(agent.observe_search("scholar", "effect sizes").is_none());
        let agent = flat_agent().with_page_id(PageId::new("tab-7"));
        assert!(agent.observe_search("scholar", "  ").is_none());
        assert!(matches!(
            agent.observe_search("scholar", "effect sizes"),
            Some(Message::SearchQueryDetected(detected)) if detected.page_id.as_str() == "tab-7"
        ));
    }
}

// In-process persistence service for offline runs and tests.
//
// Mirrors the REST service's behaviour: documents are get-or-create by URL
// within a session, highlight ids are minted on create, unknown ids are
// `NotFound`. Failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use annotator_common::ids::{DocumentId, HighlightId};
use annotator_common::protocol::service::{
    AiSuggestionsRequest, AiSuggestionsResponse, DocumentCreateRequest, DocumentExport,
    DocumentResponse, HealthResponse, HighlightCreateRequest, HighlightExport,
    HighlightPatchRequest, HighlightResponse, SessionCompleteResponse, SessionCreateRequest,
    SessionExport,
};
use annotator_common::types::{DocumentReview, DocumentSummary, Session};
use chrono::Utc;
use uuid::Uuid;

use super::{PersistenceService, RemoteError};

const SUGGESTION_SNIPPET_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOp {
    CreateSession,
    CompleteSession,
    EnsureDocument,
    CreateHighlight,
    PatchHighlight,
    DeleteHighlight,
    SaveReview,
    SaveSummary,
    Suggestions,
    Export,
}

#[derive(Debug, Clone)]
struct StoredHighlight {
    session_id: String,
    document_id: DocumentId,
    context: Option<String>,
    response: HighlightResponse,
}

#[derive(Debug, Default)]
struct State {
    sessions: BTreeMap<String, Session>,
    /// (session, url) → document
    documents: BTreeMap<(String, String), DocumentResponse>,
    highlights: BTreeMap<HighlightId, StoredHighlight>,
    reviews: HashMap<DocumentId, DocumentReview>,
    summaries: HashMap<DocumentId, DocumentSummary>,
    queued_ids: VecDeque<HighlightId>,
    next_highlight: u64,
    failures: HashMap<ServiceOp, VecDeque<RemoteError>>,
    calls: HashMap<ServiceOp, usize>,
}

#[derive(Debug, Default)]
pub struct MemoryService {
    state: Mutex<State>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next `op` call fails with `error` instead of running.
    pub fn fail_next(&self, op: ServiceOp, error: RemoteError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Id handed out by the next highlight create.
    pub fn queue_highlight_id(&self, highlight_id: impl Into<String>) {
        self.lock().queued_ids.push_back(HighlightId::new(highlight_id));
    }

    pub fn calls(&self, op: ServiceOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub fn highlight_count(&self) -> usize {
        self.lock().highlights.len()
    }

    pub fn has_highlight(&self, highlight_id: &HighlightId) -> bool {
        self.lock().highlights.contains_key(highlight_id)
    }

    pub fn review(&self, document_id: &DocumentId) -> Option<DocumentReview> {
        self.lock().reviews.get(document_id).cloned()
    }

    /// Seed a session, e.g. one restored from the shared store.
    pub fn insert_session(&self, session: Session) {
        self.lock().sessions.insert(session.session_id.clone(), session);
    }

    fn begin(&self, op: ServiceOp) -> Result<MutexGuard<'_, State>, RemoteError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(error) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn require_session(state: &State, session_id: &str) -> Result<(), RemoteError> {
    if state.sessions.contains_key(session_id) {
        Ok(())
    } else {
        Err(RemoteError::NotFound("Session not found".into()))
    }
}

/// Canned prompts in the shape the real suggestion endpoint returns.
pub fn mock_suggestions(highlight_text: &str) -> Vec<String> {
    let snippet = highlight_text.trim().replace('\n', " ");
    let mut truncated: String = snippet.chars().take(SUGGESTION_SNIPPET_CHARS).collect();
    if snippet.chars().count() > SUGGESTION_SNIPPET_CHARS {
        truncated.push('…');
    }
    vec![
        format!("Assess how this passage advances the research goal: \"{truncated}\""),
        "Identify assumptions or evidence gaps that need validation.".to_string(),
        "Consider follow-up searches to deepen context or cross-check sources.".to_string(),
    ]
}

impl PersistenceService for MemoryService {
    async fn health(&self) -> Result<HealthResponse, RemoteError> {
        Ok(HealthResponse {
            ok: true,
            service: "annotator-memory".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        })
    }

    async fn create_session(&self, request: &SessionCreateRequest) -> Result<Session, RemoteError> {
        let mut state = self.begin(ServiceOp::CreateSession)?;
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            expert_name: request.expert_name.clone(),
            topic: request.topic.clone(),
            research_goal: request.research_goal.clone(),
            start_time: now(),
            end_time: None,
        };
        state.sessions.insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn complete_session(
        &self,
        session_id: &str,
    ) -> Result<SessionCompleteResponse, RemoteError> {
        let mut state = self.begin(ServiceOp::CompleteSession)?;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RemoteError::NotFound("Session not found".into()))?;
        let end_time = session.end_time.get_or_insert_with(now).clone();
        Ok(SessionCompleteResponse { session_id: session_id.to_string(), end_time })
    }

    async fn get_or_create_document(
        &self,
        session_id: &str,
        request: &DocumentCreateRequest,
    ) -> Result<DocumentResponse, RemoteError> {
        let mut state = self.begin(ServiceOp::EnsureDocument)?;
        require_session(&state, session_id)?;
        let key = (session_id.to_string(), request.url.clone());
        let document = state.documents.entry(key).or_insert_with(|| DocumentResponse {
            document_id: DocumentId::new(Uuid::new_v4().to_string()),
            title: request.title.clone(),
            url: request.url.clone(),
            doc_type: request.doc_type,
            accessed_at: request.accessed_at.clone(),
        });
        Ok(document.clone())
    }

    async fn create_highlight(
        &self,
        session_id: &str,
        document_id: &DocumentId,
        request: &HighlightCreateRequest,
    ) -> Result<HighlightResponse, RemoteError> {
        let mut state = self.begin(ServiceOp::CreateHighlight)?;
        require_session(&state, session_id)?;
        if !state.documents.values().any(|document| &document.document_id == document_id) {
            return Err(RemoteError::NotFound("Document not found".into()));
        }
        let highlight_id = match state.queued_ids.pop_front() {
            Some(queued) => queued,
            None => {
                state.next_highlight += 1;
                HighlightId::new(format!("hl-{}", state.next_highlight))
            }
        };
        let response = HighlightResponse {
            highlight_id: highlight_id.clone(),
            text: request.text.clone(),
            selector: request.selector.clone(),
            ai_suggestions: request.ai_suggestions.clone(),
            user_judgment: request.user_judgment.clone(),
            timestamp: now(),
        };
        state.highlights.insert(
            highlight_id,
            StoredHighlight {
                session_id: session_id.to_string(),
                document_id: document_id.clone(),
                context: request.context.clone(),
                response: response.clone(),
            },
        );
        Ok(response)
    }

    async fn patch_highlight(
        &self,
        session_id: &str,
        highlight_id: &HighlightId,
        request: &HighlightPatchRequest,
    ) -> Result<(), RemoteError> {
        let mut state = self.begin(ServiceOp::PatchHighlight)?;
        match state.highlights.get_mut(highlight_id) {
            Some(stored) if stored.session_id == session_id => {
                stored.response.user_judgment = Some(request.user_judgment.clone());
                Ok(())
            }
            _ => Err(RemoteError::NotFound("Highlight not found".into())),
        }
    }

    async fn delete_highlight(
        &self,
        session_id: &str,
        highlight_id: &HighlightId,
    ) -> Result<(), RemoteError> {
        let mut state = self.begin(ServiceOp::DeleteHighlight)?;
        let owned = state
            .highlights
            .get(highlight_id)
            .is_some_and(|stored| stored.session_id == session_id);
        if !owned {
            return Err(RemoteError::NotFound("Highlight not found".into()));
        }
        state.highlights.remove(highlight_id);
        Ok(())
    }

    async fn save_review(
        &self,
        session_id: &str,
        document_id: &DocumentId,
        review: &DocumentReview,
    ) -> Result<(), RemoteError> {
        let mut state = self.begin(ServiceOp::SaveReview)?;
        require_session(&state, session_id)?;
        state.reviews.insert(document_id.clone(), review.clone());
        Ok(())
    }

    async fn save_summary(
        &self,
        session_id: &str,
        document_id: &DocumentId,
        summary: &DocumentSummary,
    ) -> Result<(), RemoteError> {
        let mut state = self.begin(ServiceOp::SaveSummary)?;
        require_session(&state, session_id)?;
        state.summaries.insert(document_id.clone(), summary.clone());
        Ok(())
    }

    async fn suggestions(
        &self,
        request: &AiSuggestionsRequest,
    ) -> Result<AiSuggestionsResponse, RemoteError> {
        let _state = self.begin(ServiceOp::Suggestions)?;
        Ok(AiSuggestionsResponse { suggestions: mock_suggestions(&request.highlight_text) })
    }

    async fn export_session(&self, session_id: &str) -> Result<SessionExport, RemoteError> {
        let state = self.begin(ServiceOp::Export)?;
        let session = state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound("Session not found".into()))?;
        let documents = state
            .documents
            .iter()
            .filter(|((owner, _), _)| owner == session_id)
            .map(|(_, document)| DocumentExport {
                document_id: document.document_id.clone(),
                title: document.title.clone(),
                url: document.url.clone(),
                doc_type: document.doc_type,
                accessed_at: document.accessed_at.clone(),
                highlights: state
                    .highlights
                    .values()
                    .filter(|stored| stored.document_id == document.document_id)
                    .map(|stored| HighlightExport {
                        highlight_id: stored.response.highlight_id.clone(),
                        text: stored.response.text.clone(),
                        context: stored.context.clone(),
                        selector: stored.response.selector.clone(),
                        ai_suggestions: stored.response.ai_suggestions.clone(),
                        user_judgment: stored.response.user_judgment.clone(),
                        timestamp: stored.response.timestamp.clone(),
                    })
                    .collect(),
                global_judgment: state.summaries.get(&document.document_id).cloned(),
                pdf_review: state.reviews.get(&document.document_id).cloned(),
            })
            .collect();
        Ok(SessionExport { session, documents, search_episodes: Vec::new() })
    }
}

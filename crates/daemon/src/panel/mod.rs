// Control panel: owns the authoritative highlight cache and talks to the
// persistence service.
//
// Incoming messages are reduced into a `Plan` (broadcasts to publish plus
// remote calls to run). Calls run concurrently; each finishes as a
// `RemoteOutcome` that is reduced again and may publish more messages.

pub mod cache;
pub mod ordering;
pub mod remote;

use std::sync::Arc;

use annotator_common::ids::{DocumentId, HighlightId, LocalId};
use annotator_common::protocol::messages::{
    DocumentReviewRequested, DocumentSummaryUpdate, HighlightRef, HighlightUpdate,
    SelectionCommitted,
};
use annotator_common::protocol::service::{
    AiSuggestionsRequest, DocumentCreateRequest, HighlightCreateRequest, HighlightPatchRequest,
    HighlightResponse, SessionCompleteResponse, SessionExport,
};
use annotator_common::protocol::Message;
use annotator_common::types::{
    DocumentMeta, DocumentReview, DocumentSummary, Highlight, Sentiment, UserJudgment,
};
use anyhow::Result;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bus::Uplink;
use crate::retry::{with_bounded_retry, RetryPolicy};
use crate::store::{load_documents, save_json, SharedStore, StoreKey};

pub use cache::{DocumentTarget, Notice, NoticeLevel, PanelCache, PanelError};
pub use remote::{PersistenceService, RemoteError};

use cache::{ConfirmOutcome, PatchPlan, RemovalPlan, Staged};

/// Work a reduction asks for.
#[derive(Debug, Default)]
pub struct Plan {
    pub broadcasts: Vec<Message>,
    pub calls: Vec<RemoteCall>,
}

impl Plan {
    fn broadcast(messages: Vec<Message>) -> Self {
        Self { broadcasts: messages, calls: Vec::new() }
    }

    fn call(call: RemoteCall) -> Self {
        Self { broadcasts: Vec::new(), calls: vec![call] }
    }

    pub fn is_empty(&self) -> bool {
        self.broadcasts.is_empty() && self.calls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateHighlight {
        document: DocumentTarget,
        local_id: LocalId,
        request: HighlightCreateRequest,
    },
    DeleteHighlight { target: HighlightRef, highlight_id: HighlightId, orphan: bool },
    PatchHighlight { update: HighlightUpdate, previous: Option<UserJudgment> },
    SaveReview { document: DocumentTarget, review: DocumentReview },
    SaveSummary { document: DocumentTarget, summary: DocumentSummary },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    Created {
        document: DocumentMeta,
        document_id: Option<DocumentId>,
        local_id: LocalId,
        result: Result<HighlightResponse, RemoteError>,
    },
    Deleted { target: HighlightRef, orphan: bool, result: Result<(), RemoteError> },
    Patched {
        update: HighlightUpdate,
        previous: Option<UserJudgment>,
        result: Result<(), RemoteError>,
    },
    ReviewSaved {
        document: DocumentMeta,
        document_id: Option<DocumentId>,
        review: DocumentReview,
        result: Result<(), RemoteError>,
    },
    SummarySaved {
        document: DocumentMeta,
        document_id: Option<DocumentId>,
        summary: DocumentSummary,
        result: Result<(), RemoteError>,
    },
}

/// Everything a remote call needs besides the service itself.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub session_id: String,
    pub retry: RetryPolicy,
    /// Ask for suggestions before creating a highlight.
    pub suggestions: bool,
}

// ── Remote execution ───────────────────────────────────────────────

async fn resolve_document<S: PersistenceService>(
    service: &S,
    context: &CallContext,
    document: &DocumentTarget,
) -> Result<DocumentId, RemoteError> {
    if let Some(document_id) = &document.document_id {
        return Ok(document_id.clone());
    }
    let meta = &document.meta;
    let title = if meta.title.is_empty() { &meta.url } else { &meta.title };
    let request = DocumentCreateRequest {
        title: title.clone(),
        url: document.meta.url.clone(),
        doc_type: document.meta.doc_type,
        accessed_at: Utc::now().to_rfc3339(),
    };
    let (request, session_id) = (&request, context.session_id.as_str());
    with_bounded_retry(context.retry, || service.get_or_create_document(session_id, request))
        .await
        .map(|response| response.document_id)
}

/// Run one call against the service. Highlight creation is attempted once
/// since a lost response would leave a duplicate server-side; every other
/// call is idempotent and retried on transport failure.
pub async fn execute<S: PersistenceService>(
    service: &S,
    context: &CallContext,
    call: RemoteCall,
) -> RemoteOutcome {
    let session_id = context.session_id.as_str();
    match call {
        RemoteCall::CreateHighlight { document, local_id, mut request } => {
            let document_id = match resolve_document(service, context, &document).await {
                Ok(document_id) => document_id,
                Err(error) => {
                    return RemoteOutcome::Created {
                        document: document.meta,
                        document_id: None,
                        local_id,
                        result: Err(error),
                    }
                }
            };
            if context.suggestions && request.ai_suggestions.is_empty() {
                let suggestion_request = AiSuggestionsRequest {
                    query: None,
                    doc_meta: None,
                    highlight_text: request.text.clone(),
                };
                let suggestion_request = &suggestion_request;
                let suggested =
                    with_bounded_retry(context.retry, || service.suggestions(suggestion_request))
                        .await;
                match suggested {
                    Ok(response) => request.ai_suggestions = response.suggestions,
                    Err(error) => warn!(%error, local_id = %local_id, "suggestions unavailable"),
                }
            }
            let result = service.create_highlight(session_id, &document_id, &request).await;
            RemoteOutcome::Created {
                document: document.meta,
                document_id: Some(document_id),
                local_id,
                result,
            }
        }
        RemoteCall::DeleteHighlight { target, highlight_id, orphan } => {
            let highlight_id = &highlight_id;
            let result = with_bounded_retry(context.retry, || {
                service.delete_highlight(session_id, highlight_id)
            })
            .await;
            RemoteOutcome::Deleted { target, orphan, result }
        }
        RemoteCall::PatchHighlight { update, previous } => {
            let request = HighlightPatchRequest { user_judgment: update.judgment.clone() };
            let (request, highlight_id) = (&request, &update.highlight_id);
            let result = with_bounded_retry(context.retry, || {
                service.patch_highlight(session_id, highlight_id, request)
            })
            .await;
            RemoteOutcome::Patched { update, previous, result }
        }
        RemoteCall::SaveReview { document, review } => {
            let (document_id, result) = match resolve_document(service, context, &document).await {
                Ok(document_id) => {
                    let (id, body) = (&document_id, &review);
                    let result = with_bounded_retry(context.retry, || {
                        service.save_review(session_id, id, body)
                    })
                    .await;
                    (Some(document_id), result)
                }
                Err(error) => (None, Err(error)),
            };
            RemoteOutcome::ReviewSaved { document: document.meta, document_id, review, result }
        }
        RemoteCall::SaveSummary { document, summary } => {
            let (document_id, result) = match resolve_document(service, context, &document).await {
                Ok(document_id) => {
                    let (id, body) = (&document_id, &summary);
                    let result = with_bounded_retry(context.retry, || {
                        service.save_summary(session_id, id, body)
                    })
                    .await;
                    (Some(document_id), result)
                }
                Err(error) => (None, Err(error)),
            };
            RemoteOutcome::SummarySaved { document: document.meta, document_id, summary, result }
        }
    }
}

// ── Control panel ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct PanelOptions {
    pub retry: RetryPolicy,
    pub suggestions: bool,
}

impl Default for PanelOptions {
    fn default() -> Self {
        Self { retry: RetryPolicy::default(), suggestions: true }
    }
}

pub struct ControlPanel<S> {
    service: Arc<S>,
    context: CallContext,
    cache: PanelCache,
    uplink: Uplink,
    store: Arc<dyn SharedStore>,
}

impl<S: PersistenceService> ControlPanel<S> {
    /// Open the panel for `session_id`, restoring its cached documents.
    pub fn new(
        service: Arc<S>,
        session_id: impl Into<String>,
        uplink: Uplink,
        store: Arc<dyn SharedStore>,
        options: PanelOptions,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let cache = PanelCache::restore(load_documents(store.as_ref(), &session_id)?);
        info!(
            session = %session_id,
            documents = cache.documents().len(),
            port = %uplink.port(),
            "control panel ready"
        );
        let context =
            CallContext { session_id, retry: options.retry, suggestions: options.suggestions };
        Ok(Self { service, context, cache, uplink, store })
    }

    pub fn session_id(&self) -> &str {
        &self.context.session_id
    }

    pub fn cache(&self) -> &PanelCache {
        &self.cache
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.cache.drain_notices()
    }

    /// Reduce an incoming lifecycle message.
    pub fn plan(&mut self, message: &Message) -> Plan {
        let plan = match message {
            Message::SelectionCommitted(committed) => self.plan_selection(committed),
            Message::HighlightRemoveRequested(request) => match self.cache.stage_removal(request) {
                RemovalPlan::Resolved(message) => Plan::broadcast(vec![message]),
                RemovalPlan::Remote { target, highlight_id } => {
                    Plan::call(RemoteCall::DeleteHighlight { target, highlight_id, orphan: false })
                }
            },
            Message::HighlightUpdateRequested(update) => match self.cache.stage_patch(update) {
                PatchPlan::Remote { update, previous } => {
                    Plan::call(RemoteCall::PatchHighlight { update, previous })
                }
                PatchPlan::Resolved => Plan::default(),
                PatchPlan::Rejected(message) => Plan::broadcast(vec![message]),
            },
            Message::DocumentReviewRequested(request) => self.plan_review(request),
            Message::DocumentSummaryRequested(update) => self.plan_summary(update),
            other => {
                debug!(message_type = other.type_name(), "not handled by control panel");
                Plan::default()
            }
        };
        self.persist();
        plan
    }

    fn plan_selection(&mut self, committed: &SelectionCommitted) -> Plan {
        match self.cache.stage_selection(committed) {
            Ok(Staged::Create { document, local_id, request }) => {
                Plan::call(RemoteCall::CreateHighlight { document, local_id, request })
            }
            Ok(Staged::Duplicate) => Plan::default(),
            Err(error) => Plan::broadcast(self.cache.reject_selection(committed, &error)),
        }
    }

    fn plan_review(&mut self, request: &DocumentReviewRequested) -> Plan {
        match self.cache.stage_review(request) {
            Ok((document, review)) => Plan::call(RemoteCall::SaveReview { document, review }),
            Err(error) => {
                self.cache.notify(NoticeLevel::Error, format!("Review not saved: {error}"));
                Plan::default()
            }
        }
    }

    fn plan_summary(&mut self, update: &DocumentSummaryUpdate) -> Plan {
        let document = self.cache.stage_summary(update);
        Plan::call(RemoteCall::SaveSummary { document, summary: update.summary.clone() })
    }

    /// Reduce a finished remote call.
    pub fn complete(&mut self, outcome: RemoteOutcome) -> Plan {
        let plan = match outcome {
            RemoteOutcome::Created { document, document_id, local_id, result } => {
                if let Some(document_id) = document_id {
                    self.cache.memoize_document(&document, document_id);
                }
                match result {
                    Ok(response) => match self.cache.confirm(&document.url, &local_id, response) {
                        ConfirmOutcome::Confirmed(messages) => Plan::broadcast(messages),
                        ConfirmOutcome::Orphaned { target, highlight_id } => Plan::call(
                            RemoteCall::DeleteHighlight { target, highlight_id, orphan: true },
                        ),
                        ConfirmOutcome::Unknown => Plan::default(),
                    },
                    Err(error) => {
                        Plan::broadcast(self.cache.fail_create(&document.url, &local_id, &error))
                    }
                }
            }
            RemoteOutcome::Deleted { target, orphan: true, result } => {
                // Removal was already broadcast when the highlight was still local.
                match result {
                    Ok(()) | Err(RemoteError::NotFound(_)) => {
                        info!(document = %target.document_url, "orphaned highlight deleted")
                    }
                    Err(error) => warn!(
                        %error,
                        document = %target.document_url,
                        "orphaned highlight left on service"
                    ),
                }
                Plan::default()
            }
            RemoteOutcome::Deleted { target, orphan: false, result } => {
                Plan::broadcast(self.cache.finish_removal(&target, &result))
            }
            RemoteOutcome::Patched { update, previous, result } => {
                Plan::broadcast(self.cache.finish_patch(&update, previous, &result))
            }
            RemoteOutcome::ReviewSaved { document, document_id, review, result } => {
                if let Some(document_id) = document_id {
                    self.cache.memoize_document(&document, document_id);
                }
                Plan::broadcast(self.cache.finish_review(&document.url, review, &result))
            }
            RemoteOutcome::SummarySaved { document, document_id, summary, result } => {
                if let Some(document_id) = document_id {
                    self.cache.memoize_document(&document, document_id);
                }
                Plan::broadcast(self.cache.finish_summary(&document.url, summary, &result))
            }
        };
        self.persist();
        plan
    }

    fn persist(&mut self) {
        if !self.cache.take_dirty() {
            return;
        }
        let key = StoreKey::Documents(self.context.session_id.clone());
        if let Err(error) = save_json(self.store.as_ref(), &key, self.cache.documents()) {
            warn!(?error, key = %key, "failed to persist documents");
        }
    }

    /// Publish a plan and run its calls inline until nothing is left.
    /// Returns every message published along the way.
    pub async fn settle(&mut self, plan: Plan) -> Vec<Message> {
        let mut published = Vec::new();
        let mut pending = vec![plan];
        while let Some(plan) = pending.pop() {
            self.uplink.send_all(plan.broadcasts.iter().cloned()).await;
            published.extend(plan.broadcasts);
            for call in plan.calls {
                let outcome = execute(self.service.as_ref(), &self.context, call).await;
                pending.push(self.complete(outcome));
            }
        }
        published
    }

    /// Serve the panel's inbox until it closes or shutdown is signalled.
    /// Remote calls run concurrently; in-flight calls are drained on exit.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Message>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => {
                        let plan = self.plan(&message);
                        self.dispatch(plan, &mut tasks).await;
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(outcome) => {
                        let plan = self.complete(outcome);
                        self.dispatch(plan, &mut tasks).await;
                    }
                    Err(error) => warn!(?error, "remote call task failed"),
                },
                _ = shutdown.recv() => break,
            }
        }

        let draining = tasks.len();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    let plan = self.complete(outcome);
                    self.settle(plan).await;
                }
                Err(error) => warn!(?error, "remote call task failed"),
            }
        }
        info!(drained = draining, session = %self.context.session_id, "control panel stopped");
    }

    async fn dispatch(&mut self, plan: Plan, tasks: &mut JoinSet<RemoteOutcome>) {
        self.uplink.send_all(plan.broadcasts).await;
        for call in plan.calls {
            let service = Arc::clone(&self.service);
            let context = self.context.clone();
            tasks.spawn(async move { execute(service.as_ref(), &context, call).await });
        }
    }

    // ── Direct operations ──────────────────────────────────────────

    /// Get-or-create the service document for `meta`.
    pub async fn ensure_document(&mut self, meta: &DocumentMeta) -> Result<DocumentId, PanelError> {
        let key = meta.key();
        if let Some(document_id) = self.cache.document_id(&key) {
            return Ok(document_id);
        }
        let target =
            DocumentTarget { meta: DocumentMeta { url: key, ..meta.clone() }, document_id: None };
        let document_id = resolve_document(self.service.as_ref(), &self.context, &target).await?;
        self.cache.memoize_document(&target.meta, document_id.clone());
        self.persist();
        Ok(document_id)
    }

    /// Stage, save, and confirm one selection.
    pub async fn commit_highlight(
        &mut self,
        committed: SelectionCommitted,
    ) -> Result<Highlight, PanelError> {
        let plan = self.plan(&Message::SelectionCommitted(committed.clone()));
        let published = self.settle(plan).await;
        let failure = published.iter().find_map(|message| match message {
            Message::HighlightSaveFailed(failed) if failed.local_id == committed.local_id => {
                Some(failed.reason.clone())
            }
            _ => None,
        });
        if let Some(reason) = failure {
            return Err(PanelError::Failed { operation: "save highlight", reason });
        }
        self.cache
            .find_highlight(&committed.document.url, &committed.local_id)
            .cloned()
            .ok_or_else(|| PanelError::Failed {
                operation: "save highlight",
                reason: format!("highlight `{}` is no longer tracked", committed.local_id),
            })
    }

    pub async fn patch_highlight(
        &mut self,
        document_url: &str,
        highlight_id: HighlightId,
        judgment: UserJudgment,
    ) -> Result<(), PanelError> {
        let update =
            HighlightUpdate { highlight_id, document_url: document_url.to_string(), judgment };
        let plan = self.plan(&Message::HighlightUpdateRequested(update));
        let published = self.settle(plan).await;
        match published.iter().find_map(|message| match message {
            Message::HighlightUpdateFailed(failed) => Some(failed.reason.clone()),
            _ => None,
        }) {
            Some(reason) => Err(PanelError::Failed { operation: "update highlight", reason }),
            None => Ok(()),
        }
    }

    pub async fn remove_highlight(&mut self, request: HighlightRef) -> Result<(), PanelError> {
        let plan = self.plan(&Message::HighlightRemoveRequested(request));
        let published = self.settle(plan).await;
        match published.iter().find_map(|message| match message {
            Message::HighlightRemoveFailed(failed) => Some(failed.reason.clone()),
            _ => None,
        }) {
            Some(reason) => Err(PanelError::Failed { operation: "remove highlight", reason }),
            None => Ok(()),
        }
    }

    pub async fn save_review(
        &mut self,
        document_url: &str,
        sentiment: Option<Sentiment>,
        highlight_order: Vec<HighlightId>,
    ) -> Result<DocumentReview, PanelError> {
        let request = DocumentReviewRequested {
            document_url: document_url.to_string(),
            sentiment,
            highlight_order,
        };
        let (document, review) = self.cache.stage_review(&request)?;
        let plan = Plan::call(RemoteCall::SaveReview { document, review: review.clone() });
        let published = self.settle(plan).await;
        if published.iter().any(|message| matches!(message, Message::DocumentReviewSaved(_))) {
            Ok(review)
        } else {
            Err(PanelError::Failed { operation: "save review", reason: self.last_error() })
        }
    }

    pub async fn save_summary(
        &mut self,
        document_url: &str,
        summary: DocumentSummary,
    ) -> Result<(), PanelError> {
        let update = DocumentSummaryUpdate { document_url: document_url.to_string(), summary };
        let plan = self.plan(&Message::DocumentSummaryRequested(update));
        let published = self.settle(plan).await;
        if published.iter().any(|message| matches!(message, Message::DocumentSummarySaved(_))) {
            Ok(())
        } else {
            Err(PanelError::Failed { operation: "save summary", reason: self.last_error() })
        }
    }

    fn last_error(&self) -> String {
        self.cache
            .notices()
            .iter()
            .rev()
            .find(|notice| notice.level == NoticeLevel::Error)
            .map(|notice| notice.text.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }

    pub async fn request_suggestions(
        &self,
        highlight_text: &str,
    ) -> Result<Vec<String>, PanelError> {
        let request = AiSuggestionsRequest {
            query: None,
            doc_meta: None,
            highlight_text: highlight_text.to_string(),
        };
        let request = &request;
        let response =
            with_bounded_retry(self.context.retry, || self.service.suggestions(request)).await?;
        Ok(response.suggestions)
    }

    pub async fn complete_session(&self) -> Result<SessionCompleteResponse, PanelError> {
        let session_id = self.context.session_id.as_str();
        let response = with_bounded_retry(self.context.retry, || {
            self.service.complete_session(session_id)
        })
        .await?;
        info!(session = %response.session_id, end_time = %response.end_time, "session completed");
        Ok(response)
    }

    pub async fn export_session(&self) -> Result<SessionExport, PanelError> {
        let session_id = self.context.session_id.as_str();
        let service = self.service.as_ref();
        let export =
            with_bounded_retry(self.context.retry, || service.export_session(session_id)).await?;
        Ok(export)
    }
}

// Host runtime: spawns the coordinator and control panel and hands out
// ports to every other context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use annotator_common::protocol::service::SessionCreateRequest;
use annotator_common::protocol::Message;
use annotator_common::selector::SelectorBuilder;
use annotator_common::types::{DocumentMeta, Session};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::{CoordinatorCommand, Downlink, PortId, PortKind, Uplink};
use crate::capture::{CaptureAgent, MarkSurface};
use crate::config::{AnnotatorConfig, SessionConfig};
use crate::coordinator::Coordinator;
use crate::panel::{ControlPanel, PanelOptions, PersistenceService};
use crate::retry::{with_bounded_retry, RetryPolicy};
use crate::store::{load_session, save_json, SharedStore, StoreKey};

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub session_id: String,
    pub trajectory_cap: usize,
    pub channel_capacity: usize,
    pub retry: RetryPolicy,
    pub panel: PanelOptions,
    /// Shared by every capture agent the host builds.
    pub selector: SelectorBuilder,
}

impl RuntimeOptions {
    pub fn from_config(config: &AnnotatorConfig, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            trajectory_cap: config.coordinator.trajectory_cap,
            channel_capacity: config.channels.capacity.max(1),
            retry: config.retry_policy(),
            panel: config.panel_options(),
            selector: config.selector_builder(),
        }
    }
}

pub struct RuntimeHandle {
    commands: mpsc::Sender<CoordinatorCommand>,
    shutdown_tx: broadcast::Sender<()>,
    next_port: AtomicU64,
    capacity: usize,
    retry: RetryPolicy,
    selector: SelectorBuilder,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Register a new context and return its two channel ends.
    pub async fn connect(&self, kind: PortKind) -> Result<(Uplink, mpsc::Receiver<Message>)> {
        let port = PortId(self.next_port.fetch_add(1, Ordering::Relaxed));
        let (downlink, rx) = Downlink::channel(port, self.capacity, self.retry);
        self.commands
            .send(CoordinatorCommand::Register { port, kind, downlink })
            .await
            .map_err(|_| anyhow!("coordinator is not running"))?;
        info!(port = %port, ?kind, "port connected");
        Ok((Uplink::new(port, self.commands.clone(), self.retry), rx))
    }

    /// A capture agent for `document` using the configured selector settings.
    pub fn capture_agent<M: MarkSurface>(
        &self,
        document: DocumentMeta,
        surface: M,
    ) -> CaptureAgent<M> {
        CaptureAgent::new(document, self.selector.clone(), surface)
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub async fn wait(mut self) {
        self.shutdown();
        for task in self.tasks.drain(..) {
            if let Err(error) = task.await {
                warn!(?error, "runtime task ended abnormally");
            }
        }
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the coordinator and the control panel for one session.
pub fn start<S: PersistenceService>(
    service: Arc<S>,
    store: Arc<dyn SharedStore>,
    options: RuntimeOptions,
) -> Result<RuntimeHandle> {
    let capacity = options.channel_capacity.max(1);
    let (commands, commands_rx) = mpsc::channel(capacity);
    let (shutdown_tx, _) = broadcast::channel(4);

    let mut coordinator =
        Coordinator::new(store.clone(), &options.session_id, options.trajectory_cap)
            .context("failed to start coordinator")?;
    let panel_port = PortId(1);
    let (panel_downlink, panel_inbox) = Downlink::channel(panel_port, capacity, options.retry);
    coordinator.register(panel_port, PortKind::ControlPanel, panel_downlink);
    let panel = ControlPanel::new(
        service,
        options.session_id.clone(),
        Uplink::new(panel_port, commands.clone(), options.retry),
        store,
        options.panel,
    )
    .context("failed to start control panel")?;

    let tasks = vec![
        tokio::spawn(coordinator.run(commands_rx, shutdown_tx.subscribe())),
        tokio::spawn(panel.run(panel_inbox, shutdown_tx.subscribe())),
    ];
    info!(session = %options.session_id, capacity, "annotator runtime started");

    Ok(RuntimeHandle {
        commands,
        shutdown_tx,
        next_port: AtomicU64::new(panel_port.0 + 1),
        capacity,
        retry: options.retry,
        selector: options.selector,
        tasks,
    })
}

// ── Session ────────────────────────────────────────────────────────

/// Pick the session to work in: an explicit id, else the unfinished
/// session in the shared store, else a new one from the service.
pub async fn resolve_session<S: PersistenceService>(
    service: &S,
    store: &dyn SharedStore,
    requested: Option<&str>,
    defaults: &SessionConfig,
    retry: RetryPolicy,
) -> Result<Session> {
    let stored = load_session(store)?;
    let requested = requested.or(defaults.id.as_deref());

    let session = match (requested, stored) {
        (Some(id), Some(stored)) if stored.session_id == id => stored,
        (Some(id), _) => Session {
            session_id: id.to_string(),
            expert_name: defaults.expert_name.clone(),
            topic: defaults.topic.clone(),
            research_goal: defaults.research_goal.clone(),
            start_time: Utc::now().to_rfc3339(),
            end_time: None,
        },
        (None, Some(stored)) if stored.end_time.is_none() => stored,
        (None, _) => {
            let request = SessionCreateRequest {
                expert_name: defaults.expert_name.clone(),
                topic: defaults.topic.clone(),
                research_goal: defaults.research_goal.clone(),
            };
            let request = &request;
            let session = with_bounded_retry(retry, || service.create_session(request))
                .await
                .context("failed to create session")?;
            info!(session = %session.session_id, "created new session");
            session
        }
    };
    save_json(store, &StoreKey::Session, &session)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use annotator_common::ids::LocalId;
    use annotator_common::protocol::messages::SelectionCommitted;
    use annotator_common::selector::TextRange;
    use annotator_common::types::{DocumentMeta, DocumentType, Selector, Sentiment};
    use tokio::time::timeout;

    use super::*;
    use crate::capture::{HeadlessSurface, RawSelection};
    use crate::panel::remote::{MemoryService, ServiceOp};
    use crate::store::MemoryStore;

    fn session(id: &str, ended: bool) -> Session {
        Session {
            session_id: id.into(),
            expert_name: "Dr. Reviewer".into(),
            topic: "statins".into(),
            research_goal: "efficacy".into(),
            start_time: Utc::now().to_rfc3339(),
            end_time: ended.then(|| Utc::now().to_rfc3339()),
        }
    }

    #[tokio::test]
    async fn unfinished_stored_session_is_resumed() {
        let service = MemoryService::new();
        let store = MemoryStore::default();
        save_json(&store, &StoreKey::Session, &session("s-old", false)).unwrap();

        let resolved =
            resolve_session(&service, &store, None, &SessionConfig::default(), RetryPolicy::none())
                .await
                .expect("session should resolve");
        assert_eq!(resolved.session_id, "s-old");
        assert_eq!(service.calls(ServiceOp::CreateSession), 0);
    }

    #[tokio::test]
    async fn finished_session_is_replaced_by_a_new_one() {
        let service = MemoryService::new();
        let store = MemoryStore::default();
        save_json(&store, &StoreKey::Session, &session("s-old", true)).unwrap();

        let defaults = SessionConfig { expert_name: "Dr. New".into(), ..SessionConfig::default() };
        let resolved = resolve_session(&service, &store, None, &defaults, RetryPolicy::none())
            .await
            .expect("session should resolve");
        assert_ne!(resolved.session_id, "s-old");
        assert_eq!(resolved.expert_name, "Dr. New");
        assert_eq!(load_session(&store).unwrap(), Some(resolved));
    }

    #[tokio::test]
    async fn explicit_session_id_wins() {
        let service = MemoryService::new();
        let store = MemoryStore::default();
        save_json(&store, &StoreKey::Session, &session("s-old", false)).unwrap();

        let resolved = resolve_session(
            &service,
            &store,
            Some("s-flag"),
            &SessionConfig::default(),
            RetryPolicy::none(),
        )
        .await
        .expect("session should resolve");
        assert_eq!(resolved.session_id, "s-flag");
        assert_eq!(service.calls(ServiceOp::CreateSession), 0);
    }

    #[tokio::test]
    async fn capture_agents_use_configured_quote_context() {
        let service = Arc::new(MemoryService::new());
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::default());
        let mut config = AnnotatorConfig::default();
        config.capture.context_chars = 4;
        let handle = start(service, store, RuntimeOptions::from_config(&config, "s1"))
            .expect("runtime should start");

        let document = DocumentMeta {
            url: "https://example.org/a".into(),
            title: "A".into(),
            doc_type: DocumentType::Flat,
        };
        let mut agent = handle.capture_agent(document, HeadlessSurface::default());
        let range = TextRange {
            text_before: "In the treated arm".into(),
            exact: "LDL fell".into(),
            text_after: " after twelve weeks".into(),
        };
        agent.on_selection(&RawSelection::Text(range)).expect("selection should build");
        assert_eq!(
            agent.pending_selector(),
            Some(&Selector::TextQuote {
                exact: "LDL fell".into(),
                prefix: " arm".into(),
                suffix: " aft".into(),
            })
        );
        handle.wait().await;
    }

    #[tokio::test]
    async fn committed_selection_comes_back_confirmed() {
        let service = Arc::new(MemoryService::new());
        service.insert_session(session("s1", false));
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::default());
        let options = RuntimeOptions::from_config(&AnnotatorConfig::default(), "s1");
        let handle = start(service.clone(), store, options).expect("runtime should start");

        let (capture_up, mut capture_down) =
            handle.connect(PortKind::CaptureAgent).await.expect("capture should connect");
        let (_viewer_up, mut viewer_down) =
            handle.connect(PortKind::DocumentViewer).await.expect("viewer should connect");

        capture_up
            .send(Message::SelectionCommitted(SelectionCommitted {
                local_id: LocalId::new("local-1"),
                document: DocumentMeta {
                    url: "https://example.org/a".into(),
                    title: "A".into(),
                    doc_type: DocumentType::Flat,
                },
                selector: Selector::TextQuote {
                    exact: "primary endpoint".into(),
                    prefix: String::new(),
                    suffix: String::new(),
                },
                sentiment: Sentiment::Neutral,
                context: None,
                judgment: None,
                page_id: None,
                committed_at: Utc::now(),
            }))
            .await
            .expect("selection should be accepted");

        for receiver in [&mut capture_down, &mut viewer_down] {
            let message = timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("confirmation should arrive")
                .expect("channel should stay open");
            assert!(matches!(message, Message::HighlightConfirmed(_)), "got {message:?}");
        }
        assert_eq!(service.highlight_count(), 1);
        handle.wait().await;
    }
}

// Coordinator: stateless relay between execution contexts.
//
// It never resolves identifiers. Requests go to the registered control
// panel, outcomes fan out to every other port, and the coordinator itself
// consumes search signals (deduplicated per page) and interactions, both of
// which land in the session's trajectory log.

pub mod trajectory;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use annotator_common::ids::PageId;
use annotator_common::protocol::messages::{
    InteractionRecorded, SearchEpisodeRecorded, SearchQueryDetected,
};
use annotator_common::protocol::{Message, Route};
use annotator_common::selector::builder::collapse_whitespace;
use annotator_common::types::{SearchEpisode, TrajectoryEntry};
use anyhow::Result;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::bus::{ChannelError, CoordinatorCommand, Downlink, Envelope, PortId, PortKind};
use crate::store::SharedStore;

pub use trajectory::{TrajectoryLog, DEFAULT_TRAJECTORY_CAP};

#[derive(Debug)]
struct Port {
    kind: PortKind,
    downlink: Downlink,
}

/// A message addressed to one port.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: PortId,
    pub message: Message,
}

/// Last `(platform, query)` seen on a page, and the port that reported it.
#[derive(Debug)]
struct LastQuery {
    port: PortId,
    key: (String, String),
}

pub struct Coordinator {
    ports: BTreeMap<PortId, Port>,
    panel: Option<PortId>,
    last_queries: HashMap<PageId, LastQuery>,
    trajectory: TrajectoryLog,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn SharedStore>,
        session_id: &str,
        trajectory_cap: usize,
    ) -> Result<Self> {
        Ok(Self {
            ports: BTreeMap::new(),
            panel: None,
            last_queries: HashMap::new(),
            trajectory: TrajectoryLog::load(store, session_id, trajectory_cap)?,
        })
    }

    pub fn trajectory(&self) -> &TrajectoryLog {
        &self.trajectory
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Pages with a remembered search signal.
    pub fn tracked_pages(&self) -> usize {
        self.last_queries.len()
    }

    pub fn register(&mut self, port: PortId, kind: PortKind, downlink: Downlink) {
        if kind == PortKind::ControlPanel {
            if let Some(previous) = self.panel.replace(port) {
                debug!(%previous, %port, "control panel port replaced");
            }
        }
        info!(%port, ?kind, "port registered");
        self.ports.insert(port, Port { kind, downlink });
    }

    pub fn unregister(&mut self, port: PortId) {
        if let Some(removed) = self.ports.remove(&port) {
            info!(%port, kind = ?removed.kind, "port unregistered");
        }
        if self.panel == Some(port) {
            self.panel = None;
        }
        // A closed port takes its pages with it.
        self.last_queries.retain(|_, last| last.port != port);
    }

    // ── Routing ────────────────────────────────────────────────────

    /// Decide where an inbound message goes. Pure apart from the dedup
    /// table and the trajectory log.
    pub fn route(&mut self, envelope: Envelope) -> Vec<Delivery> {
        let Envelope { from, message } = envelope;
        match message.route() {
            Route::ToPanel => match self.panel {
                Some(panel) if panel != from => vec![Delivery { to: panel, message }],
                Some(_) => Vec::new(),
                None => {
                    debug!(
                        message_type = message.type_name(),
                        "no control panel registered, dropping"
                    );
                    Vec::new()
                }
            },
            Route::Broadcast => self.fan_out(from, &message),
            Route::Coordinator => match message {
                Message::SearchQueryDetected(detected) => self.on_search(from, detected),
                Message::InteractionRecorded(recorded) => self.on_interaction(from, recorded),
                other => {
                    debug!(message_type = other.type_name(), "unexpected coordinator message");
                    Vec::new()
                }
            },
        }
    }

    fn fan_out(&self, from: PortId, message: &Message) -> Vec<Delivery> {
        self.ports
            .keys()
            .filter(|port| **port != from)
            .map(|port| Delivery { to: *port, message: message.clone() })
            .collect()
    }

    fn on_search(&mut self, from: PortId, detected: SearchQueryDetected) -> Vec<Delivery> {
        let query = collapse_whitespace(&detected.query, true);
        if query.is_empty() {
            return Vec::new();
        }
        let platform = detected.platform.trim().to_string();
        let key = (platform.clone(), query.clone());
        if self.last_queries.get(&detected.page_id).is_some_and(|last| last.key == key) {
            debug!(page_id = %detected.page_id, %platform, "duplicate search signal suppressed");
            return Vec::new();
        }
        self.last_queries.insert(detected.page_id.clone(), LastQuery { port: from, key });

        let episode = SearchEpisode {
            page_id: detected.page_id,
            platform,
            query,
            url: detected.url,
            timestamp: Utc::now(),
        };
        info!(page_id = %episode.page_id, platform = %episode.platform, "search episode recorded");
        self.append(TrajectoryEntry::SearchEpisode(episode.clone()));
        self.fan_out(from, &Message::SearchEpisodeRecorded(SearchEpisodeRecorded { episode }))
    }

    fn on_interaction(&mut self, from: PortId, recorded: InteractionRecorded) -> Vec<Delivery> {
        self.append(TrajectoryEntry::Interaction(recorded.interaction.clone()));
        self.fan_out(from, &Message::InteractionRecorded(recorded))
    }

    fn append(&mut self, entry: TrajectoryEntry) {
        if let Err(error) = self.trajectory.push(entry) {
            warn!(?error, "failed to persist trajectory log");
        }
    }

    // ── Delivery ───────────────────────────────────────────────────

    /// Send each delivery without waiting. Closed ports are pruned; a full
    /// inbox gets its bounded retry on a separate task so the relay loop
    /// never sleeps, and exhausted retries are dropped.
    pub async fn dispatch(&mut self, deliveries: Vec<Delivery>) {
        for Delivery { to, message } in deliveries {
            let Some(port) = self.ports.get(&to) else {
                continue;
            };
            match port.downlink.try_send(message.clone()) {
                Ok(()) => {}
                Err(ChannelError::Closed(_)) => {
                    debug!(port = %to, "port closed, pruning");
                    self.unregister(to);
                }
                Err(ChannelError::Full(_)) => {
                    let downlink = port.downlink.clone();
                    tokio::spawn(async move {
                        let type_name = message.type_name();
                        if let Err(error) = downlink.send(message).await {
                            debug!(
                                port = %to,
                                message_type = type_name,
                                %error,
                                "dropping delivery"
                            );
                        }
                    });
                }
            }
        }
    }

    pub async fn handle(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::Register { port, kind, downlink } => {
                self.register(port, kind, downlink)
            }
            CoordinatorCommand::Unregister(port) => self.unregister(port),
            CoordinatorCommand::Deliver(envelope) => {
                let deliveries = self.route(envelope);
                self.dispatch(deliveries).await;
            }
        }
    }

    /// Serve until every uplink is dropped or shutdown is signalled.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<CoordinatorCommand>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        info!(ports = self.ports.len(), "coordinator stopped");
    }
}

// Message bus between execution contexts.
//
// Every context owns a `Downlink` receiver for messages addressed to it and
// an `Uplink` into the coordinator. Both are bounded mpsc channels: a full
// or closed channel surfaces as `ChannelError`, and only `Full` is retried.

use std::fmt;

use annotator_common::protocol::Message;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::retry::{with_bounded_retry, RetryPolicy, Transient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// What sits behind a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    CaptureAgent,
    ControlPanel,
    DocumentViewer,
    /// Native host bridge (stdio).
    Host,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from: PortId,
    pub message: Message,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel to {0} is full")]
    Full(PortId),
    #[error("channel to {0} is closed")]
    Closed(PortId),
}

impl Transient for ChannelError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Control traffic into the coordinator loop.
#[derive(Debug)]
pub enum CoordinatorCommand {
    Register { port: PortId, kind: PortKind, downlink: Downlink },
    Unregister(PortId),
    Deliver(Envelope),
}

fn try_push<T>(tx: &mpsc::Sender<T>, port: PortId, item: T) -> Result<(), ChannelError> {
    tx.try_send(item).map_err(|error| match error {
        TrySendError::Full(_) => ChannelError::Full(port),
        TrySendError::Closed(_) => ChannelError::Closed(port),
    })
}

// ── Downlink ───────────────────────────────────────────────────────

/// Sending side of a context's inbox.
#[derive(Debug, Clone)]
pub struct Downlink {
    port: PortId,
    tx: mpsc::Sender<Message>,
    retry: RetryPolicy,
}

impl Downlink {
    pub fn new(port: PortId, tx: mpsc::Sender<Message>, retry: RetryPolicy) -> Self {
        Self { port, tx, retry }
    }

    /// Inbox channel plus its sending side.
    pub fn channel(
        port: PortId,
        capacity: usize,
        retry: RetryPolicy,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(port, tx, retry), rx)
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn try_send(&self, message: Message) -> Result<(), ChannelError> {
        try_push(&self.tx, self.port, message)
    }

    pub async fn send(&self, message: Message) -> Result<(), ChannelError> {
        with_bounded_retry(self.retry, || {
            let result = self.try_send(message.clone());
            async move { result }
        })
        .await
    }
}

// ── Uplink ─────────────────────────────────────────────────────────

/// A context's handle into the coordinator.
#[derive(Debug, Clone)]
pub struct Uplink {
    from: PortId,
    tx: mpsc::Sender<CoordinatorCommand>,
    retry: RetryPolicy,
}

impl Uplink {
    pub fn new(from: PortId, tx: mpsc::Sender<CoordinatorCommand>, retry: RetryPolicy) -> Self {
        Self { from, tx, retry }
    }

    pub fn port(&self) -> PortId {
        self.from
    }

    pub fn try_send(&self, message: Message) -> Result<(), ChannelError> {
        let envelope = Envelope { from: self.from, message };
        try_push(&self.tx, self.from, CoordinatorCommand::Deliver(envelope))
    }

    /// Send with bounded retry on a full channel.
    pub async fn send(&self, message: Message) -> Result<(), ChannelError> {
        with_bounded_retry(self.retry, || {
            let result = self.try_send(message.clone());
            async move { result }
        })
        .await
    }

    /// Fire-and-forget: exhausted retries are dropped with a debug log.
    pub async fn send_or_drop(&self, message: Message) {
        let type_name = message.type_name();
        if let Err(error) = self.send(message).await {
            debug!(
                port = %self.from,
                message_type = type_name,
                %error,
                "dropping outbound message"
            );
        }
    }

    pub async fn send_all(&self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.send_or_drop(message).await;
        }
    }

    pub async fn unregister(&self) {
        let _ = self.tx.send(CoordinatorCommand::Unregister(self.from)).await;
    }
}

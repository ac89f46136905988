//! Broadcast hub actor.
//!
//! The hub is the single owner of the live-connection registry. Register,
//! unregister and broadcast requests all go through one mailbox and are
//! handled strictly in arrival order, so a broadcast never observes a
//! half-applied registration.
//!
//! Delivery into a connection's outbound queue is fire-and-forget: a full or
//! closed queue is skipped, never awaited.

mod mailbox;

pub use mailbox::MailboxGauge;

use crate::connection::ConnectionId;
use crate::errors::ModeratorError;
use crate::observability::metrics;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

/// Hub mailbox capacity.
const HUB_CHANNEL_BUFFER: usize = 1024;

/// Outbound queue of one connection.
pub type OutboundSender = mpsc::Sender<Arc<str>>;

#[derive(Debug)]
pub enum HubMessage {
    Register {
        connection_id: ConnectionId,
        sender: OutboundSender,
    },
    /// Dropping the stored sender closes the connection's outbound queue.
    Unregister { connection_id: ConnectionId },
    Broadcast { payload: Arc<str> },
    GetStatus { respond_to: oneshot::Sender<HubStatus> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStatus {
    pub connections: usize,
    pub broadcasts: u64,
    /// Deliveries skipped because a queue was full or closed.
    pub dropped: u64,
    /// Deepest the hub mailbox has been since startup.
    pub mailbox_peak: usize,
}

/// Handle to the [`HubActor`].
#[derive(Clone, Debug)]
pub struct HubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxGauge>,
}

impl HubHandle {
    async fn send(&self, message: HubMessage) -> Result<(), ModeratorError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| ModeratorError::Channel(format!("hub send failed: {e}")))?;
        self.mailbox.on_send();
        Ok(())
    }

    /// Add a connection's outbound queue to the live set.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        sender: OutboundSender,
    ) -> Result<(), ModeratorError> {
        self.send(HubMessage::Register {
            connection_id,
            sender,
        })
        .await
    }

    /// Remove a connection and close its outbound queue. Unknown ids are ignored.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<(), ModeratorError> {
        self.send(HubMessage::Unregister { connection_id }).await
    }

    /// Deliver `payload` to every connection registered when the hub handles it.
    pub async fn broadcast(&self, payload: Arc<str>) -> Result<(), ModeratorError> {
        self.send(HubMessage::Broadcast { payload }).await
    }

    pub async fn status(&self) -> Result<HubStatus, ModeratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::GetStatus { respond_to: tx }).await?;

        rx.await
            .map_err(|e| ModeratorError::Channel(format!("response receive failed: {e}")))
    }

    /// Stop the hub. All outbound queues close when the registry is dropped.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

pub struct HubActor {
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxGauge>,
    connections: HashMap<ConnectionId, OutboundSender>,
    broadcasts: u64,
    dropped: u64,
}

impl HubActor {
    pub fn spawn(cancel_token: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxGauge::new());

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            connections: HashMap::new(),
            broadcasts: 0,
            dropped: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = HubHandle {
            sender,
            cancel_token,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "moderator.hub")]
    async fn run(mut self) {
        info!(target: "moderator.hub", "Hub started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "moderator.hub",
                        connections = self.connections.len(),
                        "Hub received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.on_handled();
                        }
                        None => {
                            debug!(target: "moderator.hub", "Hub channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        let remaining = self.connections.len();
        self.connections.clear();
        metrics::set_ws_connections(0);

        info!(
            target: "moderator.hub",
            closed_connections = remaining,
            broadcasts = self.broadcasts,
            dropped = self.dropped,
            messages_processed = self.mailbox.handled(),
            "Hub stopped"
        );
    }

    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register {
                connection_id,
                sender,
            } => {
                self.connections.insert(connection_id, sender);
                metrics::set_ws_connections(self.connections.len());
                debug!(
                    target: "moderator.hub",
                    connection_id = %connection_id,
                    connections = self.connections.len(),
                    "Connection registered"
                );
            }

            HubMessage::Unregister { connection_id } => {
                if self.connections.remove(&connection_id).is_some() {
                    metrics::set_ws_connections(self.connections.len());
                    debug!(
                        target: "moderator.hub",
                        connection_id = %connection_id,
                        connections = self.connections.len(),
                        "Connection unregistered"
                    );
                }
            }

            HubMessage::Broadcast { payload } => self.handle_broadcast(&payload),

            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(HubStatus {
                    connections: self.connections.len(),
                    broadcasts: self.broadcasts,
                    dropped: self.dropped,
                    mailbox_peak: self.mailbox.high_water(),
                });
            }
        }
    }

    fn handle_broadcast(&mut self, payload: &Arc<str>) {
        self.broadcasts += 1;
        metrics::record_broadcast();

        for (connection_id, sender) in &self.connections {
            match sender.try_send(Arc::clone(payload)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    metrics::record_broadcast_drop("full");
                    debug!(
                        target: "moderator.hub",
                        connection_id = %connection_id,
                        "Outbound queue full, payload skipped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    self.dropped += 1;
                    metrics::record_broadcast_drop("closed");
                    trace!(
                        target: "moderator.hub",
                        connection_id = %connection_id,
                        "Outbound queue closed, payload skipped"
                    );
                }
            }
        }
    }
}

//! Per-connection pumps.
//!
//! Each WebSocket is split into an inbound pump (the only reader) and an
//! outbound pump (the only writer). The pumps share a per-connection
//! cancellation token: whichever side stops first cancels it, which stops
//! the other side. Service shutdown cancels the parent token.
//!
//! # Timings
//!
//! - write deadline: 10s per frame
//! - read deadline: 60s, extended only when a pong arrives
//! - ping interval: 54s (9/10 of the read deadline)
//! - inbound frames larger than 512 bytes end the connection
//!
//! The pumps are generic over `Stream`/`Sink` of WebSocket messages so they
//! can be driven by in-memory channels.

use crate::dispatcher::Dispatcher;
use crate::hub::HubHandle;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Capacity of a connection's outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Largest inbound frame accepted, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Delimiter between payloads coalesced into one frame.
pub const BATCH_DELIMITER: char = '\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpTimings {
    /// Deadline for writing one frame.
    pub write_wait: Duration,
    /// Read deadline, reset when a pong is received.
    pub pong_wait: Duration,
    /// Interval between keepalive pings. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
}

impl Default for PumpTimings {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
        }
    }
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The per-connection or service token was cancelled.
    Cancelled,
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// The hub closed the outbound queue.
    QueueClosed,
    /// No pong within the read deadline.
    ReadTimeout,
    ReadError(String),
    FrameTooLarge(usize),
    WriteError(String),
}

/// Everything a connection needs besides its socket.
#[derive(Clone)]
pub struct ConnectionContext {
    pub hub: HubHandle,
    pub dispatcher: Arc<Dispatcher>,
    pub timings: PumpTimings,
    /// Service-wide shutdown token; each connection derives a child.
    pub shutdown: CancellationToken,
}

/// Register a freshly upgraded socket and run both pumps until it closes.
#[instrument(skip_all, name = "moderator.connection", fields(connection_id = %connection_id))]
pub async fn serve(socket: WebSocket, connection_id: ConnectionId, ctx: ConnectionContext) {
    let (sink, stream) = socket.split();
    let (queue_tx, queue_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let cancel = ctx.shutdown.child_token();

    if let Err(e) = ctx.hub.register(connection_id, queue_tx).await {
        warn!(
            target: "moderator.connection",
            connection_id = %connection_id,
            error = %e,
            "Hub unavailable, dropping connection"
        );
        return;
    }

    info!(target: "moderator.connection", connection_id = %connection_id, "Connection opened");

    let outbound = tokio::spawn(run_outbound(
        connection_id,
        sink,
        queue_rx,
        ctx.timings,
        cancel.clone(),
    ));

    let inbound_exit = run_inbound(
        connection_id,
        stream,
        Arc::clone(&ctx.dispatcher),
        ctx.hub.clone(),
        ctx.timings,
        cancel,
    )
    .await;

    let outbound_exit = outbound.await.unwrap_or_else(|e| PumpExit::WriteError(e.to_string()));

    info!(
        target: "moderator.connection",
        connection_id = %connection_id,
        inbound = ?inbound_exit,
        outbound = ?outbound_exit,
        "Connection closed"
    );
}

/// Read frames, dispatch them and broadcast the results.
///
/// Always unregisters from the hub and cancels `cancel` before returning.
pub async fn run_inbound<St, E>(
    connection_id: ConnectionId,
    mut stream: St,
    dispatcher: Arc<Dispatcher>,
    hub: HubHandle,
    timings: PumpTimings,
    cancel: CancellationToken,
) -> PumpExit
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let mut deadline = Instant::now() + timings.pong_wait;

    let exit = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break PumpExit::Cancelled,
            next = timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => break PumpExit::ReadTimeout,
            Ok(None) => break PumpExit::PeerClosed,
            Ok(Some(Err(e))) => break PumpExit::ReadError(e.to_string()),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if text.len() > MAX_MESSAGE_SIZE {
                    break PumpExit::FrameTooLarge(text.len());
                }
                handle_frame(connection_id, &text, &dispatcher, &hub).await;
            }
            Message::Binary(bytes) => {
                if bytes.len() > MAX_MESSAGE_SIZE {
                    break PumpExit::FrameTooLarge(bytes.len());
                }
                debug!(
                    target: "moderator.connection",
                    connection_id = %connection_id,
                    len = bytes.len(),
                    "Ignoring binary frame"
                );
            }
            Message::Pong(_) => {
                deadline = Instant::now() + timings.pong_wait;
            }
            // Pings are answered by the WebSocket layer.
            Message::Ping(_) => {}
            Message::Close(_) => break PumpExit::PeerClosed,
        }
    };

    match &exit {
        PumpExit::Cancelled | PumpExit::PeerClosed => debug!(
            target: "moderator.connection",
            connection_id = %connection_id,
            reason = ?exit,
            "Inbound pump stopped"
        ),
        _ => warn!(
            target: "moderator.connection",
            connection_id = %connection_id,
            reason = ?exit,
            "Inbound pump failed"
        ),
    }

    if let Err(e) = hub.unregister(connection_id).await {
        debug!(
            target: "moderator.connection",
            connection_id = %connection_id,
            error = %e,
            "Unregister skipped, hub stopped"
        );
    }
    cancel.cancel();

    exit
}

async fn handle_frame(
    connection_id: ConnectionId,
    text: &str,
    dispatcher: &Dispatcher,
    hub: &HubHandle,
) {
    let envelope = match dispatcher.dispatch(text).await {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return,
        Err(e) => {
            debug!(
                target: "moderator.connection",
                connection_id = %connection_id,
                error = %e,
                "Frame dropped"
            );
            return;
        }
    };

    let result = match envelope.encode() {
        Ok(payload) => hub.broadcast(payload).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(
            target: "moderator.connection",
            connection_id = %connection_id,
            error = %e,
            "Broadcast failed"
        );
    }
}

/// Write queued payloads and keepalive pings.
///
/// Payloads already queued when a write starts are joined with
/// [`BATCH_DELIMITER`] into one text frame. Cancels `cancel` before returning.
pub async fn run_outbound<Si>(
    connection_id: ConnectionId,
    mut sink: Si,
    mut queue: mpsc::Receiver<Arc<str>>,
    timings: PumpTimings,
    cancel: CancellationToken,
) -> PumpExit
where
    Si: Sink<Message> + Unpin,
    Si::Error: fmt::Display,
{
    let mut ping = tokio::time::interval_at(
        Instant::now() + timings.ping_period,
        timings.ping_period,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                };
                let _ = write_frame(&mut sink, Message::Close(Some(frame)), timings.write_wait).await;
                break PumpExit::Cancelled;
            }

            next = queue.recv() => {
                let Some(first) = next else {
                    let _ = write_frame(&mut sink, Message::Close(None), timings.write_wait).await;
                    break PumpExit::QueueClosed;
                };

                let batch = drain_batch(&first, &mut queue);
                if let Err(e) = write_frame(&mut sink, Message::Text(batch), timings.write_wait).await {
                    break PumpExit::WriteError(e);
                }
            }

            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Vec::new()), timings.write_wait).await {
                    break PumpExit::WriteError(e);
                }
            }
        }
    };

    if let PumpExit::WriteError(reason) = &exit {
        warn!(
            target: "moderator.connection",
            connection_id = %connection_id,
            error = %reason,
            "Outbound pump failed"
        );
    } else {
        debug!(
            target: "moderator.connection",
            connection_id = %connection_id,
            reason = ?exit,
            "Outbound pump stopped"
        );
    }
    cancel.cancel();

    exit
}

/// Join `first` with whatever is already queued, up to one queue's worth.
fn drain_batch(first: &str, queue: &mut mpsc::Receiver<Arc<str>>) -> String {
    let mut batch = String::from(first);
    for _ in 1..OUTBOUND_QUEUE_CAPACITY {
        match queue.try_recv() {
            Ok(next) => {
                batch.push(BATCH_DELIMITER);
                batch.push_str(&next);
            }
            Err(_) => break,
        }
    }
    batch
}

async fn write_frame<Si>(sink: &mut Si, message: Message, wait: Duration) -> Result<(), String>
where
    Si: Sink<Message> + Unpin,
    Si::Error: fmt::Display,
{
    match timeout(wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write deadline of {wait:?} exceeded")),
    }
}

//! Start-announcement scheduler.
//!
//! The first join of a not-yet-started meeting reserves a one-shot timer.
//! When the scheduled start time arrives the "meeting is starting" message is
//! broadcast and the meeting is marked started in storage. The reservation is
//! a check-and-insert under one lock, so concurrent joins start at most one
//! timer per meeting. Timers stop only on service shutdown.
//!
//! The reservation is released once the meeting is marked started. A join
//! that read the meeting just before that can still reserve again; its timer
//! re-reads the meeting and stays silent.

use crate::hub::HubHandle;
use crate::moderator::ModeratorEngine;
use crate::observability::metrics;
use crate::protocol::OutboundEnvelope;
use crate::storage::{MeetingId, Storage};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct StartAnnouncer {
    engine: Arc<ModeratorEngine>,
    storage: Arc<dyn Storage>,
    hub: HubHandle,
    reserved: Arc<Mutex<HashSet<MeetingId>>>,
    cancel_token: CancellationToken,
}

impl StartAnnouncer {
    pub fn new(
        engine: Arc<ModeratorEngine>,
        storage: Arc<dyn Storage>,
        hub: HubHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            engine,
            storage,
            hub,
            reserved: Arc::new(Mutex::new(HashSet::new())),
            cancel_token,
        }
    }

    /// Reserve the start announcement of `meeting_id`.
    ///
    /// Returns the timer task when this call made the reservation and `None`
    /// when the meeting was already reserved. Never blocks.
    pub fn schedule(
        &self,
        meeting_id: MeetingId,
        start_time: DateTime<Utc>,
    ) -> Option<JoinHandle<()>> {
        {
            let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
            if !reserved.insert(meeting_id) {
                debug!(
                    target: "moderator.scheduler",
                    meeting_id,
                    "Start announcement already reserved"
                );
                return None;
            }
        }

        info!(
            target: "moderator.scheduler",
            meeting_id,
            start_time = %start_time,
            "Start announcement reserved"
        );

        let engine = Arc::clone(&self.engine);
        let storage = Arc::clone(&self.storage);
        let hub = self.hub.clone();
        let cancel_token = self.cancel_token.clone();
        let reserved = Arc::clone(&self.reserved);

        Some(tokio::spawn(async move {
            let delay = (start_time - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!(
                        target: "moderator.scheduler",
                        meeting_id,
                        "Start announcement cancelled by shutdown"
                    );
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            if announce(meeting_id, &engine, storage.as_ref(), &hub).await {
                reserved
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&meeting_id);
            }
        }))
    }

    #[must_use]
    pub fn is_reserved(&self, meeting_id: MeetingId) -> bool {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&meeting_id)
    }
}

/// Returns true once the meeting is recorded as started, whether by this
/// call or an earlier one.
async fn announce(
    meeting_id: MeetingId,
    engine: &ModeratorEngine,
    storage: &dyn Storage,
    hub: &HubHandle,
) -> bool {
    match storage.meeting(meeting_id).await {
        Ok(meeting) if meeting.started => {
            debug!(
                target: "moderator.scheduler",
                meeting_id,
                "Meeting already started, nothing to announce"
            );
            return true;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(
                target: "moderator.scheduler",
                meeting_id,
                error = %e,
                "Meeting lookup failed before start announcement"
            );
            return false;
        }
    }

    let payload = match engine
        .start_announcement(meeting_id)
        .await
        .and_then(|msg| OutboundEnvelope::ModeratorMsg(msg).encode())
    {
        Ok(payload) => payload,
        Err(e) => {
            warn!(
                target: "moderator.scheduler",
                meeting_id,
                error = %e,
                "Start announcement could not be built"
            );
            return false;
        }
    };

    if let Err(e) = hub.broadcast(payload).await {
        warn!(
            target: "moderator.scheduler",
            meeting_id,
            error = %e,
            "Start announcement broadcast failed"
        );
        return false;
    }
    metrics::record_start_announcement();

    match storage.mark_meeting_started(meeting_id).await {
        Ok(()) => {
            info!(target: "moderator.scheduler", meeting_id, "Meeting started");
            true
        }
        Err(e) => {
            warn!(
                target: "moderator.scheduler",
                meeting_id,
                error = %e,
                "Failed to mark meeting started"
            );
            false
        }
    }
}

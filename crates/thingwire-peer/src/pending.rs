use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thingwire_codec::InfoTable;
use thingwire_frame::MsgCode;
use tracing::{debug, warn};

/// A response matched to an outstanding request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseOutcome {
    pub code: MsgCode,
    pub content: Option<InfoTable>,
    pub session_id: u32,
}

#[derive(Debug)]
struct PendingResponse {
    expires_at: Instant,
    outcome: Option<ResponseOutcome>,
}

/// Requests waiting for a response, keyed by request id.
///
/// At most one registration exists per id; registering again replaces it.
#[derive(Debug, Default)]
pub struct PendingResponses {
    slots: Mutex<HashMap<u32, PendingResponse>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, PendingResponse>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, request_id: u32, expires_at: Instant) {
        let replaced = self
            .lock()
            .insert(
                request_id,
                PendingResponse {
                    expires_at,
                    outcome: None,
                },
            )
            .is_some();
        if replaced {
            debug!(request_id, "replaced pending response registration");
        }
    }

    /// Record the response for `request_id`. Returns `false` when nobody is
    /// waiting for it.
    pub fn complete(
        &self,
        request_id: u32,
        code: MsgCode,
        content: Option<InfoTable>,
        session_id: u32,
    ) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(&request_id) else {
            warn!(request_id, %code, "no pending request for response");
            return false;
        };
        slot.outcome = Some(ResponseOutcome {
            code,
            content,
            session_id,
        });
        true
    }

    /// Take the response for `request_id` if it has arrived. The
    /// registration itself stays until [`unregister`](Self::unregister).
    pub fn take_completed(&self, request_id: u32) -> Option<ResponseOutcome> {
        self.lock()
            .get_mut(&request_id)
            .and_then(|slot| slot.outcome.take())
    }

    pub fn is_registered(&self, request_id: u32) -> bool {
        self.lock().contains_key(&request_id)
    }

    pub fn unregister(&self, request_id: u32) -> bool {
        self.lock().remove(&request_id).is_some()
    }

    /// Drop every registration whose deadline is before `now`.
    pub fn cleanup_expired(&self, now: Instant) -> usize {
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|request_id, slot| {
            let keep = slot.expires_at >= now;
            if !keep {
                debug!(request_id, "removing expired pending response");
            }
            keep
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

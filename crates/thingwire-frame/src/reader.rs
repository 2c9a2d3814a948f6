use std::time::Duration;

use tracing::{trace, warn};

use crate::codec::{FrameConfig, Message};
use crate::error::Result;
use crate::multipart::{MultipartStore, DEFAULT_STALE_AFTER};

/// Turns inbound binary frames into complete messages.
///
/// Single-frame messages come straight back. Multipart chunks are held in a
/// [`MultipartStore`] until the last one arrives.
#[derive(Debug)]
pub struct MessageReader {
    store: MultipartStore,
}

impl MessageReader {
    /// Create a reader with default limits.
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default(), DEFAULT_STALE_AFTER)
    }

    /// Create a reader whose reassembly limit follows `config`.
    pub fn with_config(config: &FrameConfig, stale_after: Duration) -> Self {
        Self {
            store: MultipartStore::new(config.max_message_size, stale_after),
        }
    }

    /// Decode one frame. Returns `Ok(None)` while a multipart message is
    /// still incomplete.
    pub fn read(&self, data: &[u8]) -> Result<Option<Message>> {
        let msg = Message::decode(data).inspect_err(|err| {
            warn!(len = data.len(), error = %err, "failed to decode inbound frame");
        })?;
        trace!(
            request_id = msg.request_id,
            code = %msg.code,
            kind = msg.body.kind(),
            "frame decoded"
        );
        if msg.multipart {
            return self.store.add(msg);
        }
        Ok(Some(msg))
    }

    /// The reassembly store.
    pub fn store(&self) -> &MultipartStore {
        &self.store
    }

    /// Drop stale partial messages. Returns how many were removed.
    pub fn remove_stale(&self) -> usize {
        self.store.remove_stale()
    }
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;

use crate::error::{FrameError, Result};

/// Default byte budget for queued offline frames.
pub const DEFAULT_OFFLINE_QUEUE_SIZE: usize = 16384;

/// Holds serialized request frames while the transport is down.
///
/// Frames are replayed in order once the transport reconnects, with the new
/// session id patched into each header.
pub trait OfflineStore: Send {
    /// Queue a frame. Fails when the frame does not fit.
    fn store(&mut self, frame: Bytes) -> Result<()>;

    /// Remove and return the oldest frame.
    fn pop_front(&mut self) -> Option<Bytes>;

    /// Put a frame back at the head of the queue after a failed replay.
    fn push_front(&mut self, frame: Bytes);

    /// Number of queued frames.
    fn len(&self) -> usize;

    /// Total bytes queued.
    fn queued_bytes(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`OfflineStore`] bounded by total queued bytes.
#[derive(Debug)]
pub struct MemoryOfflineStore {
    frames: VecDeque<Bytes>,
    queued: usize,
    max_bytes: usize,
}

impl MemoryOfflineStore {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            queued: 0,
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Default for MemoryOfflineStore {
    fn default() -> Self {
        Self::new(DEFAULT_OFFLINE_QUEUE_SIZE)
    }
}

impl OfflineStore for MemoryOfflineStore {
    fn store(&mut self, frame: Bytes) -> Result<()> {
        if self.queued + frame.len() >= self.max_bytes {
            return Err(FrameError::OfflineStoreFull {
                size: frame.len(),
                queued: self.queued,
                max: self.max_bytes,
            });
        }
        self.queued += frame.len();
        self.frames.push_back(frame);
        debug!(
            frames = self.frames.len(),
            queued = self.queued,
            "frame stored offline"
        );
        Ok(())
    }

    fn pop_front(&mut self) -> Option<Bytes> {
        let frame = self.frames.pop_front()?;
        self.queued -= frame.len();
        Some(frame)
    }

    fn push_front(&mut self, frame: Bytes) {
        self.queued += frame.len();
        self.frames.push_front(frame);
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn queued_bytes(&self) -> usize {
        self.queued
    }
}

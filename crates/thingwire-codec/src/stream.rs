use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::error::{CodecError, Result};

/// Growth increment for owned stream storage.
pub const STREAM_BLOCK_SIZE: usize = 256;

enum Storage {
    Owned(BytesMut),
    /// Caller-provided bytes, never copied until the stream is written to.
    View(Bytes),
}

/// A growable byte buffer with a read cursor.
///
/// Writes always append at the end; reads advance the cursor from the start.
/// Growth preserves both content and cursor offset, so a stream can be
/// written and read in interleaved fashion.
pub struct TwStream {
    storage: Storage,
    cursor: usize,
}

impl TwStream {
    /// Create an empty owning stream.
    pub fn new() -> Self {
        Self {
            storage: Storage::Owned(BytesMut::with_capacity(STREAM_BLOCK_SIZE)),
            cursor: 0,
        }
    }

    /// Create an owning stream holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        let capacity = blocks_for(data.len());
        let mut buf = BytesMut::with_capacity(capacity);
        buf.extend_from_slice(data);
        Self {
            storage: Storage::Owned(buf),
            cursor: 0,
        }
    }

    /// Wrap `data` without copying it.
    ///
    /// The stream switches to owned storage the first time bytes are
    /// appended.
    pub fn zero_copy(data: Bytes) -> Self {
        Self {
            storage: Storage::View(data),
            cursor: 0,
        }
    }

    /// Append bytes, growing capacity in [`STREAM_BLOCK_SIZE`] blocks.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Storage::View(view) = &self.storage {
            let mut buf = BytesMut::with_capacity(blocks_for(view.len()));
            buf.extend_from_slice(view);
            self.storage = Storage::Owned(buf);
        }
        if let Storage::Owned(buf) = &mut self.storage {
            let needed = buf.len() + bytes.len();
            if needed > buf.capacity() {
                let target = blocks_for(needed);
                buf.reserve(target - buf.len());
            }
            buf.extend_from_slice(bytes);
        }
    }

    /// Read up to `out.len()` bytes at the cursor.
    ///
    /// The count is clamped to what remains; an under-read is logged, not
    /// treated as an error. Returns the number of bytes copied.
    pub fn get_bytes(&mut self, out: &mut [u8]) -> usize {
        let available = self.remaining();
        let count = out.len().min(available);
        if count < out.len() {
            warn!(
                requested = out.len(),
                available, "stream under-read, truncating"
            );
        }
        let start = self.cursor;
        out[..count].copy_from_slice(&self.data()[start..start + count]);
        self.cursor += count;
        count
    }

    /// Read exactly `n` bytes at the cursor.
    pub fn read_slice(&mut self, n: usize) -> Result<&[u8]> {
        let available = self.remaining();
        if n > available {
            return Err(CodecError::Truncated {
                needed: n,
                available,
            });
        }
        let start = self.cursor;
        self.cursor += n;
        Ok(&self.data()[start..start + n])
    }

    /// Read exactly `N` bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Copy all unread bytes out and move the cursor to the end.
    pub fn read_remaining(&mut self) -> Bytes {
        let start = self.cursor;
        self.cursor = self.len();
        Bytes::copy_from_slice(&self.data()[start..])
    }

    /// Move the read cursor back to the start.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Total bytes held.
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Whether the stream holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current read cursor offset.
    pub fn index(&self) -> usize {
        self.cursor
    }

    /// Bytes between the cursor and the end.
    pub fn remaining(&self) -> usize {
        self.len() - self.cursor
    }

    /// Allocated capacity (the view length for zero-copy streams).
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Owned(buf) => buf.capacity(),
            Storage::View(bytes) => bytes.len(),
        }
    }

    /// Whether the stream currently owns its storage.
    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    /// All bytes held, regardless of cursor.
    pub fn data(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(buf) => &buf[..],
            Storage::View(bytes) => &bytes[..],
        }
    }

    /// Consume the stream and return its bytes.
    pub fn into_bytes(self) -> Bytes {
        match self.storage {
            Storage::Owned(buf) => buf.freeze(),
            Storage::View(bytes) => bytes,
        }
    }
}

impl Default for TwStream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TwStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwStream")
            .field("len", &self.len())
            .field("index", &self.cursor)
            .field("owned", &self.is_owned())
            .finish()
    }
}

fn blocks_for(len: usize) -> usize {
    (len / STREAM_BLOCK_SIZE + 1) * STREAM_BLOCK_SIZE
}

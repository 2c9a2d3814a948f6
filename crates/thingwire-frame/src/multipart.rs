use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use thingwire_codec::{string_to_stream, TwStream};
use tracing::{debug, info, trace, warn};

use crate::body::{Body, MultipartBody, RequestBody, ResponseBody};
use crate::codec::{Message, DEFAULT_MAX_MESSAGE_SIZE};
use crate::codes::{EntityType, MsgCode};
use crate::error::{FrameError, Result};

/// How long a partial message may wait for its remaining chunks.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(50);

struct Entry {
    code: MsgCode,
    version: u8,
    endpoint_id: u32,
    session_id: u32,
    first_entity: Option<(EntityType, String)>,
    chunks: Vec<Option<Bytes>>,
    received: usize,
    received_bytes: usize,
    expires_at: Instant,
}

/// Collects multipart chunks by request id until a message is complete.
///
/// Chunks may arrive in any order. The store is owned by one handler
/// context and is safe to share between threads.
pub struct MultipartStore {
    entries: Mutex<HashMap<u32, Entry>>,
    max_message_size: usize,
    stale_after: Duration,
}

impl MultipartStore {
    pub fn new(max_message_size: usize, stale_after: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_message_size,
            stale_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add one chunk. Returns the reassembled message once every chunk of
    /// its request id has arrived.
    pub fn add(&self, msg: Message) -> Result<Option<Message>> {
        self.add_at(msg, Instant::now())
    }

    /// [`add`](Self::add) with an explicit clock.
    pub fn add_at(&self, msg: Message, now: Instant) -> Result<Option<Message>> {
        let request_id = msg.request_id;
        let Body::Multipart(chunk) = msg.body else {
            return Err(FrameError::NotMultipart { request_id });
        };
        let MultipartBody {
            chunk_id,
            chunk_count,
            chunk_size,
            entity,
            data,
        } = chunk;

        if chunk_id == 0 || chunk_count == 0 || chunk_id > chunk_count {
            warn!(request_id, chunk_id, chunk_count, "multipart chunk out of range");
            return Err(FrameError::ChunkOutOfRange {
                chunk_id,
                chunk_count,
            });
        }

        let mut entries = self.lock();
        if !entries.contains_key(&request_id) {
            let declared = usize::from(chunk_count) * usize::from(chunk_size);
            if declared > self.max_message_size {
                warn!(
                    request_id,
                    declared,
                    max = self.max_message_size,
                    "multipart message exceeds max size"
                );
                return Err(FrameError::MessageTooLarge {
                    size: declared,
                    max: self.max_message_size,
                });
            }
            entries.insert(
                request_id,
                Entry {
                    code: msg.code,
                    version: msg.version,
                    endpoint_id: msg.endpoint_id,
                    session_id: msg.session_id,
                    first_entity: None,
                    chunks: vec![None; usize::from(chunk_count)],
                    received: 0,
                    received_bytes: 0,
                    expires_at: now + self.stale_after,
                },
            );
        }
        let Some(entry) = entries.get_mut(&request_id) else {
            return Ok(None);
        };

        let expected = entry.chunks.len();
        let slot = usize::from(chunk_id) - 1;
        if slot >= expected {
            warn!(request_id, chunk_id, expected, "chunk id beyond expected count");
            return Err(FrameError::ChunkOutOfRange {
                chunk_id,
                chunk_count: u16::try_from(expected).unwrap_or(u16::MAX),
            });
        }

        let previous = entry.chunks[slot].replace(data);
        match previous {
            Some(old) => entry.received_bytes -= old.len(),
            None => entry.received += 1,
        }
        if let Some(new) = &entry.chunks[slot] {
            entry.received_bytes += new.len();
        }
        if chunk_id == 1 {
            entry.first_entity = entity;
        }
        trace!(
            request_id,
            chunk_id,
            received = entry.received,
            expected,
            "multipart chunk stored"
        );

        if entry.received_bytes > self.max_message_size {
            let size = entry.received_bytes;
            entries.remove(&request_id);
            warn!(request_id, size, "multipart message exceeds max size");
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        if entry.received < expected {
            return Ok(None);
        }

        let Some(entry) = entries.remove(&request_id) else {
            return Ok(None);
        };
        drop(entries);
        reassemble(request_id, entry).map(Some)
    }

    /// Drop partial messages whose deadline has passed.
    pub fn remove_stale(&self) -> usize {
        self.remove_stale_at(Instant::now())
    }

    pub fn remove_stale_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|request_id, entry| {
            let keep = now <= entry.expires_at;
            if !keep {
                info!(request_id, "removing stale multipart message");
            }
            keep
        });
        before - entries.len()
    }

    /// Number of partial messages held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MultipartStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_STALE_AFTER)
    }
}

impl std::fmt::Debug for MultipartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartStore")
            .field("pending", &self.len())
            .field("max_message_size", &self.max_message_size)
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

fn reassemble(request_id: u32, entry: Entry) -> Result<Message> {
    let mut stream = TwStream::new();
    if entry.code.is_request() {
        if let Some((entity_type, name)) = &entry.first_entity {
            stream.add_bytes(&[entity_type.0]);
            string_to_stream(name, &mut stream)?;
        }
    }
    for data in entry.chunks.iter().flatten() {
        stream.add_bytes(data);
    }
    stream.reset();

    let body = if entry.code.is_request() {
        Body::Request(RequestBody::from_stream(&mut stream)?)
    } else {
        Body::Response(ResponseBody::from_stream(&mut stream)?)
    };
    debug!(
        request_id,
        chunks = entry.chunks.len(),
        len = stream.len(),
        "multipart message complete"
    );

    Ok(Message {
        version: entry.version,
        code: entry.code,
        request_id,
        endpoint_id: entry.endpoint_id,
        session_id: entry.session_id,
        multipart: false,
        body,
    })
}

#[cfg(test)]
mod tests {
    use thingwire_codec::InfoTable;

    use super::*;
    use crate::codec::FrameConfig;
    use crate::codes::Characteristic;
    use crate::writer::MessageWriter;

    fn chunks_of(msg: &Message, chunk_size: usize) -> Vec<Message> {
        let writer = MessageWriter::with_config(FrameConfig {
            chunk_size,
            max_message_size: 1 << 20,
        });
        writer
            .frames(msg, 0)
            .unwrap()
            .iter()
            .map(|f| Message::decode(f).unwrap())
            .collect()
    }

    fn big_request() -> Message {
        let mut msg = Message::request(MsgCode::PUT).unwrap();
        msg.request_id = 11;
        *msg.request_body_mut().unwrap() = RequestBody::new(
            EntityType::THING,
            "Boiler",
            Characteristic::PROPERTIES,
            "snapshot",
        )
        .with_params(InfoTable::from_blob("data", vec![7u8; 400], false));
        msg
    }

    fn big_response() -> Message {
        let mut msg = Message::response(MsgCode::SUCCESS, 12).unwrap();
        *msg.response_body_mut().unwrap() =
            ResponseBody::with_content(InfoTable::from_string("result", "x".repeat(300)));
        msg
    }

    fn store() -> MultipartStore {
        MultipartStore::new(1 << 20, DEFAULT_STALE_AFTER)
    }

    #[test]
    fn reassembles_request_in_order() {
        let original = big_request();
        let parts = chunks_of(&original, 100);
        assert!(parts.len() > 3);

        let store = store();
        let mut done = None;
        for part in parts {
            done = store.add(part).unwrap();
        }
        let done = done.unwrap();
        assert!(!done.multipart);
        assert_eq!(done.body, original.body);
        assert_eq!(done.request_id, 11);
        assert!(store.is_empty());
    }

    #[test]
    fn reassembles_response_in_any_order() {
        let original = big_response();
        let mut parts = chunks_of(&original, 80);
        parts.reverse();
        let last = parts.len() - 1;
        parts.swap(0, last / 2);

        let store = store();
        let mut results = Vec::new();
        for part in parts {
            results.push(store.add(part).unwrap());
        }
        assert!(results[..last].iter().all(Option::is_none));
        let done = results.pop().flatten().unwrap();
        assert_eq!(done.code, MsgCode::SUCCESS);
        assert_eq!(done.body, original.body);
    }

    #[test]
    fn interleaved_messages_reassemble_independently() {
        let req = chunks_of(&big_request(), 100);
        let resp = chunks_of(&big_response(), 100);
        let store = store();
        let mut completed = Vec::new();
        let mut req = req.into_iter();
        let mut resp = resp.into_iter();
        loop {
            let a = req.next();
            let b = resp.next();
            if a.is_none() && b.is_none() {
                break;
            }
            for part in a.into_iter().chain(b) {
                if let Some(done) = store.add(part).unwrap() {
                    completed.push(done.request_id);
                }
            }
        }
        completed.sort_unstable();
        assert_eq!(completed, vec![11, 12]);
    }

    #[test]
    fn rejects_chunk_zero_and_beyond_count() {
        let mut parts = chunks_of(&big_response(), 80);
        let store = store();

        let mut zero = parts.remove(0);
        if let Body::Multipart(body) = &mut zero.body {
            body.chunk_id = 0;
        }
        assert!(matches!(
            store.add(zero),
            Err(FrameError::ChunkOutOfRange { chunk_id: 0, .. })
        ));

        let mut beyond = parts.remove(0);
        if let Body::Multipart(body) = &mut beyond.body {
            body.chunk_id = body.chunk_count + 1;
        }
        assert!(matches!(
            store.add(beyond),
            Err(FrameError::ChunkOutOfRange { .. })
        ));
    }

    #[test]
    fn later_chunk_beyond_first_declared_count_is_rejected() {
        let parts = chunks_of(&big_response(), 80);
        let store = store();
        store.add(parts[0].clone()).unwrap();

        let mut liar = parts[1].clone();
        if let Body::Multipart(body) = &mut liar.body {
            body.chunk_count = 200;
            body.chunk_id = 150;
        }
        assert!(matches!(
            store.add(liar),
            Err(FrameError::ChunkOutOfRange { chunk_id: 150, .. })
        ));
    }

    #[test]
    fn declared_size_over_max_is_rejected() {
        let parts = chunks_of(&big_response(), 80);
        let small = MultipartStore::new(100, DEFAULT_STALE_AFTER);
        assert!(matches!(
            small.add(parts[0].clone()),
            Err(FrameError::MessageTooLarge { .. })
        ));
        assert!(small.is_empty());
    }

    #[test]
    fn accumulated_bytes_over_max_drop_the_entry() {
        let store = MultipartStore::new(64, DEFAULT_STALE_AFTER);
        let chunk = |id: u16| Message {
            body: Body::Multipart(MultipartBody {
                chunk_id: id,
                chunk_count: 2,
                chunk_size: 32,
                entity: None,
                data: Bytes::from(vec![0u8; 40]),
            }),
            multipart: true,
            ..Message::response(MsgCode::SUCCESS, 5).unwrap()
        };
        assert!(store.add(chunk(1)).unwrap().is_none());
        assert!(matches!(
            store.add(chunk(2)),
            Err(FrameError::MessageTooLarge { size: 80, max: 64 })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn non_multipart_input_is_rejected() {
        let msg = Message::response(MsgCode::SUCCESS, 1).unwrap();
        assert!(matches!(
            store().add(msg),
            Err(FrameError::NotMultipart { request_id: 1 })
        ));
    }

    #[test]
    fn stale_entries_are_swept() {
        let parts = chunks_of(&big_response(), 80);
        let store = MultipartStore::new(1 << 20, Duration::from_secs(5));
        let start = Instant::now();
        store.add_at(parts[0].clone(), start).unwrap();
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove_stale_at(start + Duration::from_secs(4)), 0);
        assert_eq!(store.remove_stale_at(start + Duration::from_secs(6)), 1);
        assert!(store.is_empty());
    }
}

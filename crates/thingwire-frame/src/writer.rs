use bytes::{BufMut, Bytes, BytesMut};
use thingwire_codec::{encoded_string_len, TwStream};
use thingwire_transport::Transport;
use tracing::{debug, error, trace, warn};

use crate::body::{Body, MultipartBody};
use crate::codec::{FrameConfig, Message, HEADER_SIZE, MULTIPART_HEADER_SIZE, SESSION_ID_OFFSET};
use crate::codes::EntityType;
use crate::error::{FrameError, Result};
use crate::offline::OfflineStore;

/// What happened to a message handed to [`MessageWriter::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every frame reached the transport.
    Sent,
    /// The transport was down; the remaining frames were queued offline.
    StoredOffline,
}

/// Serializes messages into physical frames and sends them.
///
/// A message whose header plus body exceeds the chunk size is split into a
/// multipart sequence. Every chunk carries the sub-header; request chunks
/// after the first also repeat the entity type and name.
#[derive(Debug, Clone, Default)]
pub struct MessageWriter {
    config: FrameConfig,
}

impl MessageWriter {
    /// Create a writer with default chunk and message sizes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Update the chunk size for subsequent messages.
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.config.chunk_size = chunk_size;
    }

    /// Serialize `msg` into the frames that would go on the wire.
    ///
    /// A nonzero `session_id` replaces the session id stored in the message.
    pub fn frames(&self, msg: &Message, session_id: u32) -> Result<Vec<Bytes>> {
        let session = if session_id != 0 {
            session_id
        } else {
            msg.session_id
        };

        let mut body = TwStream::new();
        msg.body.to_stream(&mut body)?;
        let body = body.into_bytes();

        let chunk_size = self.config.chunk_size;
        if body.len() + HEADER_SIZE <= chunk_size {
            let mut dst = BytesMut::with_capacity(HEADER_SIZE + body.len());
            msg.put_header(session, false, &mut dst);
            dst.put_slice(&body);
            return Ok(vec![dst.freeze()]);
        }

        let entity = repeated_entity(msg);
        let entity_overhead = entity
            .as_ref()
            .map_or(0, |(_, name)| 1 + encoded_string_len(name));
        let overhead = HEADER_SIZE + MULTIPART_HEADER_SIZE + entity_overhead;
        let wire_chunk_size = match u16::try_from(chunk_size) {
            Ok(size) if chunk_size > overhead => size,
            _ => {
                return Err(FrameError::InvalidChunkSize {
                    chunk_size,
                    overhead,
                })
            }
        };
        let first_capacity = chunk_size - HEADER_SIZE - MULTIPART_HEADER_SIZE;
        let capacity = chunk_size - overhead;

        let count = 1 + (body.len() - first_capacity).div_ceil(capacity);
        let chunk_count =
            u16::try_from(count).map_err(|_| FrameError::TooManyChunks { count })?;

        let mut frames = Vec::with_capacity(count);
        let mut offset = 0usize;
        for chunk_id in 1..=chunk_count {
            let cap = if chunk_id == 1 { first_capacity } else { capacity };
            let end = (offset + cap).min(body.len());
            let chunk = MultipartBody {
                chunk_id,
                chunk_count,
                chunk_size: wire_chunk_size,
                entity: if chunk_id == 1 { None } else { entity.clone() },
                data: body.slice(offset..end),
            };
            offset = end;

            let mut payload = TwStream::new();
            chunk.to_stream(&mut payload)?;
            let mut dst = BytesMut::with_capacity(HEADER_SIZE + payload.len());
            msg.put_header(session, true, &mut dst);
            dst.put_slice(payload.data());
            frames.push(dst.freeze());
        }
        Ok(frames)
    }

    /// Send `msg`, replaying queued offline frames first. AUTH and BIND
    /// messages never trigger a replay.
    ///
    /// When the transport reports it is not connected while sending a
    /// request and an offline store is present, the failed frame and every
    /// remaining frame are queued instead. Any other failure aborts the
    /// remaining chunks.
    pub fn send<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        msg: &Message,
        session_id: u32,
        mut offline: Option<&mut dyn OfflineStore>,
    ) -> Result<SendOutcome> {
        let replays = msg.code.is_request() || msg.code.is_response();
        if let Some(store) = offline.as_deref_mut().filter(|_| replays) {
            if !store.is_empty() && transport.is_connected() {
                self.replay_offline(transport, session_id, store);
            }
        }

        let frames = self.frames(msg, session_id)?;
        let chunk_count = frames.len();
        let mut frames = frames.into_iter();
        let mut chunk_id = 0usize;
        while let Some(frame) = frames.next() {
            chunk_id += 1;
            match transport.send_message(&frame, false) {
                Ok(()) => {
                    trace!(
                        request_id = msg.request_id,
                        code = %msg.code,
                        chunk_id,
                        chunk_count,
                        len = frame.len(),
                        "frame sent"
                    );
                }
                Err(err) if err.is_not_connected() && msg.code.is_request() => {
                    let Some(store) = offline.as_deref_mut() else {
                        error!(request_id = msg.request_id, "send failed, not connected");
                        return Err(err.into());
                    };
                    for pending in std::iter::once(frame).chain(frames.by_ref()) {
                        if let Err(store_err) = store.store(pending) {
                            warn!(
                                request_id = msg.request_id,
                                error = %store_err,
                                "offline store rejected frame"
                            );
                            return Err(err.into());
                        }
                    }
                    debug!(request_id = msg.request_id, "message stored offline");
                    return Ok(SendOutcome::StoredOffline);
                }
                Err(err) => {
                    error!(
                        request_id = msg.request_id,
                        chunk_id,
                        chunk_count,
                        error = %err,
                        "error sending message"
                    );
                    return Err(err.into());
                }
            }
        }
        Ok(SendOutcome::Sent)
    }

    /// Send queued offline frames with `session_id` patched into each header.
    ///
    /// Stops, keeping the frame queued, as soon as the transport reports it
    /// is not connected. Frames that fail for any other reason are dropped.
    /// Returns the number of frames sent.
    pub fn replay_offline<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        session_id: u32,
        store: &mut dyn OfflineStore,
    ) -> usize {
        let mut replayed = 0;
        while let Some(frame) = store.pop_front() {
            let mut patched = BytesMut::from(&frame[..]);
            if session_id != 0 && patched.len() >= HEADER_SIZE {
                patched[SESSION_ID_OFFSET..SESSION_ID_OFFSET + 4]
                    .copy_from_slice(&session_id.to_be_bytes());
            }
            match transport.send_message(&patched, false) {
                Ok(()) => replayed += 1,
                Err(err) if err.is_not_connected() => {
                    store.push_front(frame);
                    break;
                }
                Err(err) => warn!(error = %err, "dropping offline frame after send failure"),
            }
        }
        if replayed > 0 {
            debug!(replayed, remaining = store.len(), "offline frames replayed");
        }
        replayed
    }
}

fn repeated_entity(msg: &Message) -> Option<(EntityType, String)> {
    match &msg.body {
        Body::Request(body) if msg.code.is_request() => {
            Some((body.entity_type, body.entity_name.clone()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use thingwire_codec::{DataShape, DataShapeEntry, InfoTable, InfoTableRow, Primitive};
    use thingwire_transport::{MemoryPeer, MemoryTransport};

    use super::*;
    use crate::body::{RequestBody, ResponseBody};
    use crate::codes::{Characteristic, MsgCode};
    use crate::offline::MemoryOfflineStore;

    fn blob_table(len: usize) -> InfoTable {
        InfoTable::from_blob("data", vec![0x5A; len], false)
    }

    fn big_request(len: usize) -> Message {
        let mut msg = Message::request(MsgCode::PUT).unwrap();
        msg.request_id = 42;
        *msg.request_body_mut().unwrap() =
            RequestBody::new(EntityType::THING, "Pump", Characteristic::PROPERTIES, "image")
                .with_params(blob_table(len));
        msg
    }

    fn connected() -> (MemoryTransport, MemoryPeer) {
        let (mut transport, peer) = MemoryTransport::pair();
        transport.connect(Duration::from_secs(1)).unwrap();
        (transport, peer)
    }

    #[test]
    fn small_message_is_one_frame() {
        let msg = Message::response(MsgCode::SUCCESS, 1).unwrap();
        let frames = MessageWriter::new().frames(&msg, 0).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][14], 0);
        assert_eq!(frames[0], msg.to_bytes().unwrap());
    }

    #[test]
    fn session_id_overrides_header_when_nonzero() {
        let mut msg = Message::response(MsgCode::SUCCESS, 1).unwrap();
        msg.session_id = 5;
        let writer = MessageWriter::new();
        assert_eq!(&writer.frames(&msg, 0).unwrap()[0][10..14], &[0, 0, 0, 5]);
        assert_eq!(&writer.frames(&msg, 9).unwrap()[0][10..14], &[0, 0, 0, 9]);
    }

    #[test]
    fn response_chunk_count_matches_ceiling() {
        let writer = MessageWriter::with_config(FrameConfig {
            chunk_size: 100,
            max_message_size: 1 << 20,
        });
        let mut msg = Message::response(MsgCode::SUCCESS, 3).unwrap();
        *msg.response_body_mut().unwrap() = ResponseBody::with_content(blob_table(500));
        let body_len = msg.body.encoded_len();
        let effective = 100 - HEADER_SIZE - MULTIPART_HEADER_SIZE;

        let frames = writer.frames(&msg, 0).unwrap();
        assert_eq!(frames.len(), body_len.div_ceil(effective));
        for (i, frame) in frames.iter().enumerate() {
            assert!(frame.len() <= 100);
            assert_eq!(frame[14], 1);
            let chunk = Message::decode(frame).unwrap();
            let part = chunk.multipart_body().unwrap();
            assert_eq!(usize::from(part.chunk_id), i + 1);
            assert_eq!(usize::from(part.chunk_count), frames.len());
            assert_eq!(part.chunk_size, 100);
            assert!(part.data.len() <= effective);
        }
    }

    #[test]
    fn request_chunks_repeat_entity_after_first() {
        let writer = MessageWriter::with_config(FrameConfig {
            chunk_size: 120,
            max_message_size: 1 << 20,
        });
        let msg = big_request(600);
        let frames = writer.frames(&msg, 0).unwrap();
        assert!(frames.len() > 2);

        let body_len = msg.body.encoded_len();
        let first = 120 - 21;
        let rest = first - (1 + 1 + "Pump".len());
        assert_eq!(frames.len(), 1 + (body_len - first).div_ceil(rest));

        let mut payload = 0;
        for frame in &frames {
            assert!(frame.len() <= 120);
            let chunk = Message::decode(frame).unwrap();
            let part = chunk.multipart_body().unwrap();
            assert_eq!(part.entity, Some((EntityType::THING, "Pump".to_string())));
            payload += part.data.len();
        }
        // Chunk 1's entity header is part of the body itself.
        assert_eq!(payload + 1 + 1 + "Pump".len(), body_len);
    }

    #[test]
    fn chunk_size_too_small_is_rejected() {
        let writer = MessageWriter::with_config(FrameConfig {
            chunk_size: 25,
            max_message_size: 1 << 20,
        });
        let err = writer.frames(&big_request(100), 0).unwrap_err();
        assert!(matches!(err, FrameError::InvalidChunkSize { .. }));
    }

    #[test]
    fn send_delivers_every_chunk() {
        let (mut transport, peer) = connected();
        let writer = MessageWriter::with_config(FrameConfig {
            chunk_size: 200,
            max_message_size: 1 << 20,
        });
        let outcome = writer.send(&mut transport, &big_request(500), 0, None).unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        let sent = peer.take_sent();
        assert_eq!(sent.len(), writer.frames(&big_request(500), 0).unwrap().len());
        assert!(sent.iter().all(|m| !m.is_text));
    }

    #[test]
    fn not_connected_request_goes_offline() {
        let (mut transport, peer) = MemoryTransport::pair();
        let mut store = MemoryOfflineStore::default();
        let msg = big_request(10);

        let outcome = MessageWriter::new()
            .send(&mut transport, &msg, 0, Some(&mut store))
            .unwrap();
        assert_eq!(outcome, SendOutcome::StoredOffline);
        assert_eq!(store.len(), 1);
        assert_eq!(peer.sent_count(), 0);
    }

    #[test]
    fn not_connected_without_store_or_for_responses_fails() {
        let (mut transport, _peer) = MemoryTransport::pair();
        let writer = MessageWriter::new();
        let err = writer.send(&mut transport, &big_request(10), 0, None).unwrap_err();
        assert!(err.is_not_connected());

        let mut store = MemoryOfflineStore::default();
        let resp = Message::response(MsgCode::SUCCESS, 1).unwrap();
        let err = writer
            .send(&mut transport, &resp, 0, Some(&mut store))
            .unwrap_err();
        assert!(err.is_not_connected());
        assert!(store.is_empty());
    }

    #[test]
    fn other_send_errors_abort_remaining_chunks() {
        let (mut transport, peer) = connected();
        peer.set_fail_sends(true);
        let mut store = MemoryOfflineStore::default();
        let writer = MessageWriter::with_config(FrameConfig {
            chunk_size: 200,
            max_message_size: 1 << 20,
        });
        let err = writer
            .send(&mut transport, &big_request(500), 0, Some(&mut store))
            .unwrap_err();
        assert!(!err.is_not_connected());
        assert!(store.is_empty());
        assert_eq!(peer.sent_count(), 0);
    }

    #[test]
    fn queued_frames_replay_with_patched_session() {
        let (mut transport, peer) = MemoryTransport::pair();
        let mut store = MemoryOfflineStore::default();
        let writer = MessageWriter::new();
        writer
            .send(&mut transport, &big_request(10), 0, Some(&mut store))
            .unwrap();
        assert_eq!(store.len(), 1);

        transport.connect(Duration::from_secs(1)).unwrap();
        let next = Message::response(MsgCode::SUCCESS, 2).unwrap();
        writer
            .send(&mut transport, &next, 0x0102_0304, Some(&mut store))
            .unwrap();

        let sent = peer.take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[0].data[10..14], &[1, 2, 3, 4]);
        assert_eq!(Message::decode(&sent[0].data).unwrap().request_id, 42);
        assert!(store.is_empty());
    }

    #[test]
    fn auth_does_not_trigger_replay() {
        let (mut transport, peer) = MemoryTransport::pair();
        let mut store = MemoryOfflineStore::default();
        let writer = MessageWriter::new();
        writer
            .send(&mut transport, &big_request(10), 0, Some(&mut store))
            .unwrap();

        transport.connect(Duration::from_secs(1)).unwrap();
        writer
            .send(&mut transport, &Message::auth("appKey", "k"), 0, Some(&mut store))
            .unwrap();
        assert_eq!(peer.sent_count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replay_stops_when_disconnected_again() {
        let (mut transport, _peer) = MemoryTransport::pair();
        let mut store = MemoryOfflineStore::default();
        store.store(Bytes::from(vec![0u8; 20])).unwrap();
        store.store(Bytes::from(vec![1u8; 20])).unwrap();

        let replayed = MessageWriter::new().replay_offline(&mut transport, 7, &mut store);
        assert_eq!(replayed, 0);
        assert_eq!(store.len(), 2);
        assert_eq!(store.queued_bytes(), 40);
    }

    #[test]
    fn push_shaped_table_fits_one_frame() {
        let shape = DataShape::new(DataShapeEntry::new("name", "", thingwire_codec::BaseType::String));
        let mut table = InfoTable::new(shape);
        table.add_row(InfoTableRow::new(Primitive::string("temp")));
        let mut msg = Message::request(MsgCode::POST).unwrap();
        msg.request_body_mut().unwrap().params = Some(table);
        assert_eq!(MessageWriter::new().frames(&msg, 0).unwrap().len(), 1);
    }
}

// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The WebSocket protocol handler (§4.H): installed on a connection after
//! a successful upgrade, owns the message-assembly buffer, and drives
//! ping/pong and idle-timeout bookkeeping. Wire framing itself
//! (`decode_header`/`encode_frame`/masking) lives in
//! `riptide_parser::ws` - this module only assembles frames into
//! messages and decides what to do with them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use riptide_parser::ws::{
    decode_header, encode_frame, encode_frame_fragment, take_payload, unmask_payload, CloseCode,
    OpCode,
};
use riptide_parser::{RawRequest, Status};

use crate::buffer::Buffer;
use crate::conn::ConnHandle;
use crate::error::Error;
use crate::server::ServerShared;

/// Frames larger than this are split across multiple frames when sent
/// (§4.G: "payloads larger than an implementation threshold are sent as
/// fragments").
pub const DEFAULT_FRAGMENT_THRESHOLD: usize = 64 * 1024;

/// Default cap on an assembled message's size; exceeding it closes the
/// connection with 1009 (Message Too Big).
pub const DEFAULT_MAX_MSG_SIZE: usize = 16 * 1024 * 1024;

/// Invoked once, synchronously, right after the 101 response flushes.
pub type OnOpen = Arc<dyn Fn(&WebSocket) + Send + Sync>;
/// Invoked once per complete, unmasked message.
pub type OnMessage = Arc<dyn Fn(&WebSocket, &[u8], bool) + Send + Sync>;
/// Invoked exactly once at the terminal transition, regardless of cause.
pub type OnClose = Arc<dyn Fn(&WebSocket) + Send + Sync>;
/// Invoked during server shutdown, the last chance to write before the
/// connection is force-closed with 1001.
pub type OnShutdown = Arc<dyn Fn(&WebSocket) + Send + Sync>;

/// The named-field callback set from `websocket_upgrade`'s configuration
/// (§9's "designated-initializer callback configs" note): `on_message` is
/// the only callback that is not optional.
#[derive(Clone)]
pub struct Callbacks {
    /// Invoked once, after the upgrade response has flushed.
    pub on_open: Option<OnOpen>,
    /// Invoked once per complete message.
    pub on_message: OnMessage,
    /// Invoked once when the connection terminates.
    pub on_close: Option<OnClose>,
    /// Invoked once per connection during graceful shutdown.
    pub on_shutdown: Option<OnShutdown>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .finish()
    }
}

/// A handle passed to every callback. Like a `ConnHandle`, this is a weak
/// reference - `write`/`close` silently no-op if the connection has
/// already closed (§9: weak back-references dereference-and-skip).
#[derive(Clone)]
pub struct WebSocket {
    pub(crate) handle: ConnHandle,
    pub(crate) shared: Arc<ServerShared>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket").field("handle", &self.handle).finish()
    }
}

impl WebSocket {
    pub(crate) fn new(handle: ConnHandle, shared: Arc<ServerShared>) -> Self {
        Self { handle, shared }
    }

    /// The connection's weak handle - usable as a broadcast origin or a
    /// dedup key across calls.
    pub fn handle(&self) -> ConnHandle {
        self.handle
    }

    /// Queues `data` as one message (fragmenting internally if needed).
    /// A no-op if the connection has already closed.
    pub fn write(&self, data: &[u8], is_text: bool) {
        let Some(conn) = self.shared.conns.get(self.handle) else {
            return;
        };
        let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
        enqueue_message(&mut guard.write_queue, data, is_text);
    }

    /// Initiates a graceful close (RFC 6455 §7.1.2: send a close frame,
    /// then wait for the peer's). A no-op if already closed.
    pub fn close(&self) {
        let Some(conn) = self.shared.conns.get(self.handle) else {
            return;
        };
        let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
        if let crate::conn::ProtocolState::WebSocket(ws) = &mut guard.protocol {
            if ws.closing {
                return;
            }
            ws.closing = true;
        }
        guard.enqueue_write(close_frame(CloseCode::NORMAL));
    }

    /// Fans `task` out to every other live WebSocket connection, exactly
    /// once to each, then schedules `on_complete(self.handle())` once
    /// every target has been visited (§4.I). A thin ergonomic wrapper
    /// around [`crate::broadcast::websocket_each`] for the common case of
    /// broadcasting from inside an `on_message` callback, which only has
    /// a `&WebSocket` in hand, not a `Server`/`ServerHandle`.
    pub fn broadcast<Task, Complete>(&self, task: Task, on_complete: Option<Complete>)
    where
        Task: Fn(&WebSocket) + Send + Sync + 'static,
        Complete: FnOnce(ConnHandle) + Send + 'static,
    {
        crate::broadcast::websocket_each(&self.shared, self.handle, task, on_complete);
    }
}

fn enqueue_message(queue: &mut VecDeque<Vec<u8>>, data: &[u8], is_text: bool) {
    let opcode = if is_text { OpCode::Text } else { OpCode::Binary };
    if data.len() <= DEFAULT_FRAGMENT_THRESHOLD {
        queue.push_back(encode_frame(opcode, data));
        return;
    }
    let mut chunks = data.chunks(DEFAULT_FRAGMENT_THRESHOLD).peekable();
    let mut first = true;
    while let Some(chunk) = chunks.next() {
        let is_last = chunks.peek().is_none();
        let frame_opcode = if first { opcode } else { OpCode::Continuation };
        queue.push_back(encode_frame_fragment(is_last, frame_opcode, chunk));
        first = false;
    }
}

fn close_frame(code: CloseCode) -> Vec<u8> {
    encode_frame(OpCode::Close, &code.0.to_be_bytes())
}

/// One message delivered to the caller once a frame (or fragment chain)
/// completes assembly.
#[derive(Debug)]
pub struct Delivery {
    /// The assembled, unmasked payload.
    pub data: Vec<u8>,
    /// `true` for a text message, `false` for binary.
    pub is_text: bool,
}

/// The result of feeding bytes into [`WsState::process`].
#[derive(Debug, Default)]
pub struct WsOutcome {
    /// Messages completed by this call, in wire order.
    pub deliveries: Vec<Delivery>,
    /// Set once a valid pong has been observed - callers should reset the
    /// idle deadline and clear `awaiting_pong`.
    pub pong_received: bool,
    /// Set once a close handshake should terminate the connection, after
    /// the write queue (already carrying the reply, if any) drains.
    pub should_close: bool,
}

/// Per-connection WebSocket assembly state, installed after upgrade.
pub struct WsState {
    pub(crate) callbacks: Arc<Callbacks>,
    assembling: Option<(OpCode, Vec<u8>)>,
    max_msg_size: usize,
    /// `true` once `on_open` has fired for this connection.
    pub(crate) opened: bool,
    /// `true` once a close frame has been sent or received.
    pub(crate) closing: bool,
}

impl std::fmt::Debug for WsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsState")
            .field("opened", &self.opened)
            .field("closing", &self.closing)
            .finish()
    }
}

impl WsState {
    /// Builds assembly state for a freshly upgraded connection.
    pub fn new(callbacks: Callbacks, max_msg_size: usize) -> Self {
        Self {
            callbacks: Arc::new(callbacks),
            assembling: None,
            max_msg_size,
            opened: false,
            closing: false,
        }
    }

    /// Decodes every complete frame currently buffered in `read_buf`,
    /// writing control-frame replies (pong echoes, close acks) directly
    /// onto `write_queue` and returning any messages that finished
    /// assembling. Leaves a trailing partial frame untouched in
    /// `read_buf` for the next read.
    pub fn process(
        &mut self,
        read_buf: &mut Buffer,
        write_queue: &mut VecDeque<Vec<u8>>,
    ) -> Result<WsOutcome, Error> {
        let mut outcome = WsOutcome::default();
        let bytes: &[u8] = read_buf;
        let total_len = bytes.len();
        // Safety-free workaround for the borrow checker: `RawRequest`
        // borrows `read_buf` immutably while we also want to call
        // `read_buf.mark_read` afterwards, so we copy the unread region's
        // length bookkeeping out as we go and apply it once at the end.
        let snapshot = bytes.to_vec();
        let mut cursor = RawRequest::new(&snapshot);

        loop {
            let before = cursor.as_ref().len();
            let header = match decode_header(&mut cursor, true, self.max_msg_size as u64) {
                Ok(Status::Complete(h)) => h,
                Ok(Status::Partial) => break,
                Err(e) => return Err(e.into()),
            };
            let Some(raw_payload) = take_payload(&mut cursor, header.payload_len as usize) else {
                // Not enough bytes for the payload yet; rewind past the
                // header we just consumed isn't possible with this
                // forward-only cursor, so bail and let the next read
                // re-decode the header (cheap: headers are a few bytes).
                let consumed = total_len - before;
                read_buf.mark_read(consumed);
                return Ok(outcome);
            };
            let mut payload = raw_payload.to_vec();
            unmask_payload(&header, &mut payload);

            if header.opcode.is_control() {
                self.handle_control(header.opcode, &payload, write_queue, &mut outcome)?;
                continue;
            }

            self.handle_data(header.opcode, header.fin, &payload, &mut outcome)?;
            if outcome.should_close {
                break;
            }
        }

        let consumed = total_len - cursor.as_ref().len();
        read_buf.mark_read(consumed);
        Ok(outcome)
    }

    fn handle_control(
        &mut self,
        opcode: OpCode,
        payload: &[u8],
        write_queue: &mut VecDeque<Vec<u8>>,
        outcome: &mut WsOutcome,
    ) -> Result<(), Error> {
        match opcode {
            OpCode::Ping => {
                write_queue.push_back(encode_frame(OpCode::Pong, payload));
                outcome.pong_received = false;
            }
            OpCode::Pong => {
                outcome.pong_received = true;
            }
            OpCode::Close => {
                if self.closing {
                    outcome.should_close = true;
                    return Ok(());
                }
                self.closing = true;
                let code = parse_close_code(payload);
                write_queue.push_back(close_frame(code));
                outcome.should_close = true;
            }
            _ => unreachable!("is_control() only admits Close/Ping/Pong"),
        }
        Ok(())
    }

    fn handle_data(
        &mut self,
        opcode: OpCode,
        fin: bool,
        payload: &[u8],
        outcome: &mut WsOutcome,
    ) -> Result<(), Error> {
        match opcode {
            OpCode::Continuation => {
                let Some((_, buf)) = self.assembling.as_mut() else {
                    return Err(Error::Protocol(1002));
                };
                if buf.len() + payload.len() > self.max_msg_size {
                    self.assembling = None;
                    outcome.should_close = true;
                    return Err(Error::Protocol(1009));
                }
                buf.extend_from_slice(payload);
                if fin {
                    let (msg_opcode, data) = self.assembling.take().unwrap();
                    self.deliver(msg_opcode, data, outcome)?;
                }
            }
            OpCode::Text | OpCode::Binary => {
                if self.assembling.is_some() {
                    return Err(Error::Protocol(1002));
                }
                if payload.len() > self.max_msg_size {
                    outcome.should_close = true;
                    return Err(Error::Protocol(1009));
                }
                if fin {
                    self.deliver(opcode, payload.to_vec(), outcome)?;
                } else {
                    self.assembling = Some((opcode, payload.to_vec()));
                }
            }
            OpCode::Close | OpCode::Ping | OpCode::Pong => {
                unreachable!("control opcodes are routed through handle_control")
            }
        }
        Ok(())
    }

    fn deliver(&mut self, opcode: OpCode, data: Vec<u8>, outcome: &mut WsOutcome) -> Result<(), Error> {
        let is_text = matches!(opcode, OpCode::Text);
        if is_text && std::str::from_utf8(&data).is_err() {
            outcome.should_close = true;
            return Err(Error::Protocol(1007));
        }
        outcome.deliveries.push(Delivery { data, is_text });
        Ok(())
    }
}

fn parse_close_code(payload: &[u8]) -> CloseCode {
    if payload.len() < 2 {
        return CloseCode::NORMAL;
    }
    let code = CloseCode(u16::from_be_bytes([payload[0], payload[1]]));
    if code.is_allowed() {
        code
    } else {
        CloseCode::PROTOCOL_ERROR
    }
}

/// Default idle timeout before a ping is sent (§4.H, §8 scenario 6).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write as _;

    fn noop_callbacks() -> Callbacks {
        Callbacks {
            on_open: None,
            on_message: Arc::new(|_, _, _| {}),
            on_close: None,
            on_shutdown: None,
        }
    }

    fn mask_in_place(key: [u8; 4], data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }

    fn masked_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let key = [0x12, 0x34, 0x56, 0x78];
        let mut out = vec![((fin as u8) << 7) | opcode.as_u8()];
        let len = payload.len();
        if len <= 125 {
            out.push(0x80 | len as u8);
        } else {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        out.extend_from_slice(&key);
        let mut masked = payload.to_vec();
        mask_in_place(key, &mut masked);
        out.extend_from_slice(&masked);
        out
    }

    #[test]
    fn single_frame_text_message_delivers_whole() {
        let mut state = WsState::new(noop_callbacks(), DEFAULT_MAX_MSG_SIZE);
        let mut read_buf = Buffer::new(256);
        let frame = masked_frame(true, OpCode::Text, b"hello");
        read_buf.write_all(&frame).unwrap();
        let mut write_queue = VecDeque::new();

        let outcome = state.process(&mut read_buf, &mut write_queue).unwrap();
        assert_eq!(1, outcome.deliveries.len());
        assert_eq!(b"hello", outcome.deliveries[0].data.as_slice());
        assert!(outcome.deliveries[0].is_text);
        assert_eq!(0, read_buf.remaining());
    }

    #[test]
    fn fragmented_text_message_reassembles_in_order() {
        let mut state = WsState::new(noop_callbacks(), DEFAULT_MAX_MSG_SIZE);
        let mut read_buf = Buffer::new(256);
        let mut bytes = masked_frame(false, OpCode::Text, b"foo");
        bytes.extend(masked_frame(false, OpCode::Continuation, b"bar"));
        bytes.extend(masked_frame(true, OpCode::Continuation, b"baz"));
        read_buf.write_all(&bytes).unwrap();
        let mut write_queue = VecDeque::new();

        let outcome = state.process(&mut read_buf, &mut write_queue).unwrap();
        assert_eq!(1, outcome.deliveries.len());
        assert_eq!(b"foobarbaz", outcome.deliveries[0].data.as_slice());
        assert!(outcome.deliveries[0].is_text);
    }

    #[test]
    fn invalid_utf8_in_assembled_message_closes_with_1007() {
        let mut state = WsState::new(noop_callbacks(), DEFAULT_MAX_MSG_SIZE);
        let mut read_buf = Buffer::new(256);
        let frame = masked_frame(true, OpCode::Text, &[0xff, 0xfe]);
        read_buf.write_all(&frame).unwrap();
        let mut write_queue = VecDeque::new();

        let err = state.process(&mut read_buf, &mut write_queue).unwrap_err();
        assert!(matches!(err, Error::Protocol(1007)));
    }

    #[test]
    fn ping_auto_responds_with_pong_echoing_payload() {
        let mut state = WsState::new(noop_callbacks(), DEFAULT_MAX_MSG_SIZE);
        let mut read_buf = Buffer::new(256);
        let frame = masked_frame(true, OpCode::Ping, b"ping-data");
        read_buf.write_all(&frame).unwrap();
        let mut write_queue = VecDeque::new();

        state.process(&mut read_buf, &mut write_queue).unwrap();
        assert_eq!(1, write_queue.len());
        let pong = &write_queue[0];
        assert_eq!(OpCode::Pong.as_u8(), pong[0] & 0x0f);
    }

    #[test]
    fn close_frame_is_echoed_and_flags_connection_closed() {
        let mut state = WsState::new(noop_callbacks(), DEFAULT_MAX_MSG_SIZE);
        let mut read_buf = Buffer::new(256);
        let frame = masked_frame(true, OpCode::Close, &1000u16.to_be_bytes());
        read_buf.write_all(&frame).unwrap();
        let mut write_queue = VecDeque::new();

        let outcome = state.process(&mut read_buf, &mut write_queue).unwrap();
        assert!(outcome.should_close);
        assert_eq!(1, write_queue.len());
        assert_eq!(OpCode::Close.as_u8(), write_queue[0][0] & 0x0f);
    }
}

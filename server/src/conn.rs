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

//! The connection table: fd -> protocol handler + user state, per §4.C.
//!
//! Backed by `slab::Slab` (grounded in the teacher's own
//! `Slab<Arc<Mutex<Connection<S>>>>` use in `src/listener.rs`), which gives
//! us direct-indexed storage keyed by the same integer the reactor already
//! uses as a `mio::Token`. Each slot carries a generation counter; any
//! handle stored outside the table (a broadcast target list, a
//! `WebSocket` given to a user callback) is `(Token, generation)`, never
//! an owning reference, so a closed-and-reused slot is detected instead of
//! silently handing out someone else's connection.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::Token;
use slab::Slab;

use riptide_parser::h1::request::Limits;

use crate::pool::PooledRequest;
use crate::websocket::WsState;

/// Which protocol this connection currently speaks. `Closing` is entered
/// once a close has been decided and no further reads/writes other than
/// draining the write queue should occur.
#[derive(Debug)]
pub enum ProtocolState {
    /// Parsing HTTP/1.1 requests off the wire.
    Http(PooledRequest),
    /// Upgraded; framing/assembling WebSocket messages.
    WebSocket(Box<WsState>),
    /// Draining the write queue before the socket is closed.
    Closing,
}

/// A weak, generation-checked reference to a slot in the [`ConnTable`].
/// Never an owning handle - dereferencing through [`ConnTable::with`]
/// silently yields nothing if the generation has moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle {
    pub(crate) token: Token,
    pub(crate) generation: u32,
}

/// One live TCP connection: the fd, read/write buffering, the installed
/// protocol handler, and lifecycle bookkeeping (§3 Data Model).
#[derive(Debug)]
pub struct Connection {
    pub(crate) stream: TcpStream,
    token: Token,
    pub(crate) protocol: ProtocolState,
    pub(crate) read_buf: crate::buffer::Buffer,
    pub(crate) write_queue: VecDeque<Vec<u8>>,
    pub(crate) write_offset: usize,
    pub(crate) deadline: Instant,
    pub(crate) timeout: Duration,
    pub(crate) keep_alive: bool,
    pub(crate) closed: bool,
    pub(crate) limits: Limits,
    /// Set once a ping has been sent while awaiting the matching pong;
    /// cleared on any pong. Drives the idle-timeout escalation in §4.H.
    pub(crate) awaiting_pong: bool,
    /// Set once the connection has decided to close (a WebSocket close
    /// handshake completed, a protocol violation fired, or the idle
    /// timeout escalated) but the write queue hasn't drained yet.
    /// Persists across worker invocations so a close decided under one
    /// callback isn't lost if the socket needs another writable event to
    /// finish draining.
    pub(crate) pending_close: bool,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        token: Token,
        timeout: Duration,
        limits: Limits,
        request: PooledRequest,
    ) -> Self {
        Self {
            stream,
            token,
            protocol: ProtocolState::Http(request),
            read_buf: crate::buffer::Buffer::new(16 * 1024),
            write_queue: VecDeque::new(),
            write_offset: 0,
            deadline: Instant::now() + timeout,
            timeout,
            keep_alive: true,
            closed: false,
            limits,
            awaiting_pong: false,
            pending_close: false,
        }
    }

    /// Token this connection is registered under with the reactor.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Resets the idle deadline; called on any activity (read, pong).
    pub fn touch(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    /// Enqueues a byte span onto the FIFO write queue. Bytes already
    /// enqueued are never reordered relative to this one (§3 invariant).
    pub fn enqueue_write(&mut self, bytes: Vec<u8>) {
        self.write_queue.push_back(bytes);
    }

    /// `true` once every enqueued byte span has reached the socket.
    pub fn write_queue_empty(&self) -> bool {
        self.write_queue.is_empty()
    }

    /// Fills `read_buf` from the socket until `WouldBlock`. Returns the
    /// number of bytes read, or `Ok(0)` once the peer has closed the
    /// stream (matching `read() == 0` => EOF, mirrored from the teacher's
    /// `Session::fill`).
    pub fn fill(&mut self) -> std::io::Result<usize> {
        let mut total = 0;
        loop {
            if self.read_buf.remaining_mut() < 4096 {
                self.read_buf.reserve(16 * 1024);
            }
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    self.read_buf.mark_written(n);
                    total += n;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if total == 0 {
                        return Err(e);
                    }
                    return Ok(total);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Drains as much of the write queue as the socket currently accepts.
    /// Returns `true` once the entire queue has been flushed.
    pub fn flush(&mut self) -> std::io::Result<bool> {
        while let Some(front) = self.write_queue.front() {
            match self.stream.write(&front[self.write_offset..]) {
                Ok(0) => return Ok(self.write_queue.is_empty()),
                Ok(n) => {
                    self.write_offset += n;
                    if self.write_offset == front.len() {
                        self.write_queue.pop_front();
                        self.write_offset = 0;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

/// One entry in the table: the connection behind a clonable `Arc` (so a
/// worker can take its try-lock outside the structural lock below), plus
/// the generation tag validating weak handles into this slot. Grounded in
/// the teacher's `Slab<Arc<Mutex<Connection<S>>>>` in `src/listener.rs`.
#[derive(Debug, Clone)]
struct Slot {
    conn: Arc<Mutex<Connection>>,
    generation: u32,
}

/// The fd -> Connection map, direct-indexed by `slab::Slab` (§4.C).
#[derive(Debug)]
pub struct ConnTable {
    slots: Mutex<Slab<Slot>>,
    capacity: usize,
    /// Next generation to hand out for each slab key, indexed by key.
    /// Outlives any individual slot's occupancy so a reused key is never
    /// handed the same generation twice - `slab::Slab` itself forgets a
    /// removed entry's contents entirely, so this bookkeeping has to live
    /// outside it.
    next_generation: Mutex<Vec<u32>>,
}

impl ConnTable {
    /// Builds a table sized to `capacity` entries (bounded by the
    /// process fd limit in practice, per the design).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slab::with_capacity(capacity)),
            capacity,
            next_generation: Mutex::new(vec![0; capacity]),
        }
    }

    /// Reserves the next free slot and builds a connection for it via
    /// `build`, which receives the `Token` the slot was assigned - this
    /// lets the caller register the socket with the reactor under the
    /// exact token the connection table will key it by before the
    /// `Connection` itself is constructed (the mio registration and the
    /// slab key must agree). Fails if the table is already at `capacity`
    /// (maps to the reactor's `TooManyFds`), in which case `build` is
    /// never called.
    pub fn insert<F>(&self, build: F) -> Option<ConnHandle>
    where
        F: FnOnce(Token) -> Connection,
    {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.len() >= self.capacity {
            return None;
        }
        let entry = slots.vacant_entry();
        let token = Token(entry.key());
        let conn = build(token);
        debug_assert_eq!(conn.token(), token, "connection must carry the token it was built with");

        let mut generations = self.next_generation.lock().unwrap_or_else(|e| e.into_inner());
        if token.0 >= generations.len() {
            generations.resize(token.0 + 1, 0);
        }
        let generation = generations[token.0];
        generations[token.0] = generation.wrapping_add(1);
        drop(generations);

        entry.insert(Slot {
            conn: Arc::new(Mutex::new(conn)),
            generation,
        });
        Some(ConnHandle { token, generation })
    }

    /// Removes the slot for `token`. Any `(token, generation)` handle
    /// still held elsewhere (a broadcast target list, a `WebSocket` in a
    /// user callback) will find no slot on its next lookup and silently
    /// skip, per the weak-reference invariant in §3/§9.
    pub fn remove(&self, token: Token) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.contains(token.0) {
            slots.remove(token.0);
        }
    }

    /// Current live connection count.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// `true` if no connections are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a fresh, current-generation handle for `token`, or `None` if
    /// the slot is empty (used right after accept/insert).
    pub fn handle_for(&self, token: Token) -> Option<ConnHandle> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.get(token.0)?;
        Some(ConnHandle {
            token,
            generation: slot.generation,
        })
    }

    /// Clones the `Arc` behind `handle` out of the table, checking the
    /// generation first. A mismatch means the connection has already
    /// closed and the slot been reused or freed; callers (the worker
    /// pool, the broadcast engine) treat this exactly like a closed
    /// connection - skip it, but still count it as visited (§4.I).
    ///
    /// The returned `Arc` is locked by the caller (`try_lock` or `lock`)
    /// outside of the table's own structural lock, so one worker stuck on
    /// a contended connection never blocks another worker's unrelated
    /// lookup.
    pub fn get(&self, handle: ConnHandle) -> Option<Arc<Mutex<Connection>>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.get(handle.token.0)?;
        if slot.generation != handle.generation {
            return None;
        }
        Some(Arc::clone(&slot.conn))
    }

    /// Snapshots every live connection's handle other than `origin`, used
    /// by the broadcast engine (§4.I). Handles are collected under the
    /// structural lock, then visited without it held, so visitors may
    /// themselves look up or lock connections.
    pub fn handles_except(&self, origin: ConnHandle) -> Vec<ConnHandle> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .iter()
            .filter(|(key, _)| *key != origin.token.0)
            .map(|(key, slot)| ConnHandle {
                token: Token(key),
                generation: slot.generation,
            })
            .collect()
    }

    /// Removes `handle`'s slot from the table, invalidating every other
    /// outstanding handle to the same fd slot (their next `get` finds the
    /// slab entry gone).
    pub fn close(&self, handle: ConnHandle) {
        self.remove(handle.token);
    }

    /// Snapshots every live connection's handle, used by shutdown
    /// broadcast (§4.H) which - unlike [`ConnTable::handles_except`] -
    /// has no origin to exclude.
    pub fn all_handles(&self) -> Vec<ConnHandle> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .iter()
            .map(|(key, slot)| ConnHandle {
                token: Token(key),
                generation: slot.generation,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::TcpListener as StdTcpListener;
    use std::net::TcpStream as StdTcpStream;

    fn loopback_stream() -> TcpStream {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let _ = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        TcpStream::from_std(client)
    }

    fn insert_dummy(table: &ConnTable, pool: &Arc<crate::pool::RequestPool>) -> ConnHandle {
        table
            .insert(|token| {
                Connection::new(
                    loopback_stream(),
                    token,
                    Duration::from_secs(30),
                    Limits::default(),
                    pool.acquire(),
                )
            })
            .unwrap()
    }

    #[test]
    fn reused_slot_gets_a_new_generation() {
        let table = ConnTable::new(1);
        let pool = Arc::new(crate::pool::RequestPool::new(1));

        let first = insert_dummy(&table, &pool);
        assert_eq!(0, first.generation);
        table.close(first);

        let second = insert_dummy(&table, &pool);
        assert_eq!(first.token, second.token, "capacity 1 forces the same slab key to be reused");
        assert_ne!(first.generation, second.generation);

        // The stale handle to the first connection must not resolve to the
        // second connection now occupying the same slot.
        assert!(table.get(first).is_none());
        assert!(table.get(second).is_some());
    }
}

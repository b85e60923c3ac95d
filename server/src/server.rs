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

//! The runtime's external surface (§6): `Server`/`ServerHandle` and the
//! per-request `RequestContext` callbacks receive. Grounded in the
//! teacher's `Listener::run` accept/poll loop (`src/listener.rs`), with
//! connection bookkeeping delegated to [`crate::conn::ConnTable`] and
//! work handed off to [`crate::worker::WorkerPool`] rather than driven
//! inline on the reactor thread.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Registry, Token, Waker};

use riptide_parser::h1::request::Request;
use riptide_parser::h1::response::Response;
use riptide_parser::status::Status as HttpStatus;

use crate::config::{ListenConfig, RunConfig, UpgradeConfig};
use crate::conn::{ConnHandle, Connection, ProtocolState};
use crate::error::{Error, Result};
use crate::pool::RequestPool;
use crate::reactor::{Reactor, TimerWheel, TICK};
use crate::websocket::{Callbacks, WsState};
use crate::worker::{self, Task, WorkerPool};

/// Reserved token for the listening socket; connection tokens are
/// slab-assigned starting at 0, so this never collides (§4.A).
const LISTEN_TOKEN: Token = Token(usize::MAX);
/// Reserved token for the cross-thread [`mio::Waker`] used by
/// [`ServerHandle::stop`] to interrupt a blocked `poll()`.
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// How long graceful shutdown waits for in-flight WebSocket close
/// handshakes to complete before force-closing everything left open
/// (§4.H "graceful shutdown").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared between the reactor thread and every worker thread.
/// Never constructed directly by callers - reached through
/// [`RequestContext`] and [`crate::websocket::WebSocket`].
pub(crate) struct ServerShared {
    pub(crate) conns: Arc<crate::conn::ConnTable>,
    pub(crate) pool: Arc<RequestPool>,
    pub(crate) sender: Sender<Task>,
    pub(crate) config: ListenConfig,
    pub(crate) registry: Registry,
    waker: Waker,
    pub(crate) timers: Mutex<TimerWheel>,
    shutdown: AtomicBool,
    pub(crate) ws_count: AtomicUsize,
}

impl std::fmt::Debug for ServerShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerShared")
            .field("connections", &self.conns.len())
            .field("websockets", &self.ws_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl ServerShared {
    /// Schedules `f` to run on some worker thread, never the caller's -
    /// used by the broadcast engine and by callbacks that want to hop
    /// off whatever thread they're running on.
    pub(crate) fn defer(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.sender.send(Task::Defer(Box::new(f)));
    }
}

/// Handed to [`ListenConfig::on_request`] once per parsed request (§6).
/// Owns the pooled [`Request`](riptide_parser::h1::request::Request)
/// record and the connection's weak handle for the duration of the
/// callback; dropping without calling [`RequestContext::respond`] or
/// [`RequestContext::websocket_upgrade`] sends a `500` so a connection
/// can never hang waiting on a reply that was never sent.
pub struct RequestContext {
    request: crate::pool::PooledRequest,
    handle: ConnHandle,
    shared: Arc<ServerShared>,
    replied: bool,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("path", &self.request.path)
            .field("replied", &self.replied)
            .finish()
    }
}

impl RequestContext {
    pub(crate) fn new(request: crate::pool::PooledRequest, handle: ConnHandle, shared: Arc<ServerShared>) -> Self {
        Self { request, handle, shared, replied: false }
    }

    /// The parsed request this callback was invoked for.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// `true` if the client asked to upgrade this connection (an
    /// `Upgrade: websocket` request) and [`Self::websocket_upgrade`] may
    /// be called instead of [`Self::respond`].
    pub fn is_upgrade_requested(&self) -> bool {
        self.request.upgrade
    }

    /// Sends `response` as this request's reply, keeping the connection
    /// open for the next pipelined request unless `response` (or the
    /// client's `Connection: close`) says otherwise.
    pub fn respond(mut self, mut response: Response) -> Result<()> {
        self.send(&mut response)
    }

    fn send(&mut self, response: &mut Response) -> Result<()> {
        let keep_alive = self.request.keep_alive;
        let bytes = response.finish(keep_alive)?;
        let Some(conn) = self.shared.conns.get(self.handle) else {
            self.replied = true;
            return Ok(());
        };
        let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.enqueue_write(bytes);
        if !keep_alive {
            guard.pending_close = true;
        }
        self.replied = true;
        let _ = guard.flush();
        let interest = if guard.write_queue_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        let _ = self.shared.registry.reregister(&mut guard.stream, self.handle.token, interest);
        Ok(())
    }

    /// Completes a WebSocket upgrade (§4.H): sends the `101` built from
    /// `config.response` (or a bare default), installs the assembly
    /// state, and fires `config.on_open` once the response has flushed.
    /// Consumes `self` - exactly one reply, upgrade or ordinary
    /// response, is ever sent per request (§3 invariant).
    pub fn websocket_upgrade(mut self, config: UpgradeConfig) -> Result<()> {
        let Some(key) = self.request.headers.find("Sec-WebSocket-Key") else {
            return Err(Error::BadArgument("missing Sec-WebSocket-Key header"));
        };
        let key = String::from_utf8_lossy(key).into_owned();

        let response = config.response.unwrap_or_else(|| {
            Response::new(HttpStatus::SwitchingProtocols, riptide_parser::Version::H1_1)
        });
        let callbacks = Callbacks {
            on_open: config.on_open,
            on_message: config.on_message,
            on_close: config.on_close,
            on_shutdown: config.on_shutdown,
        };
        let state = WsState::new(callbacks, config.max_msg_size);

        worker::complete_upgrade(&self.shared, self.handle, &key, response, state, config.timeout)?;
        self.replied = true;
        Ok(())
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if self.replied {
            return;
        }
        let mut response = Response::new(HttpStatus::InternalServerError, riptide_parser::Version::H1_1);
        let _ = self.send(&mut response);
    }
}

/// A cloneable, `Send + Sync` handle to a running [`Server`] - the only
/// piece callers keep once [`Server::run`]/[`Server::listen`] has taken
/// ownership of the `Server` itself.
#[derive(Clone, Debug)]
pub struct ServerHandle {
    shared: Arc<ServerShared>,
}

impl ServerHandle {
    /// Requests graceful shutdown: wakes the reactor thread, which then
    /// runs the broadcast-then-force-close sequence described in §4.H
    /// before `run`/`listen` returns.
    pub fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _ = self.shared.waker.wake();
    }

    /// Count of currently upgraded, live WebSocket connections.
    pub fn websocket_count(&self) -> usize {
        self.shared.ws_count.load(Ordering::Relaxed)
    }
}

/// An accepting, not-yet-running server. Build one with [`Server::new`],
/// then either [`Server::run`] it directly or call [`Server::listen`]
/// as a one-shot convenience wrapper.
pub struct Server {
    shared: Arc<ServerShared>,
    reactor: Reactor,
    listener: TcpListener,
    receiver: crossbeam_channel::Receiver<Task>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("shared", &self.shared).finish()
    }
}

impl Server {
    /// Binds `config.port` (and `config.address`, defaulting to
    /// `0.0.0.0`) and builds every shared structure, without running
    /// the event loop yet.
    pub fn new(config: ListenConfig) -> Result<Self> {
        let addr = SocketAddr::new(
            config.address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            config.port,
        );
        let mut listener = TcpListener::bind(addr)?;
        let reactor = Reactor::new()?;
        reactor.register(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;

        let registry = reactor.registry()?;
        let waker = Waker::new(&registry, WAKE_TOKEN)?;
        let (sender, receiver) = unbounded();

        let shared = Arc::new(ServerShared {
            conns: Arc::new(crate::conn::ConnTable::new(config.max_connections)),
            pool: Arc::new(RequestPool::new(config.pool_capacity)),
            sender,
            registry,
            waker,
            timers: Mutex::new(TimerWheel::new()),
            shutdown: AtomicBool::new(false),
            ws_count: AtomicUsize::new(0),
            config,
        });

        Ok(Self { shared, reactor, listener, receiver })
    }

    /// A cloneable handle usable from any thread once `run`/`listen` is
    /// driving the event loop.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle { shared: Arc::clone(&self.shared) }
    }

    /// Binds and immediately runs with default [`RunConfig`] - the
    /// one-call convenience form (§6).
    pub fn listen(config: ListenConfig) -> Result<()> {
        Self::new(config)?.run(RunConfig::default())
    }

    /// Spawns the worker pool and blocks running the accept/poll loop
    /// until [`ServerHandle::stop`] is called, then performs graceful
    /// shutdown before returning.
    pub fn run(mut self, run_config: RunConfig) -> Result<()> {
        let pool = WorkerPool::spawn(run_config.threads.max(1), Arc::clone(&self.shared), self.receiver.clone());

        log::info!(target: "riptide_server::server", "listening on port {}", self.shared.config.port);
        self.event_loop()?;

        log::info!(target: "riptide_server::server", "shutting down gracefully");
        broadcast_shutdown(&self.shared);
        std::thread::sleep(SHUTDOWN_GRACE);
        force_close_remaining(&self.shared);

        for _ in 0..run_config.threads.max(1) {
            let _ = self.shared.sender.send(Task::Shutdown);
        }
        pool.join();
        Ok(())
    }

    fn event_loop(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                return Ok(());
            }

            let now = Instant::now();
            let wait = self
                .shared
                .timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .next_wait(now, TICK);
            match self.reactor.poll(&mut events, Some(wait)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            if self.shared.shutdown.load(Ordering::Acquire) {
                return Ok(());
            }

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => self.accept(),
                    WAKE_TOKEN => {}
                    token => {
                        let _ = self.shared.sender.send(Task::Io(token));
                    }
                }
            }

            let expired = self
                .shared
                .timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .expired(Instant::now());
            for token in expired {
                let _ = self.shared.sender.send(Task::Timeout(token));
            }
        }
    }

    /// Drains every pending connection off the listening socket,
    /// registering each with the reactor under the token its
    /// `ConnTable` slot was assigned (§4.A, grounded in the teacher's
    /// `Listener::accept`).
    fn accept(&mut self) {
        loop {
            let stream: TcpStream = match self.listener.accept() {
                Ok((stream, _addr)) => stream,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    log::warn!(target: "riptide_server::server", "accept failed: {e}");
                    return;
                }
            };
            let _ = stream.set_nodelay(true);

            let timeout = self.shared.config.timeout;
            let limits = self.shared.config.limits.clone();
            let pool = Arc::clone(&self.shared.pool);
            let registry = &self.shared.registry;

            let handle = self.shared.conns.insert(move |token| {
                let mut stream = stream;
                let _ = registry.register(&mut stream, token, Interest::READABLE);
                Connection::new(stream, token, timeout, limits, pool.acquire())
            });

            let Some(handle) = handle else {
                log::warn!(target: "riptide_server::server", "connection table full, dropping accept");
                continue;
            };

            if let Some(conn) = self.shared.conns.get(handle) {
                let deadline = conn.lock().unwrap_or_else(|e| e.into_inner()).deadline;
                self.shared
                    .timers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .schedule(deadline, handle.token);
            }
        }
    }
}

/// Fires `on_shutdown` (if set) on every live WebSocket, then sends a
/// `1001 Going Away` close frame - the last chance user code gets to
/// write before [`force_close_remaining`] runs (§4.H).
fn broadcast_shutdown(shared: &Arc<ServerShared>) {
    for handle in shared.conns.all_handles() {
        let Some(conn) = shared.conns.get(handle) else { continue };
        let callbacks = {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            match &guard.protocol {
                ProtocolState::WebSocket(state) => Some(Arc::clone(&state.callbacks)),
                _ => None,
            }
        };
        let Some(callbacks) = callbacks else { continue };

        if let Some(on_shutdown) = &callbacks.on_shutdown {
            let ws = crate::websocket::WebSocket::new(handle, Arc::clone(shared));
            on_shutdown(&ws);
        }

        let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.enqueue_write(riptide_parser::ws::encode_frame(
            riptide_parser::ws::OpCode::Close,
            &1001u16.to_be_bytes(),
        ));
        let _ = guard.flush();
    }
}

/// Deregisters and drops every connection still open once the shutdown
/// grace period has elapsed, regardless of whether its write queue
/// finished draining (§4.H: shutdown must terminate, not hang on a
/// client that never completes the close handshake).
fn force_close_remaining(shared: &Arc<ServerShared>) {
    for handle in shared.conns.all_handles() {
        if let Some(conn) = shared.conns.get(handle) {
            {
                let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
                let _ = guard.flush();
            }
            // Route through the same teardown path every other
            // termination cause uses, so `on_close` fires exactly once
            // here too instead of being bypassed by shutdown.
            worker::terminate(shared, handle, &conn);
        }
    }
}

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

//! Named-field configuration records (§6, §9's "designated-initializer
//! callback configs" note), matching the teacher's `ListenerConfig`
//! (`src/listener.rs`) shape: explicit optional fields with a
//! `Default` impl rather than a builder with required call order.

use std::sync::Arc;
use std::time::Duration;

use riptide_parser::h1::request::Limits;
use riptide_parser::h1::response::Response;

use crate::pool::DEFAULT_CAPACITY;
use crate::server::RequestContext;
use crate::websocket::DEFAULT_MAX_MSG_SIZE;

/// Invoked once per parsed HTTP/1.1 request.
pub type OnRequest = Arc<dyn Fn(RequestContext) + Send + Sync>;

/// Configuration for [`crate::server::Server::listen`].
#[derive(Clone)]
pub struct ListenConfig {
    /// Port to bind.
    pub port: u16,
    /// Address to bind; `None` binds `0.0.0.0`.
    pub address: Option<std::net::IpAddr>,
    /// Invoked once per parsed request.
    pub on_request: OnRequest,
    /// Root directory for the static-file collaborator (§6's
    /// `public_folder`/`log_static`): honored structurally only, per
    /// the design's non-goal on building an actual static-file server.
    pub public_folder: Option<std::path::PathBuf>,
    /// `true` to log each static-file hit at `info` level.
    pub log_static: bool,
    /// Per-request size bounds (request line, headers, body).
    pub limits: Limits,
    /// Idle timeout before a connection is reclaimed.
    pub timeout: Duration,
    /// Worker thread count; see [`RunConfig::threads`].
    pub threads: usize,
    /// Request-object pool capacity before falling back to heap
    /// allocation (§4.D).
    pub pool_capacity: usize,
    /// Maximum simultaneously open connections.
    pub max_connections: usize,
}

impl std::fmt::Debug for ListenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenConfig")
            .field("port", &self.port)
            .field("address", &self.address)
            .field("public_folder", &self.public_folder)
            .field("log_static", &self.log_static)
            .field("limits", &self.limits)
            .field("timeout", &self.timeout)
            .field("threads", &self.threads)
            .field("pool_capacity", &self.pool_capacity)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl ListenConfig {
    /// Builds a config bound to `port` on the wildcard address, with
    /// `on_request` as the only required field.
    pub fn new(port: u16, on_request: OnRequest) -> Self {
        Self {
            port,
            address: None,
            on_request,
            public_folder: None,
            log_static: false,
            limits: Limits::default(),
            timeout: Duration::from_secs(60),
            threads: default_thread_count(),
            pool_capacity: DEFAULT_CAPACITY,
            max_connections: 65536,
        }
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(8)
}

/// Per-connection configuration handed to [`crate::websocket::WebSocket`]
/// upgrades (§6's `websocket_upgrade`).
#[derive(Clone)]
pub struct UpgradeConfig {
    /// Invoked once, synchronously, after the 101 response flushes.
    pub on_open: Option<crate::websocket::OnOpen>,
    /// Invoked once per complete message. Required.
    pub on_message: crate::websocket::OnMessage,
    /// Invoked once at the terminal transition, regardless of cause.
    pub on_close: Option<crate::websocket::OnClose>,
    /// Invoked once per connection during graceful shutdown.
    pub on_shutdown: Option<crate::websocket::OnShutdown>,
    /// Idle timeout before a ping is sent (§4.H, §8 scenario 6).
    pub timeout: Duration,
    /// Cap on one assembled message's size (§4.G).
    pub max_msg_size: usize,
    /// A caller-built response to send as the `101` instead of a bare
    /// default one — useful for staging extra headers (e.g. a selected
    /// subprotocol). Any body staged on it is discarded: exactly one
    /// status line and the upgrade headers are ever written, never a
    /// body (§9 Open Question: the upgrade response never leaks a body).
    pub response: Option<Response>,
}

impl std::fmt::Debug for UpgradeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeConfig")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .field("timeout", &self.timeout)
            .field("max_msg_size", &self.max_msg_size)
            .finish()
    }
}

impl UpgradeConfig {
    /// Builds an upgrade config with `on_message` as the only required
    /// field.
    pub fn new(on_message: crate::websocket::OnMessage) -> Self {
        Self {
            on_open: None,
            on_message,
            on_close: None,
            on_shutdown: None,
            timeout: crate::websocket::DEFAULT_IDLE_TIMEOUT,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            response: None,
        }
    }
}

/// Configuration for [`crate::server::Server::run`] (§6's `run({ threads })`).
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    /// Worker thread count. Defaults to the host's parallelism.
    pub threads: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { threads: default_thread_count() }
    }
}

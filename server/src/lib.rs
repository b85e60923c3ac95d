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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports,
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! An embeddable, non-blocking HTTP/1.1 and WebSocket server runtime.
//!
//! A [`server::Server`] owns a `mio`-driven reactor and a fixed worker
//! pool; connections are distributed across workers by a direct-indexed
//! [`conn::ConnTable`], never by a single shared lock. HTTP/1.1 parsing
//! and WebSocket framing themselves live in `riptide_parser` - this
//! crate only drives sockets and dispatches to user callbacks.
//!
//! See `demos/` for a minimal echo and broadcast server built on this
//! API.

mod buffer;
pub mod broadcast;
pub mod config;
pub mod conn;
pub mod error;
pub mod pool;
pub mod reactor;
pub mod server;
pub mod websocket;
pub mod worker;

pub use error::{Error, Result};

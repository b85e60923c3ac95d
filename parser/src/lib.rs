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

#![deny(missing_debug_implementations, rust_2018_idioms, unused_imports)]
#![allow(dead_code)]

//! Wire-level parsing and framing for HTTP/1.1 and WebSocket (RFC 6455).
//!
//! This crate has no knowledge of sockets, threads, or reactors: every
//! entry point takes a byte slice and returns a [`Status`] describing
//! whether more input is needed. `riptide-server` drives these state
//! machines from non-blocking socket reads.

pub mod h1;
mod raw_request;
pub mod status;
pub mod url;
pub mod ws;

mod method;
mod version;

pub use method::Method;
pub use raw_request::RawRequest;
pub use version::Version;

/// Outcome of feeding more bytes into a resumable parser.
///
/// Mirrors the `REQ_LINE -> HEADERS -> BODY_OR_UPGRADE -> DONE` state
/// machine from the design: callers loop feeding bytes until `Complete`
/// or an error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status<T> {
    /// The parser consumed what was available but needs more bytes.
    Partial,
    /// Parsing finished; `T` is the parsed value.
    Complete(T),
}

impl<T> Status<T> {
    /// Returns `true` if this is [`Status::Complete`].
    pub fn is_complete(&self) -> bool {
        matches!(self, Status::Complete(_))
    }

    /// Returns `true` if this is [`Status::Partial`].
    pub fn is_partial(&self) -> bool {
        matches!(self, Status::Partial)
    }
}

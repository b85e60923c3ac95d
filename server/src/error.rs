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

//! Crate-wide error type aggregating every per-module failure.
//!
//! Matches the hand-rolled `enum` + `Display` + `std::error::Error` style
//! `riptide_parser::h1::ParseError` already uses, rather than reaching for
//! `thiserror`.

use std::fmt::{self, Display};

use riptide_parser::h1::response::AlreadyFinished;
use riptide_parser::h1::ParseError;
use riptide_parser::url::DecodeError;
use riptide_parser::ws::FrameError;

/// Every failure kind the runtime can surface, per the design's §7.
#[derive(Debug)]
pub enum Error {
    /// A syscall or socket operation failed.
    Io(std::io::Error),
    /// The HTTP/1.1 parser rejected the byte stream.
    Parse(ParseError),
    /// A WebSocket frame violated RFC 6455; carries the close code to send.
    Protocol(u16),
    /// A pool or table reached capacity and could not fall back further.
    ResourceExhausted,
    /// A caller passed an invalid argument to a public entry point.
    BadArgument(&'static str),
    /// A `Response` (or WebSocket close) was finished more than once.
    AlreadyFinished,
    /// `register` was called with an fd already known to the reactor.
    AlreadyRegistered,
    /// Percent-decoding failed.
    Decode(DecodeError),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Parse(e) => write!(f, "parse error: {e}"),
            Error::Protocol(code) => write!(f, "websocket protocol error, close code {code}"),
            Error::ResourceExhausted => f.write_str("resource exhausted"),
            Error::BadArgument(msg) => write!(f, "bad argument: {msg}"),
            Error::AlreadyFinished => f.write_str("response already finished"),
            Error::AlreadyRegistered => f.write_str("fd already registered"),
            Error::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Parse(e) => Some(e),
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<AlreadyFinished> for Error {
    fn from(_: AlreadyFinished) -> Self {
        Error::AlreadyFinished
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        let code = match e {
            FrameError::ReservedBitSet
            | FrameError::UnknownOpcode(_)
            | FrameError::InvalidControlFrame
            | FrameError::MaskingRequired
            | FrameError::InvalidPayloadLength => 1002,
            FrameError::PayloadTooLarge => 1009,
        };
        Error::Protocol(code)
    }
}

/// Convenience alias matching `riptide_parser`'s `ParseResult` naming.
pub type Result<T> = std::result::Result<T, Error>;

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

//! WebSocket (RFC 6455) framing, masking, close codes, and the opening
//! handshake's accept-key derivation.
//!
//! Message *assembly* across fragmented frames, ping/pong bookkeeping,
//! and idle-timeout policy live in `riptide_server::websocket` — this
//! crate only speaks the wire format.

mod close;
mod frame;
mod handshake;
mod mask;
mod opcode;

pub use close::CloseCode;
pub use frame::{
    decode_header, encode_frame, encode_frame_fragment, take_payload, unmask_payload, FrameError,
    FrameHeader,
};
pub use handshake::accept_key;
pub use mask::apply_mask;
pub use opcode::{OpCode, UnknownOpCode};

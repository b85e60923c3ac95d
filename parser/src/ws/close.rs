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

//! RFC 6455 §7.4 close code registry.

/// A close frame's status code, per RFC 6455 §7.4.1/§7.4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure.
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// Endpoint is going away (e.g. server shutdown, navigation away).
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// Protocol error.
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
    /// Endpoint received a data type it cannot accept.
    pub const UNSUPPORTED_DATA: CloseCode = CloseCode(1003);
    /// Message payload was not valid UTF-8 (text frames only).
    pub const INVALID_PAYLOAD: CloseCode = CloseCode(1007);
    /// Generic policy violation.
    pub const POLICY_VIOLATION: CloseCode = CloseCode(1008);
    /// Message too large to process.
    pub const MESSAGE_TOO_BIG: CloseCode = CloseCode(1009);
    /// Unexpected server-side condition.
    pub const INTERNAL_ERROR: CloseCode = CloseCode(1011);

    /// `true` if this code is legal to send/receive on the wire.
    ///
    /// RFC 6455 §7.4.1 reserves 1004, 1005, 1006, and 1015 as "MUST NOT be
    /// set as a status code in a Close control frame" (they describe
    /// conditions detected locally, never sent), and leaves 0-999 and
    /// 5000+ undefined. 3000-4999 are reserved for applications/extensions
    /// and are accepted here.
    pub fn is_allowed(self) -> bool {
        match self.0 {
            1000..=1003 | 1007..=1011 => true,
            1004 | 1005 | 1006 | 1015 => false,
            3000..=4999 => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::CloseCode;

    #[test]
    fn accepts_standard_sendable_codes() {
        assert!(CloseCode::NORMAL.is_allowed());
        assert!(CloseCode::GOING_AWAY.is_allowed());
        assert!(CloseCode(1011).is_allowed());
        assert!(CloseCode(3999).is_allowed());
    }

    #[test]
    fn rejects_reserved_and_local_only_codes() {
        assert!(!CloseCode(999).is_allowed());
        assert!(!CloseCode(1004).is_allowed());
        assert!(!CloseCode(1005).is_allowed());
        assert!(!CloseCode(1006).is_allowed());
        assert!(!CloseCode(1015).is_allowed());
        assert!(!CloseCode(5000).is_allowed());
    }
}

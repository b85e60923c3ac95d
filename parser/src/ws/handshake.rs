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

//! RFC 6455 §1.3 opening handshake: derives `Sec-WebSocket-Accept` from
//! the client's `Sec-WebSocket-Key`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// The GUID RFC 6455 §1.3 fixes for deriving the accept key. Concatenated
/// onto the client's key before hashing; any other value is meaningless
/// to a compliant client.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`
/// header value: `base64(sha1(key + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod test {
    use super::accept_key;

    #[test]
    fn matches_rfc6455_worked_example() {
        // RFC 6455 §1.3's own example handshake.
        assert_eq!(
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=",
            accept_key("dGhlIHNhbXBsZSBub25jZQ==")
        );
    }
}

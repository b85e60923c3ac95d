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

//! Percent-decoding per [RFC 3986](https://www.rfc-editor.org/rfc/rfc3986),
//! grounded in `decode_url` from `examples/original_source/src/http/http-request.c`.
//!
//! The original decodes in place, returning `-1` on the first invalid hex
//! digit and leaving whatever prefix it had already written in the
//! caller's buffer. This port instead fails the whole call: on
//! `Err(DecodeError)` no output is returned at all, since `decode`
//! allocates and owns its own buffer rather than writing through one the
//! caller supplies.

use std::fmt::Display;

/// Failure decoding a percent-encoded byte sequence: an invalid (non-hex)
/// digit followed `%`, or a `%` was truncated at the end of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError;

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid percent-encoding")
    }
}

impl std::error::Error for DecodeError {}

/// Percent-decodes `src` into a freshly allocated buffer.
///
/// `plus_as_space` should be `true` only when decoding an
/// `application/x-www-form-urlencoded` body or query string; elsewhere `+`
/// is a literal byte, per RFC 3986.
///
/// On error, everything decoded up to the bad escape is discarded along
/// with the error — callers must treat a `DecodeError` as "no output",
/// rather than the original's partial-buffer behavior.
pub fn decode(src: &[u8], plus_as_space: bool) -> Result<Vec<u8>, DecodeError> {
    let mut dest = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            b'+' if plus_as_space => {
                dest.push(b' ');
                i += 1;
            }
            b'%' => {
                let hi = *src.get(i + 1).ok_or(DecodeError)?;
                let lo = *src.get(i + 2).ok_or(DecodeError)?;
                let hi = hex_val(hi).ok_or(DecodeError)?;
                let lo = hex_val(lo).ok_or(DecodeError)?;
                dest.push((hi << 4) | lo);
                i += 3;
            }
            b => {
                dest.push(b);
                i += 1;
            }
        }
    }
    Ok(dest)
}

/// Percent-encodes `src`, leaving unreserved characters
/// (`A-Za-z0-9-_.~`) untouched. Never emits `+`; pairs with
/// [`decode`] called with `plus_as_space = false` for a true round trip.
pub fn encode(src: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut dest = Vec::with_capacity(src.len());
    for &b in src {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            dest.push(b);
        } else {
            dest.push(b'%');
            dest.push(HEX[(b >> 4) as usize]);
            dest.push(HEX[(b & 0x0f) as usize]);
        }
    }
    dest
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' | b'A'..=b'F' => Some((c | 0x20) - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::{decode, encode};

    #[test]
    fn decode_handles_percent_escapes_and_literal_bytes() {
        assert_eq!(b"hello world!".to_vec(), decode(b"hello%20world%21", false).unwrap());
    }

    #[test]
    fn decode_maps_plus_to_space_only_when_requested() {
        assert_eq!(b"a b".to_vec(), decode(b"a+b", true).unwrap());
        assert_eq!(b"a+b".to_vec(), decode(b"a+b", false).unwrap());
    }

    #[test]
    fn decode_rejects_invalid_hex_and_truncated_escapes() {
        assert!(decode(b"%zz", false).is_err());
        assert!(decode(b"%4", false).is_err());
        assert!(decode(b"%", false).is_err());
    }

    #[test]
    fn encode_then_decode_round_trips_arbitrary_bytes() {
        for sample in [
            &b""[..],
            b"hello world",
            b"a=b&c=d",
            &[0u8, 1, 2, 255, b'%', b'+'],
        ] {
            let encoded = encode(sample);
            let decoded = decode(&encoded, false).unwrap();
            assert_eq!(sample, decoded.as_slice());
        }
    }
}

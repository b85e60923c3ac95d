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

//! Byte-class predicates for the request-line and header grammars of
//! [RFC 9110](https://www.rfc-editor.org/rfc/rfc9110) / RFC 9112.

/// `tchar` per RFC 9110 5.6.2, used for method and header-name bytes.
#[inline]
pub fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

/// Bytes permitted in a request-target, per RFC 9112 3.2 (an opaque sequence
/// of visible ASCII, since we don't decode the URI at the parser layer).
#[inline]
pub fn is_request_target_token(b: u8) -> bool {
    (0x21..=0x7e).contains(&b)
}

/// `field-vchar` per RFC 9110 5.5, plus the obsolete leading/trailing
/// whitespace `obs-fold` case is rejected by the caller rather than here.
#[inline]
pub fn is_header_value_token(b: u8) -> bool {
    b == b'\t' || (0x20..=0x7e).contains(&b) || b >= 0x80
}

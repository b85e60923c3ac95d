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

//! H1 parser implementation

use core::fmt::Display;

use super::raw_request::RawRequest;

pub mod headers;
pub mod request;
pub mod response;
mod tokens;

/// Represents possible failures while parsing
#[derive(Debug)]
pub enum ParseError {
    /// Invalid byte in method.
    Method,
    /// Invalid byte in target.
    Target,
    /// Invalid HTTP version.
    Version,
    /// Invalid byte in header name.
    HeaderName,
    /// Invalid byte in header value.
    HeaderValue,
    /// Invalid or missing new line.
    NewLine,
    /// Invalid whitespace
    Whitespace,
    /// Request-line exceeded the configured bound (maps to `414`).
    RequestLineTooLong,
    /// The header block exceeded the configured bound (maps to `431`).
    HeadersTooLarge,
    /// `Content-Length` or `Transfer-Encoding` framing was contradictory
    /// or malformed.
    InvalidFraming,
}

impl ParseError {
    fn description_str(&self) -> &'static str {
        match *self {
            ParseError::Method => "invalid token in method",
            ParseError::Target => "invalid token in target",
            ParseError::Version => "invalid version",
            ParseError::HeaderName => "invalid token in header name",
            ParseError::HeaderValue => "invalid token in header value",
            ParseError::NewLine => "invalid or missing new line",
            ParseError::Whitespace => "invalid whitespace",
            ParseError::RequestLineTooLong => "request line exceeded the configured bound",
            ParseError::HeadersTooLarge => "header block exceeded the configured bound",
            ParseError::InvalidFraming => "contradictory or malformed body framing",
        }
    }

    /// The HTTP status this error should be reported to the client with
    /// (§7: "an appropriate status HTTP 400/413/414/431"). Every variant
    /// not explicitly a size or framing violation falls back to a bare
    /// `400 Bad Request`.
    pub fn status_code(&self) -> crate::status::Status {
        match *self {
            ParseError::RequestLineTooLong => crate::status::Status::UriTooLong,
            ParseError::HeadersTooLarge => crate::status::Status::RequestHeaderFieldsTooLarge,
            ParseError::InvalidFraming => crate::status::Status::ContentTooLarge,
            ParseError::Method
            | ParseError::Target
            | ParseError::Version
            | ParseError::HeaderName
            | ParseError::HeaderValue
            | ParseError::NewLine
            | ParseError::Whitespace => crate::status::Status::BadRequest,
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description_str())
    }
}

impl std::error::Error for ParseError {}

/// Result whose Err variant is `ParseError`
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Consumes whitespace characters from `buf`.
/// Whitespace is defined by RFC 9110 Secion 5.6.3 by ABNF
/// ```abnf
/// OWS = *( SP / HTAB )
/// ```
#[inline]
pub fn discard_whitespace(buf: &mut RawRequest<'_>) {
    buf.take_until(|b| b != b' ' && b != b'\t');
}

/// Consumes whitespace characters from `buf`. Requires that at least one whitespace character is
/// encountered.
/// Whitespace is defined by RFC 9110 Secion 5.6.3 by ABNF
/// ```abnf
/// RWS = 1*( SP / HTAB )
/// ```
#[inline]
pub fn discard_required_whitespace(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    let pos = buf.pos();

    buf.take_until(|b| b != b' ' && b != b'\t');
    if pos == buf.pos() {
        return Err(ParseError::Whitespace);
    }

    Ok(())
}

/// Consumes `buf` to the end of a new-line character sequence `b"\r\n"`
#[inline]
pub fn discard_newline(buf: &mut RawRequest<'_>) {
    loop {
        buf.take_until(|b| b == b'\r');
        buf.next();
        if buf.next() == Some(&b'\n') {
            buf.slice();
            return;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::status::Status;

    #[test]
    fn status_code_maps_size_violations_to_their_rfc_status() {
        assert_eq!(Status::UriTooLong, ParseError::RequestLineTooLong.status_code());
        assert_eq!(Status::RequestHeaderFieldsTooLarge, ParseError::HeadersTooLarge.status_code());
        assert_eq!(Status::ContentTooLarge, ParseError::InvalidFraming.status_code());
    }

    #[test]
    fn status_code_falls_back_to_bad_request_for_malformed_syntax() {
        assert_eq!(Status::BadRequest, ParseError::Method.status_code());
        assert_eq!(Status::BadRequest, ParseError::Target.status_code());
        assert_eq!(Status::BadRequest, ParseError::Version.status_code());
        assert_eq!(Status::BadRequest, ParseError::HeaderName.status_code());
        assert_eq!(Status::BadRequest, ParseError::HeaderValue.status_code());
    }
}

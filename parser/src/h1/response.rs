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

//! Response assembly: status line, header staging, and the automatic
//! `Date`/`Content-Length`/`Connection` bookkeeping described in the
//! design's §4.F.
//!
//! A `Response` is a lightweight, stack-scoped handle bound to one
//! request — it is never pooled, matching the design's data model.

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::status::Status;
use crate::Version;

/// Failure finishing a response twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyFinished;

impl Display for AlreadyFinished {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("response was already finished")
    }
}

impl std::error::Error for AlreadyFinished {}

/// A response under construction.
///
/// Staged headers are emitted verbatim; `Date`, `Content-Length`, and
/// `Connection` are filled in automatically at [`Response::finish`] unless
/// the caller already staged one explicitly.
#[derive(Debug)]
pub struct Response {
    status: Status,
    version: Version,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    finished: bool,
}

impl Response {
    /// Starts a new response with the given status, replying in kind to
    /// `version` (HTTP/1.0 vs HTTP/1.1 affects the default `Connection`).
    pub fn new(status: Status, version: Version) -> Self {
        Self {
            status,
            version,
            headers: Vec::new(),
            body: Vec::new(),
            finished: false,
        }
    }

    /// Stages a header to be emitted on [`finish`](Self::finish). Does not
    /// deduplicate — callers that need a single authoritative value should
    /// only call this once per name.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// `true` if a header with this name (case-insensitively) was already
    /// staged by the caller.
    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Replaces the response body in one shot.
    pub fn body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = body.into();
        self
    }

    /// `true` if this is a `101 Switching Protocols` response — on drain,
    /// the connection's protocol handler swaps to WebSocket.
    pub fn is_upgrade(&self) -> bool {
        matches!(self.status, Status::SwitchingProtocols)
    }

    /// Assembles the final byte sequence (status line, headers, blank
    /// line, body) to enqueue onto the connection's write queue.
    ///
    /// Fails with [`AlreadyFinished`] if called more than once on the same
    /// handle — a no-op with a diagnostic, per the design.
    pub fn finish(&mut self, keep_alive: bool) -> Result<Vec<u8>, AlreadyFinished> {
        if self.finished {
            return Err(AlreadyFinished);
        }
        self.finished = true;

        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(self.version.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(reason_phrase(self.status).as_bytes());
        out.extend_from_slice(b"\r\n");

        if !self.has_header("date") {
            out.extend_from_slice(b"Date: ");
            out.extend_from_slice(http_date().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if !self.is_upgrade() && !self.has_header("content-length") {
            out.extend_from_slice(b"Content-Length: ");
            out.extend_from_slice(self.body.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if !self.has_header("connection") {
            out.extend_from_slice(b"Connection: ");
            out.extend_from_slice(if keep_alive { b"keep-alive" } else { b"close" });
            out.extend_from_slice(b"\r\n");
        }
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        if !self.is_upgrade() {
            out.extend_from_slice(&self.body);
        }
        Ok(out)
    }
}

fn reason_phrase(status: Status) -> &'static str {
    match status {
        Status::Continue => "Continue",
        Status::SwitchingProtocols => "Switching Protocols",
        Status::Ok => "OK",
        Status::Created => "Created",
        Status::Accepted => "Accepted",
        Status::NonAuthoritativeInformation => "Non-Authoritative Information",
        Status::NoContent => "No Content",
        Status::ResetContent => "Reset Content",
        Status::PartialContent => "Partial Content",
        Status::MultipleChoices => "Multiple Choices",
        Status::MovedPermanently => "Moved Permanently",
        Status::Found => "Found",
        Status::SeeOther => "See Other",
        Status::NotModified => "Not Modified",
        Status::UseProxy => "Use Proxy",
        Status::TemporaryRedirect => "Temporary Redirect",
        Status::PermanentRedirect => "Permanent Redirect",
        Status::BadRequest => "Bad Request",
        Status::Unauthorized => "Unauthorized",
        Status::PaymentRequired => "Payment Required",
        Status::Forbidden => "Forbidden",
        Status::NotFound => "Not Found",
        Status::MethodNotAllowed => "Method Not Allowed",
        Status::NotAcceptable => "Not Acceptable",
        Status::ProxyAuthenticationRequired => "Proxy Authentication Required",
        Status::RequestTimeout => "Request Timeout",
        Status::Conflict => "Conflict",
        Status::Gone => "Gone",
        Status::LengthRequired => "Length Required",
        Status::PreconditionFailed => "Precondition Failed",
        Status::ContentTooLarge => "Content Too Large",
        Status::UriTooLong => "URI Too Long",
        Status::UnsupportedMediaType => "Unsupported Media Type",
        Status::RangeNotSatisfiable => "Range Not Satisfiable",
        Status::ExpectationFailed => "Expectation Failed",
        Status::MisdirectedRequest => "Misdirected Request",
        Status::UnprocessableContent => "Unprocessable Content",
        Status::UpgradeRequired => "Upgrade Required",
        Status::InternalServerError => "Internal Server Error",
        Status::NotImplemented => "Not Implemented",
        Status::BadGateway => "Bad Gateway",
        Status::ServiceUnavailable => "Service Unavailable",
        Status::GatewayTimeout => "Gateway Timeout",
        Status::HTTPVersionNotSupported => "HTTP Version Not Supported",
    }
}

const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Formats the current time as an RFC 7231 `IMF-fixdate`
/// (`Sun, 06 Nov 1994 08:49:37 GMT`), hand-rolled to avoid a chrono
/// dependency the teacher and pack never reach for in this niche.
fn http_date() -> String {
    format_http_date(SystemTime::now())
}

fn format_http_date(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let (year, month, day, weekday, hour, min, sec) = civil_from_unix(secs as i64);
    format!(
        "{}, {:02} {} {} {:02}:{:02}:{:02} GMT",
        DAYS[weekday as usize],
        day,
        MONTHS[(month - 1) as usize],
        year,
        hour,
        min,
        sec
    )
}

/// Converts a Unix timestamp to (year, month, day, weekday, h, m, s) using
/// Howard Hinnant's civil_from_days algorithm (public domain).
fn civil_from_unix(unix: i64) -> (i64, u32, u32, i64, u32, u32, u32) {
    let days = unix.div_euclid(86400);
    let secs_of_day = unix.rem_euclid(86400);
    let hour = (secs_of_day / 3600) as u32;
    let min = ((secs_of_day % 3600) / 60) as u32;
    let sec = (secs_of_day % 60) as u32;
    let weekday = (days + 4).rem_euclid(7); // 1970-01-01 was a Thursday (4)

    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if month <= 2 { y + 1 } else { y };

    (year, month, day, weekday, hour, min, sec)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finish_fills_in_date_length_and_connection() {
        let mut res = Response::new(Status::Ok, Version::H1_1);
        res.body(b"Hello World!".to_vec());
        let bytes = res.finish(true).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 12\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("Hello World!"));
    }

    #[test]
    fn finish_twice_reports_already_finished() {
        let mut res = Response::new(Status::Ok, Version::H1_1);
        res.finish(true).unwrap();
        assert!(res.finish(true).is_err());
    }

    #[test]
    fn upgrade_response_omits_body_and_content_length() {
        let mut res = Response::new(Status::SwitchingProtocols, Version::H1_1);
        res.header("Upgrade", "websocket");
        res.header("Connection", "Upgrade");
        res.header("Sec-WebSocket-Accept", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        res.body(b"discarded".to_vec());
        let bytes = res.finish(true).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("Content-Length"));
        assert!(!text.contains("discarded"));
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    }

    #[test]
    fn known_unix_timestamp_formats_correctly() {
        // 1994-11-06 08:49:37 UTC
        assert_eq!(
            "Sun, 06 Nov 1994 08:49:37 GMT",
            format_http_date(UNIX_EPOCH + std::time::Duration::from_secs(784111777))
        );
    }
}

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

//! HTTP/1.1 request parsing: `REQ_LINE -> HEADERS -> BODY_OR_UPGRADE -> DONE`.
//!
//! The decoder never blocks: [`Request::advance`] is handed whatever bytes a
//! connection's read buffer currently holds and returns [`crate::Status::Partial`]
//! if it needs more. Because the server's connection buffer keeps unread
//! bytes contiguous until a full head is parsed (see `riptide_server::buffer`),
//! the request-line/header stages simply re-scan from the start of the
//! unread region on every call; this is cheap because both are bounded
//! (8 KiB / 32 KiB by default) and keeps the state machine trivially
//! resumable without holding borrows across reads. Once the head is
//! located, parsing commits to a byte offset and never rescans it.

use super::headers::HeaderArena;
use super::tokens::{is_request_target_token, is_tchar};
use super::ParseError;
use crate::raw_request::RawRequest;
use crate::{Method, Status, Version};

/// Size/behavior bounds enforced while parsing one request.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Bound on the request-line, in bytes. Default 8 KiB.
    pub max_request_line: usize,
    /// Bound on the total header block, in bytes. Default 32 KiB.
    pub max_headers: usize,
    /// Buffered bodies larger than this spill to a temp file. Default 64 KiB.
    pub body_spill_threshold: usize,
    /// Hard upper bound on a request body, buffered or spilled.
    pub max_body_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_request_line: 8 * 1024,
            max_headers: 32 * 1024,
            body_spill_threshold: 64 * 1024,
            max_body_size: 16 * 1024 * 1024,
        }
    }
}

/// Which stage of `REQ_LINE -> HEADERS -> BODY_OR_UPGRADE -> DONE` a
/// [`Request`] is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Head,
    Body,
    Chunked,
    Upgrade,
    Done,
}

/// In-memory or spilled request body storage.
#[derive(Debug)]
pub enum Body {
    /// No body was present.
    Empty,
    /// The body fits under `body_spill_threshold` and lives in memory.
    Buffered(Vec<u8>),
    /// The body exceeded `body_spill_threshold`; bytes are appended to a
    /// temp file as they arrive.
    Spilled(std::fs::File),
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

/// Chunked-transfer decode progress, tracked across `advance` calls.
#[derive(Debug, Clone, Copy)]
enum ChunkState {
    Size,
    Data(usize),
    DataCrlf,
    Trailer,
}

/// One parsed (or in-progress) HTTP/1.1 request.
///
/// Drawn from the request-object pool (`riptide_server::pool`); `clear`
/// resets every field so the record can be handed to the next pipelined
/// request, or back to the freelist, without reallocating the header arena.
#[derive(Debug)]
pub struct Request {
    /// The request method.
    pub method: Option<Method>,
    /// Path component of the request-target (percent-encoding intact).
    pub path: String,
    /// Query component, without the leading `?` (empty if absent).
    pub query: String,
    /// The declared HTTP version.
    pub version: Option<Version>,
    /// The packed header arena.
    pub headers: HeaderArena,
    /// `Content-Length`, if present and not using chunked encoding.
    pub content_length: Option<usize>,
    /// `true` if `Transfer-Encoding: chunked` was present.
    pub chunked: bool,
    /// `true` if `Connection: upgrade` and `Upgrade: websocket` were both present.
    pub upgrade: bool,
    /// Resolved keep-alive intent (HTTP/1.1 default, HTTP/1.0 opt-in, or
    /// explicit `Connection: close`/`keep-alive` override).
    pub keep_alive: bool,
    /// The request body.
    pub body: Body,
    stage: Stage,
    chunk_state: ChunkState,
    body_read: usize,
    /// Byte offset in the connection's read buffer where the request head
    /// ended, committed once when leaving `Stage::Head`. The body stages
    /// are driven off `buf[head_end..]` on every subsequent call, never
    /// `buf[0..]` - `buf` itself still starts at the head on every call
    /// (the server only marks bytes read on `Status::Complete`).
    head_end: usize,
    /// How many bytes of the body region (`buf[head_end..]`) have already
    /// been committed to `self.body` (or, for chunked bodies, fully
    /// parsed as framing) by a previous `advance` call. Resuming always
    /// starts past this offset so a byte already appended is never
    /// appended twice, and a byte that hasn't been confirmed as part of a
    /// complete token (a chunk-size line, a trailer line) is always
    /// re-scanned rather than skipped.
    buf_consumed: usize,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: None,
            path: String::new(),
            query: String::new(),
            version: None,
            headers: HeaderArena::new(),
            content_length: None,
            chunked: false,
            upgrade: false,
            keep_alive: false,
            body: Body::Empty,
            stage: Stage::Head,
            chunk_state: ChunkState::Size,
            body_read: 0,
            head_end: 0,
            buf_consumed: 0,
        }
    }
}

impl Request {
    /// Builds an empty, unparsed request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets every field to its initial state: the header arena is
    /// zeroed (not reallocated) and any spilled body file is dropped
    /// (closing the fd), per the "Request returned to the pool holds no
    /// open file handle" invariant.
    pub fn clear(&mut self) {
        self.method = None;
        self.path.clear();
        self.query.clear();
        self.version = None;
        self.headers.clear();
        self.content_length = None;
        self.chunked = false;
        self.upgrade = false;
        self.keep_alive = false;
        self.body = Body::Empty;
        self.stage = Stage::Head;
        self.chunk_state = ChunkState::Size;
        self.body_read = 0;
        self.head_end = 0;
        self.buf_consumed = 0;
    }

    /// `true` once a full request (head + body) has been parsed.
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// `true` if this request asked to upgrade and the head has finished
    /// parsing (body stage is skipped entirely for upgrades).
    pub fn is_upgrade(&self) -> bool {
        self.upgrade && self.stage == Stage::Upgrade
    }

    /// Feeds the currently unread bytes of a connection's read buffer.
    ///
    /// On `Status::Complete(n)`, the caller should mark the first `n`
    /// bytes of `buf` as read before the next request (if pipelined) is
    /// parsed starting at `buf[n..]`. On `Status::Partial`, `buf` must be
    /// left untouched (more bytes are still needed) and `advance` called
    /// again once more data has arrived.
    pub fn advance(&mut self, buf: &[u8], limits: &Limits) -> Result<Status<usize>, ParseError> {
        if self.stage == Stage::Head {
            let head_end = match find_head_end(buf, limits)? {
                Some(end) => end,
                None => return Ok(Status::Partial),
            };
            self.parse_head(&buf[..head_end])?;
            self.head_end = head_end;
            self.buf_consumed = 0;
            if self.upgrade {
                self.stage = Stage::Upgrade;
                return Ok(Status::Complete(head_end));
            }
            self.stage = if self.chunked {
                Stage::Chunked
            } else if self.content_length.unwrap_or(0) > 0 {
                Stage::Body
            } else {
                Stage::Done
            };
            if self.stage == Stage::Done {
                return Ok(Status::Complete(head_end));
            }
            return self.advance_body(buf, limits);
        }

        self.advance_body(buf, limits)
    }

    /// Drives whichever body stage is active off `buf[self.head_end..]`,
    /// picking up from `self.buf_consumed` - never from the start of the
    /// head. `buf` still starts at byte 0 of the head on every call (the
    /// server only marks bytes read once `advance` returns `Complete`),
    /// so re-deriving the body region from an absolute, once-committed
    /// `head_end` is what keeps this resumable across partial reads
    /// instead of re-absorbing the head (or a body byte already
    /// committed) into the body a second time.
    fn advance_body(&mut self, buf: &[u8], limits: &Limits) -> Result<Status<usize>, ParseError> {
        match self.stage {
            Stage::Body => self.advance_sized_body(buf, limits),
            Stage::Chunked => self.advance_chunked_body(buf, limits),
            Stage::Done | Stage::Upgrade => Ok(Status::Complete(self.head_end)),
            Stage::Head => unreachable!("head already consumed"),
        }
    }

    fn advance_sized_body(&mut self, buf: &[u8], limits: &Limits) -> Result<Status<usize>, ParseError> {
        let want = self.content_length.unwrap_or(0);
        if want > limits.max_body_size {
            return Err(ParseError::InvalidFraming);
        }
        let body_region = &buf[self.head_end..];
        // Only the bytes past what a prior call already appended - buf
        // keeps growing (and keeps carrying the head) across partial
        // reads, so re-slicing from byte 0 of the body region would
        // append the same prefix again.
        let unseen = &body_region[self.buf_consumed..];
        let need = want - self.buf_consumed;
        if unseen.len() < need {
            self.spill_if_needed(limits)?;
            self.append_body(unseen)?;
            self.buf_consumed += unseen.len();
            return Ok(Status::Partial);
        }
        self.spill_if_needed(limits)?;
        self.append_body(&unseen[..need])?;
        self.buf_consumed += need;
        self.stage = Stage::Done;
        Ok(Status::Complete(self.head_end + want))
    }

    fn advance_chunked_body(&mut self, buf: &[u8], limits: &Limits) -> Result<Status<usize>, ParseError> {
        let body_region = &buf[self.head_end..];
        let start = self.buf_consumed;
        let mut cursor = RawRequest::new(&body_region[start..]);
        let initial_len = cursor.as_ref().len();
        // Bytes confirmed as fully parsed (a whole chunk-size line, a
        // whole data chunk, the trailing CRLF, a whole trailer line) so
        // far *this call*; only ever committed to `self.buf_consumed` at
        // those checkpoints, never from a bare "how much did the cursor
        // eat" diff - `take_until`'s no-match branch silently discards
        // its lookahead internally, and that lookahead is not yet
        // confirmed, so it must stay re-scannable on the next call.
        let mut committed = 0usize;
        loop {
            match self.chunk_state {
                ChunkState::Size => {
                    // `take_until`'s return value can't distinguish "ran
                    // out of data" from "matched at offset 0" (both come
                    // back `None`); check the cursor itself instead.
                    let line = cursor.take_until(|b| b == b'\r').unwrap_or(&[]);
                    if cursor.peek() != Some(b'\r') {
                        self.buf_consumed = start + committed;
                        return Ok(Status::Partial);
                    }
                    cursor.next();
                    if cursor.next() != Some(&b'\n') {
                        return Err(ParseError::InvalidFraming);
                    }
                    cursor.slice();
                    committed = initial_len - cursor.as_ref().len();
                    let size_str = line.split(|&b| b == b';').next().unwrap_or(line);
                    let size = usize::from_str_radix(
                        std::str::from_utf8(size_str).map_err(|_| ParseError::InvalidFraming)?,
                        16,
                    )
                    .map_err(|_| ParseError::InvalidFraming)?;
                    if self.body_read + size > limits.max_body_size {
                        return Err(ParseError::InvalidFraming);
                    }
                    self.chunk_state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(size) => {
                    self.spill_if_needed(limits)?;
                    let remaining_in_buf = cursor.as_ref();
                    if remaining_in_buf.len() < size {
                        self.append_body(remaining_in_buf)?;
                        self.body_read += remaining_in_buf.len();
                        self.chunk_state = ChunkState::Data(size - remaining_in_buf.len());
                        cursor.advance(remaining_in_buf.len());
                        cursor.slice();
                        committed = initial_len - cursor.as_ref().len();
                        self.buf_consumed = start + committed;
                        return Ok(Status::Partial);
                    }
                    self.append_body(&remaining_in_buf[..size])?;
                    self.body_read += size;
                    cursor.advance(size);
                    cursor.slice();
                    committed = initial_len - cursor.as_ref().len();
                    self.chunk_state = ChunkState::DataCrlf;
                }
                ChunkState::DataCrlf => {
                    if cursor.as_ref().len() < 2 {
                        self.buf_consumed = start + committed;
                        return Ok(Status::Partial);
                    }
                    cursor.advance(2);
                    let consumed = cursor.slice();
                    if consumed != b"\r\n" {
                        return Err(ParseError::InvalidFraming);
                    }
                    committed = initial_len - cursor.as_ref().len();
                    self.chunk_state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    // Trailer headers are not surfaced (no registered
                    // callback reads them); we only need to find the
                    // terminating blank line.
                    cursor.take_until(|b| b == b'\r');
                    if cursor.peek() != Some(b'\r') {
                        self.buf_consumed = start + committed;
                        return Ok(Status::Partial);
                    }
                    cursor.next();
                    if cursor.next() != Some(&b'\n') {
                        return Err(ParseError::InvalidFraming);
                    }
                    let consumed_len = cursor.pos();
                    cursor.slice();
                    committed = initial_len - cursor.as_ref().len();
                    if consumed_len == 2 {
                        self.stage = Stage::Done;
                        self.buf_consumed = start + committed;
                        let total_consumed = self.head_end + self.buf_consumed;
                        return Ok(Status::Complete(total_consumed));
                    }
                }
            }
        }
    }

    fn spill_if_needed(&mut self, limits: &Limits) -> Result<(), ParseError> {
        if let Body::Buffered(data) = &self.body {
            if data.len() >= limits.body_spill_threshold {
                let mut file = tempfile_backed_spill().map_err(|_| ParseError::InvalidFraming)?;
                use std::io::Write;
                file.write_all(data).map_err(|_| ParseError::InvalidFraming)?;
                self.body = Body::Spilled(file);
            }
        }
        Ok(())
    }

    fn append_body(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        if bytes.is_empty() {
            if matches!(self.body, Body::Empty) {
                self.body = Body::Buffered(Vec::new());
            }
            return Ok(());
        }
        match &mut self.body {
            Body::Empty => self.body = Body::Buffered(bytes.to_vec()),
            Body::Buffered(buf) => buf.extend_from_slice(bytes),
            Body::Spilled(file) => {
                use std::io::Write;
                file.write_all(bytes).map_err(|_| ParseError::InvalidFraming)?;
            }
        }
        Ok(())
    }

    fn parse_head(&mut self, head: &[u8]) -> Result<(), ParseError> {
        let mut cursor = RawRequest::new(head);
        self.parse_method(&mut cursor)?;
        self.parse_target(&mut cursor)?;
        self.parse_version(&mut cursor)?;
        super::discard_newline(&mut cursor);
        self.parse_headers(&mut cursor)?;
        self.resolve_framing()?;
        Ok(())
    }

    fn parse_method(&mut self, cursor: &mut RawRequest<'_>) -> Result<(), ParseError> {
        let token = cursor
            .take_until(|b| b == b' ')
            .ok_or(ParseError::Method)?;
        if token.iter().any(|&b| !is_tchar(b)) {
            return Err(ParseError::Method);
        }
        self.method = Some(Method::try_from(token)?);
        cursor.next();
        cursor.slice();
        Ok(())
    }

    fn parse_target(&mut self, cursor: &mut RawRequest<'_>) -> Result<(), ParseError> {
        let token = cursor
            .take_until(|b| b == b' ')
            .ok_or(ParseError::Target)?;
        if token.iter().any(|&b| !is_request_target_token(b)) {
            return Err(ParseError::Target);
        }
        cursor.next();
        cursor.slice();

        let text = std::str::from_utf8(token).map_err(|_| ParseError::Target)?;
        match text.split_once('?') {
            Some((path, query)) => {
                self.path.push_str(path);
                self.query.push_str(query);
            }
            None => self.path.push_str(text),
        }
        Ok(())
    }

    fn parse_version(&mut self, cursor: &mut RawRequest<'_>) -> Result<(), ParseError> {
        let prefix = cursor.take(5).copied().collect::<Vec<u8>>();
        if prefix.as_slice() != b"HTTP/" {
            return Err(ParseError::Version);
        }
        let version = match (cursor.next(), cursor.next(), cursor.next()) {
            (Some(b'1'), Some(b'.'), Some(b'0')) => Version::H1_0,
            (Some(b'1'), Some(b'.'), Some(b'1')) => Version::H1_1,
            _ => return Err(ParseError::Version),
        };
        self.version = Some(version);
        // Default keep-alive semantics: HTTP/1.1 defaults to keep-alive,
        // HTTP/1.0 defaults to close, both overridable by the Connection
        // header in `resolve_framing`.
        self.keep_alive = matches!(self.version, Some(Version::H1_1));
        Ok(())
    }

    fn parse_headers(&mut self, cursor: &mut RawRequest<'_>) -> Result<(), ParseError> {
        loop {
            if cursor.as_ref().starts_with(b"\r\n") {
                return Ok(());
            }
            let name = cursor
                .take_until(|b| b == b':')
                .ok_or(ParseError::HeaderName)?;
            if name.is_empty() || name.iter().any(|&b| !is_tchar(b)) {
                return Err(ParseError::HeaderName);
            }
            cursor.next();
            cursor.slice();

            super::discard_whitespace(cursor);
            let value = cursor
                .take_until(|b| b == b'\r')
                .unwrap_or(&[]);
            if value.iter().any(|&b| !super::tokens::is_header_value_token(b)) {
                return Err(ParseError::HeaderValue);
            }
            // trim trailing OWS
            let value = trim_ows(value);
            self.headers
                .push(name, value)
                .map_err(|_| ParseError::HeadersTooLarge)?;
            super::discard_newline(cursor);
        }
    }

    fn resolve_framing(&mut self) -> Result<(), ParseError> {
        let find = |name: &str| -> Option<Vec<u8>> {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
                .map(|(_, v)| v.to_vec())
        };

        if let Some(te) = find("transfer-encoding") {
            if te.eq_ignore_ascii_case(b"chunked") {
                self.chunked = true;
            }
        }
        if let Some(cl) = find("content-length") {
            let n = std::str::from_utf8(&cl)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(ParseError::InvalidFraming)?;
            if self.chunked {
                // RFC 9112 6.3: both present is a smuggling attempt.
                return Err(ParseError::InvalidFraming);
            }
            self.content_length = Some(n);
        }
        if let Some(conn) = find("connection") {
            if contains_token(&conn, b"close") {
                self.keep_alive = false;
            } else if contains_token(&conn, b"keep-alive") {
                self.keep_alive = true;
            }
            if contains_token(&conn, b"upgrade") {
                if let Some(upg) = find("upgrade") {
                    self.upgrade = upg.eq_ignore_ascii_case(b"websocket");
                }
            }
        }
        Ok(())
    }

    /// Takes ownership of the parsed body, leaving `Body::Empty` behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Reads `Host` straight from the header arena (not cached on the
    /// struct, since it is looked up rarely compared to iteration).
    pub fn host(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(b"host"))
            .and_then(|(_, v)| std::str::from_utf8(v).ok())
    }
}

fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b' ' && b != b'\t').unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| b != b' ' && b != b'\t').map(|n| n + 1).unwrap_or(start);
    &bytes[start..end]
}

fn contains_token(header: &[u8], token: &[u8]) -> bool {
    header
        .split(|&b| b == b',')
        .map(trim_ows)
        .any(|part| part.eq_ignore_ascii_case(token))
}

/// Scans `buf` for the end of the request head (`\r\n\r\n`), enforcing the
/// request-line and header-block size bounds along the way.
fn find_head_end(buf: &[u8], limits: &Limits) -> Result<Option<usize>, ParseError> {
    if let Some(first_crlf) = buf.windows(2).position(|w| w == b"\r\n") {
        if first_crlf > limits.max_request_line {
            return Err(ParseError::RequestLineTooLong);
        }
    } else if buf.len() > limits.max_request_line {
        return Err(ParseError::RequestLineTooLong);
    }

    match find_subslice(buf, b"\r\n\r\n") {
        Some(pos) => Ok(Some(pos + 4)),
        None => {
            if buf.len() > limits.max_headers {
                return Err(ParseError::HeadersTooLarge);
            }
            Ok(None)
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

static SPILL_FILE_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

fn tempfile_backed_spill() -> std::io::Result<std::fs::File> {
    let mut path = std::env::temp_dir();
    let n = SPILL_FILE_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    path.push(format!("riptide-body-{}-{}.tmp", std::process::id(), n));
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    let _ = std::fs::remove_file(&path);
    Ok(file)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Status;

    #[test]
    fn parses_simple_get_with_no_body() {
        let mut req = Request::new();
        let limits = Limits::default();
        let buf = b"GET /a?x=1 HTTP/1.1\r\nHost: x\r\n\r\n";
        let status = req.advance(buf, &limits).unwrap();
        assert_eq!(Status::Complete(buf.len()), status);
        assert_eq!(Some(Method::Get), req.method);
        assert_eq!("/a", req.path);
        assert_eq!("x=1", req.query);
        assert_eq!(Some(Version::H1_1), req.version);
        assert!(req.keep_alive);
    }

    #[test]
    fn parses_request_with_randomized_host_header() {
        use fake::faker::internet::en::DomainSuffix;
        use fake::Fake;

        let mut req = Request::new();
        let limits = Limits::default();
        let host: String = DomainSuffix().fake();
        let buf = format!("GET /status HTTP/1.1\r\nHost: {host}\r\n\r\n");
        let status = req.advance(buf.as_bytes(), &limits).unwrap();
        assert_eq!(Status::Complete(buf.len()), status);
        assert_eq!(Some(host.as_str()), req.host());
    }

    #[test]
    fn returns_partial_on_incomplete_head() {
        let mut req = Request::new();
        let limits = Limits::default();
        let status = req.advance(b"GET / HTTP/1.1\r\nHost: x", &limits).unwrap();
        assert_eq!(Status::Partial, status);
    }

    #[test]
    fn oversize_request_line_is_rejected() {
        let mut req = Request::new();
        let limits = Limits::default();
        let mut buf = Vec::from(&b"GET /"[..]);
        buf.extend(std::iter::repeat(b'a').take(16 * 1024));
        buf.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let err = req.advance(&buf, &limits).unwrap_err();
        assert!(matches!(err, ParseError::RequestLineTooLong));
        assert_eq!(crate::status::Status::UriTooLong, err.status_code());
    }

    #[test]
    fn buffers_content_length_body() {
        let mut req = Request::new();
        let limits = Limits::default();
        let buf = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let status = req.advance(buf, &limits).unwrap();
        assert_eq!(Status::Complete(buf.len()), status);
        match req.take_body() {
            Body::Buffered(b) => assert_eq!(b, b"hello"),
            other => panic!("expected buffered body, got {other:?}"),
        }
    }

    #[test]
    fn decodes_chunked_body() {
        let mut req = Request::new();
        let limits = Limits::default();
        let buf =
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n";
        let status = req.advance(buf, &limits).unwrap();
        assert_eq!(Status::Complete(buf.len()), status);
        match req.take_body() {
            Body::Buffered(b) => assert_eq!(b, b"foobar"),
            other => panic!("expected buffered body, got {other:?}"),
        }
    }

    #[test]
    fn upgrade_headers_stop_before_body_stage() {
        let mut req = Request::new();
        let limits = Limits::default();
        let buf = b"GET /chat HTTP/1.1\r\nHost: x\r\nConnection: upgrade\r\nUpgrade: websocket\r\n\r\n";
        let status = req.advance(buf, &limits).unwrap();
        assert_eq!(Status::Complete(buf.len()), status);
        assert!(req.is_upgrade());
    }

    #[test]
    fn pipelined_requests_are_parsed_in_order() {
        let limits = Limits::default();
        let buf = b"GET /a HTTP/1.1\r\nHost:x\r\n\r\nGET /b HTTP/1.1\r\nHost:x\r\n\r\n";

        let mut first = Request::new();
        let Status::Complete(n1) = first.advance(buf, &limits).unwrap() else {
            panic!("expected complete")
        };
        assert_eq!("/a", first.path);

        let mut second = Request::new();
        let Status::Complete(_) = second.advance(&buf[n1..], &limits).unwrap() else {
            panic!("expected complete")
        };
        assert_eq!("/b", second.path);
    }

    #[test]
    fn resumes_content_length_body_split_across_reads() {
        let mut req = Request::new();
        let limits = Limits::default();
        let full = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";

        // First call only sees the head plus a partial body - the
        // connection buffer isn't truncated between calls, so every
        // subsequent call still starts at byte 0 with the head intact.
        let partial = &full[..full.len() - 2];
        let status = req.advance(partial, &limits).unwrap();
        assert_eq!(Status::Partial, status);

        let status = req.advance(full, &limits).unwrap();
        assert_eq!(Status::Complete(full.len()), status);
        match req.take_body() {
            Body::Buffered(b) => assert_eq!(b, b"hello"),
            other => panic!("expected buffered body, got {other:?}"),
        }
    }

    #[test]
    fn resumes_chunked_body_split_across_reads() {
        let mut req = Request::new();
        let limits = Limits::default();
        let full =
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n";

        // Stop partway through the first chunk's data.
        let partial = &full[..full.len() - 10];
        let status = req.advance(partial, &limits).unwrap();
        assert_eq!(Status::Partial, status);

        // A second partial call, still short of the terminating chunk -
        // cut right after the final chunk's size digit so no `\r\n`
        // pair is split across the call boundary.
        let partial2 = &full[..full.len() - 4];
        let status = req.advance(partial2, &limits).unwrap();
        assert_eq!(Status::Partial, status);

        let status = req.advance(full, &limits).unwrap();
        assert_eq!(Status::Complete(full.len()), status);
        match req.take_body() {
            Body::Buffered(b) => assert_eq!(b, b"foobar"),
            other => panic!("expected buffered body, got {other:?}"),
        }
    }
}

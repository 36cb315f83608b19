use std::os::fd::AsRawFd;

use indexmap::IndexMap;
use mio::net::TcpStream;

use crate::sendfile::{self, SendFileOutcome};

/// Where a response's body comes from. A sum type rather than an
/// optional file descriptor alongside an optional string, per the
/// source's empty file-descriptor branch being treated as a bug (§9):
/// every variant here is fully handled in `advance_body`.
pub enum BodySource {
    InlineString(String),
    File { file: std::fs::File, len: u64 },
    None,
}

#[derive(Debug)]
enum HeaderSubState {
    Key,
    ColonSpace,
    Value,
    Crlf,
    FinalCrlf,
}

/// Phase plus per-phase payload as one tagged sum, per the source's
/// nested `void*` extra-state field being replaced with a proper
/// variant (§9 Design Notes).
enum SendState {
    NotStarted,
    StatusLine { sent: usize },
    Headers { index: usize, sub_state: HeaderSubState, sent: usize },
    Body { sent: usize },
    Complete,
}

pub enum SendOutcome {
    Done,
    WouldBlock,
    Error(std::io::Error),
}

/// A resumable response sender. `send` is re-entrant: call it again
/// after `WouldBlock` with no other state changes and it resumes
/// exactly where it left off (P6).
pub struct Response {
    status_code: u16,
    reason: String,
    headers: IndexMap<String, String>,
    body: BodySource,
    state: SendState,
}

impl Response {
    pub fn new(status_code: u16, reason: impl Into<String>) -> Self {
        let mut headers = IndexMap::new();
        headers.insert("Server".to_string(), "webserver/dev".to_string());
        Self { status_code, reason: reason.into(), headers, body: BodySource::None, state: SendState::NotStarted }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_inline_body(mut self, body: impl Into<String>) -> Self {
        self.body = BodySource::InlineString(body.into());
        self
    }

    #[must_use]
    pub fn with_file_body(mut self, file: std::fs::File, len: u64) -> Self {
        self.body = BodySource::File { file, len };
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Drives the state machine as far as it will go without blocking.
    /// Traverses phases strictly in order; once a phase completes it is
    /// never revisited (§4.F Ordering).
    pub fn send(&mut self, stream: &mut TcpStream) -> SendOutcome {
        loop {
            let state = std::mem::replace(&mut self.state, SendState::Complete);
            match state {
                SendState::NotStarted => {
                    self.state = SendState::StatusLine { sent: 0 };
                }
                SendState::StatusLine { mut sent } => {
                    let line = format!("HTTP/1.0 {:3} {}\r\n", self.status_code, self.reason);
                    match write_chunk(stream, line.as_bytes(), &mut sent) {
                        Ok(true) => {
                            self.state = if self.headers.is_empty() {
                                SendState::Headers { index: 0, sub_state: HeaderSubState::FinalCrlf, sent: 0 }
                            } else {
                                SendState::Headers { index: 0, sub_state: HeaderSubState::Key, sent: 0 }
                            };
                        }
                        Ok(false) => {
                            self.state = SendState::StatusLine { sent };
                            return SendOutcome::WouldBlock;
                        }
                        Err(err) => return SendOutcome::Error(err),
                    }
                }
                SendState::Headers { index, sub_state, mut sent } => {
                    let chunk = header_chunk(&self.headers, index, &sub_state);
                    match write_chunk(stream, chunk, &mut sent) {
                        Ok(true) => {
                            self.state = match next_header_state(self.headers.len(), index, &sub_state) {
                                Some((next_index, next_sub)) => {
                                    SendState::Headers { index: next_index, sub_state: next_sub, sent: 0 }
                                }
                                None => SendState::Body { sent: 0 },
                            };
                        }
                        Ok(false) => {
                            self.state = SendState::Headers { index, sub_state, sent };
                            return SendOutcome::WouldBlock;
                        }
                        Err(err) => return SendOutcome::Error(err),
                    }
                }
                SendState::Body { sent } => match self.advance_body(stream, sent) {
                    Ok(true) => self.state = SendState::Complete,
                    Ok(false) => return SendOutcome::WouldBlock,
                    Err(err) => return SendOutcome::Error(err),
                },
                SendState::Complete => {
                    self.state = SendState::Complete;
                    return SendOutcome::Done;
                }
            }
        }
    }

    fn advance_body(&mut self, stream: &mut TcpStream, sent: usize) -> Result<bool, std::io::Error> {
        match &mut self.body {
            BodySource::None => Ok(true),
            BodySource::InlineString(body) => {
                let mut sent = sent;
                let done = write_chunk(stream, body.as_bytes(), &mut sent)?;
                if !done {
                    self.state = SendState::Body { sent };
                }
                Ok(done)
            }
            BodySource::File { file, len } => {
                let mut offset = sent as u64;
                let remaining = len.saturating_sub(offset);
                if remaining == 0 {
                    return Ok(true);
                }
                match sendfile::send_file(stream.as_raw_fd(), file.as_raw_fd(), &mut offset, remaining) {
                    SendFileOutcome::Done => Ok(true),
                    SendFileOutcome::WouldBlock => {
                        self.state = SendState::Body { sent: offset as usize };
                        Ok(false)
                    }
                    SendFileOutcome::Error(err) => Err(err),
                }
            }
        }
    }
}

fn header_chunk<'a>(headers: &'a IndexMap<String, String>, index: usize, sub_state: &HeaderSubState) -> &'a [u8] {
    match sub_state {
        HeaderSubState::Key => headers.get_index(index).expect("header index in range").0.as_bytes(),
        HeaderSubState::ColonSpace => b": ",
        HeaderSubState::Value => headers.get_index(index).expect("header index in range").1.as_bytes(),
        HeaderSubState::Crlf | HeaderSubState::FinalCrlf => b"\r\n",
    }
}

/// `None` means the headers phase is complete (the final CRLF was just
/// sent); `Some` advances the cursor/sub-state, moving to the next
/// header on `Crlf` or staying on the current one otherwise.
fn next_header_state(headers_len: usize, index: usize, sub_state: &HeaderSubState) -> Option<(usize, HeaderSubState)> {
    match sub_state {
        HeaderSubState::Key => Some((index, HeaderSubState::ColonSpace)),
        HeaderSubState::ColonSpace => Some((index, HeaderSubState::Value)),
        HeaderSubState::Value => Some((index, HeaderSubState::Crlf)),
        HeaderSubState::Crlf => {
            if index + 1 < headers_len {
                Some((index + 1, HeaderSubState::Key))
            } else {
                Some((index, HeaderSubState::FinalCrlf))
            }
        }
        HeaderSubState::FinalCrlf => None,
    }
}

/// Writes `chunk[*sent..]`, retrying while the OS keeps accepting more,
/// and advancing `*sent` across any partial write. Returns `Ok(true)`
/// once every byte has gone out (and resets `*sent` to 0, matching
/// `send_string`'s contract of starting fresh next time), `Ok(false)` on
/// `WouldBlock` with `*sent` left at the resume point (P6).
fn write_chunk(stream: &mut mio::net::TcpStream, chunk: &[u8], sent: &mut usize) -> Result<bool, std::io::Error> {
    use std::io::Write;

    while *sent < chunk.len() {
        match stream.write(&chunk[*sent..]) {
            Ok(0) => return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "write returned 0 bytes")),
            Ok(n) => *sent += n,
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
            Err(err) => return Err(err),
        }
    }
    *sent = 0;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        net::TcpListener,
    };

    use super::*;

    fn connected_pair() -> (mio::net::TcpStream, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (mio::net::TcpStream::from_std(server), client)
    }

    #[test]
    fn sends_status_line_headers_and_inline_body() {
        let (mut server, mut client) = connected_pair();
        let mut response =
            Response::new(200, "").with_inline_body("hi\n");

        loop {
            match response.send(&mut server) {
                SendOutcome::Done => break,
                SendOutcome::WouldBlock => continue,
                SendOutcome::Error(err) => panic!("unexpected error: {err}"),
            }
        }
        drop(server); // HTTP/1.0 framing: EOF signals end-of-body to the peer

        let mut out = Vec::new();
        client.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"HTTP/1.0 200 \r\nServer: webserver/dev\r\n\r\nhi\n");
    }

    #[test]
    fn preserves_header_insertion_order() {
        let (mut server, mut client) = connected_pair();
        let mut response = Response::new(404, "Not Found").with_header("X-First", "1").with_header("X-Second", "2");

        loop {
            match response.send(&mut server) {
                SendOutcome::Done => break,
                SendOutcome::WouldBlock => continue,
                SendOutcome::Error(err) => panic!("unexpected error: {err}"),
            }
        }
        drop(server);

        let mut out = Vec::new();
        client.read_to_end(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let server_idx = text.find("Server:").unwrap();
        let first_idx = text.find("X-First:").unwrap();
        let second_idx = text.find("X-Second:").unwrap();
        assert!(server_idx < first_idx && first_idx < second_idx, "headers must appear in insertion order");
    }

    #[test]
    fn resumes_after_would_block_mid_send() {
        // A response with a large inline body, read back one byte at a
        // time by the peer, forces repeated WouldBlock/resumption on the
        // socket send buffer (scenario 4: slow client).
        let (mut server, mut client) = connected_pair();
        let body = "x".repeat(256 * 1024);
        let mut response = Response::new(200, "").with_inline_body(body.clone());

        let reader = std::thread::spawn(move || {
            let mut out = Vec::new();
            let mut buf = [0u8; 1];
            loop {
                match client.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => out.extend_from_slice(&buf[..n]),
                    Err(_) => break,
                }
            }
            out
        });

        loop {
            match response.send(&mut server) {
                SendOutcome::Done => break,
                SendOutcome::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_micros(200));
                }
                SendOutcome::Error(err) => panic!("unexpected error: {err}"),
            }
        }
        drop(server);

        let received = reader.join().unwrap();
        let expected = format!("HTTP/1.0 200 \r\nServer: webserver/dev\r\n\r\n{body}");
        assert_eq!(received, expected.into_bytes());
    }
}

//! Framing requests out of the socket and parsing their request line.

use std::io::{self, Read};

use thiserror::Error;

use crate::response::Status;

/// Default capacity of the per-connection request buffer.
pub const DEFAULT_MAX_REQUEST_LENGTH: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Always starts with `/`, never contains NUL.
    pub target: String,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("unsupported method `{0}'")]
    UnsupportedMethod(String),
    #[error("request exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("failed to read request: {0}")]
    Io(#[from] io::Error),
}

impl RequestError {
    /// Status to reply with before closing, or None to close silently.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::MalformedRequestLine | Self::UnsupportedMethod(_) => Some(Status::BadRequest),
            Self::PayloadTooLarge(_) => Some(Status::PayloadTooLarge),
            Self::PeerClosed | Self::Io(_) => None,
        }
    }
}

/// Fixed-capacity buffer holding the bytes received but not yet consumed on one connection.
#[derive(Debug)]
pub struct RequestBuffer {
    buf: Box<[u8]>,
    filled: usize,
}

impl RequestBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Read until a complete request head is buffered, then parse its request line.
    ///
    /// A bad request line is rejected as soon as its newline arrives, without waiting for the
    /// rest of the head. If the peer stops sending mid-request, whatever was buffered is parsed.
    /// Bytes following the head stay buffered for the next call.
    pub fn read_request<R: Read>(&mut self, reader: &mut R) -> Result<Request, RequestError> {
        loop {
            let buffered = &self.buf[..self.filled];
            if let Some(end) = head_end(buffered) {
                let request = parse_request_line(&buffered[..end]);
                self.consume(end);
                return request;
            }
            if let Some(line_end) = find_byte(buffered, b'\n') {
                if let Err(e) = parse_request_line(&buffered[..line_end]) {
                    self.filled = 0;
                    return Err(e);
                }
            }
            if self.filled == self.buf.len() {
                return Err(RequestError::PayloadTooLarge(self.buf.len()));
            }
            match reader.read(&mut self.buf[self.filled..]) {
                Ok(0) if self.filled == 0 => return Err(RequestError::PeerClosed),
                Ok(0) => {
                    let request = parse_request_line(&self.buf[..self.filled]);
                    self.filled = 0;
                    return request;
                }
                Ok(recvd) => self.filled += recvd,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn consume(&mut self, len: usize) {
        self.buf.copy_within(len..self.filled, 0);
        self.filled -= len;
    }
}

/// Return the index just past the blank line ending a request head, if there is one.
fn head_end(data: &[u8]) -> Option<usize> {
    data.iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'\n')
        .find_map(|(i, _)| {
            let rest = &data[i + 1..];
            if rest.starts_with(b"\n") {
                Some(i + 2)
            } else if rest.starts_with(b"\r\n") {
                Some(i + 3)
            } else {
                None
            }
        })
}

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

/// Parse a request line like "GET / HTTP/1.1". Anything after the first line is ignored.
pub fn parse_request_line(data: &[u8]) -> Result<Request, RequestError> {
    let line = match find_byte(data, b'\n') {
        Some(end) => &data[..end],
        None => data,
    };
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let method_end = find_byte(line, b' ').ok_or(RequestError::MalformedRequestLine)?;
    let method = &line[..method_end];
    if method.is_empty() {
        return Err(RequestError::MalformedRequestLine);
    }
    if method != b"GET" {
        let method = String::from_utf8_lossy(method).into_owned();
        return Err(RequestError::UnsupportedMethod(method));
    }

    let rest = &line[method_end + 1..];
    let target_end = find_byte(rest, b' ').ok_or(RequestError::MalformedRequestLine)?;
    let target = &rest[..target_end];
    if !target.starts_with(b"/") || target.contains(&0) {
        return Err(RequestError::MalformedRequestLine);
    }
    let target =
        String::from_utf8(target.to_vec()).map_err(|_| RequestError::MalformedRequestLine)?;

    Ok(Request {
        method: String::from("GET"),
        target,
    })
}

//! Response framing: status line, the two headers we send, and canned error replies.

use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    PayloadTooLarge,
    InternalServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::PayloadTooLarge => 413,
            Self::InternalServerError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::InternalServerError => "Internal Server Error",
        }
    }

    fn explanation(self) -> &'static str {
        match self {
            Self::Ok => "",
            Self::BadRequest => "You sent a request that the server couldn't understand.",
            Self::Forbidden => "You don't have permission to access this URL.",
            Self::NotFound => "The URL you requested was not found.",
            Self::PayloadTooLarge => "Your request was dropped because it was too long.",
            Self::InternalServerError => "The URL you requested cannot be returned.",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Header block of a response, terminated by the empty line.
pub struct Header<'a> {
    pub status: Status,
    pub content_type: &'a str,
    pub content_length: u64,
}

impl<'a> std::fmt::Display for Header<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HTTP/1.1 {}\r\n\
            Content-Type: {}\r\n\
            Content-Length: {}\r\n\
            \r\n",
            self.status, self.content_type, self.content_length,
        )
    }
}

/// Render a complete error reply, header and body.
pub fn error_reply(status: Status) -> String {
    let body = format!(
        "<html><head><title>{}</title></head><body>\n\
        <h1>{}</h1>\n\
        {}\n\
        </body></html>\n",
        status,
        status.reason(),
        status.explanation(),
    );
    let header = Header {
        status,
        content_type: "text/html; charset=utf-8",
        content_length: body.len() as u64,
    };
    format!("{}{}", header, body)
}

/// Write an error reply, returning the number of bytes sent.
pub fn write_error<W: Write>(out: &mut W, status: Status) -> io::Result<u64> {
    let reply = error_reply(status);
    out.write_all(reply.as_bytes())?;
    Ok(reply.len() as u64)
}

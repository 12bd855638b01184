//! Minimal HTTP/1.1 framing for the telemetry server
//!
//! Transport independent: the server feeds received bytes into
//! [`RequestReader`] until a full request is available, then writes
//! [`Response::head`] followed by the body. Every response closes the
//! connection.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use thiserror_no_std::Error;

/// Largest request (head plus body) accepted
pub const MAX_REQUEST_SIZE: usize = 2048;

pub const EVENT_STREAM: &str = "text/event-stream; charset=UTF-8";
pub const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("request too large")]
    TooLarge,
    #[error("connection closed mid-request")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            _ => Self::Other,
        }
    }
}

/// Parsed request line and the headers the server cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Path without query string
    pub path: String,
    pub content_length: usize,
    /// Offset of the first body byte
    pub header_end: usize,
}

/// Parse the request head. `Ok(None)` until the blank line has arrived.
pub fn parse_head(buf: &[u8]) -> Result<Option<RequestHead>, HttpError> {
    let Some(blank) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };
    let header_end = blank + 4;
    let head = core::str::from_utf8(&buf[..blank])
        .map_err(|_| HttpError::Malformed("request head is not UTF-8"))?;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(HttpError::Malformed("empty request line"))?;
    let target = parts.next().ok_or(HttpError::Malformed("missing request target"))?;
    if !parts.next().is_some_and(|v| v.starts_with("HTTP/1.")) {
        return Err(HttpError::Malformed("unsupported HTTP version"));
    }

    let mut content_length = 0usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| HttpError::Malformed("bad Content-Length"))?;
        }
    }

    let path = target.split('?').next().unwrap_or(target);
    Ok(Some(RequestHead {
        method: Method::parse(method),
        path: String::from(path),
        content_length,
        header_end,
    }))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Vec<u8>,
}

impl Request {
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::Get,
            path: String::from(path),
            body: Vec::new(),
        }
    }

    pub fn post(path: &str, body: &[u8]) -> Self {
        Self {
            method: Method::Post,
            path: String::from(path),
            body: body.to_vec(),
        }
    }
}

/// Accumulates received bytes until one full request is buffered.
#[derive(Debug, Default)]
pub struct RequestReader {
    buf: Vec<u8>,
}

impl RequestReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes; returns the request once it is complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Option<Request>, HttpError> {
        if self.buf.len() + bytes.len() > MAX_REQUEST_SIZE {
            return Err(HttpError::TooLarge);
        }
        self.buf.extend_from_slice(bytes);

        let Some(head) = parse_head(&self.buf)? else {
            return Ok(None);
        };
        let body_end = head.header_end + head.content_length;
        if body_end > MAX_REQUEST_SIZE {
            return Err(HttpError::TooLarge);
        }
        if self.buf.len() < body_end {
            return Ok(None);
        }

        Ok(Some(Request {
            method: head.method,
            path: head.path,
            body: self.buf[head.header_end..body_end].to_vec(),
        }))
    }

    /// Called when the peer closed the connection.
    pub fn finish(&self) -> Result<(), HttpError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(HttpError::Truncated)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::PayloadTooLarge => 413,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::PayloadTooLarge => "Payload Too Large",
        }
    }
}

impl From<HttpError> for Status {
    fn from(error: HttpError) -> Self {
        match error {
            HttpError::TooLarge => Self::PayloadTooLarge,
            HttpError::Malformed(_) | HttpError::Truncated => Self::BadRequest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    /// One server-sent-events frame: `data: <payload>\n\n`.
    pub fn event(payload: &str) -> Self {
        Self {
            status: Status::Ok,
            content_type: EVENT_STREAM,
            body: format!("data: {}\n\n", payload).into_bytes(),
        }
    }

    pub fn text(status: Status, text: &str) -> Self {
        Self {
            status,
            content_type: TEXT_PLAIN,
            body: Vec::from(text.as_bytes()),
        }
    }

    pub fn bytes(content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            content_type,
            body,
        }
    }

    pub fn not_found() -> Self {
        Self::text(Status::NotFound, "not found")
    }

    pub fn head(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Cache-Control: no-cache\r\n\
             Connection: close\r\n\
             Content-Length: {}\r\n\
             \r\n",
            self.status.code(),
            self.status.reason(),
            self.content_type,
            self.body.len()
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.head().into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Content type for a static asset, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=UTF-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "ico" => "image/x-icon",
        "txt" => TEXT_PLAIN,
        _ => "application/octet-stream",
    }
}

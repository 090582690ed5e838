use std::fs::File;

use super::http_status::HttpStatus;

pub const SERVER_NAME: &str = concat!("serve-dir/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    /// Streamed from disk in chunks once the head is written.
    File { file: File, len: u64 },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: HttpStatus,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Response {
    pub fn new(status: HttpStatus) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    /// Small HTML page describing `status`, used for every error the server reports itself.
    pub fn error(status: HttpStatus) -> Self {
        let body = format!(
            "<html><body><h1>{} {}</h1></body></html>",
            status.code(),
            status.text()
        );
        Self::new(status).with_body(body.into_bytes(), "text/html")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.body = Body::Bytes(body);
        self.with_header("Content-Type", content_type)
    }

    /// Drops the body for a HEAD request, keeping the length it would have had.
    pub fn without_body(mut self) -> Self {
        if self.header("Content-Length").is_none() {
            let len = self.body.len();
            self = self.with_header("Content-Length", len.to_string());
        }
        self.body = Body::Empty;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Status line and headers, terminated by the blank line.
    ///
    /// `Content-Length` is derived from the body unless a handler already set it
    /// (HEAD responses carry the length of the body they omit).
    pub fn head_bytes(&self, keep_alive: bool) -> Vec<u8> {
        let mut head = self.status.as_response_line();
        head.push_str(&format!("Server: {}\r\n", SERVER_NAME));

        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        if self.header("Content-Length").is_none() {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }

        let connection = if keep_alive { "keep-alive" } else { "close" };
        head.push_str(&format!("Connection: {}\r\n\r\n", connection));

        head.into_bytes()
    }
}

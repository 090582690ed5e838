use log::debug;
use std::fmt;
use thiserror::Error;

use super::http_status::HttpStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http10 => write!(f, "HTTP/1.0"),
            Self::Http11 => write!(f, "HTTP/1.1"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line: {0}")]
    MalformedRequestLine(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("unsupported Transfer-Encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("request exceeds {0} bytes")]
    TooLarge(usize),
}

impl ParseError {
    pub fn status(&self) -> HttpStatus {
        match self {
            Self::TooLarge(_) => HttpStatus::PayloadTooLarge,
            _ => HttpStatus::BadRequest,
        }
    }
}

/// One complete HTTP message as received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Raw request target, still percent-encoded and without the query.
    pub path: String,
    pub query: Option<String>,
    pub version: HttpVersion,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }

    pub fn keep_alive(&self) -> bool {
        let connection = self.header("Connection").unwrap_or("");
        let has_token = |token: &str| {
            connection
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };

        match self.version {
            HttpVersion::Http11 => !has_token("close"),
            HttpVersion::Http10 => has_token("keep-alive"),
        }
    }
}

/// Tries to take one request off the front of `buffer`.
///
/// Returns `Ok(None)` while more bytes are needed, otherwise the request and
/// the number of bytes it occupied so pipelined data can stay buffered.
/// Empty lines in front of the request line are skipped.
pub fn parse_request(
    buffer: &[u8],
    max_size: usize,
) -> Result<Option<(HttpRequest, usize)>, ParseError> {
    let leading = buffer
        .iter()
        .take_while(|&&b| b == b'\r' || b == b'\n')
        .count();
    let buffer = &buffer[leading..];

    let Some((head_len, body_start)) = find_head_end(buffer) else {
        if leading + buffer.len() >= max_size {
            return Err(ParseError::TooLarge(max_size));
        }
        return Ok(None);
    };

    if leading + body_start > max_size {
        return Err(ParseError::TooLarge(max_size));
    }

    let head = String::from_utf8_lossy(&buffer[..head_len]);
    let mut lines = head.lines();

    let request_line = lines
        .next()
        .ok_or_else(|| ParseError::MalformedRequestLine(String::new()))?;
    let (method, target, version) = parse_request_line(request_line)?;

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ParseError::MalformedHeader(line.to_string()));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    let find = |wanted: &str| {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(wanted))
            .map(|(_, v)| v.as_str())
    };

    if let Some(encoding) = find("Transfer-Encoding") {
        return Err(ParseError::UnsupportedTransferEncoding(encoding.to_string()));
    }

    let content_length = match find("Content-Length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength(value.to_string()))?,
        None => 0,
    };

    let total = body_start
        .checked_add(content_length)
        .ok_or(ParseError::TooLarge(max_size))?;
    if leading + total > max_size {
        return Err(ParseError::TooLarge(max_size));
    }
    if buffer.len() < total {
        return Ok(None);
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };

    debug!("Parsed request: {} {} {}", method, target, version);

    let request = HttpRequest {
        method: method.to_string(),
        path,
        query,
        version,
        headers,
        body: buffer[body_start..total].to_vec(),
    };

    Ok(Some((request, leading + total)))
}

fn parse_request_line(line: &str) -> Result<(&str, &str, HttpVersion), ParseError> {
    let malformed = || ParseError::MalformedRequestLine(line.to_string());

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    if !method.bytes().all(|b| b.is_ascii_uppercase()) || !target.starts_with('/') {
        return Err(malformed());
    }

    let version = match version {
        "HTTP/1.1" => HttpVersion::Http11,
        "HTTP/1.0" => HttpVersion::Http10,
        other => return Err(ParseError::UnsupportedVersion(other.to_string())),
    };

    Ok((method, target, version))
}

/// Position where the head ends and where the body starts.
fn find_head_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = buffer.windows(2).position(|w| w == b"\n\n");

    match (crlf, lf) {
        (Some(c), Some(l)) if l < c => Some((l, l + 2)),
        (Some(c), _) => Some((c, c + 4)),
        (None, Some(l)) => Some((l, l + 2)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let raw = b"GET /index.html?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (request, used) = parse_request(raw, 8192).unwrap().unwrap();

        assert_eq!(used, raw.len());
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/index.html");
        assert_eq!(request.query.as_deref(), Some("x=1"));
        assert_eq!(request.version, HttpVersion::Http11);
        assert_eq!(request.header("host"), Some("example.com"));
        assert!(request.body.is_empty());
        assert!(request.keep_alive());
    }

    #[test]
    fn incomplete_head_needs_more_bytes() {
        assert_eq!(parse_request(b"GET / HTTP/1.1\r\nHost: a\r\n", 8192), Ok(None));
    }

    #[test]
    fn waits_for_the_whole_body() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nab";
        assert_eq!(parse_request(raw, 8192), Ok(None));

        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nabcdeGET";
        let (request, used) = parse_request(raw, 8192).unwrap().unwrap();
        assert_eq!(request.body, b"abcde");
        assert_eq!(&raw[used..], b"GET");
    }

    #[test]
    fn accepts_bare_newlines() {
        let raw = b"GET / HTTP/1.0\nConnection: keep-alive\n\n";
        let (request, used) = parse_request(raw, 8192).unwrap().unwrap();
        assert_eq!(used, raw.len());
        assert_eq!(request.version, HttpVersion::Http10);
        assert!(request.keep_alive());
    }

    #[test]
    fn leading_empty_lines_are_ignored() {
        let raw = b"\r\n\r\nGET /after HTTP/1.1\r\n\r\nGET";
        let (request, used) = parse_request(raw, 8192).unwrap().unwrap();
        assert_eq!(request.path, "/after");
        assert_eq!(&raw[used..], b"GET");

        assert_eq!(parse_request(b"\r\n", 8192), Ok(None));
        assert_eq!(parse_request(&[b'\n'; 64], 32), Err(ParseError::TooLarge(32)));
    }

    #[test]
    fn connection_close_disables_keep_alive() {
        let raw = b"GET / HTTP/1.1\r\nConnection: Close\r\n\r\n";
        let (request, _) = parse_request(raw, 8192).unwrap().unwrap();
        assert!(!request.keep_alive());

        let raw = b"GET / HTTP/1.0\r\n\r\n";
        let (request, _) = parse_request(raw, 8192).unwrap().unwrap();
        assert!(!request.keep_alive());
    }

    #[test]
    fn rejects_malformed_requests() {
        let err = parse_request(b"GARBAGE\r\n\r\n", 8192).unwrap_err();
        assert!(matches!(err, ParseError::MalformedRequestLine(_)));
        assert_eq!(err.status(), HttpStatus::BadRequest);

        let err = parse_request(b"GET / HTTP/2.0\r\n\r\n", 8192).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedVersion(_)));

        let err = parse_request(b"GET / HTTP/1.1\r\nNoColon\r\n\r\n", 8192).unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader(_)));

        let err = parse_request(b"GET / HTTP/1.1\r\nContent-Length: x\r\n\r\n", 8192).unwrap_err();
        assert!(matches!(err, ParseError::InvalidContentLength(_)));

        let err = parse_request(b"get / HTTP/1.1\r\n\r\n", 8192).unwrap_err();
        assert!(matches!(err, ParseError::MalformedRequestLine(_)));
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let raw = vec![b'a'; 64];
        let err = parse_request(&raw, 32).unwrap_err();
        assert_eq!(err, ParseError::TooLarge(32));
        assert_eq!(err.status(), HttpStatus::PayloadTooLarge);

        let raw = b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n";
        assert_eq!(parse_request(raw, 64), Err(ParseError::TooLarge(64)));
    }
}

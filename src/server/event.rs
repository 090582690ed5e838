use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use super::request_parser::{HttpRequest, ParseError};

/// Everything the loop can learn about a connection during one poll cycle.
#[derive(Debug)]
pub enum ConnectionEvent {
    Accepted { fd: RawFd, peer: SocketAddr },
    Message { fd: RawFd, request: HttpRequest },
    Malformed { fd: RawFd, error: ParseError },
    Closed { fd: RawFd, peer: SocketAddr },
}

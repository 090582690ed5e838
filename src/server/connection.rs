use log::{debug, error, info};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};

use super::hexdump::hexdump;
use super::request_parser::{HttpRequest, ParseError, parse_request};
use super::response::{Body, Response};

const READ_CHUNK: usize = 8192;
const FILE_CHUNK: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStage {
    /// Waiting for (the rest of) a request.
    Recv,
    /// Writing a response; reads are paused so requests stay ordered.
    Send,
    Close,
}

#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub stage: ConnectionStage,
    pub request_buffer: Vec<u8>,
    pub outgoing: Vec<u8>,
    pub outgoing_sent: usize,
    pub file: Option<File>,
    pub file_remaining: u64,
    pub keep_alive: bool,
    pub hexdump: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, hexdump: bool) -> Self {
        Self {
            stream,
            peer,
            stage: ConnectionStage::Recv,
            request_buffer: Vec::with_capacity(READ_CHUNK),
            outgoing: Vec::new(),
            outgoing_sent: 0,
            file: None,
            file_remaining: 0,
            keep_alive: false,
            hexdump,
        }
    }

    /// Reads whatever the socket has; moves to `Close` on EOF or error.
    pub fn receive(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => {
                debug!("Connection closed by client {}", self.peer);
                self.stage = ConnectionStage::Close;
            }
            Ok(n) => {
                debug!("Read {} bytes from {}", n, self.peer);
                if self.hexdump {
                    info!("{} -> {} bytes\n{}", self.peer, n, hexdump(&chunk[..n]));
                }
                self.request_buffer.extend_from_slice(&chunk[..n]);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                error!("Error reading from {}: {}", self.peer, e);
                self.stage = ConnectionStage::Close;
            }
        }
    }

    /// Takes the next complete request off the buffer, if one is there.
    pub fn next_request(&mut self, max_size: usize) -> Result<Option<HttpRequest>, ParseError> {
        if self.stage != ConnectionStage::Recv || self.request_buffer.is_empty() {
            return Ok(None);
        }

        match parse_request(&self.request_buffer, max_size)? {
            Some((request, used)) => {
                self.request_buffer.drain(..used);
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    pub fn start_response(&mut self, response: Response, keep_alive: bool) {
        self.outgoing = response.head_bytes(keep_alive);
        self.outgoing_sent = 0;
        self.keep_alive = keep_alive;
        self.file = None;
        self.file_remaining = 0;

        match response.body {
            Body::Empty => {}
            Body::Bytes(bytes) => self.outgoing.extend_from_slice(&bytes),
            Body::File { file, len } => {
                self.file = Some(file);
                self.file_remaining = len;
            }
        }

        self.stage = ConnectionStage::Send;
    }

    /// Writes as much pending output as the socket takes without blocking.
    ///
    /// Returns true once the whole response is out.
    pub fn send_pending(&mut self) -> bool {
        while self.stage == ConnectionStage::Send {
            if self.outgoing_sent == self.outgoing.len() && !self.refill_from_file() {
                self.finish_response();
                return true;
            }

            match self.stream.write(&self.outgoing[self.outgoing_sent..]) {
                Ok(0) => {
                    debug!("Connection closed while sending to {}", self.peer);
                    self.stage = ConnectionStage::Close;
                }
                Ok(n) => {
                    if self.hexdump {
                        let sent = &self.outgoing[self.outgoing_sent..self.outgoing_sent + n];
                        info!("{} <- {} bytes\n{}", self.peer, n, hexdump(sent));
                    }
                    self.outgoing_sent += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("Error writing to {}: {}", self.peer, e);
                    self.stage = ConnectionStage::Close;
                }
            }
        }
        false
    }

    /// Loads the next file chunk into the output buffer; false when nothing is left.
    fn refill_from_file(&mut self) -> bool {
        if self.file_remaining == 0 {
            self.file = None;
            return false;
        }
        let Some(file) = self.file.as_mut() else {
            return false;
        };

        let want = chunk_len(self.file_remaining);
        self.outgoing.resize(want, 0);
        self.outgoing_sent = 0;

        match file.read(&mut self.outgoing[..want]) {
            Ok(0) => {
                error!(
                    "File for {} ended {} bytes early",
                    self.peer, self.file_remaining
                );
                self.outgoing.clear();
                self.file = None;
                self.stage = ConnectionStage::Close;
                false
            }
            Ok(n) => {
                self.outgoing.truncate(n);
                self.file_remaining -= n as u64;
                true
            }
            Err(e) => {
                error!("Error reading file for {}: {}", self.peer, e);
                self.outgoing.clear();
                self.file = None;
                self.stage = ConnectionStage::Close;
                false
            }
        }
    }

    fn finish_response(&mut self) {
        self.outgoing.clear();
        self.outgoing_sent = 0;
        self.stage = if self.keep_alive {
            ConnectionStage::Recv
        } else {
            ConnectionStage::Close
        };
        debug!("Response to {} complete, next stage {:?}", self.peer, self.stage);
    }

    pub fn is_sending(&self) -> bool {
        self.stage == ConnectionStage::Send
    }
}

/// Size of the next file read, never zero while bytes remain.
fn chunk_len(remaining: u64) -> usize {
    usize::try_from(remaining).map_or(FILE_CHUNK, |r| FILE_CHUNK.min(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::http_status::HttpStatus;
    use std::net::TcpListener;

    fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (Connection::new(server, peer, false), client)
    }

    fn read_until(client: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
        let mut received = Vec::new();
        let mut chunk = [0u8; 1024];
        while !received.windows(needle.len()).any(|w| w == needle) {
            let n = client.read(&mut chunk).unwrap();
            assert!(n > 0, "peer closed early");
            received.extend_from_slice(&chunk[..n]);
        }
        received
    }

    #[test]
    fn pipelined_requests_come_out_one_at_a_time() {
        let (mut conn, mut client) = pair();
        client
            .write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n")
            .unwrap();

        while conn.request_buffer.len() < 38 {
            conn.receive();
        }

        let first = conn.next_request(8192).unwrap().unwrap();
        assert_eq!(first.path, "/a");

        conn.start_response(Response::new(HttpStatus::Ok), true);
        assert_eq!(conn.next_request(8192), Ok(None));

        assert!(conn.send_pending());
        assert_eq!(conn.stage, ConnectionStage::Recv);

        let second = conn.next_request(8192).unwrap().unwrap();
        assert_eq!(second.path, "/b");
        read_until(&mut client, b"\r\n\r\n");
    }

    #[test]
    fn file_bodies_are_streamed_in_chunks() {
        let (mut conn, mut client) = pair();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let file = File::open(&path).unwrap();
        let response = Response {
            status: HttpStatus::Ok,
            headers: Vec::new(),
            body: Body::File { file, len: data.len() as u64 },
        };
        conn.start_response(response, false);

        let reader = std::thread::spawn(move || {
            let mut all = Vec::new();
            client.read_to_end(&mut all).unwrap();
            all
        });

        while !conn.send_pending() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(conn.stage, ConnectionStage::Close);
        drop(conn);

        let received = reader.join().unwrap();
        let split = received.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(&received[split..], &data[..]);
    }

    #[test]
    fn chunk_len_is_capped_and_never_zero() {
        assert_eq!(chunk_len(10), 10);
        assert_eq!(chunk_len(FILE_CHUNK as u64 + 1), FILE_CHUNK);
        assert_eq!(chunk_len(1 << 32), FILE_CHUNK);
        assert_eq!(chunk_len(u64::MAX), FILE_CHUNK);
    }

    #[test]
    fn eof_closes_connection() {
        let (mut conn, client) = pair();
        drop(client);

        for _ in 0..100 {
            conn.receive();
            if conn.stage == ConnectionStage::Close {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("connection never saw EOF");
    }
}

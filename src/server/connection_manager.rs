use log::{debug, error, warn};
use std::collections::HashMap;
use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, RawFd};

use super::connection::{Connection, ConnectionStage};
use super::event::ConnectionEvent;

/// Owns the listening socket and every open connection.
///
/// Dropping the manager closes all of them.
pub struct ConnectionManager {
    pub listener: TcpListener,
    connections: HashMap<RawFd, Connection>,
    max_connections: usize,
    max_request_size: usize,
    hexdump: bool,
}

impl ConnectionManager {
    pub fn new(
        listener: TcpListener,
        max_connections: usize,
        max_request_size: usize,
        hexdump: bool,
    ) -> Self {
        Self {
            listener,
            connections: HashMap::new(),
            max_connections,
            max_request_size,
            hexdump,
        }
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// Accepts every pending connection on the listener.
    pub fn accept_new_connections(&mut self, events: &mut Vec<ConnectionEvent>) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    return;
                }
            };

            if self.connections.len() >= self.max_connections {
                warn!("Maximum connections reached, rejecting connection from {}", peer);
                continue;
            }

            let fd = stream.as_raw_fd();
            if fd >= libc::FD_SETSIZE as RawFd {
                warn!("Descriptor {} for {} is beyond FD_SETSIZE, rejecting", fd, peer);
                continue;
            }

            if let Err(e) = stream.set_nonblocking(true) {
                error!("Failed to set non-blocking for {}: {}", peer, e);
                continue;
            }

            self.connections
                .insert(fd, Connection::new(stream, peer, self.hexdump));
            events.push(ConnectionEvent::Accepted { fd, peer });
        }
    }

    /// Reads from `fd` and queues the request it completes, if any.
    pub fn handle_readable(&mut self, fd: RawFd, events: &mut Vec<ConnectionEvent>) {
        let Some(conn) = self.connections.get_mut(&fd) else {
            return;
        };
        if conn.stage != ConnectionStage::Recv {
            return;
        }

        conn.receive();
        self.queue_buffered_request(fd, events);
    }

    /// Pushes pending output; a finished keep-alive response lets a pipelined
    /// request through.
    pub fn handle_writable(&mut self, fd: RawFd, events: &mut Vec<ConnectionEvent>) {
        let Some(conn) = self.connections.get_mut(&fd) else {
            return;
        };

        if conn.send_pending() {
            self.queue_buffered_request(fd, events);
        }
    }

    fn queue_buffered_request(&mut self, fd: RawFd, events: &mut Vec<ConnectionEvent>) {
        let max_request_size = self.max_request_size;
        let Some(conn) = self.connections.get_mut(&fd) else {
            return;
        };

        match conn.next_request(max_request_size) {
            Ok(Some(request)) => {
                debug!(
                    "Full request received from {} ({} body bytes, {} bytes left buffered)",
                    conn.peer,
                    request.body.len(),
                    conn.request_buffer.len()
                );
                events.push(ConnectionEvent::Message { fd, request });
            }
            Ok(None) => {}
            Err(error) => {
                warn!("Bad request from {}: {}", conn.peer, error);
                events.push(ConnectionEvent::Malformed { fd, error });
            }
        }
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection> {
        self.connections.get_mut(&fd)
    }

    /// Descriptors to watch for reading and for writing.
    pub fn get_connections_for_select(&self) -> (Vec<RawFd>, Vec<RawFd>) {
        let mut read_fds = Vec::new();
        let mut write_fds = Vec::new();

        for (&fd, conn) in &self.connections {
            match conn.stage {
                ConnectionStage::Recv => read_fds.push(fd),
                ConnectionStage::Send => write_fds.push(fd),
                ConnectionStage::Close => {}
            }
        }

        (read_fds, write_fds)
    }

    pub fn sending_fds(&self) -> Vec<RawFd> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.is_sending())
            .map(|(&fd, _)| fd)
            .collect()
    }

    pub fn cleanup_closed_connections(&mut self, events: &mut Vec<ConnectionEvent>) {
        let closed: Vec<RawFd> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.stage == ConnectionStage::Close)
            .map(|(&fd, _)| fd)
            .collect();

        for fd in closed {
            if let Some(conn) = self.connections.remove(&fd) {
                events.push(ConnectionEvent::Closed { fd, peer: conn.peer });
            }
        }
    }

    /// Stops reading new requests; connections still sending keep their output.
    pub fn stop_receiving(&mut self) {
        for conn in self.connections.values_mut() {
            conn.keep_alive = false;
            if conn.stage == ConnectionStage::Recv {
                conn.stage = ConnectionStage::Close;
            }
        }
    }

    pub fn get_connections_count(&self) -> usize {
        self.connections.len()
    }
}

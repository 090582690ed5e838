pub mod auth;
pub mod config;
pub mod connection;
pub mod connection_manager;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod hexdump;
pub mod http_status;
pub mod request_parser;
pub mod response;
pub mod select_handler;
pub mod shutdown;


use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

use crate::static_files::{DirResponder, StaticResponder};
use config::ServerConfig;
use connection_manager::ConnectionManager;
use dispatcher::RequestDispatcher;
use error::{Result, ServerError};
use event::ConnectionEvent;
use response::Response;
use select_handler::SelectHandler;
use shutdown::ShutdownSignal;

/// Upper bound on how long unfinished responses may keep the process alive after a signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Initializing,
    Listening,
    Draining,
    Terminated,
}

pub struct HttpServer<R = DirResponder> {
    config: ServerConfig,
    local_addr: SocketAddr,
    connection_manager: ConnectionManager,
    select_handler: SelectHandler,
    dispatcher: RequestDispatcher<R>,
    state: ServerState,
    total_connections: usize,
}

impl HttpServer<DirResponder> {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        Self::with_responder(config, DirResponder::new(!config.no_listing))
    }
}

impl<R: StaticResponder> HttpServer<R> {
    /// Binds the listening socket. Nothing is accepted until [`HttpServer::run`].
    pub fn with_responder(config: &ServerConfig, responder: R) -> Result<Self> {
        let addr = config.listen.resolve()?;
        let listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        debug!("Bound {} for {}", local_addr, config.listen);

        let connection_manager = ConnectionManager::new(
            listener,
            config.max_connections,
            config.max_request_size,
            config.hexdump,
        );
        let dispatcher =
            RequestDispatcher::new(config.root_dir.clone(), config.credentials(), responder);

        Ok(Self {
            config: config.clone(),
            local_addr,
            connection_manager,
            select_handler: SelectHandler::new(config.poll_interval()),
            dispatcher,
            state: ServerState::Initializing,
            total_connections: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Serves until `shutdown` trips, then drains and releases every socket.
    ///
    /// Returns the number of the signal that stopped the loop.
    pub fn run(mut self, shutdown: &ShutdownSignal) -> Result<i32> {
        self.transition(ServerState::Listening);

        info!("serve-dir version : v{}", env!("CARGO_PKG_VERSION"));
        info!("Listening on      : {} ({})", self.config.listen, self.local_addr);
        info!("Web root          : [{}]", self.config.root_dir.display());
        if self.config.credentials().is_enabled() {
            info!("Basic auth        : enabled");
        }
        if self.config.hexdump {
            info!("Traffic hexdump   : enabled");
        }

        let signo = loop {
            if let Some(signo) = shutdown.signal() {
                break signo;
            }
            self.poll_once()?;
        };

        self.transition(ServerState::Draining);
        self.drain();
        self.transition(ServerState::Terminated);

        info!("Exiting on signal {}", signo);
        Ok(signo)
    }

    /// One bounded wait followed by handling of everything it reported.
    fn poll_once(&mut self) -> Result<()> {
        let (read_fds, write_fds) = self.connection_manager.get_connections_for_select();
        let ready = self.select_handler.wait_for_events(
            Some(self.connection_manager.listener_fd()),
            &read_fds,
            &write_fds,
        )?;

        let mut events = Vec::new();

        if ready.listener {
            self.connection_manager.accept_new_connections(&mut events);
        }
        for &fd in &ready.readable {
            self.connection_manager.handle_readable(fd, &mut events);
        }
        for &fd in &ready.writable {
            self.connection_manager.handle_writable(fd, &mut events);
        }

        if ready.count() > 0 {
            debug!(
                "pselect found {} ready descriptors (active: {})",
                ready.count(),
                self.connection_manager.get_connections_count()
            );
        }

        self.process_events(events);
        self.cleanup();
        Ok(())
    }

    fn process_events(&mut self, events: Vec<ConnectionEvent>) {
        let mut queue: VecDeque<ConnectionEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            let mut follow_up = Vec::new();
            self.handle_event(event, &mut follow_up);
            queue.extend(follow_up);
        }
    }

    fn handle_event(&mut self, event: ConnectionEvent, follow_up: &mut Vec<ConnectionEvent>) {
        match event {
            ConnectionEvent::Accepted { fd, peer } => {
                self.total_connections += 1;
                info!(
                    "Accepted connection from {} on fd {} (total: {}, active: {})",
                    peer,
                    fd,
                    self.total_connections,
                    self.connection_manager.get_connections_count()
                );
            }
            ConnectionEvent::Message { fd, request } => {
                let Some(conn) = self.connection_manager.get_mut(fd) else {
                    return;
                };
                let mut response = self.dispatcher.dispatch(&request, &conn.peer.to_string());
                if request.is_head() {
                    response = response.without_body();
                }
                conn.start_response(response, request.keep_alive());
                self.connection_manager.handle_writable(fd, follow_up);
            }
            ConnectionEvent::Malformed { fd, error } => {
                let Some(conn) = self.connection_manager.get_mut(fd) else {
                    return;
                };
                conn.request_buffer.clear();
                conn.start_response(Response::error(error.status()), false);
                self.connection_manager.handle_writable(fd, follow_up);
            }
            ConnectionEvent::Closed { fd, peer } => {
                info!(
                    "Closed connection from {} on fd {} (active: {})",
                    peer,
                    fd,
                    self.connection_manager.get_connections_count()
                );
            }
        }
    }

    fn cleanup(&mut self) {
        let mut events = Vec::new();
        self.connection_manager.cleanup_closed_connections(&mut events);
        self.process_events(events);
    }

    /// Finishes responses already in progress, then closes everything.
    fn drain(&mut self) {
        self.connection_manager.stop_receiving();
        let deadline = Instant::now() + DRAIN_TIMEOUT;

        loop {
            let pending = self.connection_manager.sending_fds();
            if pending.is_empty() {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Dropping {} unfinished responses", pending.len());
                break;
            }

            let wait = remaining.min(self.config.poll_interval());
            match self.select_handler.wait_with_timeout(None, &[], &pending, wait) {
                Ok(ready) => {
                    let mut ignored = Vec::new();
                    for &fd in &ready.writable {
                        self.connection_manager.handle_writable(fd, &mut ignored);
                    }
                }
                Err(e) => {
                    error!("pselect failed while draining: {}", e);
                    break;
                }
            }
            self.cleanup();
        }

        self.cleanup();
        let open = self.connection_manager.get_connections_count();
        debug!("Releasing listener and {} connections", open);
    }

    fn transition(&mut self, next: ServerState) {
        debug!("Server state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

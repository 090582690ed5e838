use std::net::SocketAddr;
use thiserror::Error;

/// Fatal errors raised while bringing the server up or tearing it down.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot listen on {addr}: {reason}. Use http://ADDR:PORT or :PORT")]
    InvalidAddress { addr: String, reason: String },

    #[error("cannot bind {addr}: {source}. Use http://ADDR:PORT or :PORT")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

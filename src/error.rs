use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to start SMTP server on {addr}: {source}")]
    SmtpBind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to start HTTP server on {addr}: {source}")]
    HttpBind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

//! Error types shared by the controller, its transport and the background loops.

use std::io;

use thiserror::Error;

use crate::pencom_types::MAX_BOARDS;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to connect to relay controller at {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Invalid board count {0}, expected 1 to {}", MAX_BOARDS)]
    InvalidBoardCount(usize),

    #[error("Connection is closed")]
    Closed,

    #[error("Connection closed by relay controller")]
    Disconnected,

    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn connect<S: Into<String>>(host: S, port: u16, source: io::Error) -> Self {
        Self::Connect {
            host: host.into(),
            port,
            source,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid status line '{line}': expected a non-negative decimal bitmask")]
pub struct DecodeError {
    pub line: String,
}

pub type Result<T> = std::result::Result<T, Error>;

//! Domain errors shared by the client and server halves.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeedError {
    #[error("source file '{}' not found", path.display())]
    SourceFileNotFound { path: PathBuf },

    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid display unit '{0}' (expected one of k, K, m, M)")]
    InvalidUnit(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

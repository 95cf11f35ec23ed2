use std::fmt;

use crate::config::parser::ConfigError;

/// Top-level error for anything that can fail before the event loop starts
/// running: config load, socket bind, signal setup. Printed once by `main`
/// and mapped to exit code 1.
#[derive(thiserror::Error)]
pub enum AppError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    ConfigParse(#[from] ConfigError),
    #[error("no server blocks survived validation")]
    NoValidServers,
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("signal setup failed: {0}")]
    Signal(#[from] nix::Error),
    #[error("{0}")]
    Other(String),
}

impl fmt::Debug for AppError {
    // A custom Debug so `main`'s `Err(e) => eprintln!("{e:?}")` prints the
    // same colorized single line as Display, instead of the derive's
    // multi-field dump.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31merror\x1b[0m: {self}")
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

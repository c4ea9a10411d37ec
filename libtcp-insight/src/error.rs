use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// IP version other than 4 or 6. The offending packet is dropped,
    /// processing continues with the next one.
    #[error("unsupported IP protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    /// Malformed port filter expression. The filter degrades to
    /// non-restrictive, it never aborts an evaluation.
    #[error("invalid port filter `{0}`")]
    InvalidPortFilter(String),

    #[error("{0}")]
    Generic(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Error::Generic(s)
    }
}

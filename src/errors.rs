use core::fmt;
use std::{error, io, result};

/// The single error type used throughout the crate. Everything is fatal at
/// the top level: `main` prints one line to stderr and exits non-zero.
/// Per-read anomalies (too short, all-N, chromosome boundary crossing) are
/// not errors; those reads are counted as skipped or unmapped instead.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    InvalidReads(String),
    InvalidIndex(String),
    IndexVersionMismatch { running: u8, on_disk: u8 },
    Config(String),
}

impl fmt::Display for Error {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {err}"),
            Error::InvalidReads(err) => write!(f, "bad reads file: {err}"),
            Error::InvalidIndex(err) => write!(f, "index is invalid: {err}"),
            Error::IndexVersionMismatch { running, on_disk } => write!(
                f,
                "index version {on_disk} is incompatible with this build \
                 (expects version {running}); please re-create the index"
            ),
            Error::Config(err) => write!(f, "configuration error: {err}"),
        }
    }
}

impl From<io::Error> for Error {
    #[cold]
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<bincode::Error> for Error {
    #[cold]
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(e) => Error::Io(e),
            _ => Error::InvalidIndex("invalid encoding".to_string()),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

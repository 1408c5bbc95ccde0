use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Transfer engine initialization error: {0}")]
    Init(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Transfer I/O error: {0}")]
    TransferIo(#[source] io::Error),
    #[error("Transfer of {url} ended without producing any data{}", reason_suffix(.reason))]
    TransferExhausted { url: String, reason: Option<String> },
    #[error("Short read: wanted {wanted} bytes but only {available} available")]
    ShortRead { wanted: usize, available: usize },
    #[error("Cannot seek to {target}: data before {window_start} was discarded")]
    UnsupportedSeek { target: i64, window_start: u64 },
    #[error("Cannot seek to {target}: transfer ended at {end}")]
    SeekBeyondEnd { target: u64, end: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parsing error")]
    Parse,
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(" ({reason})"),
        None => String::new(),
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(_: serde_json::Error) -> Self {
        Self::Parse
    }
}

impl From<StreamError> for io::Error {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::TransferIo(inner) | StreamError::Io(inner) => inner,
            StreamError::ShortRead { .. } | StreamError::SeekBeyondEnd { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, error)
            }
            StreamError::UnsupportedSeek { .. } => {
                io::Error::new(io::ErrorKind::Unsupported, error)
            }
            StreamError::InvalidUrl(_) | StreamError::Parse => {
                io::Error::new(io::ErrorKind::InvalidInput, error)
            }
            _ => io::Error::new(io::ErrorKind::Other, error),
        }
    }
}

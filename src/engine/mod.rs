//! The transfer engine capability consumed by
//! [`TransferSession`](crate::TransferSession).
//!
//! An engine drives one non-blocking transfer. It is pumped until it
//! stalls, and received bytes are handed to a sink owned by the caller.
//! Between pumps the caller blocks in [`TransferEngine::wait_readable`].

mod context;
mod http;
mod memory;

use std::io;
use std::time::Duration;

use url::Url;

use crate::Result;

pub use context::EngineContext;
pub use http::{HttpTransfer, HttpTransport};
pub use memory::{MemoryTransfer, MemoryTransport};

/// Receives transferred bytes and returns how many it accepted.
pub type Sink<'a> = dyn FnMut(&[u8]) -> usize + 'a;

/// Outcome of a single [`TransferEngine::perform`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More work can be done right away, call `perform` again.
    CallAgain,
    /// Stalled until the engine becomes readable again.
    Pending,
    /// No outstanding work is left.
    Complete,
}

/// Outcome of a readiness wait.
#[derive(Debug)]
pub enum Readiness {
    Ready,
    TimedOut,
    Failed(io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// `None` when both parts are empty, which means no authentication.
    pub fn from_parts(user: &str, password: &str) -> Option<Self> {
        if user.is_empty() && password.is_empty() {
            return None;
        }
        Some(Self {
            user: user.to_owned(),
            password: password.to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: Url,
    pub credentials: Option<Credentials>,
}

impl TransferRequest {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// One in-flight transfer.
///
/// Engines stay inert until the first `perform` call. Redirects are
/// followed by the engine itself.
pub trait TransferEngine: Send {
    /// Make as much progress as possible without blocking, feeding
    /// received bytes into `sink`.
    fn perform(&mut self, sink: &mut Sink<'_>) -> Progress;

    /// Block until the transfer has something to perform or `timeout`
    /// elapses.
    fn wait_readable(&mut self, timeout: Duration) -> Readiness;

    /// Length announced by the server, if any.
    fn declared_length(&self) -> Option<u64>;

    /// Bytes handed to the sink so far.
    fn transferred_length(&self) -> u64;

    fn response_code(&self) -> Option<u32>;

    fn effective_url(&self) -> Option<String>;

    /// Why the transfer stopped early, if it did.
    fn failure(&self) -> Option<&str> {
        None
    }

    /// Unregister and release the transfer, idempotent.
    fn close(&mut self);
}

/// Creates engines for requests.
pub trait Transport {
    fn open(&self, request: &TransferRequest) -> Result<Box<dyn TransferEngine>>;
}

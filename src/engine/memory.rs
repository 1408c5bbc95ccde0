use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    Progress, Readiness, Sink, TransferEngine, TransferRequest, Transport,
};
use crate::Result;

/// Serves an in-memory body through the engine interface.
///
/// Data "arrives" one chunk at a time: the first chunk is available when
/// the transfer starts, every successful readiness wait makes one more
/// chunk available. Timeouts and a failing wait can be scripted, which
/// makes every branch of a stream's fill loop reachable without sockets.
#[derive(Debug, Clone)]
pub struct MemoryTransfer {
    body: Arc<[u8]>,
    chunk_size: usize,
    declared_length: Option<u64>,
    response_code: u32,
    effective_url: Option<String>,
    timeouts: usize,
    fail_wait_after: Option<usize>,
    started: bool,
    arrived: usize,
    delivered: usize,
    waits: usize,
    closed: bool,
    closes: Arc<AtomicUsize>,
}

impl MemoryTransfer {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        let body: Vec<u8> = body.into();
        Self {
            body: body.into(),
            chunk_size: 1024,
            declared_length: None,
            response_code: 200,
            effective_url: None,
            timeouts: 0,
            fail_wait_after: None,
            started: false,
            arrived: 0,
            delivered: 0,
            waits: 0,
            closed: false,
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Announce the full body length like a `Content-Length` header.
    pub fn declare_length(mut self) -> Self {
        self.declared_length = Some(self.body.len() as u64);
        self
    }

    pub fn response_code(mut self, code: u32) -> Self {
        self.response_code = code;
        self
    }

    pub fn effective_url(mut self, url: &str) -> Self {
        self.effective_url = Some(url.to_owned());
        self
    }

    /// Time out this many readiness waits before data flows again.
    pub fn timeouts(mut self, count: usize) -> Self {
        self.timeouts = count;
        self
    }

    /// Let the readiness wait fail once `count` waits succeeded.
    pub fn fail_wait_after(mut self, count: usize) -> Self {
        self.fail_wait_after = Some(count);
        self
    }

    /// How many times this transfer, or any clone of it, was closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn arrive_chunk(&mut self) {
        self.arrived = (self.arrived + self.chunk_size).min(self.body.len());
    }
}

impl TransferEngine for MemoryTransfer {
    fn perform(&mut self, sink: &mut Sink<'_>) -> Progress {
        if self.closed {
            return Progress::Complete;
        }
        if !self.started {
            self.started = true;
            self.arrive_chunk();
            return Progress::CallAgain;
        }
        if self.delivered < self.arrived {
            let end = (self.delivered + self.chunk_size).min(self.arrived);
            let piece = &self.body[self.delivered..end];
            let accepted = sink(piece);
            self.delivered += accepted;
            if accepted < piece.len() {
                return Progress::Pending;
            }
            if self.delivered < self.arrived {
                return Progress::CallAgain;
            }
        }
        if self.delivered == self.body.len() {
            Progress::Complete
        } else {
            Progress::Pending
        }
    }

    fn wait_readable(&mut self, _timeout: Duration) -> Readiness {
        if self.closed {
            return Readiness::Failed(io::Error::new(
                io::ErrorKind::NotConnected,
                "transfer is closed",
            ));
        }
        if self.fail_wait_after == Some(self.waits) {
            return Readiness::Failed(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "scripted wait failure",
            ));
        }
        if self.timeouts > 0 {
            self.timeouts -= 1;
            return Readiness::TimedOut;
        }
        self.waits += 1;
        if self.delivered == self.arrived {
            self.arrive_chunk();
        }
        Readiness::Ready
    }

    fn declared_length(&self) -> Option<u64> {
        self.declared_length
    }

    fn transferred_length(&self) -> u64 {
        self.delivered as u64
    }

    fn response_code(&self) -> Option<u32> {
        self.started.then_some(self.response_code)
    }

    fn effective_url(&self) -> Option<String> {
        self.effective_url.clone()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Hands out fresh copies of a scripted [`MemoryTransfer`].
///
/// The effective URL defaults to the requested one.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    template: MemoryTransfer,
}

impl MemoryTransport {
    pub fn new(template: MemoryTransfer) -> Self {
        Self { template }
    }

    pub fn close_count(&self) -> usize {
        self.template.close_count()
    }
}

impl Transport for MemoryTransport {
    fn open(&self, request: &TransferRequest) -> Result<Box<dyn TransferEngine>> {
        let mut transfer = self.template.clone();
        if transfer.effective_url.is_none() {
            transfer.effective_url = Some(request.url.to_string());
        }
        Ok(Box::new(transfer))
    }
}

use std::io;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use super::{
    EngineContext, Progress, Readiness, Sink, TransferEngine, TransferRequest,
    Transport,
};
use crate::Result;

/// Received chunks that may queue up before the transfer task waits for
/// the reader.
const CHANNEL_DEPTH: usize = 16;

#[derive(Debug)]
enum TransferEvent {
    Head(ResponseHead),
    Chunk(Vec<u8>),
    Done,
    Failed(String),
}

#[derive(Debug, Clone)]
struct ResponseHead {
    status: u32,
    url: String,
    content_length: Option<u64>,
}

/// Opens reqwest backed transfers on the process-wide [`EngineContext`].
#[derive(Clone, Copy)]
pub struct HttpTransport {
    context: &'static EngineContext,
}

impl HttpTransport {
    pub fn new(context: &'static EngineContext) -> Self {
        Self { context }
    }

    pub fn global() -> Result<Self> {
        Ok(Self::new(EngineContext::global()?))
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: &TransferRequest) -> Result<Box<dyn TransferEngine>> {
        Ok(Box::new(HttpTransfer::new(self.context, request.clone())))
    }
}

/// A GET request whose body is streamed by a task on the engine runtime.
///
/// The task pushes events into a bounded channel. `perform` drains the
/// channel without blocking and `wait_readable` blocks on it.
pub struct HttpTransfer {
    context: &'static EngineContext,
    url: String,
    request: Option<TransferRequest>,
    events: Option<mpsc::Receiver<TransferEvent>>,
    task: Option<JoinHandle<()>>,
    peeked: Option<TransferEvent>,
    pending: Vec<u8>,
    pending_offset: usize,
    head: Option<ResponseHead>,
    transferred: u64,
    finished: bool,
    failure: Option<String>,
}

impl HttpTransfer {
    pub fn new(context: &'static EngineContext, request: TransferRequest) -> Self {
        Self {
            context,
            url: request.url.to_string(),
            request: Some(request),
            events: None,
            task: None,
            peeked: None,
            pending: Vec::new(),
            pending_offset: 0,
            head: None,
            transferred: 0,
            finished: false,
            failure: None,
        }
    }

    fn start(&mut self, request: TransferRequest) {
        let (sender, receiver) = mpsc::channel(CHANNEL_DEPTH);
        let mut builder = self.context.client().get(request.url);
        if let Some(credentials) = request.credentials {
            builder =
                builder.basic_auth(credentials.user, Some(credentials.password));
        }
        log::debug!("http/{}: starting transfer", self.url);
        self.task = Some(self.context.runtime().spawn(run_transfer(builder, sender)));
        self.events = Some(receiver);
    }

    fn has_pending(&self) -> bool {
        self.pending_offset < self.pending.len()
    }

    /// Hand the leftover of the last chunk to `sink`. Returns `false` when
    /// the sink did not take all of it.
    fn flush_pending(&mut self, sink: &mut Sink<'_>) -> bool {
        if self.has_pending() {
            let accepted = sink(&self.pending[self.pending_offset..]);
            self.pending_offset += accepted;
            self.transferred += accepted as u64;
        }
        if self.has_pending() {
            return false;
        }
        self.pending.clear();
        self.pending_offset = 0;
        true
    }

    fn finish(&mut self, failure: Option<String>) -> Progress {
        if let Some(reason) = &failure {
            log::warn!("http/{}: transfer failed: {}", self.url, reason);
        } else {
            log::debug!(
                "http/{}: transfer complete, {} bytes",
                self.url,
                self.transferred
            );
        }
        self.failure = failure;
        self.finished = true;
        Progress::Complete
    }
}

impl TransferEngine for HttpTransfer {
    fn perform(&mut self, sink: &mut Sink<'_>) -> Progress {
        if let Some(request) = self.request.take() {
            self.start(request);
            return Progress::CallAgain;
        }
        if !self.flush_pending(sink) {
            return Progress::Pending;
        }
        if self.finished {
            return Progress::Complete;
        }

        let event = match self.peeked.take() {
            Some(event) => event,
            None => {
                let Some(events) = self.events.as_mut() else {
                    return Progress::Complete;
                };
                match events.try_recv() {
                    Ok(event) => event,
                    Err(TryRecvError::Empty) => return Progress::Pending,
                    Err(TryRecvError::Disconnected) => {
                        return self.finish(Some(
                            "transfer task ended unexpectedly".to_owned(),
                        ))
                    }
                }
            }
        };

        match event {
            TransferEvent::Head(head) => {
                log::debug!(
                    "http/{}: response {} from {}, declared length {:?}",
                    self.url,
                    head.status,
                    head.url,
                    head.content_length
                );
                self.head = Some(head);
                Progress::CallAgain
            }
            TransferEvent::Chunk(bytes) => {
                self.pending = bytes;
                self.pending_offset = 0;
                if self.flush_pending(sink) {
                    Progress::CallAgain
                } else {
                    Progress::Pending
                }
            }
            TransferEvent::Done => self.finish(None),
            TransferEvent::Failed(reason) => self.finish(Some(reason)),
        }
    }

    fn wait_readable(&mut self, timeout: Duration) -> Readiness {
        if self.request.is_some()
            || self.finished
            || self.has_pending()
            || self.peeked.is_some()
        {
            return Readiness::Ready;
        }
        let Some(events) = self.events.as_mut() else {
            return Readiness::Failed(io::Error::new(
                io::ErrorKind::NotConnected,
                "transfer is closed",
            ));
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            return Readiness::Failed(io::Error::new(
                io::ErrorKind::WouldBlock,
                "cannot block on a transfer from inside an async runtime",
            ));
        }

        // The timer has to be created inside the runtime.
        let received = self
            .context
            .runtime()
            .block_on(async { tokio::time::timeout(timeout, events.recv()).await });
        match received {
            Ok(Some(event)) => {
                self.peeked = Some(event);
                Readiness::Ready
            }
            Ok(None) => {
                self.peeked = Some(TransferEvent::Failed(
                    "transfer task ended unexpectedly".to_owned(),
                ));
                Readiness::Ready
            }
            Err(_) => {
                log::trace!("http/{}: no data within {:?}", self.url, timeout);
                Readiness::TimedOut
            }
        }
    }

    fn declared_length(&self) -> Option<u64> {
        self.head.as_ref().and_then(|head| head.content_length)
    }

    fn transferred_length(&self) -> u64 {
        self.transferred
    }

    fn response_code(&self) -> Option<u32> {
        self.head.as_ref().map(|head| head.status)
    }

    fn effective_url(&self) -> Option<String> {
        self.head.as_ref().map(|head| head.url.clone())
    }

    fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("http/{}: transfer released", self.url);
        }
        self.request = None;
        self.events = None;
        self.peeked = None;
        self.finished = true;
    }
}

impl Drop for HttpTransfer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_transfer(
    request: reqwest::RequestBuilder,
    events: mpsc::Sender<TransferEvent>,
) {
    let mut response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = events.send(TransferEvent::Failed(e.to_string())).await;
            return;
        }
    };

    let head = ResponseHead {
        status: u32::from(response.status().as_u16()),
        url: response.url().to_string(),
        content_length: response.content_length(),
    };
    if events.send(TransferEvent::Head(head)).await.is_err() {
        return;
    }

    loop {
        let event = match response.chunk().await {
            Ok(Some(chunk)) => TransferEvent::Chunk(chunk.to_vec()),
            Ok(None) => TransferEvent::Done,
            Err(e) => TransferEvent::Failed(e.to_string()),
        };
        let last = !matches!(event, TransferEvent::Chunk(_));
        if events.send(event).await.is_err() || last {
            return;
        }
    }
}

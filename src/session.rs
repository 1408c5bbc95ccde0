use std::io;
use std::time::Duration;

use crate::engine::{
    Progress, Readiness, Sink, TransferEngine, TransferRequest, Transport,
};
use crate::Result;

/// Lifecycle and metadata of a single transfer.
///
/// Metadata is fetched from the engine lazily and cached once known.
pub struct TransferSession {
    url: String,
    engine: Option<Box<dyn TransferEngine>>,
    still_running: bool,
    pumped: bool,
    response_code: Option<u32>,
    effective_url: Option<String>,
    content_length: Option<u64>,
    failure: Option<String>,
}

impl TransferSession {
    /// Configure a transfer for `request`. Nothing is sent before the
    /// first [`pump`](Self::pump).
    pub fn begin(transport: &dyn Transport, request: &TransferRequest) -> Result<Self> {
        let engine = transport.open(request)?;
        log::debug!("session/{}: registered", request.url);
        Ok(Self {
            url: request.url.to_string(),
            engine: Some(engine),
            still_running: true,
            pumped: false,
            response_code: None,
            effective_url: None,
            content_length: None,
            failure: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_running(&self) -> bool {
        self.still_running
    }

    pub fn has_pumped(&self) -> bool {
        self.pumped
    }

    /// Why the transfer stopped early, if the engine reported a reason.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Drive the engine until it stalls.
    pub fn pump(&mut self, sink: &mut Sink<'_>) {
        self.pumped = true;
        let engine = match self.engine.as_mut() {
            Some(engine) => engine,
            None => {
                self.still_running = false;
                return;
            }
        };
        loop {
            match engine.perform(sink) {
                Progress::CallAgain => continue,
                Progress::Pending => {
                    self.still_running = true;
                    break;
                }
                Progress::Complete => {
                    self.still_running = false;
                    if self.failure.is_none() {
                        self.failure = engine.failure().map(str::to_owned);
                    }
                    break;
                }
            }
        }
    }

    pub fn wait_readable(&mut self, timeout: Duration) -> Readiness {
        match self.engine.as_mut() {
            Some(engine) => engine.wait_readable(timeout),
            None => Readiness::Failed(io::Error::new(
                io::ErrorKind::NotConnected,
                "transfer session has ended",
            )),
        }
    }

    /// Declared length while the transfer runs, transferred length once
    /// it has finished. Only positive values are cached.
    pub fn content_length(&mut self) -> Option<u64> {
        if self.content_length.is_some() {
            return self.content_length;
        }
        let engine = self.engine.as_ref()?;
        let length = if self.still_running {
            engine.declared_length()
        } else {
            Some(engine.transferred_length())
        };
        self.content_length = length.filter(|length| *length > 0);
        self.content_length
    }

    /// `0` until the response head has been received.
    pub fn response_code(&mut self) -> u32 {
        if self.response_code.is_none() && self.pumped {
            self.response_code = self
                .engine
                .as_ref()
                .and_then(|engine| engine.response_code())
                .filter(|code| *code != 0);
        }
        self.response_code.unwrap_or(0)
    }

    /// The URL after redirects, the requested one while it is unknown.
    pub fn effective_url(&mut self) -> String {
        if self.effective_url.is_none() && self.pumped {
            self.effective_url =
                self.engine.as_ref().and_then(|engine| engine.effective_url());
        }
        self.effective_url
            .clone()
            .unwrap_or_else(|| self.url.clone())
    }

    /// Release the transfer. Safe to call any number of times.
    pub fn end(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.close();
            self.still_running = false;
            log::debug!("session/{}: ended", self.url);
        }
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.end();
    }
}

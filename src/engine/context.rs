use anyhow::Context as _;
use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tokio::runtime::Runtime;

use crate::{Result, StreamError};

const WORKER_THREADS: usize = 2;
const MAX_REDIRECTS: usize = 10;
const USER_AGENT_VALUE: &str = concat!("urlstream/", env!("CARGO_PKG_VERSION"));

static GLOBAL: OnceCell<EngineContext> = OnceCell::new();

/// Process-wide state shared by every HTTP transfer: the runtime driving
/// the transfers and the connection pool.
///
/// Built once on first use and kept until the process exits.
pub struct EngineContext {
    runtime: Runtime,
    client: reqwest::Client,
}

impl EngineContext {
    pub fn global() -> Result<&'static EngineContext> {
        GLOBAL.get_or_try_init(|| {
            log::debug!("engine: initializing process-wide transfer state");
            Self::build().map_err(|e| {
                log::warn!("engine: initialization failed: {:#}", e);
                StreamError::Init(format!("{:#}", e))
            })
        })
    }

    fn build() -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("urlstream-engine")
            .enable_all()
            .build()
            .context("failed to start the transfer runtime")?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .context("failed to build the HTTP client")?;

        Ok(Self { runtime, client })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

//! Blocking HTTP client with per-worker politeness delay and optional retries.
//!
//! The client is shared by reference across extraction workers. Each worker thread is one
//! parallel slot: it waits `delay` after its own previous request, independently of the others.

use super::{CollectError, FetchedPage, PageFetcher};
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; sitebinder/0.1; +https://github.com/sitebinder)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_SECS: u64 = 3;
const MAX_REDIRECTS: usize = 10;

/// One attempt only: the pipeline does not retry unless configured to.
const DEFAULT_RETRY_COUNT: u32 = 1;
const DEFAULT_BACKOFF_SECS: [u64; 4] = [1, 2, 4, 8];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];

/// Blocking HTTP client that enforces a delay between requests made from the same thread.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Mutex<HashMap<ThreadId, Instant>>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl PoliteClient {
    /// Build a polite client with default User-Agent, timeout, and delay.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// GET `url` after this thread's delay has passed, retrying timeouts, connection errors,
    /// 5xx and 429 when more than one attempt is configured.
    pub fn get(&self, url: &str) -> Result<reqwest::blocking::Response, reqwest::Error> {
        let attempts = self.retry_count.max(1);
        let mut attempt = 0u32;
        loop {
            self.wait_turn();
            let result = self.inner.get(url).send();
            self.mark_request();
            let last_attempt = attempt + 1 >= attempts;
            let backoff = match result {
                Ok(response) => {
                    let status = response.status();
                    let rate_limited = status.as_u16() == 429;
                    if !(status.is_server_error() || rate_limited) || last_attempt {
                        return Ok(response);
                    }
                    warn!(%url, status = status.as_u16(), attempt = attempt + 1, "retrying");
                    if rate_limited {
                        backoff_at(&BACKOFF_429_SECS, attempt)
                    } else {
                        backoff_at(&self.backoff_secs, attempt)
                    }
                }
                Err(e) => {
                    if !(e.is_timeout() || e.is_connect()) || last_attempt {
                        return Err(e);
                    }
                    warn!(%url, error = %e, attempt = attempt + 1, "retrying");
                    backoff_at(&self.backoff_secs, attempt)
                }
            };
            std::thread::sleep(Duration::from_secs(backoff));
            attempt += 1;
        }
    }

    /// GET without waiting for the politeness delay. Used for images embedded in a page that is
    /// already being processed.
    pub fn get_immediate(&self, url: &str) -> Result<reqwest::blocking::Response, reqwest::Error> {
        self.inner.get(url).send()
    }

    fn wait_turn(&self) {
        let last = self
            .last_request
            .lock()
            .ok()
            .and_then(|m| m.get(&std::thread::current().id()).copied());
        if let Some(last) = last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
    }

    fn mark_request(&self) {
        if let Ok(mut m) = self.last_request.lock() {
            m.insert(std::thread::current().id(), Instant::now());
        }
    }
}

fn backoff_at(table: &[u64], attempt: u32) -> u64 {
    table
        .get(attempt as usize)
        .or_else(|| table.last())
        .copied()
        .unwrap_or(1)
}

impl PageFetcher for PoliteClient {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CollectError> {
        debug!(%url, "fetching page");
        let response = self.get(url).map_err(|e| CollectError::Network {
            url: url.to_string(),
            source: e,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().to_string();
        let body = response.text().map_err(|e| CollectError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        Ok(FetchedPage {
            url: final_url,
            body,
        })
    }
}

/// Builder for PoliteClient with optional User-Agent, delay, timeout, and retry settings.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_secs: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_secs: DEFAULT_DELAY_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl PoliteClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Delay each worker observes between its own requests.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Number of attempts per request (default 1, i.e. no retries).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff delays in seconds before each retry. If shorter than retry_count - 1, the last
    /// value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            DEFAULT_BACKOFF_SECS.to_vec()
        } else {
            self.retry_backoff_secs
        };
        Ok(PoliteClient {
            inner,
            delay: Duration::from_secs(self.delay_secs),
            last_request: Mutex::new(HashMap::new()),
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}

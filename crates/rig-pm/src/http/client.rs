//! HTTP client used by the fetch cache.
//!
//! This module provides a wrapper around `reqwest` with installer-specific features:
//! - Automatic retry logic with exponential backoff
//! - Conditional requests (`If-None-Match` / `If-Modified-Since`)
//! - Streaming response bodies to disk
//!
//! # Examples
//!
//! ```no_run
//! use rig_pm::http::{HttpClient, HttpClientConfig, Validators};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::with_config(
//!     HttpClientConfig::new()
//!         .with_max_retries(5)
//!         .with_retry_delay(Duration::from_millis(500)),
//! )?;
//!
//! let validators = Validators {
//!     etag: Some("\"abc\"".to_string()),
//!     last_modified: None,
//! };
//! let dest = Path::new("/tmp/engine.json");
//! match client.download("https://example.org/engine.json", &validators, dest).await? {
//!     Some(download) => println!("changed: {} bytes", download.size),
//!     None => println!("not modified"),
//! }
//! # Ok(())
//! # }
//! ```

use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const DEFAULT_USER_AGENT: &str = concat!("rig/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Max retries exceeded for {url}")]
    MaxRetries { url: String },
}

impl HttpError {
    /// Client errors other than 429 are never retried.
    fn is_retryable(&self) -> bool {
        match self {
            HttpError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            HttpError::Request(e) => !e.is_builder() && !e.is_redirect(),
            HttpError::Io(_) | HttpError::MaxRetries { .. } => true,
        }
    }
}

/// Cache validators sent on a conditional request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    /// Read the validators a server attached to a response.
    pub fn from_response(response: &Response) -> Self {
        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        Self {
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
        }
    }
}

pub struct HttpClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        })
    }

    /// Download `url` into `dest` with automatic retries.
    ///
    /// Each attempt covers the status line and the whole body, so a
    /// connection dropped mid-transfer is retried like any transport error.
    /// Returns `Ok(None)` when the server answers 304 Not Modified.
    pub async fn download(
        &self,
        url: &str,
        validators: &Validators,
        dest: &Path,
    ) -> Result<Option<Download>, HttpError> {
        match self.with_retries(url, validators, BodySink::File(dest)).await? {
            Some((validators, Body::Written(size))) => Ok(Some(Download { validators, size })),
            Some((validators, Body::Bytes(bytes))) => Ok(Some(Download {
                validators,
                size: bytes.len() as u64,
            })),
            None => Ok(None),
        }
    }

    /// Fetch `url` into memory with automatic retries; nothing is written to disk.
    ///
    /// Returns `Ok(None)` when the server answers 304 Not Modified.
    pub async fn fetch_bytes(&self, url: &str, validators: &Validators) -> Result<Option<Vec<u8>>, HttpError> {
        match self.with_retries(url, validators, BodySink::Memory).await? {
            Some((_, Body::Bytes(bytes))) => Ok(Some(bytes)),
            Some((_, Body::Written(_))) | None => Ok(None),
        }
    }

    async fn with_retries(
        &self,
        url: &str,
        validators: &Validators,
        sink: BodySink<'_>,
    ) -> Result<Option<(Validators, Body)>, HttpError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match self.attempt(url, validators, &sink).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            // Don't sleep after the last attempt
            if attempt < self.max_retries {
                // Exponential backoff: 1s, 2s, 4s, 8s, etc.
                let delay = self.retry_delay * 2_u32.pow(attempt);
                log::debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    url,
                    delay,
                    attempt + 2,
                    self.max_retries + 1
                );
                tokio::time::sleep(delay).await;
            }
        }

        // All retries exhausted
        match last_error {
            Some(e) => Err(e),
            None => Err(HttpError::MaxRetries {
                url: url.to_string(),
            }),
        }
    }

    /// One request and its body, without retries
    async fn attempt(
        &self,
        url: &str,
        validators: &Validators,
        sink: &BodySink<'_>,
    ) -> Result<Option<(Validators, Body)>, HttpError> {
        let response = self.execute_get(url, validators).await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED && !validators.is_empty() {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(HttpError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let received = Validators::from_response(&response);
        let body = match sink {
            BodySink::File(dest) => {
                let result = write_body(response, dest).await;
                if result.is_err() {
                    let _ = tokio::fs::remove_file(dest).await;
                }
                Body::Written(result?)
            }
            BodySink::Memory => Body::Bytes(response.bytes().await?.to_vec()),
        };
        Ok(Some((received, body)))
    }

    /// Execute a GET request without retries
    async fn execute_get(&self, url: &str, validators: &Validators) -> Result<Response, HttpError> {
        let mut request = self.client.get(url);

        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let start = Instant::now();
        let response = request.send().await?;
        log::debug!("HTTP {} {} in {:?}", response.status().as_u16(), url, start.elapsed());
        Ok(response)
    }
}

/// Where a response body goes
enum BodySink<'a> {
    File(&'a Path),
    Memory,
}

enum Body {
    Written(u64),
    Bytes(Vec<u8>),
}

/// A completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Validators the server sent with the body
    pub validators: Validators,
    /// Bytes written
    pub size: u64,
}

/// Stream a response body into `dest`, returning the number of bytes written.
async fn write_body(response: Response, dest: &Path) -> Result<u64, HttpError> {
    // Create parent directories if they don't exist
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(dest).await?;
    let mut written: u64 = 0;

    let mut stream = response.bytes_stream();

    use futures_util::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;

    Ok(written)
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

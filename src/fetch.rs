//! Text fetching for guide and subtitle sources
//! HTTP(S) via ureq with retries; local paths and `file://` URLs are read from disk.
//! Gzip-compressed bodies (.xml.gz guides) are detected by magic bytes.

use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use log::{debug, warn};

use crate::error::{EngineError, Result};

/// Returns the raw text behind a URL. Failures mean "no new data".
pub trait TextFetcher: Send + Sync {
    fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Download configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Maximum attempts, including the first
    pub max_retries: u32,
    /// Delay between retries in milliseconds
    pub retry_delay_ms: u64,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds
    pub read_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 2000,
            connect_timeout_secs: 30,
            read_timeout_secs: 120,
            user_agent: concat!("guide_engine/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetcher backed by a ureq agent
pub struct HttpFetcher {
    agent: ureq::Agent,
    config: DownloadConfig,
}

impl HttpFetcher {
    pub fn new(config: DownloadConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.read_timeout_secs)))
            .timeout_connect(Some(Duration::from_secs(config.connect_timeout_secs)))
            .max_idle_connections(4)
            .max_idle_connections_per_host(2)
            .build()
            .new_agent();
        Self { agent, config }
    }

    fn try_download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(url)
            .header("User-Agent", &self.config.user_agent)
            .call()
            .map_err(|e| EngineError::TransportFailure(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status != 200 && status != 206 {
            return Err(EngineError::TransportFailure(format!("HTTP error: {}", status)));
        }

        let mut body = Vec::new();
        response
            .into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| EngineError::TransportFailure(format!("Read failed: {}", e)))?;
        Ok(body)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_download(url) {
                Ok(body) => return Ok(body),
                Err(e) if attempts >= self.config.max_retries.max(1) => {
                    return Err(EngineError::TransportFailure(format!(
                        "Download failed after {} attempts: {}",
                        attempts, e
                    )));
                }
                Err(e) => {
                    warn!("Fetch attempt {} for {} failed: {}", attempts, url, e);
                    std::thread::sleep(Duration::from_millis(self.config.retry_delay_ms));
                }
            }
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DownloadConfig::default())
    }
}

impl TextFetcher for HttpFetcher {
    fn fetch_text(&self, url: &str) -> Result<String> {
        let url = url.trim();
        let bytes = if url.starts_with("http://") || url.starts_with("https://") {
            self.download(url)?
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            std::fs::read(path)
                .map_err(|e| EngineError::TransportFailure(format!("Cannot read {}: {}", path, e)))?
        };
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        decode_body(&bytes)
    }
}

/// Turn a response body into text, inflating gzip (magic 1f 8b) first.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn decode_body(bytes: &[u8]) -> Result<String> {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut inflated = Vec::with_capacity(bytes.len() * 4);
        GzDecoder::new(bytes)
            .read_to_end(&mut inflated)
            .map_err(|e| EngineError::TransportFailure(format!("Gzip decode failed: {}", e)))?;
        return Ok(String::from_utf8_lossy(&inflated).into_owned());
    }

    let bytes = bytes.strip_prefix(&[0xef, 0xbb, 0xbf]).unwrap_or(bytes);
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

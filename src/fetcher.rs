use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, LAST_MODIFIED};
use serde::{Deserialize, Serialize};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use thiserror::Error;
use tracing::debug;

use crate::settings::{Backend, Settings};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    HttpError,
    NetworkError,
    Timeout,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Ok => "ok",
            FetchStatus::HttpError => "http_error",
            FetchStatus::NetworkError => "network_error",
            FetchStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Http(u16),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("snapshot read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("SPIDER_API_KEY environment variable must be set")]
    MissingApiKey,
    #[error("rendering service: {0}")]
    Service(String),
}

impl FetchError {
    pub fn status(&self) -> FetchStatus {
        match self {
            FetchError::Http(_) => FetchStatus::HttpError,
            FetchError::Timeout => FetchStatus::Timeout,
            _ => FetchStatus::NetworkError,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            FetchError::Http(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Http(status.as_u16())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// What one fetch produced. `html` is `None` whenever `status` is not `Ok`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub url: String,
    pub html: Option<String>,
    pub status: FetchStatus,
    pub http_status: Option<u16>,
    pub last_modified: Option<String>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl FetchOutcome {
    fn from_result(url: &str, result: Result<Page, FetchError>, started: Instant) -> Self {
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(page) => FetchOutcome {
                url: url.to_string(),
                html: Some(page.html),
                status: FetchStatus::Ok,
                http_status: page.http_status,
                last_modified: page.last_modified,
                latency_ms,
                error: None,
            },
            Err(e) => FetchOutcome {
                url: url.to_string(),
                html: None,
                status: e.status(),
                http_status: e.http_status(),
                last_modified: None,
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == FetchStatus::Ok
    }
}

struct Page {
    html: String,
    http_status: Option<u16>,
    last_modified: Option<String>,
}

/// Something that turns a URL into HTML. Failures are reported in the
/// outcome, never raised.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// Pick the backend named in `settings`.
pub fn build_fetcher(settings: &Settings) -> Result<Arc<dyn Fetcher>> {
    let fetcher: Arc<dyn Fetcher> = match settings.backend()? {
        Backend::Http => Arc::new(HttpFetcher::new(settings)?),
        Backend::Spider => Arc::new(SpiderFetcher::from_env()?),
        Backend::File => Arc::new(SnapshotFetcher::new(&settings.snapshot_dir)),
    };
    debug!(backend = fetcher.name(), "fetcher ready");
    Ok(fetcher)
}

// ── Plain HTTP ──

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&settings.accept_language).context("Invalid accept_language")?,
        );

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpFetcher { client })
    }

    async fn get(&self, url: &str) -> Result<Page, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }
        let last_modified = resp
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let html = resp.text().await?;
        Ok(Page {
            html,
            http_status: Some(status.as_u16()),
            last_modified,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str) -> FetchOutcome {
        let started = Instant::now();
        let result = self.get(url).await;
        FetchOutcome::from_result(url, result, started)
    }
}

// ── spider.cloud rendering service ──

pub struct SpiderFetcher {
    spider: Spider,
}

impl SpiderFetcher {
    pub fn from_env() -> Result<Self, FetchError> {
        let api_key = std::env::var("SPIDER_API_KEY").map_err(|_| FetchError::MissingApiKey)?;
        let spider = Spider::new(Some(api_key)).map_err(|e| FetchError::Service(e.to_string()))?;
        Ok(SpiderFetcher { spider })
    }

    async fn render(&self, url: &str) -> Result<Page, FetchError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };
        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| FetchError::Service(e.to_string()))?;
        parse_spider_response(response)
    }
}

/// The service answers with a list of `{content, status}` objects, sometimes
/// wrapped in a JSON string.
fn parse_spider_response(response: serde_json::Value) -> Result<Page, FetchError> {
    let parsed: serde_json::Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };
    let first = parsed.as_array().and_then(|arr| arr.first());

    let http_status = first
        .and_then(|obj| obj.get("status"))
        .and_then(|s| s.as_u64())
        .map(|s| s as u16);
    if let Some(code) = http_status.filter(|c| *c >= 400) {
        return Err(FetchError::Http(code));
    }

    let html = first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| FetchError::Service("No content in spider response".to_string()))?;

    Ok(Page {
        html,
        http_status,
        last_modified: None,
    })
}

#[async_trait]
impl Fetcher for SpiderFetcher {
    fn name(&self) -> &'static str {
        "spider"
    }

    async fn fetch(&self, url: &str) -> FetchOutcome {
        let started = Instant::now();
        let result = self.render(url).await;
        FetchOutcome::from_result(url, result, started)
    }
}

// ── Local snapshots ──

/// Serves pages saved earlier as `<dir>/<snapshot_name(url)>`.
pub struct SnapshotFetcher {
    dir: PathBuf,
}

impl SnapshotFetcher {
    pub fn new(dir: &Path) -> Self {
        SnapshotFetcher {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(snapshot_name(url))
    }

    async fn read(&self, url: &str) -> Result<Page, FetchError> {
        let html = tokio::fs::read_to_string(self.path_for(url))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => FetchError::Http(404),
                _ => FetchError::Io(e),
            })?;
        Ok(Page {
            html,
            http_status: Some(200),
            last_modified: None,
        })
    }
}

#[async_trait]
impl Fetcher for SnapshotFetcher {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn fetch(&self, url: &str) -> FetchOutcome {
        let started = Instant::now();
        let result = self.read(url).await;
        FetchOutcome::from_result(url, result, started)
    }
}

/// `https://darwin.md/telefoane/a55?id=7` → `darwin.md_telefoane_a55_id_7.html`
pub fn snapshot_name(url: &str) -> String {
    let bare = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let name: String = bare
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!("{}.html", name.trim_matches('_'))
}

// ── Tests ──

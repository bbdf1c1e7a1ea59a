//! Source fetcher: pulls candidate links out of subscription feeds and web pages
//!
//! Two source shapes are understood:
//! - structured feeds: a JSON array of links, or newline-delimited text
//!   (optionally base64-wrapped as a whole)
//! - rendered pages: HTML whose anchors point at share links

use crate::error::FetchError;
use crate::proxy::models::Protocol;
use crate::proxy::parser::LinkParser;
use crate::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use scraper::{Html, Selector};
use std::fmt;
use std::time::Duration;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Hosts serving raw file content; everything else is scraped as HTML
const RAW_CONTENT_PREFIX: &str = "https://raw.githubusercontent.com/";

/// Anchors whose target carries a supported share link
static SHARE_LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"a[href*="vmess://"], a[href*="vless://"], a[href*="trojan://"]"#)
        .expect("Invalid share link selector")
});

/// How a source's body should be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// JSON array or newline-delimited links
    Feed,
    /// HTML page with share links in anchors
    Page,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Feed => write!(f, "feed"),
            SourceKind::Page => write!(f, "page"),
        }
    }
}

/// A remote location publishing share links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub url: String,
    pub kind: SourceKind,
}

impl Source {
    pub fn new(url: &str, kind: SourceKind) -> Self {
        Self {
            url: url.to_string(),
            kind,
        }
    }

    pub fn feed(url: &str) -> Self {
        Self::new(url, SourceKind::Feed)
    }

    pub fn page(url: &str) -> Self {
        Self::new(url, SourceKind::Page)
    }

    /// Infer the kind from the URL: raw file hosts are feeds, anything else a page
    pub fn classify(url: &str) -> Self {
        if url.starts_with(RAW_CONTENT_PREFIX) {
            Self::feed(url)
        } else {
            Self::page(url)
        }
    }
}

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source that was crawled
    pub source: String,
    /// Number of links extracted from the source
    pub found: usize,
    /// Error message if crawling failed
    pub error: Option<String>,
}

impl CrawlResult {
    /// Create a successful crawl result
    pub fn success(source: String, found: usize) -> Self {
        Self {
            source,
            found,
            error: None,
        }
    }

    /// Create a failed crawl result
    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            found: 0,
            error: Some(error),
        }
    }

    /// Check if the crawl was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Anything that can produce candidate links for a source
#[async_trait]
pub trait LinkSource: Send + Sync {
    async fn fetch(&self, source: &Source) -> std::result::Result<Vec<String>, FetchError>;
}

/// Configuration for the source crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Per-request timeout; `None` leaves fetches unbounded
    pub timeout: Option<Duration>,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Crawler fetching share links from feeds and pages
pub struct ProxyCrawler {
    client: Client,
}

impl ProxyCrawler {
    /// Create a new crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(&config.user_agent);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Fetch a rendered page and pull share links out of its anchors
    pub async fn crawl_page(&self, url: &str) -> std::result::Result<Vec<String>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| transport(url, e))?;
        let body = response.text().await.map_err(|e| transport(url, e))?;
        Ok(Self::extract_page_links(&body))
    }

    /// Fetch a structured feed
    pub async fn crawl_feed(&self, url: &str) -> std::result::Result<Vec<String>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| transport(url, e))?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| transport(url, e))?;
        Self::parse_feed(url, content_type.as_deref(), &body)
    }

    /// Hrefs of every anchor pointing at a share link
    pub fn extract_page_links(html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&SHARE_LINK_SELECTOR)
            .filter_map(|element| element.value().attr("href"))
            .map(str::to_string)
            .collect()
    }

    /// Read a feed body according to its declared content type.
    ///
    /// JSON bodies must be an array of strings; the elements are taken as-is.
    /// Anything else is treated as text, base64-unwrapped when it carries no
    /// plain links.
    pub fn parse_feed(
        url: &str,
        content_type: Option<&str>,
        body: &str,
    ) -> std::result::Result<Vec<String>, FetchError> {
        if content_type.is_some_and(|ct| ct.contains("application/json")) {
            return serde_json::from_str(body).map_err(|source| FetchError::Json {
                url: url.to_string(),
                source,
            });
        }

        let links = LinkParser::extract_links(body);
        if !links.is_empty() || Protocol::mentioned_in(body) {
            return Ok(links);
        }

        Ok(LinkParser::decode_subscription(body)
            .map(|decoded| LinkParser::extract_links(&decoded))
            .unwrap_or_default())
    }
}

#[async_trait]
impl LinkSource for ProxyCrawler {
    async fn fetch(&self, source: &Source) -> std::result::Result<Vec<String>, FetchError> {
        match source.kind {
            SourceKind::Page => self.crawl_page(&source.url).await,
            SourceKind::Feed => self.crawl_feed(&source.url).await,
        }
    }
}

fn transport(url: &str, source: reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        source,
    }
}

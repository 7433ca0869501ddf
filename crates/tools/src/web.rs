//! Web research collaborator seams.
//!
//! The crawler and browser internals live outside the core; the research
//! loop consumes three interfaces: [`SearchProvider`] for query → candidate
//! expansion, [`PageFetcher`] for candidate → content (with blocker
//! classification), and [`BrowserPool`] bounding concurrent sessions.
//! `web.search` / `web.fetch` wrap the first two for router dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use regex::RegexSet;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use pandora_domain::error::{Error, Result};
use pandora_domain::plan::SourceType;
use pandora_domain::research::{BlockerType, Candidate};

use crate::{Tool, ToolCtx};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborator traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>>;
}

/// The result of fetching one candidate page.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Page {
        content: String,
        bytes: usize,
    },
    Blocked {
        blocker_type: BlockerType,
        screenshot_path: Option<String>,
        cdp_url: Option<String>,
    },
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page. Blockers are classified into the outcome, not errors;
    /// `Err` is reserved for transport failures.
    async fn fetch(&self, url: &str) -> Result<FetchOutcome>;
}

/// Bounds concurrent browser sessions: one per active research candidate.
pub struct BrowserPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl BrowserPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("browser pool closed".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blocker classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct BlockerMarkers {
    set: RegexSet,
    kinds: Vec<BlockerType>,
}

fn blocker_markers() -> &'static BlockerMarkers {
    use std::sync::OnceLock;
    static MARKERS: OnceLock<BlockerMarkers> = OnceLock::new();
    MARKERS.get_or_init(|| {
        let patterns_and_kinds = [
            (r"(?i)g-recaptcha|www\.google\.com/recaptcha", BlockerType::CaptchaRecaptcha),
            (r"(?i)hcaptcha\.com|h-captcha", BlockerType::CaptchaHcaptcha),
            (
                r"(?i)cf-chl|challenge-platform|checking your browser|cloudflare",
                BlockerType::CaptchaCloudflare,
            ),
            (r"(?i)captcha", BlockerType::CaptchaGeneric),
            (
                r"(?i)please (log|sign) in|login required|sign in to continue",
                BlockerType::LoginRequired,
            ),
            (
                r"(?i)are you a robot|unusual traffic|automated requests|bot detected",
                BlockerType::BotDetection,
            ),
        ];
        let set = RegexSet::new(patterns_and_kinds.iter().map(|(p, _)| *p))
            .unwrap_or_else(|e| panic!("invalid blocker marker pattern: {e}"));
        BlockerMarkers {
            set,
            kinds: patterns_and_kinds.iter().map(|(_, k)| *k).collect(),
        }
    })
}

/// Classify an HTTP response into a blocker, if any. Marker order matters:
/// the most specific CAPTCHA vendors are checked before the generic word.
pub fn classify_blocker(status: u16, body: &str) -> Option<BlockerType> {
    if status == 429 {
        return Some(BlockerType::RateLimit);
    }
    let markers = blocker_markers();
    let matches = markers.set.matches(body);
    if let Some(first) = matches.iter().next() {
        return Some(markers.kinds[first]);
    }
    if status == 403 || status == 401 {
        return Some(BlockerType::BotDetection);
    }
    if (400..600).contains(&status) {
        return Some(BlockerType::UnknownBlocker);
    }
    None
}

/// Guess a source type from the host for evidence attribution.
pub fn classify_source(url: &str) -> SourceType {
    let host = url
        .split("//")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_lowercase();
    const RETAILERS: [&str; 5] = ["amazon.", "bestbuy.", "walmart.", "target.", "newegg."];
    const REFERENCE: [&str; 3] = ["wikipedia.org", "britannica.com", "nist.gov"];
    if RETAILERS.iter().any(|r| host.contains(r)) {
        SourceType::Retailer
    } else if REFERENCE.iter().any(|r| host.contains(r)) {
        SourceType::Reference
    } else if host.contains("blog") {
        SourceType::Blog
    } else if host.contains("forum") || host.contains("reddit.") {
        SourceType::Forum
    } else {
        SourceType::Unknown
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP fetcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Plain-HTTP fetcher with marker-based blocker classification. Extraction
/// stays naive here; a browser-backed fetcher can be swapped in behind the
/// same trait.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_content_bytes: usize,
}

impl HttpFetcher {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("pandora-research/0.1")
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            max_content_bytes: 256 * 1024,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if let Some(blocker_type) = classify_blocker(status, &body) {
            return Ok(FetchOutcome::Blocked {
                blocker_type,
                screenshot_path: None,
                cdp_url: None,
            });
        }

        let bytes = body.len();
        let mut content = body;
        if content.len() > self.max_content_bytes {
            content.truncate(self.max_content_bytes);
        }
        Ok(FetchOutcome::Page { content, bytes })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// SERP-backed search provider: `GET {endpoint}?q=<query>&limit=<n>`
/// returning `{"results": [{"url", "title", "snippet"?}]}`.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSearchProvider {
    pub fn new(endpoint: String, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let payload: serde_json::Value = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let results = payload
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(results
            .iter()
            .filter_map(|r| {
                let url = r.get("url")?.as_str()?.to_string();
                Some(Candidate {
                    source_type: classify_source(&url),
                    title: r
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or(&url)
                        .to_string(),
                    snippet: r.get("snippet").and_then(Value::as_str).map(String::from),
                    url,
                })
            })
            .take(limit)
            .collect())
    }
}

/// Placeholder provider for deployments without a SERP endpoint: every
/// search fails with a clear configuration error.
pub struct UnconfiguredSearch;

#[async_trait]
impl SearchProvider for UnconfiguredSearch {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Candidate>> {
        Err(Error::Config(
            "no search provider configured; set [research] search_endpoint".into(),
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router-facing tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SearchTool {
    provider: Arc<dyn SearchProvider>,
}

impl SearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "web.search"
    }

    fn description(&self) -> &str {
        "Search the web and return candidate result URLs."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "limit": { "type": "integer", "description": "Max results (default 8)" }
            },
            "required": ["query"]
        })
    }

    async fn run(&self, args: Value, _ctx: &ToolCtx) -> std::result::Result<Value, String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or("missing 'query'")?;
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(8) as usize;

        let candidates = self
            .provider
            .search(query, limit)
            .await
            .map_err(|e| e.to_string())?;
        let count = candidates.len();
        Ok(serde_json::json!({
            "query": query,
            "candidates": candidates,
            "count": count,
        }))
    }
}

pub struct FetchTool {
    fetcher: Arc<dyn PageFetcher>,
}

impl FetchTool {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "web.fetch"
    }

    fn description(&self) -> &str {
        "Fetch a page. Returns extracted content, or a blocker classification."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL to fetch" }
            },
            "required": ["url"]
        })
    }

    async fn run(&self, args: Value, _ctx: &ToolCtx) -> std::result::Result<Value, String> {
        let url = args.get("url").and_then(Value::as_str).ok_or("missing 'url'")?;
        match self.fetcher.fetch(url).await.map_err(|e| e.to_string())? {
            FetchOutcome::Page { content, bytes } => Ok(serde_json::json!({
                "url": url,
                "status": "ok",
                "content": content,
                "bytes": bytes,
            })),
            FetchOutcome::Blocked {
                blocker_type,
                screenshot_path,
                cdp_url,
            } => Ok(serde_json::json!({
                "url": url,
                "status": "blocked",
                "blocker_type": blocker_type,
                "screenshot_path": screenshot_path,
                "cdp_url": cdp_url,
            })),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

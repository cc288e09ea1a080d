//! Web tools: search (Brave) and fetch.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{required_str, Schema, Tool};
use crate::utils::truncate_chars;

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; pocketbot/0.1)";
const DEFAULT_FETCH_CHARS: usize = 50_000;

static SCRIPT_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap()
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Strip HTML down to readable text
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(html, "");
    let text = TAGS.replace_all(&text, "\n");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let text = SPACES.replace_all(&text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn looks_like_html(body: &str) -> bool {
    let head = truncate_chars(body.trim_start(), 256).to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

/// Only http(s) URLs with a host are fetched
fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid URL: {}", raw))?;
    match url.scheme() {
        "http" | "https" => {}
        other => bail!("unsupported URL scheme '{}', only http/https allowed", other),
    }
    if url.host_str().is_none() {
        bail!("URL has no host: {}", raw);
    }
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: Option<String>,
}

/// Search the web via the Brave Search API
pub struct WebSearchTool {
    client: Client,
    api_key: Option<String>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, max_results: usize) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_key: api_key.filter(|k| !k.is_empty()),
            max_results: max_results.clamp(1, 10),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs, and snippets."
    }

    fn parameters(&self) -> Schema {
        Schema::object()
            .required_property("query", Schema::string().describe("Search query"))
            .property(
                "count",
                Schema::integer().min(1.0).max(10.0).describe("Results (1-10)"),
            )
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String> {
        let Some(api_key) = &self.api_key else {
            return Ok("Error: BRAVE_API_KEY not configured".to_string());
        };
        let query = required_str(&args, "query")?;
        let count = args
            .get("count")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(self.max_results)
            .clamp(1, 10);

        debug!("web_search: {} (count={})", query, count);
        let response = self
            .client
            .get(BRAVE_SEARCH_URL)
            .query(&[("q", query), ("count", &count.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Brave API error {}: {}", status, text);
        }

        let body: BraveResponse = response.json().await?;
        let results: Vec<BraveResult> = body
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(count)
            .collect();

        if results.is_empty() {
            return Ok(format!("No results for: {}", query));
        }

        let mut lines = vec![format!("Results for: {}\n", query)];
        for (i, item) in results.iter().enumerate() {
            lines.push(format!("{}. {}\n   {}", i + 1, item.title, item.url));
            if let Some(desc) = item.description.as_deref().filter(|d| !d.is_empty()) {
                lines.push(format!("   {}", desc));
            }
        }
        Ok(lines.join("\n"))
    }
}

/// Fetch a URL and extract readable content
pub struct WebFetchTool {
    client: Client,
    max_chars: usize,
}

impl WebFetchTool {
    pub fn new(max_chars: usize) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .redirect(reqwest::redirect::Policy::limited(5))
                .build()
                .unwrap_or_default(),
            max_chars,
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_CHARS)
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and extract readable text content."
    }

    fn parameters(&self) -> Schema {
        Schema::object()
            .required_property("url", Schema::string().describe("URL to fetch"))
            .property("max_chars", Schema::integer().min(100.0))
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String> {
        let raw = required_str(&args, "url")?;
        let url = match validate_url(raw) {
            Ok(url) => url,
            Err(e) => {
                return Ok(json!({"error": format!("URL validation failed: {}", e), "url": raw})
                    .to_string())
            }
        };
        let max_chars = args
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(self.max_chars);

        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let body = response.text().await?;

        let (extractor, text) = if content_type.contains("application/json") {
            let pretty = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| serde_json::to_string_pretty(&v).ok())
                .unwrap_or(body);
            ("json", pretty)
        } else if content_type.contains("text/html") || looks_like_html(&body) {
            ("html", html_to_text(&body))
        } else {
            ("raw", body)
        };

        let length = text.chars().count();
        let truncated = length > max_chars;
        let text = if truncated {
            truncate_chars(&text, max_chars).to_string()
        } else {
            text
        };

        Ok(json!({
            "url": raw,
            "finalUrl": final_url,
            "status": status,
            "extractor": extractor,
            "truncated": truncated,
            "length": text.chars().count(),
            "text": text,
        })
        .to_string())
    }
}

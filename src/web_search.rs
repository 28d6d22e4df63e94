//! DuckDuckGo search tiers for the web fallback.
//!
//! | Tier | Endpoint | Parsing |
//! |------|----------|---------|
//! | [`InstantAnswerTier`] | `api.duckduckgo.com` JSON | abstract + related topics |
//! | [`HtmlSearchTier`] | `html.duckduckgo.com` results page | regex scrape, relevance-filtered |
//!
//! Both are composed into a [`TieredWebSearch`] by [`create_provider`].

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rag_retrieval_core::error::ProviderError;
use rag_retrieval_core::models::WebResult;
use rag_retrieval_core::web::{
    DisabledWebSearch, RelevanceFilter, SearchTier, TieredWebSearch, WebSearchProvider,
};

use crate::config::WebSearchConfig;

pub const INSTANT_ANSWER_SOURCE: &str = "DuckDuckGo Instant Answer";
pub const RELATED_TOPICS_SOURCE: &str = "DuckDuckGo Related Topics";
pub const SCRAPED_SOURCE: &str = "Web Search";

fn transport(tier: &'static str, e: impl std::fmt::Display) -> ProviderError {
    ProviderError::Transport {
        tier,
        message: e.to_string(),
    }
}

fn parse_err(tier: &'static str, e: impl std::fmt::Display) -> ProviderError {
    ProviderError::Parse {
        tier,
        message: e.to_string(),
    }
}

// ============ Tier 1: instant answer ============

pub struct InstantAnswerTier {
    client: reqwest::Client,
    url: String,
}

impl InstantAnswerTier {
    const NAME: &'static str = "instant answer";

    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl SearchTier for InstantAnswerTier {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn fetch(&self, query: &str, k: usize) -> Result<Vec<WebResult>, ProviderError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| transport(Self::NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport(Self::NAME, format!("HTTP {}", status)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| parse_err(Self::NAME, e))?;
        Ok(parse_instant_answer(&json, query, k))
    }
}

/// Abstract first (if any), then up to `k - 1` related topics with text.
pub fn parse_instant_answer(json: &serde_json::Value, query: &str, k: usize) -> Vec<WebResult> {
    let str_field = |v: &serde_json::Value, key: &str| -> String {
        v.get(key)
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let mut results = Vec::new();

    let abstract_text = str_field(json, "Abstract");
    if !abstract_text.is_empty() {
        let heading = str_field(json, "Heading");
        results.push(WebResult {
            title: if heading.is_empty() {
                query.to_string()
            } else {
                heading
            },
            content: abstract_text,
            url: str_field(json, "AbstractURL"),
            source: INSTANT_ANSWER_SOURCE.to_string(),
        });
    }

    let topics = json
        .get("RelatedTopics")
        .and_then(|t| t.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    for topic in topics.iter().take(k.saturating_sub(1)) {
        let Some(text) = topic.get("Text").and_then(|t| t.as_str()) else {
            continue;
        };
        let first_url = str_field(topic, "FirstURL");
        let title = first_url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .replace('_', " ");
        results.push(WebResult {
            title,
            content: text.to_string(),
            url: first_url,
            source: RELATED_TOPICS_SOURCE.to_string(),
        });
    }

    results.truncate(k);
    results
}

// ============ Tier 2: scraped results page ============

pub struct HtmlSearchTier {
    client: reqwest::Client,
    url: String,
    query_suffix: String,
    filter: RelevanceFilter,
}

impl HtmlSearchTier {
    const NAME: &'static str = "html search";

    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        query_suffix: impl Into<String>,
        filter: RelevanceFilter,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            query_suffix: query_suffix.into(),
            filter,
        }
    }
}

#[async_trait]
impl SearchTier for HtmlSearchTier {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn fetch(&self, query: &str, k: usize) -> Result<Vec<WebResult>, ProviderError> {
        let search_query = format!("{} {}", query, self.query_suffix);
        let response = self
            .client
            .get(&self.url)
            .query(&[("q", search_query.trim())])
            .send()
            .await
            .map_err(|e| transport(Self::NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport(Self::NAME, format!("HTTP {}", status)));
        }

        let html = response.text().await.map_err(|e| parse_err(Self::NAME, e))?;
        Ok(parse_results_page(&html, k, &self.filter))
    }
}

struct PagePatterns {
    title: Regex,
    snippet: Regex,
    tag: Regex,
}

static PAGE_PATTERNS: OnceLock<PagePatterns> = OnceLock::new();

fn page_patterns() -> &'static PagePatterns {
    PAGE_PATTERNS.get_or_init(|| PagePatterns {
        title: Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)
            .expect("result title regex must compile"),
        snippet: Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#)
            .expect("result snippet regex must compile"),
        tag: Regex::new(r"<[^>]+>").expect("tag regex must compile"),
    })
}

fn clean_text(fragment: &str) -> String {
    let stripped = page_patterns().tag.replace_all(fragment, "");
    stripped
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve DuckDuckGo's `/l/?uddg=<target>` redirect links to the target.
fn resolve_link(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, target)| target.into_owned())
        })
        .unwrap_or(absolute)
}

/// Extract `(title, url, snippet)` triples from a results page, keep the
/// relevant ones, and return at most `k`.
pub fn parse_results_page(html: &str, k: usize, filter: &RelevanceFilter) -> Vec<WebResult> {
    let patterns = page_patterns();
    let titles: Vec<_> = patterns.title.captures_iter(html).collect();

    let mut results = Vec::new();
    for (i, caps) in titles.iter().enumerate() {
        let (Some(whole), Some(href), Some(title_html)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let block_end = titles
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(html.len(), |m| m.start());
        let block = &html[whole.end()..block_end];

        let title = clean_text(title_html.as_str());
        let snippet = patterns
            .snippet
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| clean_text(m.as_str()))
            .unwrap_or_default();

        if title.is_empty() || !filter.matches(&title, &snippet) {
            continue;
        }
        results.push(WebResult {
            title,
            content: snippet,
            url: resolve_link(href.as_str()),
            source: SCRAPED_SOURCE.to_string(),
        });
        if results.len() >= k {
            break;
        }
    }
    results
}

/// Build the provider selected by `[web_search].provider`.
pub fn create_provider(config: &WebSearchConfig) -> Result<Arc<dyn WebSearchProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledWebSearch)),
        "duckduckgo" => {
            let client = reqwest::Client::builder()
                .user_agent(config.user_agent.clone())
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?;
            let tiers: Vec<Box<dyn SearchTier>> = vec![
                Box::new(InstantAnswerTier::new(
                    client.clone(),
                    config.instant_answer_url.clone(),
                )),
                Box::new(HtmlSearchTier::new(
                    client,
                    config.html_search_url.clone(),
                    config.query_suffix.clone(),
                    RelevanceFilter::new(&config.relevance_terms),
                )),
            ];
            Ok(Arc::new(TieredWebSearch::new(tiers)))
        }
        other => anyhow::bail!("Unknown web_search provider: {}", other),
    }
}

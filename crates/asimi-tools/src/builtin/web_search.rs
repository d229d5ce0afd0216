// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{optional_u64, require_str, Tool, ToolError};

const DEFAULT_RESULTS: usize = 5;
const MAX_RESULTS: usize = 10;

/// Web search against the DuckDuckGo HTML endpoint; no API key required.
#[derive(Default)]
pub struct WebSearchTool {
    /// Endpoint override for tests.
    pub base_url: Option<String>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. max_results: 1-10 (default 5).\n\
         Include the current year in queries for recent info.\n\
         Cite sources after answering:\n\
         Sources:\n\
         - [Title](URL)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results to return (default 5, max 10)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let query = require_str(&args, "query")?;
        let max_results = optional_u64(&args, "max_results")
            .unwrap_or(DEFAULT_RESULTS as u64)
            .clamp(1, MAX_RESULTS as u64) as usize;

        debug!(query = %query, max_results, "web_search tool");

        let base = self
            .base_url
            .as_deref()
            .unwrap_or("https://html.duckduckgo.com/html/");
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("asimi-agent/0.9")
            .build()
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let resp = client
            .get(base)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("search error: {e}")))?;
        if !resp.status().is_success() {
            return Err(ToolError::Execution(format!(
                "search endpoint returned status {}",
                resp.status()
            )));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| ToolError::Execution(format!("search error: {e}")))?;

        let results = parse_results(&html, max_results);
        if results.is_empty() {
            return Ok("(no results)".into());
        }
        Ok(results
            .iter()
            .enumerate()
            .map(|(i, (title, url, snippet))| {
                format!("{}. **{title}**\n   {url}\n   {snippet}", i + 1)
            })
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

/// Extract (title, url, snippet) triples from the DuckDuckGo HTML results
/// page.  The markup is stable enough for a pair of regexes; entities are
/// decoded and residual tags stripped.
fn parse_results(html: &str, max: usize) -> Vec<(String, String, String)> {
    let link_re = Regex::new(r#"<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)
        .expect("static regex");
    let snippet_re =
        Regex::new(r#"<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#).expect("static regex");

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .map(|c| clean_html(&c[1]))
        .collect();

    link_re
        .captures_iter(html)
        .take(max)
        .enumerate()
        .map(|(i, c)| {
            let url = decode_entities(&c[1]);
            let title = clean_html(&c[2]);
            let snippet = snippets.get(i).cloned().unwrap_or_default();
            (title, url, snippet)
        })
        .collect()
}

/// Strip tags, then decode entities.
fn clean_html(s: &str) -> String {
    let tag_re = Regex::new(r"<[^>]+>").expect("static regex");
    decode_entities(tag_re.replace_all(s, "").trim())
}

/// Decode the HTML entities that actually occur in search result markup.
fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

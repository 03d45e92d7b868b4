//! Web-search prompt augmentation.
//!
//! When enabled, a turn's prompt is rewritten around retrieved context: the
//! first search result's page is fetched and reduced to readable text, the
//! remaining results contribute their snippets, and the combined context is
//! capped before being folded into an instruction prompt. Every failure
//! mode degrades to the original prompt — augmentation never fails a turn.

use crate::error::SearchError;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

const SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const RESULT_COUNT: usize = 5;

/// Character budget for retrieved context, respecting the backend's
/// input-size limit.
pub const CONTEXT_BUDGET: usize = 10_000;

/// Search client plus page extraction.
pub struct SearchAugmentor {
    http: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchHit {
    url: String,
    #[serde(default)]
    description: String,
}

impl SearchAugmentor {
    pub fn new(http: reqwest::Client, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }

    /// Rewrite `prompt` around retrieved web context. Infallible: any
    /// failure logs and returns the prompt unchanged.
    pub async fn augment(&self, prompt: &str) -> String {
        match self.try_augment(prompt).await {
            Ok(augmented) => augmented,
            Err(error) => {
                tracing::warn!(%error, "search augmentation skipped");
                prompt.to_string()
            }
        }
    }

    async fn try_augment(&self, prompt: &str) -> Result<String, SearchError> {
        let api_key = self.api_key.as_deref().ok_or(SearchError::MissingKey)?;
        let hits = self.search(api_key, prompt).await?;
        let first = hits.first().ok_or(SearchError::EmptyResults)?;

        // The top result contributes its full page; if the fetch fails we
        // still have its snippet.
        let mut context = match self.fetch_page_text(&first.url).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => first.description.clone(),
            Err(error) => {
                tracing::debug!(%error, url = %first.url, "page fetch failed, using snippet");
                first.description.clone()
            }
        };

        for hit in hits.iter().skip(1) {
            if !hit.description.is_empty() {
                context.push('\n');
                context.push_str(&hit.description);
            }
        }

        let context = truncate_on_char_boundary(&context, CONTEXT_BUDGET);
        Ok(compose_prompt(prompt, context))
    }

    async fn search(&self, api_key: &str, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .http
            .get(SEARCH_URL)
            .header("X-Subscription-Token", api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("q", query), ("count", &RESULT_COUNT.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::Api {
                status: response.status().as_u16(),
            });
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.web.map(|w| w.results).unwrap_or_default())
    }

    async fn fetch_page_text(&self, url: &str) -> Result<String, SearchError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SearchError::Api {
                status: response.status().as_u16(),
            });
        }
        let html = response.text().await?;
        Ok(extract_readable_text(&html))
    }
}

/// Reduce an HTML page to its readable text: script/style bodies and anchor
/// text dropped, remaining markup stripped, entities decoded, whitespace
/// collapsed.
fn extract_readable_text(html: &str) -> String {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();

    let noise = NOISE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript|head)\b[^>]*>.*?</(script|style|noscript|head)>")
            .expect("static regex")
    });
    let anchor =
        ANCHOR.get_or_init(|| Regex::new(r"(?is)<a\b[^>]*>.*?</a>").expect("static regex"));
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("static regex"));
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    let text = noise.replace_all(html, " ");
    let text = anchor.replace_all(&text, " ");
    let text = tag.replace_all(&text, " ");
    let text = decode_entities(&text);
    space.replace_all(&text, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Truncate to at most `max` bytes without splitting a character.
fn truncate_on_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Fold retrieved context into an instruction the backend answers from.
fn compose_prompt(question: &str, context: &str) -> String {
    format!(
        "Using the following web search context, answer the question at the end. \
         If the context is not relevant, answer from your own knowledge.\n\n\
         Context:\n{context}\n\nQuestion: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_extract_readable_text_strips_markup() {
        let html = indoc! {r#"
            <html><head><title>Ignored</title></head>
            <body>
              <script>var tracked = true;</script>
              <style>p { color: red; }</style>
              <h1>Rust 1.99 released</h1>
              <p>The release brings &amp; improves <b>many</b> things.</p>
              <a href="/subscribe">Subscribe to our newsletter</a>
            </body></html>
        "#};
        let text = extract_readable_text(html);
        assert_eq!(text, "Rust 1.99 released The release brings & improves many things.");
    }

    #[test]
    fn test_extract_readable_text_drops_anchor_text() {
        let text = extract_readable_text(r#"before <a href="x">click here</a> after"#);
        assert_eq!(text, "before after");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let truncated = truncate_on_char_boundary(text, 2);
        assert_eq!(truncated, "h");
        assert!(truncated.len() <= 2);
        assert_eq!(truncate_on_char_boundary("short", 100), "short");
    }

    #[test]
    fn test_compose_prompt_carries_question_and_context() {
        let prompt = compose_prompt("what is rust?", "Rust is a systems language.");
        assert!(prompt.contains("Context:\nRust is a systems language."));
        assert!(prompt.ends_with("Question: what is rust?"));
    }

    #[tokio::test]
    async fn test_augment_without_key_returns_prompt_unchanged() {
        let augmentor = SearchAugmentor::new(reqwest::Client::new(), None);
        assert_eq!(augmentor.augment("original prompt").await, "original prompt");
    }
}

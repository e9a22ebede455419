//! Article loading for chunkflow.
//!
//! [`ContentLoader`] is the seam the pipeline core depends on;
//! [`HttpLoader`] is the production implementation: fetch the page,
//! reduce it to clean body text, and hand back an [`Article`].

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use chunkflow_shared::{Article, ArticleRef, ChunkflowError, Result};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("chunkflow/", env!("CARGO_PKG_VERSION"));

/// Inline citation markers like `[12]` left behind by reference-heavy sources.
static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+\]").expect("valid citation regex"));

/// Fetches and cleans the content behind an [`ArticleRef`].
#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Fetch the article body. Fails with [`ChunkflowError::Fetch`].
    async fn fetch(&self, article_ref: &ArticleRef) -> Result<Article>;
}

/// HTTP loader: GET the URL, extract the main content region, strip markup.
pub struct HttpLoader {
    client: reqwest::Client,
}

impl HttpLoader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChunkflowError::Fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ContentLoader for HttpLoader {
    async fn fetch(&self, article_ref: &ArticleRef) -> Result<Article> {
        let url = &article_ref.url;
        debug!(%url, "fetching article");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ChunkflowError::Fetch(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChunkflowError::Fetch(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChunkflowError::Fetch(format!("{url}: body read failed: {e}")))?;

        let content = clean_html(&body);
        debug!(%url, content_len = content.len(), "article fetched");

        Ok(Article {
            article_ref: article_ref.clone(),
            content,
        })
    }
}

/// Reduce an HTML page to clean body text.
///
/// Prefers the `<main>` or `<article>` region when present, falls back to
/// `<body>`. Collapses runs of whitespace and strips `[n]` citation markers.
pub fn clean_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    let text = ["main", "article", "body"]
        .iter()
        .find_map(|region| {
            let selector = Selector::parse(region).ok()?;
            let el = doc.select(&selector).next()?;
            Some(el.text().collect::<Vec<_>>().join(" "))
        })
        .unwrap_or_default();

    clean_text(&text)
}

/// Normalize extracted text: strip citation markers, collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let stripped = CITATION_MARKER.replace_all(text, "");
    let mut out = String::with_capacity(stripped.len());
    let mut pending_break = false;

    for line in stripped.lines() {
        let line = line.trim();
        if line.is_empty() {
            pending_break = !out.is_empty();
            continue;
        }
        if pending_break {
            out.push('\n');
            pending_break = false;
        } else if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&line.split_whitespace().collect::<Vec<_>>().join(" "));
    }

    out
}

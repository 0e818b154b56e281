//! Help-center article crawler.
//!
//! Walks a help center the way a reader would: the landing page links to
//! category pages, and category pages link to articles. Every selector comes
//! from [`SourceConfig`], so the crawler carries no knowledge of any one
//! site's markup.
//!
//! # Records
//!
//! | Field | Value |
//! |-------|-------|
//! | key | Article URL, resolved and without fragment |
//! | `Title` | Text of `title_selector` (the page `<title>` by default) |
//! | `Text` | All `body_selector` matches, joined by newlines |
//! | `Category` | URL of the category page the article was found on |

use itertools::Itertools;
use rand::{Rng, rng};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{FetchTarget, Source};
use crate::config::SourceConfig;
use crate::error::{FetchError, HarvestError};
use crate::models::Record;
use crate::utils::truncate_for_log;

pub const TITLE: &str = "Title";
pub const TEXT: &str = "Text";
pub const CATEGORY: &str = "Category";

#[derive(Debug)]
pub struct HelpCenterSource {
    client: Client,
    base_url: Url,
    category_links: Selector,
    article_links: Selector,
    title: Selector,
    body: Selector,
    default_category: String,
    pause: Duration,
    jitter_ms: u64,
}

fn selector(css: &str) -> Result<Selector, HarvestError> {
    Selector::parse(css).map_err(|e| HarvestError::Config(format!("invalid selector {css:?}: {e}")))
}

impl HelpCenterSource {
    pub fn new(config: &SourceConfig) -> Result<Self, HarvestError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| HarvestError::Config(format!("invalid base_url {:?}: {e}", config.base_url)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| HarvestError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            category_links: selector(&config.category_link_selector)?,
            article_links: selector(&config.article_link_selector)?,
            title: selector(&config.title_selector)?,
            body: selector(&config.body_selector)?,
            default_category: config.default_category.clone(),
            pause: Duration::from_millis(config.pause_ms),
            jitter_ms: config.jitter_ms,
        })
    }

    async fn get_html(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    async fn polite_pause(&self) {
        let jitter: u64 = rng().random_range(0..=self.jitter_ms);
        sleep(self.pause + Duration::from_millis(jitter)).await;
    }
}

/// Collect unique absolute links matching `selector`, resolved against `page`.
pub fn extract_links(html: &str, page: &Url, selector: &Selector) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page.join(href).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url.to_string()
        })
        .unique()
        .collect()
}

/// Pull the title and body text out of an article page.
pub fn extract_article(html: &str, title: &Selector, body: &Selector) -> (String, String) {
    let document = Html::parse_document(html);
    let title_text = document
        .select(title)
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default();
    let body_text = document
        .select(body)
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .join("\n");
    (title_text.trim().to_string(), body_text.trim().to_string())
}

impl Source for HelpCenterSource {
    #[instrument(level = "info", skip_all, fields(base_url = %self.base_url))]
    async fn discover(&self) -> Result<Vec<FetchTarget>, HarvestError> {
        let landing = self
            .get_html(self.base_url.as_str())
            .await
            .map_err(|e| HarvestError::SourceUnavailable(format!("{}: {e}", self.base_url)))?;
        let categories = extract_links(&landing, &self.base_url, &self.category_links);
        info!(count = categories.len(), "Found category pages");

        let mut category_of: HashMap<String, String> = HashMap::new();
        let mut articles: Vec<String> = Vec::new();
        for (i, category) in categories.iter().enumerate() {
            if i > 0 {
                self.polite_pause().await;
            }
            let page = match Url::parse(category) {
                Ok(page) => page,
                Err(e) => {
                    warn!(%category, error = %e, "Unparseable category URL");
                    continue;
                }
            };
            match self.get_html(category).await {
                Ok(html) => {
                    let links = extract_links(&html, &page, &self.article_links);
                    debug!(%category, count = links.len(), "Indexed category");
                    for link in links {
                        if !category_of.contains_key(&link) {
                            category_of.insert(link.clone(), category.clone());
                            articles.push(link);
                        }
                    }
                }
                Err(e) => warn!(%category, error = %e, "Category page failed; skipping"),
            }
        }

        info!(count = articles.len(), "Discovered articles");
        Ok(articles
            .into_iter()
            .map(|url| {
                let category = category_of
                    .remove(&url)
                    .unwrap_or_else(|| self.default_category.clone());
                FetchTarget::new(url).carrying(CATEGORY, category)
            })
            .collect())
    }

    #[instrument(level = "debug", skip_all, fields(url = %target.key))]
    async fn fetch(&self, target: FetchTarget) -> Result<Record, FetchError> {
        let html = match self.get_html(&target.key).await {
            Ok(html) => html,
            Err(e) if e.is_timeout() => return Err(FetchError::new(target.key, "timed out")),
            Err(e) => return Err(FetchError::new(target.key, e)),
        };
        let (title, text) = extract_article(&html, &self.title, &self.body);
        debug!(
            bytes = text.len(),
            title = %truncate_for_log(&title, 80),
            "Parsed article"
        );

        let mut record = Record::new(target.key)
            .with_field(TITLE, title)
            .with_field(TEXT, text);
        for (name, value) in target.carried {
            record.set(name, value);
        }
        if record.get(CATEGORY).is_none() {
            record.set(CATEGORY, self.default_category.clone());
        }
        Ok(record)
    }
}

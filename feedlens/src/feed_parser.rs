//! The Parser external interface (spec §6): fetch a feed URL and decode it
//! into `ParsedFeed`/`ParsedItem`. Grounded on the teacher's
//! `ingestion::fetch_and_parse_feed` (retry-on-5xx/429, no retry on 4xx).

use crate::models::{ParsedFeed, ParsedItem};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

#[async_trait]
pub trait Parser: Send + Sync {
    async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed>;
}

pub struct FeedParser {
    client: reqwest::Client,
    timeout: Duration,
}

impl FeedParser {
    pub fn new(timeout_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("feedlens/0.1.0")
            .build()
            .expect("reqwest client");
        Self {
            client,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }
}

#[async_trait]
impl Parser for FeedParser {
    async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed> {
        const MAX_ATTEMPTS: u32 = 3;
        let mut last_err = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_fetch(url).await {
                Ok(feed) => return Ok(feed),
                Err(FetchOutcome::Permanent(e)) => return Err(e),
                Err(FetchOutcome::Transient(e)) => {
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        let backoff_secs = 2u64.pow(attempt.saturating_sub(1));
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("feed fetch failed with no recorded error")))
    }
}

enum FetchOutcome {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

impl FeedParser {
    async fn try_fetch(&self, url: &str) -> Result<ParsedFeed, FetchOutcome> {
        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchOutcome::Transient(e.into()))?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(FetchOutcome::Transient(anyhow::anyhow!(
                "feed server returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(FetchOutcome::Permanent(anyhow::anyhow!(
                "feed server returned {}",
                status
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchOutcome::Transient(e.into()))?;

        let parsed = feed_rs::parser::parse(&bytes[..])
            .context("parsing feed body")
            .map_err(FetchOutcome::Permanent)?;

        let mut items = Vec::with_capacity(parsed.entries.len());
        for entry in parsed.entries {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let guid = if !entry.id.is_empty() {
                entry.id.clone()
            } else {
                link.clone()
            };
            let title = entry.title.map(|t| t.content).unwrap_or_default();
            let description = entry.summary.map(|s| s.content).unwrap_or_default();
            let content = entry
                .content
                .and_then(|c| c.body)
                .unwrap_or_default();
            let author = entry
                .authors
                .first()
                .map(|a| a.name.clone())
                .unwrap_or_default();
            let published = entry
                .published
                .or(entry.updated)
                .unwrap_or_else(|| Utc::now());

            items.push(ParsedItem {
                guid,
                title,
                link,
                description,
                content,
                author,
                published,
            });
        }

        if items.is_empty() && parsed.title.is_none() {
            return Err(FetchOutcome::Permanent(anyhow::anyhow!(
                "feed body did not contain a recognizable feed"
            )));
        }

        Ok(ParsedFeed {
            title: parsed.title.map(|t| t.content).unwrap_or_default(),
            description: parsed.description.map(|d| d.content).unwrap_or_default(),
            items,
        })
    }
}

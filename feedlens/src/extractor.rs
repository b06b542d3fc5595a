//! The Extractor external interface (spec §6): fetch an article URL and pull
//! its readable body out of the surrounding page chrome. Grounded on the
//! teacher's `scraping::scrape_article_content` (readability + html2text).

use crate::models::Extraction;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Cursor;
use std::time::Duration;

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<Extraction>;
}

pub struct ArticleExtractor {
    client: reqwest::Client,
    timeout: Duration,
}

impl ArticleExtractor {
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
impl Extractor for ArticleExtractor {
    async fn extract(&self, url: &str) -> Result<Extraction> {
        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("fetching {}", url))?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.is_empty() && !content_type.contains("html") && !content_type.contains("xml") {
            anyhow::bail!("binary content ({}), not extractable", content_type);
        }

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("article server returned {}", status);
        }

        let bytes = resp.bytes().await.with_context(|| format!("reading body of {}", url))?;

        let parsed_url =
            url::Url::parse(url).with_context(|| format!("parsing article URL {}", url))?;

        let product = readability::extractor::extract(&mut Cursor::new(&bytes), &parsed_url)
            .map_err(|e| anyhow::anyhow!("binary content or unparsable markup: {}", e))?;

        let rich_content = product.content.clone();
        let content = match html2text::from_read(rich_content.as_bytes(), 80) {
            Ok(markdown) if !markdown.trim().is_empty() => markdown,
            Ok(_) => product.text.clone(),
            Err(e) => {
                tracing::warn!(url, error = %e, "html2text conversion failed, falling back to plain text");
                product.text.clone()
            }
        };

        Ok(Extraction {
            content,
            rich_content,
            title: product.title,
            date: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_readable_body_from_html() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"<html><head><title>A title</title></head>
            <body><article><h1>A title</h1><p>This is the real article body, long enough to survive readability's heuristics about paragraph length and density.</p></article></body></html>"#;
        let mock = server
            .mock("GET", "/article")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(body)
            .create_async()
            .await;

        let extractor = ArticleExtractor::new(5);
        let result = extractor
            .extract(&format!("{}/article", server.url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(result.content.contains("real article body"));
    }

    #[tokio::test]
    async fn rejects_binary_content_type() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/file.pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body(vec![0u8, 1, 2, 3])
            .create_async()
            .await;

        let extractor = ArticleExtractor::new(5);
        let result = extractor
            .extract(&format!("{}/file.pdf", server.url()))
            .await;

        mock.assert_async().await;
        assert!(result.is_err());
    }
}

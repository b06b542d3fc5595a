//! FeedProcessor (spec §4.2): fetches feeds, dedupes and persists new items,
//! then extracts + classifies them. Grounded on the teacher's worker loop in
//! `main.rs` and the chunked article handling in `processing.rs`, generalized
//! to the channel-based hand-off the spec requires.

use crate::classifier::{ArticleForClassification, ClassifyRequest, Classifier};
use crate::error::StoreError;
use crate::extractor::Extractor;
use crate::feed_parser::Parser;
use crate::models::{Classification, Extraction, Item};
use crate::retry::{retry_db_operation, RetryPolicy};
use crate::store::Store;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

const NORMALIZED_BINARY_ERROR: &str = "Binary content (PDF, image, or other non-HTML format)";

pub struct FeedProcessor {
    store: Store,
    parser: Arc<dyn Parser>,
    extractor: Arc<dyn Extractor>,
    classifier: Arc<dyn Classifier>,
    retry_policy: RetryPolicy,
    max_workers: usize,
}

impl FeedProcessor {
    pub fn new(
        store: Store,
        parser: Arc<dyn Parser>,
        extractor: Arc<dyn Extractor>,
        classifier: Arc<dyn Classifier>,
        retry_policy: RetryPolicy,
        max_workers: usize,
    ) -> Self {
        Self {
            store,
            parser,
            extractor,
            classifier,
            retry_policy,
            max_workers,
        }
    }

    /// Reads enabled feeds and runs `update_feed` on at most `max_workers`
    /// concurrently, pushing discovered items onto `process_tx`.
    pub async fn update_all_feeds(&self, process_tx: &mpsc::Sender<Item>, cancel: &CancellationToken) {
        let feeds = match self.store.get_feeds(true).await {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "failed to list feeds due for update");
                return;
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(feeds.len());

        for feed in feeds {
            let permit = semaphore.clone();
            let tx = process_tx.clone();
            let cancel = cancel.clone();
            let this = self.clone_refs();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                this.update_feed(feed, &tx, &cancel).await;
            }));
        }

        for h in handles {
            let _ = h.await;
        }
        tracing::info!("feed update sweep complete");
    }

    fn clone_refs(&self) -> Self {
        Self {
            store: self.store.clone(),
            parser: self.parser.clone(),
            extractor: self.extractor.clone(),
            classifier: self.classifier.clone(),
            retry_policy: self.retry_policy,
            max_workers: self.max_workers,
        }
    }

    pub async fn update_feed(
        &self,
        feed: crate::models::Feed,
        process_tx: &mpsc::Sender<Item>,
        cancel: &CancellationToken,
    ) {
        let parsed = match self.parser.fetch_and_parse(&feed.url).await {
            Ok(p) => p,
            Err(e) => {
                if let Err(store_err) = self.store.update_feed_error(feed.id, &e.to_string()).await {
                    tracing::error!(feed_id = feed.id, error = %store_err, "failed to record feed error");
                }
                return;
            }
        };

        for parsed_item in parsed.items {
            if cancel.is_cancelled() {
                return;
            }

            match self.store.item_exists(feed.id, &parsed_item.guid).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(feed_id = feed.id, error = %e, "item_exists check failed, skipping item");
                    continue;
                }
            }

            match self
                .store
                .item_exists_by_title_or_url(&parsed_item.title, &parsed_item.link)
                .await
            {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(feed_id = feed.id, error = %e, "cross-feed dedupe check failed, skipping item");
                    continue;
                }
            }

            let policy = self.retry_policy;
            let store = self.store.clone();
            let created = retry_db_operation(&policy, || {
                let store = store.clone();
                let parsed_item = parsed_item.clone();
                let feed_id = feed.id;
                async move { store.create_item(feed_id, &parsed_item).await }
            })
            .await;

            match created {
                Ok(item) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        send_result = process_tx.send(item) => {
                            if send_result.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(feed_id = feed.id, error = %e, "failed to create item after retries");
                }
            }
        }

        let next_fetch = Utc::now() + ChronoDuration::seconds(feed.fetch_interval_seconds);
        let policy = self.retry_policy;
        let store = self.store.clone();
        let feed_id = feed.id;
        let result = retry_db_operation(&policy, || {
            let store = store.clone();
            async move { store.update_feed_fetched(feed_id, next_fetch).await }
        })
        .await;
        if let Err(e) = result {
            tracing::error!(feed_id, error = %e, "failed to record successful fetch after retries");
        }
    }

    /// Reads from `items` and runs `process_item` on at most `max_workers`
    /// concurrently, returning once the channel closes and inflight work drains.
    pub async fn processing_worker(&self, mut items: mpsc::Receiver<Item>) {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::new();

        while let Some(item) = items.recv().await {
            let permit = semaphore.clone();
            let this = self.clone_refs();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                this.process_item(item).await;
            }));
        }

        for h in handles {
            let _ = h.await;
        }
    }

    pub async fn process_item(&self, item: Item) {
        let extraction = match self.extractor.extract(&item.link).await {
            Ok(e) => e,
            Err(e) => {
                let normalized = normalize_extraction_error(&e.to_string());
                if let Err(store_err) = self
                    .store
                    .update_item_extraction(item.id, &Err(normalized))
                    .await
                {
                    tracing::error!(item_id = item.id, error = %store_err, "failed to record extraction error");
                }
                return;
            }
        };

        let feedbacks = self
            .store
            .get_recent_feedback("", 50)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to gather feedback context, using empty");
                Vec::new()
            });
        let topics = self.store.get_topics().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to gather canonical topics, using empty");
            Vec::new()
        });
        let preference_summary = self
            .store
            .get_setting("preference_summary")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        let preferred_topics = self
            .store
            .get_setting_string_list("preferred_topics")
            .await
            .unwrap_or_default();
        let avoided_topics = self
            .store
            .get_setting_string_list("avoided_topics")
            .await
            .unwrap_or_default();

        let article = ArticleForClassification {
            guid: item.guid.clone(),
            title: item.title.clone(),
            description: item.description.clone(),
            content: extraction.content.clone(),
        };

        let classifications = match self
            .classifier
            .classify_items(ClassifyRequest {
                articles: vec![article],
                feedbacks,
                canonical_topics: topics,
                preference_summary,
                preferred_topics,
                avoided_topics,
            })
            .await
        {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => {
                tracing::warn!(item_id = item.id, "classifier returned no classification, item left unclassified");
                return;
            }
            Err(e) => {
                tracing::warn!(item_id = item.id, error = %e, "classifier call failed, item left unclassified");
                return;
            }
        };

        let classification = classifications
            .into_iter()
            .find(|c| c.guid == item.guid)
            .unwrap_or_else(|| classifications_fallback(&item.guid));

        self.finish_item(item.id, extraction, classification).await;
    }

    async fn finish_item(&self, item_id: i64, extraction: Extraction, classification: Classification) {
        let policy = self.retry_policy;
        let store = self.store.clone();
        let result = retry_db_operation(&policy, || {
            let store = store.clone();
            let extraction = extraction.clone();
            let classification = classification.clone();
            async move { store.update_item_processed(item_id, &extraction, &classification).await }
        })
        .await;
        if let Err(e) = result {
            tracing::error!(item_id, error = %e, "failed to persist processed item after retries");
        }
    }

    /// Admin entry point: runs one UpdateFeed cycle synchronously on a local
    /// channel, without touching the scheduler's shared `processCh`.
    pub async fn update_feed_now(&self, feed_id: i64) -> anyhow::Result<()> {
        let feed = self
            .store
            .get_feed(feed_id)
            .await
            .map_err(anyhow::Error::from)?
            .ok_or_else(|| anyhow::anyhow!("feed {} not found", feed_id))?;

        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let this = self.clone_refs();
        let handle = tokio::spawn(async move { this.update_feed(feed, &tx, &cancel).await });

        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        handle.await.ok();

        for item in items {
            self.process_item(item).await;
        }
        Ok(())
    }

    /// Admin entry point: synchronously runs one ProcessItem cycle.
    pub async fn extract_content_now(&self, item_id: i64) -> Result<(), StoreError> {
        let item = self.store.get_item(item_id).await?.ok_or(StoreError::NotFound)?;
        self.process_item(item).await;
        Ok(())
    }
}

impl Clone for FeedProcessor {
    fn clone(&self) -> Self {
        self.clone_refs()
    }
}

fn normalize_extraction_error(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    if lowered.contains("binary content") || lowered.contains("unsupported content type") {
        NORMALIZED_BINARY_ERROR.to_string()
    } else {
        raw.to_string()
    }
}

fn classifications_fallback(guid: &str) -> Classification {
    Classification {
        guid: guid.to_string(),
        score: 0.0,
        explanation: String::new(),
        topics: Vec::new(),
        summary: String::new(),
    }
}

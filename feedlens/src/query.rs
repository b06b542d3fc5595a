//! Query surface (spec §6, §9 supplement): read operations and the
//! user-facing writes (feed management, feedback, topic preferences),
//! exposed as a thin wrapper over the Store for both library consumers and
//! the CLI.

use crate::error::StoreError;
use crate::models::{ClassifiedItem, Feed, Feedback, ItemFilter, TopicStat};
use crate::scheduler::Scheduler;
use crate::store::Store;

pub struct Query {
    store: Store,
}

impl Query {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn classified_items(&self, filter: &ItemFilter) -> Result<(Vec<ClassifiedItem>, i64), StoreError> {
        let items = self.store.get_classified_items(filter).await?;
        let count = self.store.get_classified_items_count(filter).await?;
        Ok((items, count))
    }

    pub async fn search(&self, query: &str, filter: &ItemFilter) -> Result<(Vec<ClassifiedItem>, i64), StoreError> {
        let items = self.store.search_items(query, filter).await?;
        let count = self.store.get_search_items_count(query, filter).await?;
        Ok((items, count))
    }

    pub async fn topics(&self) -> Result<Vec<String>, StoreError> {
        self.store.get_topics().await
    }

    pub async fn topics_filtered(&self, min_score: f64) -> Result<Vec<String>, StoreError> {
        self.store.get_topics_filtered(min_score).await
    }

    pub async fn top_topics(&self, min_score: f64, limit: i64) -> Result<Vec<TopicStat>, StoreError> {
        self.store.get_top_topics_by_score(min_score, limit).await
    }

    pub async fn active_feed_names(&self, min_score: f64) -> Result<Vec<String>, StoreError> {
        self.store.get_active_feed_names(min_score).await
    }

    pub async fn list_feeds(&self, enabled_only: bool) -> Result<Vec<Feed>, StoreError> {
        self.store.get_feeds(enabled_only).await
    }

    pub async fn add_feed(&self, url: &str, title: &str, fetch_interval_seconds: i64) -> Result<Feed, StoreError> {
        self.store.create_feed(url, title, fetch_interval_seconds).await
    }

    pub async fn delete_feed(&self, id: i64) -> Result<(), StoreError> {
        self.store.delete_feed(id).await
    }

    pub async fn set_feed_enabled(&self, id: i64, enabled: bool) -> Result<(), StoreError> {
        self.store.update_feed_status(id, enabled).await
    }

    pub async fn update_feed(&self, id: i64, title: &str, fetch_interval_seconds: i64) -> Result<(), StoreError> {
        self.store.update_feed(id, title, fetch_interval_seconds).await
    }

    /// Records feedback and, if wired to a running scheduler, triggers a
    /// debounced preference-summary recompute.
    pub async fn give_feedback(
        &self,
        item_id: i64,
        feedback: Feedback,
        like_delta: f64,
        dislike_delta: f64,
        scheduler: Option<&Scheduler>,
    ) -> Result<(), StoreError> {
        self.store
            .update_item_feedback(item_id, feedback, like_delta, dislike_delta)
            .await?;
        if let Some(scheduler) = scheduler {
            scheduler.trigger_preference_update();
        }
        Ok(())
    }

    pub async fn set_preferred_topics(&self, topics: &[String]) -> Result<(), StoreError> {
        let json = serde_json::to_string(topics).map_err(|e| StoreError::Other(e.into()))?;
        self.store.set_setting("preferred_topics", &json).await
    }

    pub async fn set_avoided_topics(&self, topics: &[String]) -> Result<(), StoreError> {
        let json = serde_json::to_string(topics).map_err(|e| StoreError::Other(e.into()))?;
        self.store.set_setting("avoided_topics", &json).await
    }
}

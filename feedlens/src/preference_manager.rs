//! PreferenceManager (spec §4.3): keeps a running natural-language summary of
//! the reader's preferences, refreshed in batches off the feedback stream.
//! Grounded on the teacher's `personalize_worker` debounce-by-channel shape,
//! generalized from per-user personalization to a single running summary.

use crate::classifier::Classifier;
use crate::retry::{retry_db_operation, RetryPolicy};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEBOUNCE: Duration = Duration::from_secs(5 * 60);

pub struct PreferenceManager {
    store: Store,
    classifier: Arc<dyn Classifier>,
    retry_policy: RetryPolicy,
    threshold: i64,
}

impl PreferenceManager {
    pub fn new(store: Store, classifier: Arc<dyn Classifier>, retry_policy: RetryPolicy, threshold: i64) -> Self {
        Self {
            store,
            classifier,
            retry_policy,
            threshold,
        }
    }

    /// Spec §8 property 9: no classifier call when `currentCount - lastCount < threshold`.
    pub async fn update_preference_summary(&self) -> anyhow::Result<()> {
        let feedbacks = self.store.get_recent_feedback("", 50).await?;
        if feedbacks.is_empty() {
            return Ok(());
        }

        let current_summary = self.store.get_setting("preference_summary").await?;
        let current_count = self.store.get_feedback_count().await?;

        let new_summary = match current_summary {
            None => {
                let summary = self.classifier.generate_preference_summary(&feedbacks).await?;
                self.persist(&summary, current_count).await?;
                return Ok(());
            }
            Some(summary) => summary,
        };

        let last_count: i64 = self
            .store
            .get_setting("last_summary_feedback_count")
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        if current_count - last_count < self.threshold {
            return Ok(());
        }

        let updated = self
            .classifier
            .update_preference_summary(&new_summary, &feedbacks)
            .await?;
        self.persist(&updated, current_count).await?;
        Ok(())
    }

    async fn persist(&self, summary: &str, feedback_count: i64) -> anyhow::Result<()> {
        let policy = self.retry_policy;
        let store = self.store.clone();
        let summary = summary.to_string();
        retry_db_operation(&policy, || {
            let store = store.clone();
            let summary = summary.clone();
            async move { store.set_setting("preference_summary", &summary).await }
        })
        .await?;

        retry_db_operation(&policy, || {
            let store = store.clone();
            let count_str = feedback_count.to_string();
            async move { store.set_setting("last_summary_feedback_count", &count_str).await }
        })
        .await?;
        Ok(())
    }

    /// Single-consumer debouncer: resets a 5-minute timer on every signal and
    /// runs `update_preference_summary` once it fires. Exits on cancellation.
    pub async fn run(&self, mut update_rx: mpsc::Receiver<()>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                signal = update_rx.recv() => {
                    if signal.is_none() {
                        return;
                    }
                }
            }

            // Debounce: each fresh signal within the window restarts the wait.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(DEBOUNCE) => {
                        if let Err(e) = self.update_preference_summary().await {
                            tracing::warn!(error = %e, "preference summary update failed");
                        }
                        break;
                    }
                    signal = update_rx.recv() => {
                        if signal.is_none() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Non-blocking send on the size-1 trigger channel: coalesces bursts into one
/// pending signal (spec §4.3).
pub fn trigger_preference_update(tx: &mpsc::Sender<()>) {
    let _ = tx.try_send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, FeedbackExample};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubClassifier {
        calls: AtomicUsize,
        summary: Mutex<String>,
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        async fn classify_items(&self, _req: crate::classifier::ClassifyRequest) -> anyhow::Result<Vec<Classification>> {
            Ok(Vec::new())
        }

        async fn generate_preference_summary(&self, _feedbacks: &[FeedbackExample]) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("likes rust".into())
        }

        async fn update_preference_summary(
            &self,
            _current: &str,
            _feedbacks: &[FeedbackExample],
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.summary.lock().unwrap().clone())
        }
    }

    async fn test_store() -> Store {
        let path = std::env::temp_dir().join(format!("feedlens-prefmgr-{}.db", uuid::Uuid::new_v4()));
        let pool = common::init_db_pool(path.to_str().unwrap()).await.unwrap();
        crate::store::ensure_schema(&pool).await.unwrap();
        Store::new(pool)
    }

    #[tokio::test]
    async fn skips_below_threshold() {
        let store = test_store().await;
        let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();
        let item = store
            .create_item(
                feed.id,
                &crate::models::ParsedItem {
                    guid: "g1".into(),
                    title: "t".into(),
                    link: "https://example.com/1".into(),
                    description: String::new(),
                    content: String::new(),
                    author: String::new(),
                    published: chrono::Utc::now(),
                },
            )
            .await
            .unwrap();
        store
            .update_item_feedback(item.id, crate::models::Feedback::Like, 1.0, -2.0)
            .await
            .unwrap();
        store.set_setting("preference_summary", "existing").await.unwrap();
        store.set_setting("last_summary_feedback_count", "0").await.unwrap();

        let classifier = Arc::new(StubClassifier {
            calls: AtomicUsize::new(0),
            summary: Mutex::new("unused".into()),
        });
        let manager = PreferenceManager::new(store, classifier.clone(), RetryPolicy::default(), 25);
        manager.update_preference_summary().await.unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generates_summary_when_none_exists() {
        let store = test_store().await;
        let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();
        let item = store
            .create_item(
                feed.id,
                &crate::models::ParsedItem {
                    guid: "g1".into(),
                    title: "t".into(),
                    link: "https://example.com/1".into(),
                    description: String::new(),
                    content: String::new(),
                    author: String::new(),
                    published: chrono::Utc::now(),
                },
            )
            .await
            .unwrap();
        store
            .update_item_feedback(item.id, crate::models::Feedback::Like, 1.0, -2.0)
            .await
            .unwrap();

        let classifier = Arc::new(StubClassifier {
            calls: AtomicUsize::new(0),
            summary: Mutex::new("unused".into()),
        });
        let manager = PreferenceManager::new(store.clone(), classifier.clone(), RetryPolicy::default(), 25);
        manager.update_preference_summary().await.unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_setting("preference_summary").await.unwrap().unwrap(), "likes rust");
    }
}

//! Scheduler (spec §4.4): owns the long-running tasks and the channels that
//! connect them. Grounded on the teacher's `main.rs` worker loop — adaptive
//! interval scheduling and `tokio::select!`-based shutdown — generalized into
//! four cooperating tasks instead of one inline loop.

use crate::feed_processor::FeedProcessor;
use crate::preference_manager::PreferenceManager;
use crate::store::Store;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const PROCESS_CHANNEL_CAPACITY: usize = 100;
const PREFERENCE_TRIGGER_CAPACITY: usize = 1;

pub struct SchedulerConfig {
    pub update_interval: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_age_days: i64,
    pub cleanup_min_score: f64,
}

pub struct Scheduler {
    store: Store,
    processor: Arc<FeedProcessor>,
    preference_manager: Arc<PreferenceManager>,
    config: SchedulerConfig,
    cancel: CancellationToken,
    preference_tx: mpsc::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        processor: Arc<FeedProcessor>,
        preference_manager: Arc<PreferenceManager>,
        config: SchedulerConfig,
    ) -> Self {
        let (preference_tx, _rx) = mpsc::channel(PREFERENCE_TRIGGER_CAPACITY);
        Self {
            store,
            processor,
            preference_manager,
            config,
            cancel: CancellationToken::new(),
            preference_tx,
            handles: Vec::new(),
        }
    }

    /// Non-blocking send, coalescing bursts into one pending signal (spec §4.3).
    pub fn trigger_preference_update(&self) {
        crate::preference_manager::trigger_preference_update(&self.preference_tx);
    }

    pub fn start(&mut self) {
        let (process_tx, process_rx) = mpsc::channel(PROCESS_CHANNEL_CAPACITY);
        let (preference_tx, preference_rx) = mpsc::channel(PREFERENCE_TRIGGER_CAPACITY);
        self.preference_tx = preference_tx;

        // 1. ProcessingWorker
        let processor = self.processor.clone();
        self.handles.push(tokio::spawn(async move {
            processor.processing_worker(process_rx).await;
        }));

        // 2. feedUpdateWorker: immediate run, then every update_interval; closes process_tx on exit.
        let processor = self.processor.clone();
        let interval = self.config.update_interval;
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            loop {
                processor.update_all_feeds(&process_tx, &cancel).await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            drop(process_tx);
        }));

        // 3. PreferenceUpdateWorker
        let preference_manager = self.preference_manager.clone();
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            preference_manager.run(preference_rx, cancel).await;
        }));

        // 4. cleanupWorker, only if cleanup_interval > 0
        if !self.config.cleanup_interval.is_zero() {
            let store = self.store.clone();
            let cancel = self.cancel.clone();
            let interval = self.config.cleanup_interval;
            let age = ChronoDuration::days(self.config.cleanup_age_days);
            let min_score = self.config.cleanup_min_score;
            self.handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            match store.delete_old_items(age, min_score).await {
                                Ok(n) if n > 0 => tracing::info!(deleted = n, "cleanup removed old items"),
                                Ok(_) => {}
                                Err(e) => tracing::error!(error = %e, "cleanup pass failed"),
                            }
                        }
                    }
                }
            }));
        }
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

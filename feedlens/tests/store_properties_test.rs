//! Store-level property tests (spec §8), mirroring the teacher's
//! `setup_test_db`-per-test pattern with a uuid-named sqlite file.

use chrono::{Duration, Utc};
use feedlens::models::{Feedback, ItemFilter, ParsedItem};
use feedlens::store::{ensure_schema, Store};

async fn test_store() -> Store {
    let path = std::env::temp_dir().join(format!("feedlens-store-{}.db", uuid::Uuid::new_v4()));
    let pool = common::init_db_pool(path.to_str().unwrap()).await.unwrap();
    ensure_schema(&pool).await.unwrap();
    Store::new(pool)
}

fn parsed_item(guid: &str, title: &str, link: &str) -> ParsedItem {
    ParsedItem {
        guid: guid.into(),
        title: title.into(),
        link: link.into(),
        description: String::new(),
        content: String::new(),
        author: String::new(),
        published: Utc::now(),
    }
}

#[tokio::test]
async fn idempotent_ingestion_by_feed_and_guid() {
    let store = test_store().await;
    let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();

    let item = parsed_item("a1", "Alpha", "https://example.com/a1");
    assert!(!store.item_exists(feed.id, "a1").await.unwrap());
    store.create_item(feed.id, &item).await.unwrap();
    assert!(store.item_exists(feed.id, "a1").await.unwrap());

    // Duplicate create attempt would violate the unique(feed_id, guid) constraint;
    // the processor is expected to call item_exists first and skip.
    let result = store.create_item(feed.id, &item).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn cross_feed_dedupe_by_title_or_link() {
    let store = test_store().await;
    let feed_a = store.create_feed("https://a.example.com/feed", "A", 1800).await.unwrap();
    let feed_b = store.create_feed("https://b.example.com/feed", "B", 1800).await.unwrap();

    store
        .create_item(feed_a.id, &parsed_item("g1", "Shared Title", "https://a.example.com/1"))
        .await
        .unwrap();

    assert!(store
        .item_exists_by_title_or_url("Shared Title", "https://b.example.com/other")
        .await
        .unwrap());
    assert!(store
        .item_exists_by_title_or_url("Different Title", "https://a.example.com/1")
        .await
        .unwrap());
    assert!(!store
        .item_exists_by_title_or_url("Totally Different", "https://b.example.com/unrelated")
        .await
        .unwrap());

    let _ = feed_b;
}

#[tokio::test]
async fn at_most_once_extraction_attempt() {
    let store = test_store().await;
    let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();
    let item = store
        .create_item(feed.id, &parsed_item("a1", "Alpha", "https://example.com/a1"))
        .await
        .unwrap();

    let needing = store.get_items_needing_extraction(10).await.unwrap();
    assert_eq!(needing.len(), 1);

    store
        .update_item_extraction(item.id, &Ok(feedlens::models::Extraction {
            content: "Alpha body".into(),
            rich_content: "<p>Alpha body</p>".into(),
            title: "Alpha".into(),
            date: None,
        }))
        .await
        .unwrap();

    let needing_after = store.get_items_needing_extraction(10).await.unwrap();
    assert!(needing_after.is_empty());
}

#[tokio::test]
async fn score_bounds_clamp_to_zero_and_ten() {
    let store = test_store().await;
    let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();
    let item = store
        .create_item(feed.id, &parsed_item("a1", "Alpha", "https://example.com/a1"))
        .await
        .unwrap();

    store
        .update_item_classification(
            item.id,
            &feedlens::models::Classification {
                guid: "a1".into(),
                score: 7.0,
                explanation: "".into(),
                topics: vec![],
                summary: "".into(),
            },
        )
        .await
        .unwrap();

    // S5: like -> 8.0, dislike -> 6.0, dislike -> 4.0, dislike x2 -> clamped to 0.0.
    store.update_item_feedback(item.id, Feedback::Like, 1.0, -2.0).await.unwrap();
    assert_score(&store, item.id, 8.0).await;
    store.update_item_feedback(item.id, Feedback::Dislike, 1.0, -2.0).await.unwrap();
    assert_score(&store, item.id, 6.0).await;
    store.update_item_feedback(item.id, Feedback::Dislike, 1.0, -2.0).await.unwrap();
    assert_score(&store, item.id, 4.0).await;
    store.update_item_feedback(item.id, Feedback::Dislike, 1.0, -2.0).await.unwrap();
    store.update_item_feedback(item.id, Feedback::Dislike, 1.0, -2.0).await.unwrap();
    assert_score(&store, item.id, 0.0).await;
}

async fn assert_score(store: &Store, item_id: i64, expected: f64) {
    let item = store.get_item(item_id).await.unwrap().unwrap();
    assert!((item.relevance_score - expected).abs() < 1e-9, "expected {}, got {}", expected, item.relevance_score);
}

#[tokio::test]
async fn classification_eligibility_requires_extracted_content_and_no_error() {
    let store = test_store().await;
    let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();

    let extracted_ok = store
        .create_item(feed.id, &parsed_item("ok", "Ok", "https://example.com/ok"))
        .await
        .unwrap();
    store
        .update_item_extraction(extracted_ok.id, &Ok(feedlens::models::Extraction {
            content: "content here".into(),
            rich_content: "".into(),
            title: "".into(),
            date: None,
        }))
        .await
        .unwrap();

    let extraction_failed = store
        .create_item(feed.id, &parsed_item("err", "Err", "https://example.com/err"))
        .await
        .unwrap();
    store
        .update_item_extraction(extraction_failed.id, &Err("some error".into()))
        .await
        .unwrap();

    let unclassified = store.get_unclassified_items(10).await.unwrap();
    assert_eq!(unclassified.len(), 1);
    assert_eq!(unclassified[0].id, extracted_ok.id);
}

#[tokio::test]
async fn feed_backoff_is_monotonic_and_capped() {
    // S3: first failure -> ~20 min, second -> ~40 min, each subsequent delay
    // is >= the previous, capped at 24h.
    let store = test_store().await;
    let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();

    let mut prev_minutes = 0i64;
    for _ in 0..10 {
        let before = Utc::now();
        store.update_feed_error(feed.id, "dns").await.unwrap();
        let after = store.get_feed(feed.id).await.unwrap().unwrap();

        let minutes = (after.next_fetch.unwrap() - before).num_minutes();
        assert!(minutes >= prev_minutes, "backoff should not shrink: {} then {}", prev_minutes, minutes);
        assert!(minutes <= 1440, "backoff must cap at 24h, got {} minutes", minutes);
        prev_minutes = minutes;
    }

    let feed = store.get_feed(feed.id).await.unwrap().unwrap();
    assert_eq!(feed.error_count, 10);
}

#[tokio::test]
async fn cleanup_preserves_feedback_and_high_score_and_recent_items() {
    let store = test_store().await;
    let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();

    let old_low_score = store
        .create_item(feed.id, &parsed_item("old", "Old", "https://example.com/old"))
        .await
        .unwrap();
    sqlx::query("UPDATE items SET published = ? WHERE id = ?")
        .bind(Utc::now() - Duration::days(60))
        .bind(old_low_score.id)
        .execute(store.pool())
        .await
        .unwrap();

    let old_with_feedback = store
        .create_item(feed.id, &parsed_item("fb", "Feedback", "https://example.com/fb"))
        .await
        .unwrap();
    sqlx::query("UPDATE items SET published = ?, user_feedback = 'like' WHERE id = ?")
        .bind(Utc::now() - Duration::days(60))
        .bind(old_with_feedback.id)
        .execute(store.pool())
        .await
        .unwrap();

    let old_high_score = store
        .create_item(feed.id, &parsed_item("hi", "High", "https://example.com/hi"))
        .await
        .unwrap();
    sqlx::query("UPDATE items SET published = ?, relevance_score = 9.0 WHERE id = ?")
        .bind(Utc::now() - Duration::days(60))
        .bind(old_high_score.id)
        .execute(store.pool())
        .await
        .unwrap();

    let recent_low_score = store
        .create_item(feed.id, &parsed_item("new", "New", "https://example.com/new"))
        .await
        .unwrap();

    let deleted = store.delete_old_items(Duration::days(30), 5.0).await.unwrap();
    assert_eq!(deleted, 1);

    assert!(store.get_item(old_low_score.id).await.unwrap().is_none());
    assert!(store.get_item(old_with_feedback.id).await.unwrap().is_some());
    assert!(store.get_item(old_high_score.id).await.unwrap().is_some());
    assert!(store.get_item(recent_low_score.id).await.unwrap().is_some());
}

#[tokio::test]
async fn fts_round_trip_for_substring_and_fts_queries() {
    let store = test_store().await;
    let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();

    let item = store
        .create_item(feed.id, &parsed_item("a1", "ChatGPT launches new feature", "https://example.com/a1"))
        .await
        .unwrap();
    store
        .update_item_classification(
            item.id,
            &feedlens::models::Classification {
                guid: "a1".into(),
                score: 5.0,
                explanation: "".into(),
                topics: vec!["ai".into()],
                summary: "".into(),
            },
        )
        .await
        .unwrap();

    let filter = ItemFilter::new();

    // Single-token substring fallback: "GPT" should find "ChatGPT".
    let results = store.search_items("GPT", &filter).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, item.id);

    // Multi-word query goes through FTS5.
    let results = store.search_items("launches feature", &filter).await.unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn classified_items_filter_by_min_score_and_topic() {
    let store = test_store().await;
    let feed = store.create_feed("https://example.com/feed", "Example", 1800).await.unwrap();

    let high = store
        .create_item(feed.id, &parsed_item("hi", "High", "https://example.com/hi"))
        .await
        .unwrap();
    store
        .update_item_classification(
            high.id,
            &feedlens::models::Classification {
                guid: "hi".into(),
                score: 8.5,
                explanation: "".into(),
                topics: vec!["ai".into()],
                summary: "".into(),
            },
        )
        .await
        .unwrap();

    let low = store
        .create_item(feed.id, &parsed_item("lo", "Low", "https://example.com/lo"))
        .await
        .unwrap();
    store
        .update_item_classification(
            low.id,
            &feedlens::models::Classification {
                guid: "lo".into(),
                score: 4.0,
                explanation: "".into(),
                topics: vec!["sports".into()],
                summary: "".into(),
            },
        )
        .await
        .unwrap();

    let mut filter = ItemFilter::new();
    filter.min_score = 5.0;
    let results = store.get_classified_items(&filter).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, high.id);

    let mut topic_filter = ItemFilter::new();
    topic_filter.topic = Some("sports".into());
    let results = store.get_classified_items(&topic_filter).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, low.id);
}

//! The Store (spec §4.1): the sole owner of persistent state. Every method
//! here is a single short transaction or statement; callers that need the
//! lock-retry policy wrap these calls with `crate::retry::retry_db_operation`.

pub mod schema;

use crate::error::StoreError;
use crate::models::*;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

pub use schema::ensure_schema;

/// Feed-error backoff schedule, indexed by the post-increment `error_count`
/// (spec §4.1, §9 — the 10-minute entry is reserved and never reached, since
/// the count is always >= 1 after a failure). A deliberate table instead of a
/// closed-form `min(base * 2^k, cap)` so the schedule stays interpretable by
/// anyone reading the DB.
const BACKOFF_MINUTES: [i64; 8] = [10, 20, 40, 80, 160, 320, 640, 1440];

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---------------------------------------------------------------
    // Feed CRUD
    // ---------------------------------------------------------------

    pub async fn create_feed(
        &self,
        url: &str,
        title: &str,
        fetch_interval_seconds: i64,
    ) -> Result<Feed, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO feeds (url, title, fetch_interval_seconds, created_at)
               VALUES (?, ?, ?, ?) RETURNING id"#,
        )
        .bind(url)
        .bind(title)
        .bind(fetch_interval_seconds)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        self.get_feed(id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>, StoreError> {
        sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn get_feeds(&self, enabled_only: bool) -> Result<Vec<Feed>, StoreError> {
        let sql = if enabled_only {
            "SELECT * FROM feeds WHERE enabled = 1 ORDER BY title ASC"
        } else {
            "SELECT * FROM feeds ORDER BY title ASC"
        };
        sqlx::query_as::<_, Feed>(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn update_feed_status(&self, id: i64, enabled: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE feeds SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    pub async fn update_feed(
        &self,
        id: i64,
        title: &str,
        fetch_interval_seconds: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE feeds SET title = ?, fetch_interval_seconds = ? WHERE id = ?")
            .bind(title)
            .bind(fetch_interval_seconds)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Relies on the `items.feed_id` foreign key's `ON DELETE CASCADE` (spec §5).
    pub async fn delete_feed(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Distinct feed display-names among feeds with at least one classified item
    /// scoring at or above `min_score` (spec §4.1).
    pub async fn get_active_feed_names(&self, min_score: f64) -> Result<Vec<String>, StoreError> {
        let feed_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT feed_id FROM items WHERE classified_at IS NOT NULL AND relevance_score >= ?",
        )
        .bind(min_score)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        let mut names = Vec::new();
        for feed_id in feed_ids {
            if let Some(feed) = self.get_feed(feed_id).await? {
                names.push(feed.display_name());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    // ---------------------------------------------------------------
    // Fetch scheduling
    // ---------------------------------------------------------------

    pub async fn get_feeds_to_fetch(&self, limit: i64) -> Result<Vec<Feed>, StoreError> {
        sqlx::query_as::<_, Feed>(
            r#"SELECT * FROM feeds
               WHERE enabled = 1 AND (next_fetch IS NULL OR next_fetch <= ?)
               ORDER BY next_fetch ASC
               LIMIT ?"#,
        )
        .bind(Utc::now())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn update_feed_fetched(
        &self,
        id: i64,
        next_fetch: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE feeds SET last_fetched = ?, next_fetch = ?, error_count = 0, last_error = ''
               WHERE id = ?"#,
        )
        .bind(Utc::now())
        .bind(next_fetch)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Increments `error_count`, stores `last_error`, and computes `next_fetch`
    /// via the exponential backoff table keyed by the post-increment error
    /// count (spec §4.1, §8 scenario S3: first failure -> 20 min, second -> 40 min).
    pub async fn update_feed_error(&self, id: i64, msg: &str) -> Result<(), StoreError> {
        let feed = self.get_feed(id).await?.ok_or(StoreError::NotFound)?;
        let new_count = feed.error_count + 1;
        let idx = (new_count as usize).min(BACKOFF_MINUTES.len() - 1);
        let minutes = BACKOFF_MINUTES[idx];
        let next_fetch = Utc::now() + ChronoDuration::minutes(minutes);

        sqlx::query(
            "UPDATE feeds SET error_count = error_count + 1, last_error = ?, next_fetch = ? WHERE id = ?",
        )
        .bind(msg)
        .bind(next_fetch)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Item lifecycle
    // ---------------------------------------------------------------

    pub async fn create_item(&self, feed_id: i64, parsed: &ParsedItem) -> Result<Item, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO items (feed_id, guid, title, link, description, content, author, published)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id"#,
        )
        .bind(feed_id)
        .bind(&parsed.guid)
        .bind(&parsed.title)
        .bind(&parsed.link)
        .bind(&parsed.description)
        .bind(&parsed.content)
        .bind(&parsed.author)
        .bind(parsed.published)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        self.get_item(id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<Item>, StoreError> {
        sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn item_exists(&self, feed_id: i64, guid: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM items WHERE feed_id = ? AND guid = ?",
        )
        .bind(feed_id)
        .bind(guid)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(count > 0)
    }

    /// Cross-feed duplicate gate (spec §4.1, §8 property 2).
    pub async fn item_exists_by_title_or_url(
        &self,
        title: &str,
        link: &str,
    ) -> Result<bool, StoreError> {
        if title.is_empty() && link.is_empty() {
            return Ok(false);
        }
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM items WHERE (title != '' AND title = ?) OR (link != '' AND link = ?)",
        )
        .bind(title)
        .bind(link)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(count > 0)
    }

    pub async fn get_unclassified_items(&self, limit: i64) -> Result<Vec<Item>, StoreError> {
        sqlx::query_as::<_, Item>(
            r#"SELECT * FROM items
               WHERE classified_at IS NULL AND extracted_content != '' AND extraction_error = ''
               ORDER BY published ASC
               LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// At-most-once extraction attempt (spec §8 property 3): once `extracted_at`
    /// is set, this never returns that item again.
    pub async fn get_items_needing_extraction(&self, limit: i64) -> Result<Vec<Item>, StoreError> {
        sqlx::query_as::<_, Item>(
            "SELECT * FROM items WHERE extracted_at IS NULL ORDER BY published ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn update_item_extraction(
        &self,
        id: i64,
        result: &Result<Extraction, String>,
    ) -> Result<(), StoreError> {
        match result {
            Ok(extraction) => {
                sqlx::query(
                    r#"UPDATE items SET extracted_content = ?, extracted_rich_content = ?,
                       extracted_at = ?, extraction_error = '' WHERE id = ?"#,
                )
                .bind(&extraction.content)
                .bind(&extraction.rich_content)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
            }
            Err(msg) => {
                sqlx::query(
                    "UPDATE items SET extraction_error = ?, extracted_at = ? WHERE id = ?",
                )
                .bind(msg)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
            }
        }
        Ok(())
    }

    /// Admin operation (spec §9): clear `extracted_at`/`classified_at` so the
    /// item is picked up again by `get_items_needing_extraction` /
    /// `get_unclassified_items` on the next pass.
    pub async fn reset_extraction(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE items SET
                 extracted_content = '',
                 extracted_rich_content = '',
                 extracted_at = NULL,
                 extraction_error = '',
                 classified_at = NULL
               WHERE id = ?"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    pub async fn update_item_classification(
        &self,
        id: i64,
        classification: &Classification,
    ) -> Result<(), StoreError> {
        let topics_json = serde_json::to_string(&classification.topics)
            .map_err(|e| StoreError::Other(e.into()))?;
        sqlx::query(
            r#"UPDATE items SET relevance_score = ?, explanation = ?, topics_json = ?,
               summary = ?, classified_at = ? WHERE id = ?"#,
        )
        .bind(clamp_score(classification.score))
        .bind(&classification.explanation)
        .bind(&topics_json)
        .bind(&classification.summary)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Fuses the extraction + classification write into one statement so a
    /// partially processed item is never visible (spec §4.1, §5).
    pub async fn update_item_processed(
        &self,
        id: i64,
        extraction: &Extraction,
        classification: &Classification,
    ) -> Result<(), StoreError> {
        let topics_json = serde_json::to_string(&classification.topics)
            .map_err(|e| StoreError::Other(e.into()))?;
        let now = Utc::now();

        sqlx::query(
            r#"UPDATE items SET
                 extracted_content = ?,
                 extracted_rich_content = ?,
                 extracted_at = ?,
                 extraction_error = '',
                 relevance_score = ?,
                 explanation = ?,
                 topics_json = ?,
                 summary = ?,
                 description = CASE WHEN ? != '' THEN ? ELSE description END,
                 classified_at = ?
               WHERE id = ?"#,
        )
        .bind(&extraction.content)
        .bind(&extraction.rich_content)
        .bind(now)
        .bind(clamp_score(classification.score))
        .bind(&classification.explanation)
        .bind(&topics_json)
        .bind(&classification.summary)
        .bind(&classification.summary)
        .bind(&classification.summary)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Query surface
    // ---------------------------------------------------------------

    async fn resolve_feed_ids_by_name(&self, feed_name: &str) -> Result<Vec<i64>, StoreError> {
        let feeds = self.get_feeds(false).await?;
        Ok(feeds
            .into_iter()
            .filter(|f| f.title == feed_name || f.display_name() == feed_name)
            .map(|f| f.id)
            .collect())
    }

    fn push_common_filter<'a>(
        builder: &mut QueryBuilder<'a, Sqlite>,
        filter: &'a ItemFilter,
        feed_ids: &'a [i64],
    ) {
        builder.push(" AND i.relevance_score >= ").push_bind(filter.min_score);

        if let Some(topic) = &filter.topic {
            builder
                .push(" AND EXISTS (SELECT 1 FROM json_each(i.topics_json) je WHERE je.value = ")
                .push_bind(topic)
                .push(")");
        }

        if filter.feed_name.is_some() {
            if feed_ids.is_empty() {
                // No feed matched the requested name: force an empty result set.
                builder.push(" AND 0");
            } else {
                builder.push(" AND i.feed_id IN (");
                let mut sep = builder.separated(", ");
                for id in feed_ids {
                    sep.push_bind(*id);
                }
                builder.push(")");
            }
        }

        if filter.show_liked_only {
            builder.push(" AND i.user_feedback = 'like'");
        }
    }

    fn row_to_classified_item(row: &sqlx::sqlite::SqliteRow) -> ClassifiedItem {
        let topics_json: String = row.get("topics_json");
        ClassifiedItem {
            id: row.get("id"),
            feed_id: row.get("feed_id"),
            feed_name: row.get("feed_name"),
            feed_url: row.get("feed_url"),
            title: row.get("title"),
            link: row.get("link"),
            author: row.get("author"),
            published: row.get("published"),
            summary: row.get("summary"),
            description: row.get("description"),
            relevance_score: row.get("relevance_score"),
            explanation: row.get("explanation"),
            topics: serde_json::from_str(&topics_json).unwrap_or_default(),
            classified_at: row.get("classified_at"),
            user_feedback: row.get("user_feedback"),
        }
    }

    pub async fn get_classified_items(
        &self,
        filter: &ItemFilter,
    ) -> Result<Vec<ClassifiedItem>, StoreError> {
        let feed_ids = match &filter.feed_name {
            Some(name) => self.resolve_feed_ids_by_name(name).await?,
            None => Vec::new(),
        };

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"SELECT i.*, f.title AS feed_name, f.url AS feed_url
               FROM items i JOIN feeds f ON f.id = i.feed_id
               WHERE i.classified_at IS NOT NULL"#,
        );
        Self::push_common_filter(&mut builder, filter, &feed_ids);
        builder.push(format!(" ORDER BY {}", filter.sort_by.order_by_clause()));
        builder.push(" LIMIT ").push_bind(filter.limit);
        builder.push(" OFFSET ").push_bind(filter.offset);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(rows.iter().map(Self::row_to_classified_item).collect())
    }

    pub async fn get_classified_items_count(&self, filter: &ItemFilter) -> Result<i64, StoreError> {
        let feed_ids = match &filter.feed_name {
            Some(name) => self.resolve_feed_ids_by_name(name).await?,
            None => Vec::new(),
        };

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"SELECT COUNT(*) FROM items i JOIN feeds f ON f.id = i.feed_id
               WHERE i.classified_at IS NOT NULL"#,
        );
        Self::push_common_filter(&mut builder, filter, &feed_ids);

        builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    // ---------------------------------------------------------------
    // Topics
    // ---------------------------------------------------------------

    pub async fn get_topics(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar(
            r#"SELECT DISTINCT je.value FROM items i, json_each(i.topics_json) je
               WHERE i.classified_at IS NOT NULL"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn get_topics_filtered(&self, min_score: f64) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar(
            r#"SELECT DISTINCT je.value FROM items i, json_each(i.topics_json) je
               WHERE i.classified_at IS NOT NULL AND i.relevance_score >= ?"#,
        )
        .bind(min_score)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn get_top_topics_by_score(
        &self,
        min_score: f64,
        limit: i64,
    ) -> Result<Vec<TopicStat>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT je.value AS topic, AVG(i.relevance_score) AS avg_score, COUNT(*) AS item_count
               FROM items i, json_each(i.topics_json) je
               WHERE i.classified_at IS NOT NULL AND i.relevance_score >= ?
               GROUP BY je.value
               ORDER BY avg_score DESC, item_count DESC
               LIMIT ?"#,
        )
        .bind(min_score)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(rows
            .iter()
            .map(|r| TopicStat {
                topic: r.get("topic"),
                avg_score: r.get("avg_score"),
                item_count: r.get("item_count"),
            })
            .collect())
    }

    // ---------------------------------------------------------------
    // Feedback
    // ---------------------------------------------------------------

    /// Single transaction: sets feedback + adjusts score, clamped to [0,10]
    /// (spec §4.1, §8 property 4).
    pub async fn update_item_feedback(
        &self,
        item_id: i64,
        feedback: Feedback,
        like_delta: f64,
        dislike_delta: f64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let current_score: f64 = sqlx::query_scalar("SELECT relevance_score FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?
            .ok_or(StoreError::NotFound)?;

        let delta = match feedback {
            Feedback::Like => like_delta,
            Feedback::Dislike => dislike_delta,
        };
        let new_score = clamp_score(current_score + delta);

        sqlx::query(
            "UPDATE items SET user_feedback = ?, feedback_at = ?, relevance_score = ? WHERE id = ?",
        )
        .bind(feedback.as_str())
        .bind(Utc::now())
        .bind(new_score)
        .bind(item_id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    fn row_to_feedback_example(row: &sqlx::sqlite::SqliteRow) -> FeedbackExample {
        let extracted: String = row.get("extracted_content");
        let topics_json: String = row.get("topics_json");
        FeedbackExample {
            title: row.get("title"),
            description: row.get("description"),
            content: extracted.chars().take(500).collect(),
            summary: row.get("summary"),
            feedback: row.get("user_feedback"),
            topics: serde_json::from_str(&topics_json).unwrap_or_default(),
        }
    }

    /// `feedback_type` of `""` matches both `like` and `dislike`.
    pub async fn get_recent_feedback(
        &self,
        feedback_type: &str,
        limit: i64,
    ) -> Result<Vec<FeedbackExample>, StoreError> {
        let rows = if feedback_type.is_empty() {
            sqlx::query(
                r#"SELECT * FROM items WHERE user_feedback IN ('like', 'dislike')
                   ORDER BY feedback_at DESC LIMIT ?"#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"SELECT * FROM items WHERE user_feedback = ?
                   ORDER BY feedback_at DESC LIMIT ?"#,
            )
            .bind(feedback_type)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(StoreError::from_sqlx)?;

        Ok(rows.iter().map(Self::row_to_feedback_example).collect())
    }

    pub async fn get_feedback_count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE user_feedback IN ('like', 'dislike')")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn get_feedback_since(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<FeedbackExample>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT * FROM items WHERE user_feedback IN ('like', 'dislike')
               ORDER BY feedback_at DESC LIMIT ? OFFSET ?"#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(rows.iter().map(Self::row_to_feedback_example).collect())
    }

    // ---------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------

    fn is_simple_token(query: &str) -> bool {
        let trimmed = query.trim();
        if trimmed.split_whitespace().count() != 1 {
            return false;
        }
        if trimmed.contains('"') || trimmed.contains('*') {
            return false;
        }
        !matches!(trimmed.to_uppercase().as_str(), "OR" | "AND" | "NOT")
    }

    pub async fn search_items(
        &self,
        query: &str,
        filter: &ItemFilter,
    ) -> Result<Vec<ClassifiedItem>, StoreError> {
        let feed_ids = match &filter.feed_name {
            Some(name) => self.resolve_feed_ids_by_name(name).await?,
            None => Vec::new(),
        };

        let mut builder: QueryBuilder<Sqlite> = if Self::is_simple_token(query) {
            let like = format!("%{}%", query.trim().to_lowercase());
            let mut b: QueryBuilder<Sqlite> = QueryBuilder::new(
                r#"SELECT i.*, f.title AS feed_name, f.url AS feed_url
                   FROM items i JOIN feeds f ON f.id = i.feed_id
                   WHERE i.classified_at IS NOT NULL AND ("#,
            );
            b.push("LOWER(i.title) LIKE ").push_bind(like.clone());
            b.push(" OR LOWER(i.description) LIKE ").push_bind(like.clone());
            b.push(" OR LOWER(i.content) LIKE ").push_bind(like.clone());
            b.push(" OR LOWER(i.extracted_content) LIKE ").push_bind(like.clone());
            b.push(" OR LOWER(i.summary) LIKE ").push_bind(like);
            b.push(")");
            b
        } else {
            let escaped = query.replace('"', "\"\"");
            let mut b: QueryBuilder<Sqlite> = QueryBuilder::new(
                r#"SELECT i.*, f.title AS feed_name, f.url AS feed_url
                   FROM items i
                   JOIN feeds f ON f.id = i.feed_id
                   JOIN items_fts fts ON fts.rowid = i.id
                   WHERE items_fts MATCH "#,
            );
            b.push_bind(escaped);
            b.push(" AND i.classified_at IS NOT NULL");
            b
        };

        Self::push_common_filter(&mut builder, filter, &feed_ids);
        builder.push(format!(" ORDER BY {}", filter.sort_by.order_by_clause()));
        builder.push(" LIMIT ").push_bind(filter.limit);
        builder.push(" OFFSET ").push_bind(filter.offset);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(rows.iter().map(Self::row_to_classified_item).collect())
    }

    pub async fn get_search_items_count(
        &self,
        query: &str,
        filter: &ItemFilter,
    ) -> Result<i64, StoreError> {
        let feed_ids = match &filter.feed_name {
            Some(name) => self.resolve_feed_ids_by_name(name).await?,
            None => Vec::new(),
        };

        let mut builder: QueryBuilder<Sqlite> = if Self::is_simple_token(query) {
            let like = format!("%{}%", query.trim().to_lowercase());
            let mut b: QueryBuilder<Sqlite> = QueryBuilder::new(
                r#"SELECT COUNT(*) FROM items i JOIN feeds f ON f.id = i.feed_id
                   WHERE i.classified_at IS NOT NULL AND ("#,
            );
            b.push("LOWER(i.title) LIKE ").push_bind(like.clone());
            b.push(" OR LOWER(i.description) LIKE ").push_bind(like.clone());
            b.push(" OR LOWER(i.content) LIKE ").push_bind(like.clone());
            b.push(" OR LOWER(i.extracted_content) LIKE ").push_bind(like.clone());
            b.push(" OR LOWER(i.summary) LIKE ").push_bind(like);
            b.push(")");
            b
        } else {
            let escaped = query.replace('"', "\"\"");
            let mut b: QueryBuilder<Sqlite> = QueryBuilder::new(
                r#"SELECT COUNT(*) FROM items i
                   JOIN feeds f ON f.id = i.feed_id
                   JOIN items_fts fts ON fts.rowid = i.id
                   WHERE items_fts MATCH "#,
            );
            b.push_bind(escaped);
            b.push(" AND i.classified_at IS NOT NULL");
            b
        };

        Self::push_common_filter(&mut builder, filter, &feed_ids);

        builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    // ---------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Decode a settings value as a JSON array of strings; on corrupt JSON,
    /// log and substitute an empty slice (spec §7: invariant violations).
    pub async fn get_setting_string_list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.get_setting(key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(key, error = %e, "corrupt JSON in setting, substituting empty list");
                Vec::new()
            })),
            None => Ok(Vec::new()),
        }
    }

    // ---------------------------------------------------------------
    // Cleanup
    // ---------------------------------------------------------------

    /// Deletes items older than `age` scoring below `min_score` with no
    /// feedback recorded. All three conditions must hold (spec §4.5, §8
    /// property 7). Returns the number deleted.
    pub async fn delete_old_items(
        &self,
        age: ChronoDuration,
        min_score: f64,
    ) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - age;
        let result = sqlx::query(
            r#"DELETE FROM items
               WHERE published < ? AND relevance_score < ? AND user_feedback = ''"#,
        )
        .bind(cutoff)
        .bind(min_score)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}

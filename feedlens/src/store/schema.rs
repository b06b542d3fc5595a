//! Schema creation and idempotent migration (spec §4.1, §6).
//!
//! `ensure_schema` uses `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT
//! EXISTS` for the base shape, then `migrate_missing_columns` inspects
//! `PRAGMA table_info` to add any columns a newer build introduced — the
//! same idempotent-migration approach the teacher uses in `server::ensure_schema`.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

const CREATE_FEEDS: &str = r#"
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    last_fetched TIMESTAMP,
    next_fetch TIMESTAMP,
    fetch_interval_seconds INTEGER NOT NULL DEFAULT 1800,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT NOT NULL DEFAULT '',
    enabled BOOLEAN NOT NULL DEFAULT 1,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

const CREATE_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    guid TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    link TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    author TEXT NOT NULL DEFAULT '',
    published TIMESTAMP NOT NULL,

    extracted_content TEXT NOT NULL DEFAULT '',
    extracted_rich_content TEXT NOT NULL DEFAULT '',
    extracted_at TIMESTAMP,
    extraction_error TEXT NOT NULL DEFAULT '',

    relevance_score REAL NOT NULL DEFAULT 0,
    explanation TEXT NOT NULL DEFAULT '',
    topics_json TEXT NOT NULL DEFAULT '[]',
    summary TEXT NOT NULL DEFAULT '',
    classified_at TIMESTAMP,

    user_feedback TEXT NOT NULL DEFAULT '',
    feedback_at TIMESTAMP,

    UNIQUE(feed_id, guid)
)
"#;

const CREATE_SETTINGS: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL DEFAULT '',
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

// A simple mirror table for full-text search over item text fields. Implemented
// as an FTS5 virtual table content-less of a rowid-matching "items" by design:
// content='items' lets SQLite keep it in sync via triggers below rather than
// via explicit INSERT/DELETE calls scattered through the Store.
const CREATE_ITEMS_FTS: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS items_fts USING fts5(
    title, description, content, extracted_content, summary,
    content='items', content_rowid='id'
)
"#;

const CREATE_FTS_INSERT_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS items_fts_ai AFTER INSERT ON items BEGIN
    INSERT INTO items_fts(rowid, title, description, content, extracted_content, summary)
    VALUES (new.id, new.title, new.description, new.content, new.extracted_content, new.summary);
END
"#;

const CREATE_FTS_DELETE_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS items_fts_ad AFTER DELETE ON items BEGIN
    INSERT INTO items_fts(items_fts, rowid, title, description, content, extracted_content, summary)
    VALUES ('delete', old.id, old.title, old.description, old.content, old.extracted_content, old.summary);
END
"#;

const CREATE_FTS_UPDATE_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS items_fts_au AFTER UPDATE ON items BEGIN
    INSERT INTO items_fts(items_fts, rowid, title, description, content, extracted_content, summary)
    VALUES ('delete', old.id, old.title, old.description, old.content, old.extracted_content, old.summary);
    INSERT INTO items_fts(rowid, title, description, content, extracted_content, summary)
    VALUES (new.id, new.title, new.description, new.content, new.extracted_content, new.summary);
END
"#;

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_items_published ON items(published DESC)",
    "CREATE INDEX IF NOT EXISTS idx_items_score ON items(relevance_score DESC)",
    "CREATE INDEX IF NOT EXISTS idx_items_feedback ON items(user_feedback, feedback_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_items_feed_published ON items(feed_id, published DESC)",
    "CREATE INDEX IF NOT EXISTS idx_items_classified_score ON items(classified_at, relevance_score DESC)",
    "CREATE INDEX IF NOT EXISTS idx_feeds_due ON feeds(enabled, next_fetch) WHERE enabled = 1",
];

/// Columns that a given table must have. Used by `migrate_missing_columns` to
/// add any that are absent, so upgrading an existing database file in place
/// never requires a destructive rebuild.
const ITEM_COLUMNS: &[(&str, &str)] = &[
    ("summary", "TEXT NOT NULL DEFAULT ''"),
    ("explanation", "TEXT NOT NULL DEFAULT ''"),
];

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_FEEDS)
        .execute(pool)
        .await
        .context("creating feeds table")?;
    sqlx::query(CREATE_ITEMS)
        .execute(pool)
        .await
        .context("creating items table")?;
    sqlx::query(CREATE_SETTINGS)
        .execute(pool)
        .await
        .context("creating settings table")?;
    sqlx::query(CREATE_ITEMS_FTS)
        .execute(pool)
        .await
        .context("creating items_fts table")?;
    sqlx::query(CREATE_FTS_INSERT_TRIGGER)
        .execute(pool)
        .await
        .context("creating items_fts insert trigger")?;
    sqlx::query(CREATE_FTS_DELETE_TRIGGER)
        .execute(pool)
        .await
        .context("creating items_fts delete trigger")?;
    sqlx::query(CREATE_FTS_UPDATE_TRIGGER)
        .execute(pool)
        .await
        .context("creating items_fts update trigger")?;

    for idx in INDEXES {
        sqlx::query(idx).execute(pool).await.context("creating index")?;
    }

    migrate_missing_columns(pool, "items", ITEM_COLUMNS).await?;

    Ok(())
}

async fn migrate_missing_columns(
    pool: &SqlitePool,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<()> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await
        .with_context(|| format!("inspecting schema of {}", table))?;

    let existing: Vec<String> = rows.iter().map(|r| r.get::<String, _>("name")).collect();

    for (name, decl) in columns {
        if !existing.iter().any(|c| c == name) {
            let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, decl);
            sqlx::query(&sql)
                .execute(pool)
                .await
                .with_context(|| format!("adding column {} to {}", name, table))?;
            tracing::info!(table, column = name, "migrated missing column");
        }
    }

    Ok(())
}

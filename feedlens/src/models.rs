//! Domain types shared across the pipeline. The Store is the only component
//! that owns persistent state; everything else holds these by value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subscription source.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub last_fetched: Option<DateTime<Utc>>,
    pub next_fetch: Option<DateTime<Utc>>,
    pub fetch_interval_seconds: i64,
    pub error_count: i64,
    pub last_error: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    /// `title` if non-empty, else host+path of `url` with `www.` and `/` stripped.
    pub fn display_name(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        match url::Url::parse(&self.url) {
            Ok(u) => {
                let host = u.host_str().unwrap_or("").trim_start_matches("www.");
                let path = u.path().trim_matches('/');
                if path.is_empty() {
                    host.to_string()
                } else {
                    format!("{}{}", host, path)
                }
            }
            Err(_) => self.url.trim_start_matches("www.").replace('/', ""),
        }
    }
}

/// A raw item parsed from a feed, as it exists before extraction/classification.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub content: String,
    pub author: String,
    pub published: DateTime<Utc>,

    pub extracted_content: String,
    pub extracted_rich_content: String,
    pub extracted_at: Option<DateTime<Utc>>,
    pub extraction_error: String,

    pub relevance_score: f64,
    pub explanation: String,
    pub topics_json: String,
    pub summary: String,
    pub classified_at: Option<DateTime<Utc>>,

    pub user_feedback: String,
    pub feedback_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn topics(&self) -> Vec<String> {
        serde_json::from_str(&self.topics_json).unwrap_or_default()
    }

    /// §3 invariant: classified_at non-null => classified, regardless of score.
    pub fn is_classified(&self) -> bool {
        self.classified_at.is_some()
    }

    /// §3: eligible for classification iff unclassified AND extracted content
    /// is non-empty AND extraction_error is empty.
    pub fn eligible_for_classification(&self) -> bool {
        self.classified_at.is_none()
            && !self.extracted_content.is_empty()
            && self.extraction_error.is_empty()
    }
}

/// A fields-only parsed feed entry, as returned by the Parser (§6).
#[derive(Debug, Clone)]
pub struct ParsedItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub content: String,
    pub author: String,
    pub published: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub description: String,
    pub items: Vec<ParsedItem>,
}

/// An extracted article body, as returned by the Extractor (§6).
#[derive(Debug, Clone)]
pub struct Extraction {
    pub content: String,
    pub rich_content: String,
    pub title: String,
    pub date: Option<DateTime<Utc>>,
}

/// A single article's LLM-produced classification (§6, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub guid: String,
    pub score: f64,
    pub explanation: String,
    pub topics: Vec<String>,
    pub summary: String,
}

/// Clamp a relevance score into [0, 10] (§3 invariant).
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 10.0)
}

/// User feedback on a classified item. An empty string means "no feedback yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feedback {
    Like,
    Dislike,
}

impl Feedback {
    pub fn as_str(self) -> &'static str {
        match self {
            Feedback::Like => "like",
            Feedback::Dislike => "dislike",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Feedback::Like),
            "dislike" => Some(Feedback::Dislike),
            _ => None,
        }
    }
}

/// A derived view used only for LLM context (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackExample {
    pub title: String,
    pub description: String,
    /// First 500 chars of extracted_content.
    pub content: String,
    pub summary: String,
    pub feedback: String,
    pub topics: Vec<String>,
}

/// A view joining an Item with its feed's display name/URL (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedItem {
    pub id: i64,
    pub feed_id: i64,
    pub feed_name: String,
    pub feed_url: String,
    pub title: String,
    pub link: String,
    pub author: String,
    pub published: DateTime<Utc>,
    pub summary: String,
    pub description: String,
    pub relevance_score: f64,
    pub explanation: String,
    pub topics: Vec<String>,
    pub classified_at: DateTime<Utc>,
    pub user_feedback: String,
}

/// Sort order for `GetClassifiedItems` / `SearchItems` (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    Score,
    #[default]
    Published,
    SourceDate,
    SourceScore,
}

impl SortBy {
    pub fn parse(s: &str) -> Self {
        match s {
            "score" => SortBy::Score,
            "source+date" => SortBy::SourceDate,
            "source+score" => SortBy::SourceScore,
            _ => SortBy::Published,
        }
    }

    pub fn order_by_clause(self) -> &'static str {
        match self {
            SortBy::Score => "i.relevance_score DESC, i.published DESC",
            SortBy::Published => "i.published DESC",
            SortBy::SourceDate => "f.title ASC, i.published DESC",
            SortBy::SourceScore => "f.title ASC, i.relevance_score DESC, i.published DESC",
        }
    }
}

/// Conjunctive filter for the query surface (§4.1).
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub min_score: f64,
    pub topic: Option<String>,
    pub feed_name: Option<String>,
    pub show_liked_only: bool,
    pub sort_by: SortBy,
    pub limit: i64,
    pub offset: i64,
}

impl ItemFilter {
    pub fn new() -> Self {
        Self {
            min_score: 0.0,
            topic: None,
            feed_name: None,
            show_liked_only: false,
            sort_by: SortBy::default(),
            limit: 50,
            offset: 0,
        }
    }
}

/// `{topic, avg_score, item_count}` as returned by `GetTopTopicsByScore` (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicStat {
    pub topic: String,
    pub avg_score: f64,
    pub item_count: i64,
}

//! The Classifier external interface (spec §6): an OpenAI-compatible chat
//! completions endpoint that scores/tags articles and maintains a running
//! preference summary. Grounded on the teacher's `llm::remote::RemoteLlmProvider`
//! and `llm::extract_json_from_text`.

use crate::models::Classification;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One article as handed to the Classifier, alongside its guid for matching
/// the returned `Classification` back to the right item.
#[derive(Debug, Clone, Serialize)]
pub struct ArticleForClassification {
    pub guid: String,
    pub title: String,
    pub description: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClassifyRequest {
    pub articles: Vec<ArticleForClassification>,
    pub feedbacks: Vec<crate::models::FeedbackExample>,
    pub canonical_topics: Vec<String>,
    pub preference_summary: String,
    pub preferred_topics: Vec<String>,
    pub avoided_topics: Vec<String>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify_items(&self, req: ClassifyRequest) -> Result<Vec<Classification>>;
    async fn generate_preference_summary(&self, feedbacks: &[crate::models::FeedbackExample]) -> Result<String>;
    async fn update_preference_summary(
        &self,
        current: &str,
        feedbacks: &[crate::models::FeedbackExample],
    ) -> Result<String>;
}

pub struct RemoteClassifier {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl RemoteClassifier {
    pub fn new(base_url: String, api_key: String, model: String, timeout_seconds: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".into(),
                    content: system.into(),
                },
                Message {
                    role: "user".into(),
                    content: user.into(),
                },
            ],
            temperature: 0.2,
        };

        let resp = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send(),
        )
        .await
        .context("classifier request timed out")?
        .context("sending classifier request")?;

        if !resp.status().is_success() {
            anyhow::bail!("classifier endpoint returned {}", resp.status());
        }

        let parsed: OpenAiResponse = resp.json().await.context("decoding classifier response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("classifier response had no choices")
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify_items(&self, req: ClassifyRequest) -> Result<Vec<Classification>> {
        if req.articles.is_empty() {
            return Ok(Vec::new());
        }

        let system = format!(
            "You score news articles for personal relevance on a 0-10 scale, tag them with topics \
             drawn from {:?} where sensible (new topics are allowed), and write a one-sentence summary \
             for each. The reader's stated preferred topics are {:?}; avoided topics are {:?}. Running \
             preference summary: {}\n\
             Respond with ONLY a JSON array, one object per article, each shaped exactly as \
             {{\"guid\": string, \"score\": number, \"explanation\": string, \"topics\": [string], \"summary\": string}}.",
            req.canonical_topics, req.preferred_topics, req.avoided_topics, req.preference_summary,
        );

        let articles_json = serde_json::to_string(&req.articles).context("encoding articles")?;
        let feedback_json = serde_json::to_string(&req.feedbacks).context("encoding feedback")?;
        let user = format!(
            "Articles:\n{}\n\nRecent reader feedback for context:\n{}",
            articles_json, feedback_json
        );

        let raw = self.chat(&system, &user).await?;
        let json_text = extract_json_from_text(&raw);
        let classifications: Vec<Classification> =
            serde_json::from_str(json_text).context("classifier response was not the expected JSON array")?;
        Ok(classifications)
    }

    async fn generate_preference_summary(&self, feedbacks: &[crate::models::FeedbackExample]) -> Result<String> {
        let system = "Summarize this reader's content preferences in 2-4 sentences based on what \
             they've liked and disliked. Respond with plain text only, no JSON.";
        let user = serde_json::to_string(feedbacks).context("encoding feedback")?;
        self.chat(system, &user).await
    }

    async fn update_preference_summary(
        &self,
        current: &str,
        feedbacks: &[crate::models::FeedbackExample],
    ) -> Result<String> {
        let system = "You maintain a running summary of a reader's content preferences. Revise the \
             current summary in light of the new feedback below, in 2-4 sentences. Respond with plain \
             text only, no JSON.";
        let user = format!(
            "Current summary: {}\n\nNew feedback:\n{}",
            current,
            serde_json::to_string(feedbacks).context("encoding feedback")?
        );
        self.chat(system, &user).await
    }
}

/// Strips markdown code fences and any leading/trailing prose so a JSON
/// payload embedded in a chat response can be parsed directly.
fn extract_json_from_text(text: &str) -> &str {
    let trimmed = text.trim();
    let without_fence = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest)
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest)
    } else {
        trimmed
    };

    let start = without_fence.find(['[', '{']);
    let end = without_fence.rfind([']', '}']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => without_fence[s..=e].trim(),
        _ => without_fence.trim(),
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_array_from_fenced_response() {
        let text = "Here you go:\n```json\n[{\"guid\":\"a\"}]\n```\nHope that helps.";
        assert_eq!(extract_json_from_text(text), "[{\"guid\":\"a\"}]");
    }

    #[test]
    fn extracts_bare_json_array() {
        let text = "[{\"guid\":\"a\"}]";
        assert_eq!(extract_json_from_text(text), "[{\"guid\":\"a\"}]");
    }

    #[tokio::test]
    async fn classify_items_parses_response_into_classifications() {
        let mut server = mockito::Server::new_async().await;
        let response_body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "[{\"guid\":\"a1\",\"score\":8.5,\"explanation\":\"on topic\",\"topics\":[\"ai\"],\"summary\":\"Alpha body\"}]"
                }
            }]
        });
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(response_body.to_string())
            .create_async()
            .await;

        let classifier = RemoteClassifier::new(server.url(), "key".into(), "gpt-test".into(), 5);
        let req = ClassifyRequest {
            articles: vec![ArticleForClassification {
                guid: "a1".into(),
                title: "Alpha".into(),
                description: "".into(),
                content: "Alpha body".into(),
            }],
            ..Default::default()
        };

        let result = classifier.classify_items(req).await.unwrap();
        mock.assert_async().await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].guid, "a1");
        assert_eq!(result[0].score, 8.5);
    }

    #[tokio::test]
    async fn classify_items_returns_empty_for_empty_input() {
        let classifier = RemoteClassifier::new("http://localhost".into(), "key".into(), "gpt-test".into(), 5);
        let result = classifier.classify_items(ClassifyRequest::default()).await.unwrap();
        assert!(result.is_empty());
    }
}

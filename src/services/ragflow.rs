use crate::config::Settings;
use crate::error::RetrievalError;
use crate::query::Query;
use crate::services::retrieval::{RetrievalBackend, RetrievalResult};
use crate::services::shapes;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Request body for the RAGFlow retrieval endpoint
#[derive(Debug, Serialize)]
struct RetrievalRequest<'a> {
    question: &'a str,
    dataset_ids: Vec<&'a str>,
    similarity_threshold: f32,
    page_size: usize,
    top_k: usize,
    use_kg: bool,
    keyword: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rerank_id: Option<i64>,
}

impl<'a> RetrievalRequest<'a> {
    fn new(query: &'a Query, settings: &'a Settings) -> Self {
        Self {
            question: query.as_str(),
            dataset_ids: vec![settings.dataset_id.trim()],
            similarity_threshold: settings.similarity_threshold,
            page_size: settings.max_chunks,
            top_k: settings.max_chunks,
            use_kg: settings.use_knowledge_graph,
            keyword: settings.keyword_match,
            rerank_id: settings.rerank_id,
        }
    }
}

/// HTTP client for a RAGFlow-compatible retrieval service
#[derive(Debug, Clone)]
pub struct RagflowClient {
    client: Client,
}

impl RagflowClient {
    pub fn new() -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    async fn send(
        &self,
        query: &Query,
        settings: &Settings,
    ) -> Result<RetrievalResult, RetrievalError> {
        let response = self
            .client
            .post(settings.retrieval_url())
            .bearer_auth(settings.api_key.trim())
            .json(&RetrievalRequest::new(query, settings))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RetrievalError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let json: JsonValue = serde_json::from_str(&body)
            .map_err(|error| RetrievalError::InvalidResponse(error.to_string()))?;
        if let Some(code) = json.get("code").and_then(JsonValue::as_i64)
            && code != 0
        {
            let message = json
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(RetrievalError::Rejected { code, message });
        }

        let mut chunks = shapes::normalize(&json);
        chunks.truncate(settings.max_chunks.max(1));
        if chunks.is_empty() {
            return Err(RetrievalError::EmptyResult);
        }
        Ok(RetrievalResult::new(chunks))
    }
}

#[async_trait]
impl RetrievalBackend for RagflowClient {
    async fn retrieve(
        &self,
        query: &Query,
        settings: &Settings,
    ) -> Result<RetrievalResult, RetrievalError> {
        if !settings.is_configured() {
            return Err(RetrievalError::Unconfigured);
        }

        let timeout_ms = settings.timeout_ms.max(1);
        tracing::debug!(query = %query, url = %settings.retrieval_url(), timeout_ms, "retrieving context");
        // Dropping the request future on expiry aborts the connection.
        match tokio::time::timeout(settings.timeout(), self.send(query, settings)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(RetrievalError::Timeout { timeout_ms }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_carries_all_retrieval_knobs() {
        let settings = Settings {
            dataset_id: " novel ".to_string(),
            similarity_threshold: 0.25,
            max_chunks: 4,
            use_knowledge_graph: true,
            keyword_match: true,
            rerank_id: Some(7),
            ..Settings::default()
        };
        let Some(query) = Query::parse("who guards the gate", 1) else {
            panic!("valid query");
        };
        let body = serde_json::to_value(RetrievalRequest::new(&query, &settings)).ok();
        assert_eq!(
            body,
            Some(serde_json::json!({
                "question": "who guards the gate",
                "dataset_ids": ["novel"],
                "similarity_threshold": 0.25,
                "page_size": 4,
                "top_k": 4,
                "use_kg": true,
                "keyword": true,
                "rerank_id": 7
            }))
        );
    }

    #[test]
    fn test_rerank_is_omitted_when_unset() {
        let settings = Settings::default();
        let Some(query) = Query::parse("castle walls", 1) else {
            panic!("valid query");
        };
        let body = serde_json::to_value(RetrievalRequest::new(&query, &settings)).ok();
        assert!(body.is_some_and(|body| body.get("rerank_id").is_none()));
    }

    #[tokio::test]
    async fn test_unconfigured_settings_fail_without_network() {
        let Ok(client) = RagflowClient::new() else {
            panic!("client should build");
        };
        let settings = Settings {
            // unroutable: a network attempt would fail differently
            base_url: "http://127.0.0.1:9".to_string(),
            ..Settings::default()
        };
        let Some(query) = Query::parse("anything at all", 1) else {
            panic!("valid query");
        };
        let result = client.retrieve(&query, &settings).await;
        assert_eq!(result, Err(RetrievalError::Unconfigured));
    }
}

use crate::config::Settings;
use crate::error::RetrievalError;
use crate::query::Query;
use async_trait::async_trait;

/// Separator placed between chunks when they are joined for injection
pub const CHUNK_SEPARATOR: &str = "\n...\n";

/// One retrieved passage with its relevance score
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub score: f32,
}

impl Chunk {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// Ordered chunks returned for one query, best first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetrievalResult {
    chunks: Vec<Chunk>,
}

impl RetrievalResult {
    #[must_use]
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    /// Builds a result from bare texts, scoring them in descending rank order
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let texts: Vec<String> = texts.into_iter().map(Into::into).collect();
        let count = texts.len().max(1) as f32;
        let chunks = texts
            .into_iter()
            .enumerate()
            .map(|(rank, text)| Chunk::new(text, 1.0 - rank as f32 / count))
            .collect();
        Self { chunks }
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Joins all chunk texts into the single block that gets injected
    #[must_use]
    pub fn joined(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(CHUNK_SEPARATOR)
    }
}

/// Source of supporting context for a query
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Runs one bounded retrieval. Must return within `settings.timeout_ms`.
    async fn retrieve(
        &self,
        query: &Query,
        settings: &Settings,
    ) -> Result<RetrievalResult, RetrievalError>;
}

//! Response shapes the retrieval backend is known to produce.
//!
//! Shapes are tried in priority order; the first one whose list is present
//! wins, even if that list turns out to be empty. A body matching no shape
//! normalizes to no chunks.

use crate::services::retrieval::Chunk;
use serde_json::Value as JsonValue;

const TEXT_FIELDS: [&str; 3] = ["content_with_weight", "content", "text"];
const SCORE_FIELDS: [&str; 3] = ["similarity", "score", "vector_similarity"];

/// A list of chunk objects found at a fixed path in the response body
#[derive(Debug, Clone, Copy)]
pub struct ResponseShape {
    pub name: &'static str,
    path: &'static [&'static str],
}

impl ResponseShape {
    const fn at(name: &'static str, path: &'static [&'static str]) -> Self {
        Self { name, path }
    }

    /// Returns the normalized chunks, or `None` when the body does not have this shape
    #[must_use]
    pub fn extract(&self, body: &JsonValue) -> Option<Vec<Chunk>> {
        let mut node = body;
        for key in self.path {
            node = node.get(key)?;
        }
        let items = node.as_array()?;
        Some(items.iter().filter_map(chunk_from_item).collect())
    }
}

/// Current retrieval API first, then the older search and third-party shapes
pub const SHAPES: [ResponseShape; 4] = [
    ResponseShape::at("data.chunks", &["data", "chunks"]),
    ResponseShape::at("data.rows", &["data", "rows"]),
    ResponseShape::at("chunks", &["chunks"]),
    ResponseShape::at("results", &["results"]),
];

/// Normalizes any known response body into ordered chunks
#[must_use]
pub fn normalize(body: &JsonValue) -> Vec<Chunk> {
    for shape in &SHAPES {
        if let Some(chunks) = shape.extract(body) {
            tracing::debug!(shape = shape.name, chunks = chunks.len(), "matched response shape");
            return chunks;
        }
    }
    tracing::debug!("response matched no known shape");
    Vec::new()
}

fn chunk_from_item(item: &JsonValue) -> Option<Chunk> {
    let text = match item {
        JsonValue::String(text) => text.as_str(),
        JsonValue::Object(_) => TEXT_FIELDS
            .iter()
            .filter_map(|field| item.get(field).and_then(JsonValue::as_str))
            .find(|text| !text.trim().is_empty())?,
        _ => return None,
    };
    if text.trim().is_empty() {
        return None;
    }
    let score = SCORE_FIELDS
        .iter()
        .find_map(|field| item.get(field).and_then(JsonValue::as_f64))
        .unwrap_or(0.0) as f32;
    Some(Chunk::new(text.trim(), score))
}

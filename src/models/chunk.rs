use serde::{Deserialize, Serialize};

/// A contiguous line-range slice of one file, the unit of embedding and
/// vector storage.
///
/// Identity within a collection is `(file_path, chunk_index)`. Chunk indices
/// for a file are contiguous `0..total_chunks`, and `total_chunks` is the
/// same on every chunk of one file version. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub file_path: String,
    pub language: String,
    pub content: String,
    /// 1-based, inclusive.
    pub start_line: u32,
    /// 1-based, inclusive.
    pub end_line: u32,
    /// 0-based position within the file.
    pub chunk_index: u32,
    /// Chunk count for the whole file version this chunk belongs to.
    pub total_chunks: u32,
    pub token_estimate: u32,
    /// Set once the embedding provider has processed the chunk.
    pub embedding: Option<Vec<f32>>,
}

impl CodeChunk {
    /// Stable row id for vector storage: `path:index`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.file_path, self.chunk_index)
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Rough token estimate used for context budgeting: ~4 bytes per token.
pub fn estimate_tokens(content: &str) -> u32 {
    (content.len() as u32).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_combines_path_and_index() {
        let chunk = CodeChunk {
            file_path: "src/auth.py".into(),
            language: "python".into(),
            content: "pass\n".into(),
            start_line: 1,
            end_line: 1,
            chunk_index: 2,
            total_chunks: 3,
            token_estimate: 2,
            embedding: None,
        };
        assert_eq!(chunk.id(), "src/auth.py:2");
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}

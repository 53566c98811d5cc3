//! Port traits for the externally-owned services: embedding provider,
//! vector store, metadata store, and the incremental index registry.
//!
//! Every call through these traits is a suspension point and goes through
//! the resilient invoker at the call site. Backends are pluggable; the
//! production adapters live in `storage/` and `embedder.rs`, and in-memory
//! reference implementations preserving the same contracts back the tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    CodeChunk, FunctionMatch, MetadataStatistics, ProjectRecord, StructuralMetadata,
};

/// Produces fixed-length embedding vectors for text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Order-preserving; the result has the same length as the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn health_check(&self) -> bool;
}

/// Indexes chunks by embedding for similarity search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist chunks into `collection`. Prior chunks of the same file are
    /// replaced, so a re-index supersedes any partial earlier write.
    async fn store_chunks(&self, chunks: &[CodeChunk], collection: &str) -> Result<()>;

    /// Nearest chunks by decreasing similarity. When `query_embedding` is
    /// given the store must use it instead of re-embedding `query`.
    async fn search_similar(
        &self,
        query: &str,
        top_k: usize,
        collection: &str,
        query_embedding: Option<&[f32]>,
    ) -> Result<Vec<CodeChunk>>;

    async fn chunk_count(&self, collection: &str) -> Result<u64>;

    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    async fn delete_collection(&self, collection: &str) -> Result<()>;

    /// Drop all chunks of one file from `collection`.
    async fn delete_file_chunks(&self, file_path: &str, collection: &str) -> Result<()>;
}

/// Holds structural facts per file. One live record per path.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Replaces any prior record for the same file path.
    async fn store_metadata(&self, metadata: &StructuralMetadata) -> Result<()>;

    /// Absence is `None`, not an error.
    async fn get_metadata(&self, file_path: &str) -> Result<Option<StructuralMetadata>>;

    async fn delete_metadata(&self, file_path: &str) -> Result<()>;

    async fn statistics(&self) -> Result<MetadataStatistics>;

    async fn search_functions(&self, substring: &str) -> Result<Vec<FunctionMatch>>;
}

/// Checksum registry gating incremental re-indexing, scoped per project.
#[async_trait]
pub trait IndexRegistryStore: Send + Sync {
    /// Stored content hash for a file, if any.
    async fn get(&self, project_id: &str, file_path: &str) -> Result<Option<String>>;

    /// Record `hash` for a file. Called only after the file's chunks and
    /// metadata are durably persisted — commit-last ordering is what makes
    /// a crash mid-pipeline safe to re-run.
    async fn commit(&self, project_id: &str, file_path: &str, hash: &str) -> Result<()>;

    /// All file paths with a committed checksum for this project.
    async fn list_files(&self, project_id: &str) -> Result<Vec<String>>;

    async fn remove(&self, project_id: &str, file_path: &str) -> Result<()>;

    async fn record_project(&self, project: &ProjectRecord) -> Result<()>;

    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>>;
}

// ---------------------------------------------------------------------------
// In-memory reference implementations (tests only)
// ---------------------------------------------------------------------------

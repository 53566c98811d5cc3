//! Query-time context assembly: merge similarity-retrieved chunks and
//! structural metadata into one `PromptContext` for the reasoning step.
//!
//! The two retrieval legs are independent and independently degradable: a
//! store that stays down through every retry costs its field, never the
//! whole call. A `PromptContext` is always returned.

use std::sync::Arc;

use tracing::Instrument;

use crate::models::{CodeChunk, PromptContext};
use crate::ports::{EmbeddingProvider, MetadataStore, VectorStore};
use crate::resilience::{invoke, RetryPolicy};

/// Extra hits fetched beyond `top_k` so filtering out the file under review
/// still leaves enough related code.
const CURRENT_FILE_HEADROOM: usize = 5;

/// Command to assemble review context for one code snippet.
#[derive(Debug, Clone)]
pub struct AssembleContextCommand {
    pub file_path: String,
    pub code_snippet: String,
    pub language: String,
    pub top_k_similar: usize,
}

pub struct ContextAssembler {
    vector_store: Arc<dyn VectorStore>,
    metadata_store: Arc<dyn MetadataStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    /// Vector-store collection of the project under review.
    collection: String,
}

impl ContextAssembler {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        metadata_store: Arc<dyn MetadataStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        policy: RetryPolicy,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            vector_store,
            metadata_store,
            embedder,
            policy,
            collection: collection.into(),
        }
    }

    /// Assemble context for one snippet. Never fails; degraded retrieval
    /// shows up as unset optional fields and a warning, nothing else.
    pub async fn assemble(&self, command: AssembleContextCommand) -> PromptContext {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "assemble_context",
            %correlation_id,
            file = %command.file_path
        );

        async {
            // Both legs run concurrently; the context merges whatever settled.
            let (related_code, structural_metadata) = tokio::join!(
                self.related_code(&command),
                self.structural_metadata(&command.file_path)
            );

            if related_code.is_none() {
                tracing::debug!("context assembled without related code");
            }
            if structural_metadata.is_none() {
                tracing::debug!("context assembled without structural metadata");
            }

            PromptContext {
                file_path: command.file_path,
                code_snippet: command.code_snippet,
                language: command.language,
                structural_metadata,
                related_code,
                correlation_id,
            }
        }
        .instrument(span)
        .await
    }

    /// Batch variant: input order is preserved and each item degrades on its
    /// own — one file's retrieval failure does not affect another's.
    pub async fn assemble_many(
        &self,
        commands: Vec<AssembleContextCommand>,
    ) -> Vec<PromptContext> {
        futures::future::join_all(commands.into_iter().map(|command| self.assemble(command)))
            .await
    }

    async fn related_code(&self, command: &AssembleContextCommand) -> Option<Vec<CodeChunk>> {
        let embedding = match invoke(&self.policy, "embed_query", || {
            let embedder = self.embedder.clone();
            let snippet = command.code_snippet.clone();
            async move { embedder.embed(&snippet).await }
        })
        .await
        {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed, related code degraded");
                return None;
            }
        };

        let fetch = command.top_k_similar + CURRENT_FILE_HEADROOM;
        let hits = match invoke(&self.policy, "search_similar", || {
            let vector_store = self.vector_store.clone();
            let collection = self.collection.clone();
            let query = command.code_snippet.clone();
            let embedding = embedding.clone();
            async move {
                vector_store
                    .search_similar(&query, fetch, &collection, Some(&embedding))
                    .await
            }
        })
        .await
        {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(error = %err, "similarity search failed, related code degraded");
                return None;
            }
        };

        let related: Vec<CodeChunk> = hits
            .into_iter()
            .filter(|chunk| chunk.file_path != command.file_path)
            .take(command.top_k_similar)
            .collect();
        if related.is_empty() {
            None
        } else {
            Some(related)
        }
    }

    async fn structural_metadata(
        &self,
        file_path: &str,
    ) -> Option<crate::models::StructuralMetadata> {
        match invoke(&self.policy, "get_metadata", || {
            let metadata_store = self.metadata_store.clone();
            let file_path = file_path.to_string();
            async move { metadata_store.get_metadata(&file_path).await }
        })
        .await
        {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(error = %err, "metadata lookup failed, structure degraded");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{FunctionInfo, StructuralMetadata};
    use crate::ports::memory::{
        toy_embedding, MemoryEmbedder, MemoryMetadataStore, MemoryVectorStore,
    };

    const COLLECTION: &str = "chunks_test";

    struct Harness {
        vectors: Arc<MemoryVectorStore>,
        metadata: Arc<MemoryMetadataStore>,
        embedder: Arc<MemoryEmbedder>,
        assembler: ContextAssembler,
    }

    fn harness() -> Harness {
        let vectors = Arc::new(MemoryVectorStore::default());
        let metadata = Arc::new(MemoryMetadataStore::default());
        let embedder = Arc::new(MemoryEmbedder::default());
        let policy = RetryPolicy {
            max_retries: 1,
            initial_delay: std::time::Duration::from_millis(1),
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let assembler = ContextAssembler::new(
            vectors.clone(),
            metadata.clone(),
            embedder.clone(),
            policy,
            COLLECTION,
        );
        Harness {
            vectors,
            metadata,
            embedder,
            assembler,
        }
    }

    fn chunk(file: &str, content: &str) -> CodeChunk {
        CodeChunk {
            file_path: file.to_string(),
            language: "python".to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 10,
            chunk_index: 0,
            total_chunks: 1,
            token_estimate: 4,
            embedding: Some(toy_embedding(content)),
        }
    }

    async fn seed(h: &Harness) {
        h.vectors
            .store_chunks(
                &[
                    chunk("other.py", "def helper(): pass"),
                    chunk("review.py", "def own_code(): pass"),
                    chunk("third.py", "def sibling(): pass"),
                ],
                COLLECTION,
            )
            .await
            .unwrap();
        h.metadata
            .store_metadata(&StructuralMetadata {
                file_path: "review.py".to_string(),
                language: "python".to_string(),
                functions: vec![FunctionInfo {
                    name: "own_code".to_string(),
                    line: 1,
                    parameters: vec![],
                }],
                imports: vec![],
                types: vec![],
            })
            .await
            .unwrap();
    }

    fn command() -> AssembleContextCommand {
        AssembleContextCommand {
            file_path: "review.py".to_string(),
            code_snippet: "def own_code(): pass".to_string(),
            language: "python".to_string(),
            top_k_similar: 5,
        }
    }

    #[tokio::test]
    async fn assembles_both_legs() {
        let h = harness();
        seed(&h).await;

        let context = h.assembler.assemble(command()).await;
        assert!(context.is_complete());

        let related = context.related_code.unwrap();
        // The file under review is filtered out of its own context.
        assert!(related.iter().all(|c| c.file_path != "review.py"));
        assert_eq!(related.len(), 2);

        let meta = context.structural_metadata.unwrap();
        assert_eq!(meta.functions[0].name, "own_code");
        assert!(!context.correlation_id.is_empty());
    }

    #[tokio::test]
    async fn top_k_bounds_related_code() {
        let h = harness();
        seed(&h).await;

        let mut cmd = command();
        cmd.top_k_similar = 1;
        let context = h.assembler.assemble(cmd).await;
        assert_eq!(context.related_code.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vector_store_outage_degrades_only_related_code() {
        let h = harness();
        seed(&h).await;
        h.vectors.fail.set(Some(ErrorKind::Connectivity));

        let context = h.assembler.assemble(command()).await;
        assert!(context.related_code.is_none());
        assert!(context.structural_metadata.is_some());
    }

    #[tokio::test]
    async fn metadata_store_outage_degrades_only_structure() {
        let h = harness();
        seed(&h).await;
        h.metadata.fail.set(Some(ErrorKind::Connectivity));

        let context = h.assembler.assemble(command()).await;
        assert!(context.related_code.is_some());
        assert!(context.structural_metadata.is_none());
    }

    #[tokio::test]
    async fn total_outage_still_returns_a_context() {
        let h = harness();
        seed(&h).await;
        h.vectors.fail.set(Some(ErrorKind::Connectivity));
        h.metadata.fail.set(Some(ErrorKind::Timeout));
        h.embedder.fail.set(Some(ErrorKind::Connectivity));

        let context = h.assembler.assemble(command()).await;
        assert!(context.related_code.is_none());
        assert!(context.structural_metadata.is_none());
        assert_eq!(context.file_path, "review.py");
        assert_eq!(context.code_snippet, "def own_code(): pass");
    }

    #[tokio::test]
    async fn embedding_outage_degrades_related_code() {
        let h = harness();
        seed(&h).await;
        h.embedder.fail.set(Some(ErrorKind::Connectivity));

        let context = h.assembler.assemble(command()).await;
        assert!(context.related_code.is_none());
        assert!(context.structural_metadata.is_some());
    }

    #[tokio::test]
    async fn unknown_file_has_absent_metadata_without_error() {
        let h = harness();
        seed(&h).await;

        let mut cmd = command();
        cmd.file_path = "brand_new.py".to_string();
        let context = h.assembler.assemble(cmd).await;
        assert!(context.structural_metadata.is_none());
        // Related code still works; nothing filters out.
        assert!(context.related_code.is_some());
    }

    #[tokio::test]
    async fn assemble_many_preserves_order_and_degrades_per_item() {
        let h = harness();
        seed(&h).await;

        let commands = vec![
            AssembleContextCommand {
                file_path: "review.py".to_string(),
                code_snippet: "def own_code(): pass".to_string(),
                language: "python".to_string(),
                top_k_similar: 3,
            },
            AssembleContextCommand {
                file_path: "no_metadata.py".to_string(),
                code_snippet: "def orphan(): pass".to_string(),
                language: "python".to_string(),
                top_k_similar: 3,
            },
        ];

        let contexts = h.assembler.assemble_many(commands).await;
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].file_path, "review.py");
        assert_eq!(contexts[1].file_path, "no_metadata.py");
        assert!(contexts[0].structural_metadata.is_some());
        assert!(contexts[1].structural_metadata.is_none());
        assert!(contexts[1].related_code.is_some());
    }
}

//! LanceDB adapter behind the `VectorStore` port. One table per collection;
//! a file's chunks are replaced wholesale on every store, so re-indexing
//! supersedes any partial write from an aborted run.

use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    connect,
    query::{ExecutableQuery, QueryBase},
    Connection, Table,
};

use crate::error::{KestrelError, Result};
use crate::models::CodeChunk;
use crate::ports::VectorStore;

/// Escape a string value for use in a DataFusion SQL filter expression.
/// Doubles single quotes and strips null bytes to prevent injection.
fn escape_filter_string(s: &str) -> String {
    s.replace('\0', "").replace('\'', "''")
}

pub struct LanceVectorStore {
    db: Connection,
    vector_dim: i32,
}

impl LanceVectorStore {
    pub async fn new(db_path: &str, vector_dim: usize) -> Result<Self> {
        std::fs::create_dir_all(db_path)?;
        let db = connect(db_path).execute().await?;
        Ok(Self {
            db,
            vector_dim: vector_dim as i32,
        })
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("file_path", DataType::Utf8, false),
            Field::new("language", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("start_line", DataType::UInt32, false),
            Field::new("end_line", DataType::UInt32, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("total_chunks", DataType::UInt32, false),
            Field::new("token_estimate", DataType::UInt32, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.vector_dim,
                ),
                false,
            ),
        ]))
    }

    async fn open_table(&self, collection: &str) -> Result<Option<Table>> {
        let names = self.db.table_names().execute().await?;
        if !names.contains(&collection.to_string()) {
            return Ok(None);
        }
        Ok(Some(self.db.open_table(collection).execute().await?))
    }

    fn build_batch(&self, chunks: &[CodeChunk]) -> Result<RecordBatch> {
        let mut flat_vectors: Vec<f32> = Vec::with_capacity(chunks.len() * self.vector_dim as usize);
        for chunk in chunks {
            let Some(embedding) = &chunk.embedding else {
                return Err(KestrelError::Validation(format!(
                    "chunk {} has no embedding",
                    chunk.id()
                )));
            };
            if embedding.len() != self.vector_dim as usize {
                return Err(KestrelError::Validation(format!(
                    "chunk {} embedding has {} dims, store expects {}",
                    chunk.id(),
                    embedding.len(),
                    self.vector_dim
                )));
            }
            flat_vectors.extend_from_slice(embedding);
        }

        let ids: ArrayRef = Arc::new(StringArray::from(
            chunks.iter().map(|c| c.id()).collect::<Vec<_>>(),
        ));
        let file_paths: ArrayRef = Arc::new(StringArray::from(
            chunks.iter().map(|c| c.file_path.as_str()).collect::<Vec<_>>(),
        ));
        let languages: ArrayRef = Arc::new(StringArray::from(
            chunks.iter().map(|c| c.language.as_str()).collect::<Vec<_>>(),
        ));
        let contents: ArrayRef = Arc::new(StringArray::from(
            chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>(),
        ));
        let start_lines: ArrayRef = Arc::new(UInt32Array::from(
            chunks.iter().map(|c| c.start_line).collect::<Vec<_>>(),
        ));
        let end_lines: ArrayRef = Arc::new(UInt32Array::from(
            chunks.iter().map(|c| c.end_line).collect::<Vec<_>>(),
        ));
        let chunk_indices: ArrayRef = Arc::new(UInt32Array::from(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
        ));
        let totals: ArrayRef = Arc::new(UInt32Array::from(
            chunks.iter().map(|c| c.total_chunks).collect::<Vec<_>>(),
        ));
        let tokens: ArrayRef = Arc::new(UInt32Array::from(
            chunks.iter().map(|c| c.token_estimate).collect::<Vec<_>>(),
        ));

        let values = Float32Array::from(flat_vectors);
        let item_field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors: ArrayRef = Arc::new(FixedSizeListArray::new(
            item_field,
            self.vector_dim,
            Arc::new(values),
            None,
        ));

        let batch = RecordBatch::try_new(
            self.schema(),
            vec![
                ids,
                file_paths,
                languages,
                contents,
                start_lines,
                end_lines,
                chunk_indices,
                totals,
                tokens,
                vectors,
            ],
        )?;
        Ok(batch)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn store_chunks(&self, chunks: &[CodeChunk], collection: &str) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let batch = self.build_batch(chunks)?;
        let schema = self.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table(collection).await? {
            Some(table) => {
                // Replace rows of every file present in this write.
                let unique_paths: std::collections::HashSet<&str> =
                    chunks.iter().map(|c| c.file_path.as_str()).collect();
                let filter = unique_paths
                    .iter()
                    .map(|p| format!("file_path = '{}'", escape_filter_string(p)))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                table.delete(&filter).await?;
                table.add(Box::new(batches)).execute().await?;
            }
            None => {
                self.db
                    .create_table(collection, Box::new(batches))
                    .execute()
                    .await?;
            }
        }
        Ok(())
    }

    async fn search_similar(
        &self,
        _query: &str,
        top_k: usize,
        collection: &str,
        query_embedding: Option<&[f32]>,
    ) -> Result<Vec<CodeChunk>> {
        let Some(embedding) = query_embedding else {
            // The assembler always embeds the query first; the store does not
            // own an embedder.
            return Err(KestrelError::Validation(
                "search_similar requires a precomputed query embedding".to_string(),
            ));
        };
        let Some(table) = self.open_table(collection).await? else {
            return Ok(Vec::new());
        };

        let batches = table
            .query()
            .nearest_to(embedding)?
            .limit(top_k)
            .execute()
            .await?
            .try_collect::<Vec<_>>()
            .await?;

        let mut hits = Vec::new();
        for batch in batches {
            let (Some(file_paths), Some(languages), Some(contents)) = (
                string_column(&batch, "file_path"),
                string_column(&batch, "language"),
                string_column(&batch, "content"),
            ) else {
                continue;
            };
            let (Some(start_lines), Some(end_lines), Some(indices), Some(totals), Some(tokens)) = (
                u32_column(&batch, "start_line"),
                u32_column(&batch, "end_line"),
                u32_column(&batch, "chunk_index"),
                u32_column(&batch, "total_chunks"),
                u32_column(&batch, "token_estimate"),
            ) else {
                continue;
            };

            for i in 0..batch.num_rows() {
                hits.push(CodeChunk {
                    file_path: file_paths.value(i).to_string(),
                    language: languages.value(i).to_string(),
                    content: contents.value(i).to_string(),
                    start_line: start_lines.value(i),
                    end_line: end_lines.value(i),
                    chunk_index: indices.value(i),
                    total_chunks: totals.value(i),
                    token_estimate: tokens.value(i),
                    embedding: None,
                });
                if hits.len() >= top_k {
                    return Ok(hits);
                }
            }
        }
        Ok(hits)
    }

    async fn chunk_count(&self, collection: &str) -> Result<u64> {
        match self.open_table(collection).await? {
            Some(table) => Ok(table.count_rows(None).await? as u64),
            None => Ok(0),
        }
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let names = self.db.table_names().execute().await?;
        Ok(names.contains(&collection.to_string()))
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        if self.collection_exists(collection).await? {
            self.db.drop_table(collection).await?;
        }
        Ok(())
    }

    async fn delete_file_chunks(&self, file_path: &str, collection: &str) -> Result<()> {
        if let Some(table) = self.open_table(collection).await? {
            table
                .delete(&format!(
                    "file_path = '{}'",
                    escape_filter_string(file_path)
                ))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;
    const COLLECTION: &str = "chunks_test";

    async fn test_store() -> (LanceVectorStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lance");
        let store = LanceVectorStore::new(path.to_str().unwrap(), DIM)
            .await
            .unwrap();
        (store, dir)
    }

    fn chunk(file: &str, index: u32, total: u32, vector: [f32; DIM]) -> CodeChunk {
        CodeChunk {
            file_path: file.to_string(),
            language: "python".to_string(),
            content: format!("{file} body {index}"),
            start_line: index * 10 + 1,
            end_line: index * 10 + 10,
            chunk_index: index,
            total_chunks: total,
            token_estimate: 8,
            embedding: Some(vector.to_vec()),
        }
    }

    #[tokio::test]
    async fn store_and_count() {
        let (store, _dir) = test_store().await;
        assert!(!store.collection_exists(COLLECTION).await.unwrap());
        assert_eq!(store.chunk_count(COLLECTION).await.unwrap(), 0);

        let chunks = vec![
            chunk("a.py", 0, 2, [1.0, 0.0, 0.0, 0.0]),
            chunk("a.py", 1, 2, [0.0, 1.0, 0.0, 0.0]),
        ];
        store.store_chunks(&chunks, COLLECTION).await.unwrap();

        assert!(store.collection_exists(COLLECTION).await.unwrap());
        assert_eq!(store.chunk_count(COLLECTION).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn restore_replaces_file_rows() {
        let (store, _dir) = test_store().await;
        let chunks = vec![
            chunk("a.py", 0, 2, [1.0, 0.0, 0.0, 0.0]),
            chunk("a.py", 1, 2, [0.0, 1.0, 0.0, 0.0]),
        ];
        store.store_chunks(&chunks, COLLECTION).await.unwrap();
        // Same file again: count must not grow.
        store.store_chunks(&chunks, COLLECTION).await.unwrap();
        assert_eq!(store.chunk_count(COLLECTION).await.unwrap(), 2);

        // Another file adds rows.
        let other = vec![chunk("b.py", 0, 1, [0.0, 0.0, 1.0, 0.0])];
        store.store_chunks(&other, COLLECTION).await.unwrap();
        assert_eq!(store.chunk_count(COLLECTION).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn search_orders_by_distance() {
        let (store, _dir) = test_store().await;
        let chunks = vec![
            chunk("near.py", 0, 1, [1.0, 0.0, 0.0, 0.0]),
            chunk("far.py", 0, 1, [0.0, 0.0, 0.0, 1.0]),
            chunk("mid.py", 0, 1, [0.7, 0.7, 0.0, 0.0]),
        ];
        store.store_chunks(&chunks, COLLECTION).await.unwrap();

        let query = [1.0f32, 0.0, 0.0, 0.0];
        let hits = store
            .search_similar("", 2, COLLECTION, Some(&query))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file_path, "near.py");
        assert_eq!(hits[1].file_path, "mid.py");
    }

    #[tokio::test]
    async fn search_without_embedding_is_validation_error() {
        let (store, _dir) = test_store().await;
        let err = store
            .search_similar("query", 3, COLLECTION, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn search_missing_collection_is_empty() {
        let (store, _dir) = test_store().await;
        let query = [1.0f32, 0.0, 0.0, 0.0];
        let hits = store
            .search_similar("", 5, "chunks_absent", Some(&query))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_file_and_collection() {
        let (store, _dir) = test_store().await;
        let chunks = vec![
            chunk("a.py", 0, 1, [1.0, 0.0, 0.0, 0.0]),
            chunk("b.py", 0, 1, [0.0, 1.0, 0.0, 0.0]),
        ];
        store.store_chunks(&chunks, COLLECTION).await.unwrap();

        store.delete_file_chunks("a.py", COLLECTION).await.unwrap();
        assert_eq!(store.chunk_count(COLLECTION).await.unwrap(), 1);

        store.delete_collection(COLLECTION).await.unwrap();
        assert!(!store.collection_exists(COLLECTION).await.unwrap());
        // Deleting a missing collection is a no-op.
        store.delete_collection(COLLECTION).await.unwrap();
    }

    #[tokio::test]
    async fn chunk_without_embedding_is_rejected() {
        let (store, _dir) = test_store().await;
        let mut bad = chunk("a.py", 0, 1, [1.0, 0.0, 0.0, 0.0]);
        bad.embedding = None;
        let err = store.store_chunks(&[bad], COLLECTION).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}

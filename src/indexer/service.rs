//! The indexing pipeline: discovery → checksum gate → structural analysis →
//! chunking → batched embedding → persistence → checksum commit.
//!
//! Files are processed concurrently up to a bounded worker count; each
//! file's pipeline is self-contained and strictly sequential, and a failure
//! in one file is recorded in the report without aborting the run. The
//! checksum commits last, so a crash anywhere earlier only means the next
//! run re-indexes that file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::discovery::scan_directory;
use crate::analyzer::StructuralAnalyzer;
use crate::chunker::{chunk_content, window_spans};
use crate::error::{KestrelError, Result};
use crate::languages::{LanguageRegistry, SupportedLanguage};
use crate::models::{FileFailure, IndexReport, ProjectRecord};
use crate::ports::{EmbeddingProvider, IndexRegistryStore, MetadataStore, VectorStore};
use crate::resilience::{invoke, RetryPolicy};

/// Command to index a codebase root into the stores.
#[derive(Debug, Clone)]
pub struct IndexCodebaseCommand {
    pub root_path: PathBuf,
    /// Explicit project id (monorepo sub-projects); derived from the root
    /// path when absent.
    pub project_id: Option<String>,
    /// Force one language profile for every file instead of per-extension
    /// resolution.
    pub language: Option<SupportedLanguage>,
    pub chunk_size: Option<u32>,
    pub chunk_overlap: Option<u32>,
    /// Bypass the checksum gate; commit ordering is unchanged.
    pub force_reindex: bool,
}

impl IndexCodebaseCommand {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            project_id: None,
            language: None,
            chunk_size: None,
            chunk_overlap: None,
            force_reindex: false,
        }
    }
}

/// Per-run parameters resolved once and shared by the file workers.
struct IndexPlan {
    project_id: String,
    collection: String,
    language: Option<SupportedLanguage>,
    chunk_size: Option<u32>,
    chunk_overlap: Option<u32>,
    force_reindex: bool,
}

enum FileOutcome {
    Indexed { chunks: u64 },
    Skipped,
}

#[derive(Clone)]
pub struct IndexerService {
    registry_store: Arc<dyn IndexRegistryStore>,
    vector_store: Arc<dyn VectorStore>,
    metadata_store: Arc<dyn MetadataStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    languages: Arc<LanguageRegistry>,
    analyzer: Arc<StructuralAnalyzer>,
    policy: RetryPolicy,
    parallel_files: usize,
    max_file_bytes: u64,
    extra_ignores: Vec<String>,
}

impl IndexerService {
    pub fn new(
        registry_store: Arc<dyn IndexRegistryStore>,
        vector_store: Arc<dyn VectorStore>,
        metadata_store: Arc<dyn MetadataStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        languages: Arc<LanguageRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry_store,
            vector_store,
            metadata_store,
            embedder,
            languages,
            analyzer: Arc::new(StructuralAnalyzer::new()),
            policy,
            parallel_files: 4,
            max_file_bytes: 2 * 1024 * 1024,
            extra_ignores: Vec::new(),
        }
    }

    pub fn with_parallel_files(mut self, parallel_files: usize) -> Self {
        self.parallel_files = parallel_files.max(1);
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    pub fn with_extra_ignores(mut self, extra_ignores: Vec<String>) -> Self {
        self.extra_ignores = extra_ignores;
        self
    }

    /// Index a codebase. Per-file failures are recorded in the report;
    /// only command-level problems (bad root, bad chunk settings) error out.
    pub async fn index(&self, command: IndexCodebaseCommand) -> Result<IndexReport> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("index_codebase", %correlation_id);
        self.index_inner(command).instrument(span).await
    }

    async fn index_inner(&self, command: IndexCodebaseCommand) -> Result<IndexReport> {
        if !command.root_path.is_dir() {
            return Err(KestrelError::Validation(format!(
                "codebase root is not a directory: {}",
                command.root_path.display()
            )));
        }
        self.validate_chunk_settings(&command)?;

        let root = command
            .root_path
            .canonicalize()
            .map_err(KestrelError::Io)?;
        let project_id = command
            .project_id
            .clone()
            .unwrap_or_else(|| ProjectRecord::derive_id(&root.to_string_lossy()));
        let collection = ProjectRecord::collection_for(&project_id);

        let plan = Arc::new(IndexPlan {
            project_id: project_id.clone(),
            collection: collection.clone(),
            language: command.language,
            chunk_size: command.chunk_size,
            chunk_overlap: command.chunk_overlap,
            force_reindex: command.force_reindex,
        });

        let files = scan_directory(&root, &self.languages, &self.extra_ignores);
        tracing::info!(%project_id, files = files.len(), "discovered source files");

        let mut report = IndexReport::new(&project_id);
        report.files_seen = files.len() as u64;

        let semaphore = Arc::new(Semaphore::new(self.parallel_files));
        let mut workers: JoinSet<(String, Result<FileOutcome>)> = JoinSet::new();

        for path in &files {
            let relative = relative_key(&root, path);
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let service = self.clone();
            let plan = plan.clone();
            let path = path.clone();
            workers.spawn(async move {
                let outcome = service.process_file(&path, &relative, &plan).await;
                drop(permit);
                (relative, outcome)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(FileOutcome::Indexed { chunks }))) => {
                    report.files_indexed += 1;
                    report.total_chunks += chunks;
                }
                Ok((_, Ok(FileOutcome::Skipped))) => {
                    report.files_skipped += 1;
                }
                Ok((relative, Err(err))) => {
                    tracing::warn!(file = %relative, error = %err, "file failed to index");
                    report.files_failed.push(FileFailure::new(relative, &err));
                }
                Err(join_err) => {
                    let err = KestrelError::Storage(format!("indexing task failed: {join_err}"));
                    report
                        .files_failed
                        .push(FileFailure::new("<unknown>", &err));
                }
            }
        }

        report.files_deleted = self
            .reconcile_deleted(&root, &files, &project_id, &collection)
            .await;

        let project = ProjectRecord {
            project_id: project_id.clone(),
            root_path: root.to_string_lossy().to_string(),
            collection,
            last_indexed_at: chrono::Utc::now().timestamp(),
        };
        if let Err(err) = self.registry_store.record_project(&project).await {
            tracing::warn!(error = %err, "failed to record project entry");
        }

        tracing::info!(
            %project_id,
            indexed = report.files_indexed,
            skipped = report.files_skipped,
            failed = report.files_failed.len(),
            chunks = report.total_chunks,
            deleted = report.files_deleted,
            "indexing run complete"
        );
        Ok(report)
    }

    /// Bad chunk settings fail before any I/O: resolve the effective
    /// size/overlap for every profile that could be used and dry-run the
    /// window math.
    fn validate_chunk_settings(&self, command: &IndexCodebaseCommand) -> Result<()> {
        for language in self.languages.supported_languages() {
            if command.language.is_some() && command.language != Some(language) {
                continue;
            }
            let Some(profile) = self.languages.by_language(language) else {
                continue;
            };
            let size = command.chunk_size.unwrap_or(profile.chunk_size);
            let overlap = command.chunk_overlap.unwrap_or(profile.chunk_overlap);
            window_spans(1, size, overlap)?;
        }
        Ok(())
    }

    /// The per-file pipeline, strictly sequential: analyze → chunk → embed →
    /// persist chunks → persist metadata → commit checksum.
    async fn process_file(
        &self,
        path: &Path,
        relative: &str,
        plan: &IndexPlan,
    ) -> Result<FileOutcome> {
        let file_meta = tokio::fs::metadata(path).await?;
        if file_meta.len() > self.max_file_bytes {
            tracing::debug!(file = relative, bytes = file_meta.len(), "skipping oversized file");
            return Ok(FileOutcome::Skipped);
        }

        let content = tokio::fs::read_to_string(path).await?;
        let hash = blake3::hash(content.as_bytes()).to_hex().to_string();

        if !plan.force_reindex {
            let stored = invoke(&self.policy, "registry_get", || {
                let registry = self.registry_store.clone();
                let project_id = plan.project_id.clone();
                let relative = relative.to_string();
                async move { registry.get(&project_id, &relative).await }
            })
            .await?;
            if stored.as_deref() == Some(hash.as_str()) {
                tracing::debug!(file = relative, "unchanged, skipping");
                return Ok(FileOutcome::Skipped);
            }
        }

        let profile = match plan.language {
            Some(language) => self.languages.by_language(language),
            None => path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(|ext| self.languages.resolve(ext)),
        }
        .ok_or_else(|| {
            KestrelError::Validation(format!("no language profile for {relative}"))
        })?;

        let language = profile.language;
        let chunk_size = plan.chunk_size.unwrap_or(profile.chunk_size);
        let chunk_overlap = plan.chunk_overlap.unwrap_or(profile.chunk_overlap);

        // Analysis cannot fail a file; unparsable source yields empty facts.
        let metadata = self
            .analyzer
            .analyze(relative, &content, language);

        let chunks = chunk_content(&content, relative, language.as_str(), chunk_size, chunk_overlap)?;
        let chunk_count = chunks.len() as u64;

        let chunks = if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let embeddings = invoke(&self.policy, "embed_batch", || {
                let embedder = self.embedder.clone();
                let texts = texts.clone();
                async move { embedder.embed_batch(&texts).await }
            })
            .await?;
            if embeddings.len() != chunks.len() {
                return Err(KestrelError::Embedding(format!(
                    "provider returned {} vectors for {} chunks",
                    embeddings.len(),
                    chunks.len()
                )));
            }
            chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| chunk.with_embedding(embedding))
                .collect()
        };

        if !chunks.is_empty() {
            invoke(&self.policy, "store_chunks", || {
                let vector_store = self.vector_store.clone();
                let chunks = chunks.clone();
                let collection = plan.collection.clone();
                async move { vector_store.store_chunks(&chunks, &collection).await }
            })
            .await?;
        }

        invoke(&self.policy, "store_metadata", || {
            let metadata_store = self.metadata_store.clone();
            let metadata = metadata.clone();
            async move { metadata_store.store_metadata(&metadata).await }
        })
        .await?;

        // Commit last. Everything above is re-runnable; this is not reached
        // unless both stores accepted the file.
        invoke(&self.policy, "registry_commit", || {
            let registry = self.registry_store.clone();
            let project_id = plan.project_id.clone();
            let relative = relative.to_string();
            let hash = hash.clone();
            async move { registry.commit(&project_id, &relative, &hash).await }
        })
        .await?;

        tracing::debug!(file = relative, chunks = chunk_count, "indexed");
        Ok(FileOutcome::Indexed {
            chunks: chunk_count,
        })
    }

    /// Drop registry entries, chunks, and metadata for files that no longer
    /// exist on disk. Best-effort; failures are logged, not raised.
    async fn reconcile_deleted(
        &self,
        root: &Path,
        current_files: &[PathBuf],
        project_id: &str,
        collection: &str,
    ) -> u64 {
        let current: HashSet<String> = current_files
            .iter()
            .map(|p| relative_key(root, p))
            .collect();

        let registered = match self.registry_store.list_files(project_id).await {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(error = %err, "could not list registry for reconciliation");
                return 0;
            }
        };

        let mut deleted = 0;
        for stale in registered.into_iter().filter(|f| !current.contains(f)) {
            tracing::info!(file = %stale, "reconciling deleted file");
            if let Err(err) = self.vector_store.delete_file_chunks(&stale, collection).await {
                tracing::warn!(file = %stale, error = %err, "chunk cleanup failed");
                continue;
            }
            if let Err(err) = self.metadata_store.delete_metadata(&stale).await {
                tracing::warn!(file = %stale, error = %err, "metadata cleanup failed");
                continue;
            }
            if let Err(err) = self.registry_store.remove(project_id, &stale).await {
                tracing::warn!(file = %stale, error = %err, "registry cleanup failed");
                continue;
            }
            deleted += 1;
        }
        deleted
    }
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ports::memory::{
        MemoryEmbedder, MemoryMetadataStore, MemoryRegistry, MemoryVectorStore,
    };
    use std::fs;
    use std::sync::atomic::Ordering;

    struct Harness {
        registry: Arc<MemoryRegistry>,
        vectors: Arc<MemoryVectorStore>,
        metadata: Arc<MemoryMetadataStore>,
        embedder: Arc<MemoryEmbedder>,
        service: IndexerService,
    }

    fn harness() -> Harness {
        let registry = Arc::new(MemoryRegistry::default());
        let vectors = Arc::new(MemoryVectorStore::default());
        let metadata = Arc::new(MemoryMetadataStore::default());
        let embedder = Arc::new(MemoryEmbedder::default());
        let policy = RetryPolicy {
            max_retries: 1,
            initial_delay: std::time::Duration::from_millis(1),
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let service = IndexerService::new(
            registry.clone(),
            vectors.clone(),
            metadata.clone(),
            embedder.clone(),
            Arc::new(LanguageRegistry::builtin()),
            policy,
        )
        .with_parallel_files(2);
        Harness {
            registry,
            vectors,
            metadata,
            embedder,
            service,
        }
    }

    const DEPLOY_PY: &str = r#"import os

def deploy_release(target):
    os.system("rsync -a build/ " + target)

def current_branch():
    return os.popen("git branch --show-current").read()
"#;

    const MATHS_PY: &str = r#"def add(a, b):
    return a + b

def shout(text):
    return text.upper() + "!"
"#;

    fn write_sample_project(dir: &Path) {
        fs::write(dir.join("deploy.py"), DEPLOY_PY).unwrap();
        fs::write(dir.join("maths.py"), MATHS_PY).unwrap();
    }

    fn command(dir: &Path) -> IndexCodebaseCommand {
        IndexCodebaseCommand {
            chunk_size: Some(20),
            chunk_overlap: Some(5),
            ..IndexCodebaseCommand::new(dir)
        }
    }

    #[tokio::test]
    async fn end_to_end_indexes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();

        let report = h.service.index(command(dir.path())).await.unwrap();
        assert_eq!(report.files_seen, 2);
        assert_eq!(report.files_indexed, 2);
        assert!(report.files_failed.is_empty());
        assert!(report.total_chunks > 0);

        let collection = ProjectRecord::collection_for(&report.project_id);
        assert!(h.vectors.chunk_count(&collection).await.unwrap() > 0);

        // Structural lookup surfaces the function doing the command invocation.
        let meta = h.metadata.get_metadata("deploy.py").await.unwrap().unwrap();
        assert!(meta.functions.iter().any(|f| f.name == "deploy_release"));

        let hits = h.metadata.search_functions("deploy").await.unwrap();
        assert_eq!(hits[0].function_name, "deploy_release");
    }

    #[tokio::test]
    async fn second_run_skips_unchanged_files() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();

        let first = h.service.index(command(dir.path())).await.unwrap();
        assert_eq!(first.files_indexed, 2);
        let collection = ProjectRecord::collection_for(&first.project_id);
        let count_after_first = h.vectors.chunk_count(&collection).await.unwrap();
        let embed_calls_after_first = h.embedder.calls.load(Ordering::SeqCst);

        let second = h.service.index(command(dir.path())).await.unwrap();
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_skipped, 2);
        assert!(second.files_failed.is_empty());

        // Idempotence: no new chunks, no new embedding calls.
        assert_eq!(
            h.vectors.chunk_count(&collection).await.unwrap(),
            count_after_first
        );
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embed_calls_after_first);
    }

    #[tokio::test]
    async fn changed_file_is_reindexed() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();
        h.service.index(command(dir.path())).await.unwrap();

        fs::write(
            dir.path().join("maths.py"),
            "def multiply(a, b):\n    return a * b\n",
        )
        .unwrap();

        let report = h.service.index(command(dir.path())).await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.files_skipped, 1);

        let meta = h.metadata.get_metadata("maths.py").await.unwrap().unwrap();
        let names: Vec<&str> = meta.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["multiply"]);
    }

    #[tokio::test]
    async fn force_reindex_bypasses_checksum_gate() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();
        h.service.index(command(dir.path())).await.unwrap();

        let mut cmd = command(dir.path());
        cmd.force_reindex = true;
        let report = h.service.index(cmd).await.unwrap();
        assert_eq!(report.files_indexed, 2);
        assert_eq!(report.files_skipped, 0);
    }

    #[tokio::test]
    async fn store_failure_is_recorded_and_checksum_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();

        h.vectors.fail.set(Some(ErrorKind::Connectivity));
        let report = h.service.index(command(dir.path())).await.unwrap();
        assert_eq!(report.files_indexed, 0);
        assert_eq!(report.files_failed.len(), 2);
        for failure in &report.files_failed {
            assert_eq!(failure.error_kind(), Some(ErrorKind::Connectivity));
        }

        // Commit ordering: nothing was committed, so the next run retries.
        assert!(h
            .registry
            .get(&report.project_id, "deploy.py")
            .await
            .unwrap()
            .is_none());

        h.vectors.fail.set(None);
        let retry = h.service.index(command(dir.path())).await.unwrap();
        assert_eq!(retry.files_indexed, 2);
        assert!(retry.files_failed.is_empty());
    }

    #[tokio::test]
    async fn metadata_failure_leaves_checksum_uncommitted() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();

        h.metadata.fail.set(Some(ErrorKind::Connectivity));
        let report = h.service.index(command(dir.path())).await.unwrap();
        assert_eq!(report.files_failed.len(), 2);
        assert!(h
            .registry
            .get(&report.project_id, "maths.py")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn bad_chunk_settings_fail_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();

        let mut cmd = command(dir.path());
        cmd.chunk_size = Some(10);
        cmd.chunk_overlap = Some(10);
        let err = h.service.index(cmd).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_root_is_a_validation_error() {
        let h = harness();
        let err = h
            .service
            .index(IndexCodebaseCommand::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn deleted_files_are_reconciled() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();
        let first = h.service.index(command(dir.path())).await.unwrap();
        let collection = ProjectRecord::collection_for(&first.project_id);

        fs::remove_file(dir.path().join("maths.py")).unwrap();
        let report = h.service.index(command(dir.path())).await.unwrap();
        assert_eq!(report.files_deleted, 1);

        assert!(h.metadata.get_metadata("maths.py").await.unwrap().is_none());
        assert!(h
            .registry
            .get(&report.project_id, "maths.py")
            .await
            .unwrap()
            .is_none());
        // Only deploy.py's chunks remain.
        let remaining = h.vectors.chunk_count(&collection).await.unwrap();
        assert!(remaining > 0);
        let hits = h
            .vectors
            .search_similar("multiply", 10, &collection, None)
            .await
            .unwrap();
        assert!(hits.iter().all(|c| c.file_path != "maths.py"));
    }

    #[tokio::test]
    async fn language_override_applies_to_all_files() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();

        let mut cmd = command(dir.path());
        cmd.language = Some(SupportedLanguage::Python);
        let report = h.service.index(cmd).await.unwrap();
        assert_eq!(report.files_indexed, 2);

        let meta = h.metadata.get_metadata("deploy.py").await.unwrap().unwrap();
        assert_eq!(meta.language, "python");
    }

    #[tokio::test]
    async fn project_record_is_written_after_run() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let h = harness();
        let report = h.service.index(command(dir.path())).await.unwrap();

        let project = h
            .registry
            .get_project(&report.project_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.collection, ProjectRecord::collection_for(&report.project_id));
        assert!(project.last_indexed_at > 0);
    }

    #[tokio::test]
    async fn chunk_invariants_hold_in_stored_chunks() {
        let dir = tempfile::tempdir().unwrap();
        // 45 lines to force multiple windows at size 20 / overlap 5.
        let body: String = (1..=45).map(|i| format!("x{i} = {i}\n")).collect();
        fs::write(dir.path().join("long.py"), body).unwrap();
        let h = harness();

        let report = h.service.index(command(dir.path())).await.unwrap();
        let collection = ProjectRecord::collection_for(&report.project_id);
        let stored = h
            .vectors
            .search_similar("x1", 100, &collection, None)
            .await
            .unwrap();

        let total = stored[0].total_chunks;
        assert_eq!(stored.len() as u32, total);
        let mut indices: Vec<u32> = stored.iter().map(|c| c.chunk_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..total).collect::<Vec<_>>());
        assert!(stored.iter().all(|c| c.total_chunks == total));
    }
}

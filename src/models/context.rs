use serde::{Deserialize, Serialize};

use super::chunk::CodeChunk;
use super::structural::StructuralMetadata;

/// Query-time context bundle handed to the external reasoning step.
///
/// Built fresh per request, never persisted. Fields backed by a store that
/// was unavailable are left unset — a degraded context is still a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContext {
    pub file_path: String,
    pub code_snippet: String,
    pub language: String,
    pub structural_metadata: Option<StructuralMetadata>,
    pub related_code: Option<Vec<CodeChunk>>,
    /// Correlation id of the command that produced this context.
    pub correlation_id: String,
}

impl PromptContext {
    /// True when both retrieval legs populated their field.
    pub fn is_complete(&self) -> bool {
        self.structural_metadata.is_some() && self.related_code.is_some()
    }
}

/// Aggregate numbers over the metadata store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataStatistics {
    pub total_files: u64,
    pub total_functions: u64,
    /// language → file count.
    pub language_breakdown: std::collections::HashMap<String, u64>,
}

/// One hit from a function-name substring search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMatch {
    pub file_path: String,
    pub function_name: String,
    pub line: u32,
}

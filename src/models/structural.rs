use serde::{Deserialize, Serialize};

/// A function or method declaration surfaced by the structural analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// 1-based declaration line.
    pub line: u32,
    pub parameters: Vec<String>,
}

/// An import/include statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportInfo {
    /// The statement text as written.
    pub statement: String,
    /// 1-based line of the statement.
    pub line: u32,
    /// Resolved module name where syntactically determinable, else empty.
    pub module: String,
}

/// Structural facts for one file. One live record per file path; a re-index
/// replaces the record wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralMetadata {
    pub file_path: String,
    pub language: String,
    pub functions: Vec<FunctionInfo>,
    pub imports: Vec<ImportInfo>,
    /// Class/struct/interface/type names declared in the file.
    pub types: Vec<String>,
}

impl StructuralMetadata {
    /// Empty record — what the analyzer yields for unparsable source.
    pub fn empty(file_path: &str, language: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            language: language.to_string(),
            functions: Vec::new(),
            imports: Vec::new(),
            types: Vec::new(),
        }
    }

}

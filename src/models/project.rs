use serde::{Deserialize, Serialize};

/// Registry entry for an indexed project. Collection naming isolates
/// projects that share one storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project_id: String,
    pub root_path: String,
    /// Vector-store collection holding this project's chunks.
    pub collection: String,
    /// Unix seconds of the last completed index run.
    pub last_indexed_at: i64,
}

impl ProjectRecord {
    /// Derive the stable project id for a root path: 16 hex chars of its
    /// content hash. Canonicalization happens at the command layer.
    pub fn derive_id(root_path: &str) -> String {
        blake3::hash(root_path.as_bytes()).to_hex()[..16].to_string()
    }

    /// Collection name for a project's chunks.
    pub fn collection_for(project_id: &str) -> String {
        format!("chunks_{project_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_id_is_stable_and_short() {
        let a = ProjectRecord::derive_id("/work/api");
        let b = ProjectRecord::derive_id("/work/api");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, ProjectRecord::derive_id("/work/web"));
    }
}

//! Source-file discovery: a gitignore-aware walk filtered to registered
//! language extensions.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::languages::LanguageRegistry;

/// Walk `root` and collect files whose extension has a registered profile.
/// Honors .gitignore plus `extra_ignores` globs.
pub fn scan_directory(
    root: &Path,
    registry: &LanguageRegistry,
    extra_ignores: &[String],
) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true);

    let mut overrides = ignore::overrides::OverrideBuilder::new(root);
    for pattern in extra_ignores {
        // "!pattern" in an override means "ignore this".
        let _ = overrides.add(&format!("!{}", pattern));
    }
    if let Ok(ov) = overrides.build() {
        builder.overrides(ov);
    }

    let mut files = Vec::new();
    for entry in builder.build().flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if registry.resolve(ext).is_some() {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_filters_by_registered_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("b.rs"), "fn main() {}\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "hello\n").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.go"), "package sub\n").unwrap();

        let registry = LanguageRegistry::builtin();
        let files = scan_directory(dir.path(), &registry, &[]);
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.py", "b.rs", "c.go"]);
    }

    #[test]
    fn extra_ignores_exclude_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("vendor")).unwrap();
        fs::write(dir.path().join("vendor/dep.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("main.py"), "x = 1\n").unwrap();

        let registry = LanguageRegistry::builtin();
        let files = scan_directory(dir.path(), &registry, &["vendor/**".to_string()]);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.py"));
    }

    #[test]
    fn hidden_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".secret.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("open.py"), "x = 1\n").unwrap();

        let registry = LanguageRegistry::builtin();
        let files = scan_directory(dir.path(), &registry, &[]);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("open.py"));
    }
}

//! Language profiles: the closed set of languages kestrel understands and
//! the static extension → profile lookup built once at startup.

pub mod go;
pub mod python;
pub mod rust;
pub mod typescript;

use std::collections::HashMap;

use crate::error::{KestrelError, Result};

/// Supported languages — a closed set; adding a language means adding a
/// variant and registering its profile, nothing is discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedLanguage {
    Rust,
    Python,
    TypeScript,
    Go,
}

impl SupportedLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::Go => "go",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "rust" => Some(Self::Rust),
            "python" => Some(Self::Python),
            "typescript" | "javascript" => Some(Self::TypeScript),
            "go" => Some(Self::Go),
            _ => None,
        }
    }
}

impl std::fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-language profile: chunking defaults plus the review context
/// (vulnerability taxonomy, prompt template ids) handed to the reasoning
/// collaborator. Loaded once; the registry is read-only while indexing runs
/// so chunk-size decisions stay reproducible within a run.
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub language: SupportedLanguage,
    pub extensions: &'static [&'static str],
    /// Default lines per chunk.
    pub chunk_size: u32,
    /// Default overlapping lines between consecutive chunks.
    pub chunk_overlap: u32,
    /// Vulnerability categories the reviewer should weigh for this language.
    /// Context for the reasoning step, not matching rules.
    pub vulnerability_categories: &'static [&'static str],
    /// Identifier of the system prompt template for this language.
    pub system_prompt_id: &'static str,
    /// Identifier of the finding-validation prompt template.
    pub validation_prompt_id: &'static str,
}

/// Extension → profile table. At most one profile per extension.
pub struct LanguageRegistry {
    profiles: Vec<LanguageProfile>,
    by_extension: HashMap<&'static str, usize>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self {
            profiles: Vec::new(),
            by_extension: HashMap::new(),
        }
    }

    /// Registry with all built-in profiles.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for profile in [
            rust::profile(),
            python::profile(),
            typescript::profile(),
            go::profile(),
        ] {
            registry
                .register(profile)
                .expect("built-in profiles must not collide");
        }
        registry
    }

    /// Register a profile. Fails if any of its extensions is already claimed;
    /// on failure nothing is registered.
    pub fn register(&mut self, profile: LanguageProfile) -> Result<()> {
        for ext in profile.extensions {
            if self.by_extension.contains_key(ext) {
                return Err(KestrelError::Configuration(format!(
                    "extension '.{ext}' is already registered"
                )));
            }
        }
        let idx = self.profiles.len();
        for ext in profile.extensions {
            self.by_extension.insert(ext, idx);
        }
        self.profiles.push(profile);
        Ok(())
    }

    /// Look up the profile claiming `extension` (without the leading dot).
    pub fn resolve(&self, extension: &str) -> Option<&LanguageProfile> {
        self.by_extension
            .get(extension)
            .map(|&idx| &self.profiles[idx])
    }

    /// Profile for a language named explicitly (CLI override path).
    pub fn by_language(&self, language: SupportedLanguage) -> Option<&LanguageProfile> {
        self.profiles.iter().find(|p| p.language == language)
    }

    pub fn supported_languages(&self) -> Vec<SupportedLanguage> {
        self.profiles.iter().map(|p| p.language).collect()
    }

    pub fn profiles(&self) -> &[LanguageProfile] {
        &self.profiles
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

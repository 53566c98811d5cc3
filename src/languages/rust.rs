use super::{LanguageProfile, SupportedLanguage};

pub(crate) fn profile() -> LanguageProfile {
    LanguageProfile {
        language: SupportedLanguage::Rust,
        extensions: &["rs"],
        chunk_size: 60,
        chunk_overlap: 12,
        vulnerability_categories: &[
            "Unsafe Code Blocks",
            "Command Injection",
            "SQL Injection",
            "Path Traversal",
            "Deserialization Issues",
            "Cryptographic Issues",
            "Integer Overflow/Underflow",
            "FFI Issues",
            "Authentication/Authorization",
            "Denial of Service",
            "SSRF",
            "Race Conditions",
            "Panic Handling",
        ],
        system_prompt_id: "review.rust.system",
        validation_prompt_id: "review.rust.validate",
    }
}

use super::{LanguageProfile, SupportedLanguage};

pub(crate) fn profile() -> LanguageProfile {
    LanguageProfile {
        language: SupportedLanguage::Go,
        extensions: &["go"],
        chunk_size: 55,
        chunk_overlap: 10,
        vulnerability_categories: &[
            "Command Injection",
            "SQL Injection",
            "Path Traversal",
            "SSRF",
            "Insecure Deserialization",
            "Cryptographic Issues",
            "Integer Overflow",
            "Race Conditions",
            "Authentication/Authorization",
            "Template Injection",
            "Hardcoded Secrets",
            "Denial of Service",
        ],
        system_prompt_id: "review.go.system",
        validation_prompt_id: "review.go.validate",
    }
}

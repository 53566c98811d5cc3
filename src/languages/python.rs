use super::{LanguageProfile, SupportedLanguage};

pub(crate) fn profile() -> LanguageProfile {
    LanguageProfile {
        language: SupportedLanguage::Python,
        extensions: &["py", "pyw"],
        chunk_size: 50,
        chunk_overlap: 10,
        vulnerability_categories: &[
            "Command Injection",
            "SQL Injection",
            "Code Injection (eval/exec)",
            "Deserialization (pickle)",
            "Path Traversal",
            "SSRF",
            "XXE",
            "Cryptographic Issues",
            "Authentication/Authorization",
            "Template Injection",
            "Insecure Randomness",
            "Hardcoded Secrets",
            "Open Redirect",
            "CSRF",
        ],
        system_prompt_id: "review.python.system",
        validation_prompt_id: "review.python.validate",
    }
}

use super::{LanguageProfile, SupportedLanguage};

// One profile covers TypeScript and JavaScript; both parse with the
// TypeScript grammar.
pub(crate) fn profile() -> LanguageProfile {
    LanguageProfile {
        language: SupportedLanguage::TypeScript,
        extensions: &["ts", "tsx", "js", "jsx", "mjs"],
        chunk_size: 50,
        chunk_overlap: 10,
        vulnerability_categories: &[
            "Cross-Site Scripting (XSS)",
            "Prototype Pollution",
            "Command Injection",
            "SQL/NoSQL Injection",
            "Code Injection (eval)",
            "Path Traversal",
            "SSRF",
            "Insecure Deserialization",
            "Authentication/Authorization",
            "Open Redirect",
            "CSRF",
            "Hardcoded Secrets",
            "Regular Expression DoS",
        ],
        system_prompt_id: "review.typescript.system",
        validation_prompt_id: "review.typescript.validate",
    }
}

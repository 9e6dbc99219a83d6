//! Prompt used by the text-structuring step.
//!
//! Callers can override it via
//! [`crate::config::StructuringConfig::prompt_template`]; the constant here is
//! used only when no override is provided.

/// Placeholder replaced with the chunk of OCR text.
pub const TEXT_PLACEHOLDER: &str = "{extracted_text}";

/// Default prompt asking the model to restructure raw OCR text.
pub const STRUCTURE_PROMPT: &str = r#"Structure the following text into a readable, organized format:

{extracted_text}

Ensure proper formatting without introductory or concluding sentences like "This is a version of your text."
Present the key information clearly and concisely."#;

/// Substitute `chunk` into `template` (or the default prompt).
pub fn render_prompt(template: Option<&str>, chunk: &str) -> String {
    template
        .unwrap_or(STRUCTURE_PROMPT)
        .replace(TEXT_PLACEHOLDER, chunk)
}

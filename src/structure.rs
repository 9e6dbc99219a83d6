//! Optional second step: restructure raw OCR text with a language model.
//!
//! OCR output is a flat stream of lines with stray hyphenation and broken
//! layout. This module cuts it into chunks that fit the model's context,
//! sends each chunk through a fixed prompt, strips reasoning blocks and
//! stray fences from the answers, and joins them with a blank line.
//!
//! Chunks are sent one at a time. The first failed request ends the run;
//! chunks already structured are kept and the failure is reported on the
//! returned [`StructuredText`] instead of as an `Err`.

use crate::config::StructuringConfig;
use crate::error::ExtractError;
use crate::pipeline::postprocess::clean_structured;
use crate::prompts::render_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info};

/// Default model for named providers and the `OPENAI_API_KEY` shortcut.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Separator between structured chunks in the final text.
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// A failed structuring request.
#[derive(Debug, Error)]
pub enum StructureError {
    /// The model call itself failed (network, quota, auth, …).
    #[error("LLM request failed: {0}")]
    Request(String),

    /// The model answered with nothing usable.
    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// Opaque `structure(prompt) -> text` service.
#[async_trait]
pub trait StructuringBackend: Send + Sync {
    /// Send one fully rendered prompt and return the raw answer.
    async fn complete(&self, prompt: &str) -> Result<String, StructureError>;
}

// ── Chunking ─────────────────────────────────────────────────────────────

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Runs of whitespace (newlines included) collapse to a single space and
/// words are packed greedily. A word longer than `max_chars` is cut into
/// `max_chars`-sized pieces. Whitespace-only input yields no chunks.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(max_chars) {
            let piece_len = piece.len();
            let needed = if current_len == 0 {
                piece_len
            } else {
                current_len + 1 + piece_len
            };

            if needed > max_chars && current_len > 0 {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(piece);
            current_len += piece_len;
        }
    }

    if current_len > 0 {
        chunks.push(current);
    }
    chunks
}

// ── Result ───────────────────────────────────────────────────────────────

/// Outcome of one structuring run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredText {
    /// Cleaned chunk answers joined by [`CHUNK_SEPARATOR`].
    pub text: String,
    pub chunks_total: usize,
    /// Chunks answered before the run ended.
    pub chunks_completed: usize,
    /// Why the run stopped early, if it did.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StructuredText {
    /// Every chunk was structured.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.chunks_completed == self.chunks_total
    }

    /// At least one chunk was structured, which is what makes a run worth
    /// saving.
    pub fn has_output(&self) -> bool {
        self.chunks_completed > 0
    }
}

// ── Structurer ───────────────────────────────────────────────────────────

/// Chunks text and feeds it through a [`StructuringBackend`].
pub struct Structurer {
    backend: Arc<dyn StructuringBackend>,
    max_chars: usize,
    prompt_template: Option<String>,
}

impl Structurer {
    /// Structurer over the edgequake-llm provider resolved from `config`.
    pub fn from_config(config: &StructuringConfig) -> Result<Self, ExtractError> {
        let backend = LlmBackend::from_config(config)?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Structurer over any backend, with chunking and prompt from `config`.
    pub fn with_backend(config: &StructuringConfig, backend: Arc<dyn StructuringBackend>) -> Self {
        Self {
            backend,
            max_chars: config.max_chars_per_chunk(),
            prompt_template: config.prompt_template.clone(),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Structure `text`, chunk by chunk.
    pub async fn structure(&self, text: &str) -> StructuredText {
        let start = Instant::now();
        let chunks = split_into_chunks(text, self.max_chars);
        let chunks_total = chunks.len();
        info!(
            "Structuring {} chars in {} chunk(s) of at most {} chars",
            text.chars().count(),
            chunks_total,
            self.max_chars
        );

        let mut answers = Vec::with_capacity(chunks_total);
        let mut failure = None;

        for (i, chunk) in chunks.iter().enumerate() {
            let prompt = render_prompt(self.prompt_template.as_deref(), chunk);
            match self.backend.complete(&prompt).await {
                Ok(answer) => {
                    let cleaned = clean_structured(&answer);
                    debug!(
                        "Chunk {}/{}: {} chars in, {} chars out",
                        i + 1,
                        chunks_total,
                        chunk.chars().count(),
                        cleaned.chars().count()
                    );
                    answers.push(cleaned);
                }
                Err(e) => {
                    error!(
                        "Structuring stopped at chunk {}/{}: {}",
                        i + 1,
                        chunks_total,
                        e
                    );
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        let chunks_completed = answers.len();
        StructuredText {
            text: answers.join(CHUNK_SEPARATOR),
            chunks_total,
            chunks_completed,
            error: failure,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

// ── edgequake-llm backend ────────────────────────────────────────────────

/// [`StructuringBackend`] over an edgequake-llm chat provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &StructuringConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }

    pub fn from_config(config: &StructuringConfig) -> Result<Self, ExtractError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl StructuringBackend for LlmBackend {
    async fn complete(&self, prompt: &str) -> Result<String, StructureError> {
        let messages = vec![ChatMessage::user(prompt)];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| StructureError::Request(e.to_string()))?;

        debug!(
            "LLM usage: {} prompt tokens, {} completion tokens",
            response.prompt_tokens, response.completion_tokens
        );
        if response.content.trim().is_empty() {
            return Err(StructureError::EmptyResponse);
        }
        Ok(response.content)
    }
}

fn build_options(config: &StructuringConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_output_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model` (default [`DEFAULT_MODEL`]).
/// 3. `SCAN2TEXT_LLM_PROVIDER` + `SCAN2TEXT_MODEL`, when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is set.
/// 5. Whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(config: &StructuringConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("SCAN2TEXT_LLM_PROVIDER"),
        std::env::var("SCAN2TEXT_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Answers with the chunk wrapped in reasoning noise; fails on call
    /// number `fail_at` (0-based) if set.
    struct ScriptedBackend {
        calls: Mutex<Vec<String>>,
        fail_at: Option<usize>,
    }

    impl ScriptedBackend {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_at,
            }
        }
    }

    #[async_trait]
    impl StructuringBackend for ScriptedBackend {
        async fn complete(&self, prompt: &str) -> Result<String, StructureError> {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.len();
            calls.push(prompt.to_string());
            if self.fail_at == Some(n) {
                return Err(StructureError::Request("quota exceeded".into()));
            }
            Ok(format!("<think>planning</think>\n## Part {}\n", n + 1))
        }
    }

    fn config_with_chars(max_tokens: usize) -> StructuringConfig {
        StructuringConfig::builder()
            .max_tokens_per_chunk(max_tokens)
            .build()
            .unwrap()
    }

    #[test]
    fn chunking_packs_words_greedily() {
        let chunks = split_into_chunks("aa bb cc dd", 5);
        assert_eq!(chunks, vec!["aa bb", "cc dd"]);
    }

    #[test]
    fn chunking_normalises_whitespace() {
        let chunks = split_into_chunks("line one\n\n  line\ttwo\n", 100);
        assert_eq!(chunks, vec!["line one line two"]);
    }

    #[test]
    fn chunking_hard_splits_long_words() {
        let chunks = split_into_chunks("abcdefgh ij", 3);
        assert_eq!(chunks, vec!["abc", "def", "gh", "ij"]);
    }

    #[test]
    fn chunking_counts_characters_not_bytes() {
        let chunks = split_into_chunks("ééé ààà", 7);
        assert_eq!(chunks, vec!["ééé ààà"]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(split_into_chunks(" \n\t ", 10).is_empty());
        assert!(split_into_chunks("", 10).is_empty());
    }

    #[test]
    fn chunks_never_exceed_budget() {
        let text = "lorem ipsum dolor sit amet consectetur adipiscing elit ".repeat(50);
        for chunk in split_into_chunks(&text, 37) {
            assert!(chunk.chars().count() <= 37, "{chunk:?}");
        }
    }

    #[tokio::test]
    async fn structure_cleans_and_joins_chunks() {
        let backend = Arc::new(ScriptedBackend::new(None));
        // 1 token budget → 3 chars per chunk.
        let structurer = Structurer::with_backend(&config_with_chars(1), backend.clone());
        assert_eq!(structurer.max_chars(), 3);

        let out = structurer.structure("abc def").await;
        assert_eq!(out.text, "## Part 1\n\n## Part 2");
        assert_eq!(out.chunks_total, 2);
        assert!(out.is_complete());

        let calls = backend.calls.lock().unwrap();
        assert!(calls[0].contains("abc"));
        assert!(calls[1].contains("def"));
    }

    #[tokio::test]
    async fn first_failure_stops_and_keeps_prior_chunks() {
        let backend = Arc::new(ScriptedBackend::new(Some(1)));
        let structurer = Structurer::with_backend(&config_with_chars(1), backend.clone());

        let out = structurer.structure("abc def ghi").await;
        assert_eq!(out.text, "## Part 1");
        assert_eq!(out.chunks_total, 3);
        assert_eq!(out.chunks_completed, 1);
        assert!(out.error.as_deref().unwrap().contains("quota exceeded"));
        assert!(!out.is_complete());
        assert!(out.has_output());
        assert_eq!(backend.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_text_makes_no_requests() {
        let backend = Arc::new(ScriptedBackend::new(None));
        let structurer = Structurer::with_backend(&StructuringConfig::default(), backend.clone());

        let out = structurer.structure("   ").await;
        assert_eq!(out.text, "");
        assert!(!out.has_output());
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn options_follow_config() {
        let opts = build_options(&StructuringConfig::default());
        assert_eq!(opts.temperature, Some(0.2));
        assert_eq!(opts.max_tokens, Some(4096));
    }
}

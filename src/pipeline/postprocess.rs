//! Post-processing: deterministic cleanup of language-model output.
//!
//! Reasoning models (DeepSeek-R1 distills and similar) emit their chain of
//! thought inside `<think>…</think>` before the answer, and most models
//! occasionally wrap the answer in a ```` ```markdown ```` fence despite
//! being asked for plain output. These rules remove such artefacts without
//! touching content.
//!
//! ## Rule Order
//!
//! Think blocks go first because they may themselves contain fences. Line
//! endings are normalised next, since the fence pattern and every per-line
//! rule match on `\n` only.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to one structured chunk.
///
/// Rules (applied in order):
/// 1. Remove `<think>…</think>` reasoning blocks
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip an outer markdown fence
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive blank lines down to 2
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 7. Trim leading and trailing blank space
pub fn clean_structured(input: &str) -> String {
    let s = strip_think_blocks(input);
    let s = normalise_line_endings(&s);
    let s = strip_markdown_fences(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Remove reasoning blocks ──────────────────────────────────────────

static RE_THINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

/// Remove every `<think>…</think>` block, including multi-line ones.
pub fn strip_think_blocks(input: &str) -> String {
    RE_THINK.replace_all(input, "").to_string()
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 6: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

//! Post-processing: deterministic cleanup of LLM-generated flashcards.
//!
//! Even with a strict prompt, models regularly:
//!
//! - wrap the JSON object in ` ```json ... ``` ` fences
//! - add a sentence of chatter before or after the object
//! - emit `\r\n` line endings or zero-width characters
//! - invent `![figure](chart.png)` links inside answers
//!
//! Two entry points:
//!
//! * [`clean_llm_output`]: whole-response cleanup, then isolate the JSON
//!   object so it can be handed to `serde_json`.
//! * [`clean_field`]: per-field cleanup applied to question, answer and
//!   explanation after parsing.
//!
//! Rule order matters: fences come off before the object is located, and
//! line endings are normalised before whitespace trimming.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean a raw completion and return the JSON object it contains.
///
/// Returns `None` when no balanced `{ … }` can be found.
///
/// Rules (applied in order):
/// 1. Strip outer code fences (` ``` `, ` ```json `)
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Cut everything outside the first balanced JSON object
pub fn clean_llm_output(input: &str) -> Option<String> {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    extract_json_object(&s).map(str::to_string)
}

/// Clean one generated field.
///
/// 1. Normalise line endings
/// 2. Strip invisible Unicode
/// 3. Replace invented markdown image links with their alt text
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ blank lines to one
/// 6. Trim the whole value
pub fn clean_field(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = replace_markdown_images(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule: Strip outer code fences ────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule: Normalise line endings ─────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule: Remove invisible Unicode characters ────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule: Isolate the JSON object ────────────────────────────────────────────
//
// Scan from the first `{`, tracking string literals and escapes so braces
// inside strings do not count.

fn extract_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in input[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Rule: Replace markdown image links ───────────────────────────────────────
//
// A flashcard's only image lives in the Image field; any `![alt](url)` the
// model writes into the text points at nothing in the package.

static RE_MD_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn replace_markdown_images(input: &str) -> String {
    RE_MD_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| caps[1].trim().to_string())
        .to_string()
}

// ── Rule: Trim trailing whitespace per line ──────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule: Collapse excessive blank lines ─────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

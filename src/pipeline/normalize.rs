//! Card normalisation: sparse, mixed-case records → [`NormalizedCard`].
//!
//! Every field goes through one case-insensitive lookup ([`lookup`]), so
//! `question`, `Question` and `QUESTION` are the same key. An exact-case hit
//! wins over a case-folded one, which keeps `{"question": "a", "Question": "b"}`
//! deterministic.

use crate::pipeline::payload::RawCard;
use serde_json::Value;
use std::path::PathBuf;

/// Canonical flashcard record.
///
/// Invariants: `question` is never empty, `slide_numbers` is never empty,
/// `index` is the 1-based position after flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCard {
    pub index: usize,
    pub question: String,
    pub answer: String,
    pub explanation: String,
    pub slide_numbers: Vec<usize>,
    /// Inline `<img …>` markup supplied by the caller, or empty.
    pub image_markup: String,
    /// Filled in by the media stage.
    pub media: Vec<PathBuf>,
}

/// Normalise every raw card, assigning 1-based indices in input order.
pub fn normalize_cards(raw: &[RawCard]) -> Vec<NormalizedCard> {
    raw.iter()
        .enumerate()
        .map(|(i, card)| normalize_card(card, i + 1))
        .collect()
}

/// Normalise a single raw card at 1-based position `index`.
pub fn normalize_card(raw: &RawCard, index: usize) -> NormalizedCard {
    NormalizedCard {
        index,
        question: lookup_text(raw, "question").unwrap_or_else(|| format!("Card {index}")),
        answer: lookup_text(raw, "answer").unwrap_or_default(),
        explanation: lookup_text(raw, "explanation").unwrap_or_default(),
        slide_numbers: slide_numbers(raw, index),
        image_markup: lookup_text(raw, "image").unwrap_or_default(),
        media: Vec::new(),
    }
}

/// Case-insensitive lookup of a non-empty value.
///
/// Null, blank strings and empty lists count as absent.
pub fn lookup<'a>(raw: &'a RawCard, key: &str) -> Option<&'a Value> {
    if let Some(v) = raw.get(key).filter(|v| is_present(v)) {
        return Some(v);
    }
    raw.iter()
        .find(|(k, v)| k.eq_ignore_ascii_case(key) && is_present(v))
        .map(|(_, v)| v)
}

/// [`lookup`], rendered as text. Non-string scalars use their JSON form.
pub fn lookup_text(raw: &RawCard, key: &str) -> Option<String> {
    lookup(raw, key).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn is_present(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => true,
    }
}

/// `slide_number` as a non-empty list, falling back to `[index]`.
fn slide_numbers(raw: &RawCard, index: usize) -> Vec<usize> {
    let parsed: Vec<usize> = match lookup(raw, "slide_number") {
        None => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(as_slide_number).collect(),
        Some(scalar) => as_slide_number(scalar).into_iter().collect(),
    };
    if parsed.is_empty() {
        vec![index]
    } else {
        parsed
    }
}

/// Positive integers, integral floats and numeric strings.
fn as_slide_number(v: &Value) -> Option<usize> {
    let n = match v {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f > 0.0)
                .map(|f| f as u64)
        })?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    usize::try_from(n).ok().filter(|n| *n > 0)
}

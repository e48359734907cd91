//! Payload parsing: turn a loosely-shaped request body into one canonical
//! [`CardRequest`].
//!
//! Clients post cards in several shapes:
//!
//! ```text
//! [ {..}, {..} ]                                  bare list
//! [[ {..}, {..} ]]                                double-nested list
//! { "cards": [..], "deck_name": "..", ... }       wrapped object
//! { "Array": [..] }                               legacy alias
//! "[{\"question\": ..}]"                          any of the above, JSON-encoded again
//! ```
//!
//! All shape-sniffing lives here; later stages only ever see a
//! `CardRequest`.

use crate::error::Lecture2AnkiError;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// One card as received from the caller: arbitrary keys, arbitrary values.
pub type RawCard = Map<String, Value>;

/// Canonical form of a `/generate-apkg` body.
#[derive(Debug, Clone, PartialEq)]
pub struct CardRequest {
    /// Cards in input order, one level of nesting already flattened.
    pub cards: Vec<RawCard>,
    /// `deck_name`, if supplied and non-empty.
    pub deck_name: Option<String>,
    /// `image_folder_drive_id`: remote folder holding slide images.
    pub drive_folder: Option<String>,
    /// `lecture_file_drive_id`: remote lecture file whose sibling folder holds the images.
    pub lecture_file: Option<String>,
    /// `slide_field`: carry slide numbers in their own note field instead of
    /// appending them to the explanation.
    pub slide_field: bool,
}

/// The two accepted top-level shapes.
#[derive(Debug)]
enum PayloadShape {
    Bare(Vec<Value>),
    Wrapped(Map<String, Value>),
}

/// Parse a raw request body.
///
/// # Errors
/// * [`Lecture2AnkiError::InvalidJson`]: body (or inner string) is not JSON
/// * [`Lecture2AnkiError::UnsupportedPayload`]: neither a list nor an object
/// * [`Lecture2AnkiError::NoCards`]: no cards after flattening
pub fn parse_payload(body: &[u8]) -> Result<CardRequest, Lecture2AnkiError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| Lecture2AnkiError::InvalidJson {
        detail: e.to_string(),
    })?;
    parse_value(value)
}

/// Parse an already-decoded JSON value (see [`parse_payload`]).
pub fn parse_value(value: Value) -> Result<CardRequest, Lecture2AnkiError> {
    let value = unwrap_double_encoded(value)?;

    match classify(value)? {
        PayloadShape::Bare(items) => Ok(CardRequest {
            cards: into_cards(items)?,
            deck_name: None,
            drive_folder: None,
            lecture_file: None,
            slide_field: false,
        }),
        PayloadShape::Wrapped(mut obj) => {
            let list = match obj.remove("cards").filter(|v| !v.is_null()) {
                Some(v) => v,
                None => obj.remove("Array").unwrap_or(Value::Null),
            };
            let items = match list {
                Value::Array(items) => items,
                Value::Null => return Err(Lecture2AnkiError::NoCards),
                other => {
                    return Err(Lecture2AnkiError::UnsupportedPayload {
                        detail: format!("`cards` must be a list, got {}", type_name(&other)),
                    })
                }
            };

            Ok(CardRequest {
                cards: into_cards(items)?,
                deck_name: non_empty_string(obj.get("deck_name")),
                drive_folder: non_empty_string(obj.get("image_folder_drive_id")),
                lecture_file: non_empty_string(obj.get("lecture_file_drive_id")),
                slide_field: obj
                    .get("slide_field")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }
    }
}

/// A body that is itself a JSON string gets one more decode.
fn unwrap_double_encoded(value: Value) -> Result<Value, Lecture2AnkiError> {
    match value {
        Value::String(inner) => {
            debug!("Payload is a JSON string; decoding a second time");
            serde_json::from_str(&inner).map_err(|e| Lecture2AnkiError::InvalidJson {
                detail: format!("inner string: {e}"),
            })
        }
        other => Ok(other),
    }
}

fn classify(value: Value) -> Result<PayloadShape, Lecture2AnkiError> {
    match value {
        Value::Array(items) => Ok(PayloadShape::Bare(items)),
        Value::Object(obj) => Ok(PayloadShape::Wrapped(obj)),
        other => Err(Lecture2AnkiError::UnsupportedPayload {
            detail: format!("top-level {}", type_name(&other)),
        }),
    }
}

/// Flatten one level when the first element is a list, then coerce each
/// element to a record.
fn into_cards(items: Vec<Value>) -> Result<Vec<RawCard>, Lecture2AnkiError> {
    let items = if matches!(items.first(), Some(Value::Array(_))) {
        debug!("Card list is nested; flattening one level");
        items
            .into_iter()
            .flat_map(|item| match item {
                Value::Array(inner) => inner,
                other => vec![other],
            })
            .collect()
    } else {
        items
    };

    if items.is_empty() {
        return Err(Lecture2AnkiError::NoCards);
    }

    Ok(items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => map,
            other => {
                warn!(
                    "Card {} is a {}, not an object; using defaults",
                    i + 1,
                    type_name(&other)
                );
                Map::new()
            }
        })
        .collect())
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

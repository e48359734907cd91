//! Deck assembly: normalised, media-resolved cards → in-memory [`DeckSpec`].
//!
//! Assembly never fails. It fixes the field layout, folds slide numbers into
//! the explanation (or a dedicated field), builds the Image field from the
//! resolved media only, and derives a stable GUID for every note.

use crate::config::DeckConfig;
use crate::pipeline::media::escape_attr;
use crate::pipeline::normalize::NormalizedCard;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

/// How slide numbers reach the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateVariant {
    /// Appended to the explanation: `"… (Slide 3)"`.
    #[default]
    Annotated,
    /// Carried in a fifth `Slide Number` field.
    SlideField,
}

/// A note type: ordered fields, one card template, styling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDef {
    pub model_id: i64,
    pub name: String,
    pub fields: Vec<String>,
    pub front: String,
    pub back: String,
    pub css: String,
    pub variant: TemplateVariant,
}

pub const FIELD_QUESTION: &str = "Question";
pub const FIELD_ANSWER: &str = "Answer";
pub const FIELD_EXPLANATION: &str = "Explanation";
pub const FIELD_IMAGE: &str = "Image";
pub const FIELD_SLIDE_NUMBER: &str = "Slide Number";

/// Position of the Image field in every variant.
pub const IMAGE_FIELD_INDEX: usize = 3;

impl TemplateDef {
    pub fn new(deck: &DeckConfig, variant: TemplateVariant) -> Self {
        let mut fields: Vec<String> = [FIELD_QUESTION, FIELD_ANSWER, FIELD_EXPLANATION, FIELD_IMAGE]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let back = match variant {
            TemplateVariant::Annotated => deck.back_template.clone(),
            TemplateVariant::SlideField => {
                fields.push(FIELD_SLIDE_NUMBER.to_string());
                deck.slide_field_back_template.clone()
            }
        };
        Self {
            model_id: deck.model_id,
            name: deck.model_name.clone(),
            fields,
            front: deck.front_template.clone(),
            back,
            css: deck.css.clone(),
            variant,
        }
    }
}

/// One note, ready for serialisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledNote {
    pub card: NormalizedCard,
    pub guid: String,
    /// Values in [`TemplateDef::fields`] order.
    pub fields: Vec<String>,
    /// File names referenced by the Image field, in order.
    pub media_names: Vec<String>,
}

impl AssembledNote {
    /// Sort field: the question.
    pub fn sort_field(&self) -> &str {
        &self.fields[0]
    }
}

/// A complete deck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckSpec {
    pub deck_id: i64,
    pub name: String,
    pub template: TemplateDef,
    pub notes: Vec<AssembledNote>,
}

/// Build the deck. One note per card, input order preserved.
///
/// `deck_name` falls back to [`DeckConfig::default_deck_name`].
pub fn assemble_deck(
    cards: Vec<NormalizedCard>,
    deck_name: Option<&str>,
    deck: &DeckConfig,
    variant: TemplateVariant,
) -> DeckSpec {
    let template = TemplateDef::new(deck, variant);
    let name = deck_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&deck.default_deck_name)
        .to_string();

    let mut seen_guids = HashSet::new();
    let notes = cards
        .into_iter()
        .map(|card| {
            let media_names = media_names(&card);
            let mut fields = vec![
                card.question.clone(),
                card.answer.clone(),
                match variant {
                    TemplateVariant::Annotated => {
                        annotate_explanation(&card.explanation, &card.slide_numbers)
                    }
                    TemplateVariant::SlideField => card.explanation.clone(),
                },
                image_field(&media_names),
            ];
            if variant == TemplateVariant::SlideField {
                fields.push(join_numbers(&card.slide_numbers));
            }

            let mut guid = note_guid(deck.deck_id, &card.question, &card.slide_numbers, None);
            if !seen_guids.insert(guid.clone()) {
                // Identical question and slides twice in one deck.
                guid = note_guid(deck.deck_id, &card.question, &card.slide_numbers, Some(card.index));
                seen_guids.insert(guid.clone());
            }

            AssembledNote {
                card,
                guid,
                fields,
                media_names,
            }
        })
        .collect::<Vec<_>>();

    debug!("Assembled deck '{}' with {} notes", name, notes.len());
    DeckSpec {
        deck_id: deck.deck_id,
        name,
        template,
        notes,
    }
}

/// `"(Slide 7)"` or `"(Slides 3, 4)"`.
pub fn slide_annotation(slides: &[usize]) -> String {
    match slides {
        [one] => format!("(Slide {one})"),
        many => format!("(Slides {})", join_numbers(many)),
    }
}

/// Explanation with the slide annotation appended.
pub fn annotate_explanation(explanation: &str, slides: &[usize]) -> String {
    let note = slide_annotation(slides);
    let explanation = explanation.trim_end();
    if explanation.is_empty() {
        note
    } else {
        format!("{explanation} {note}")
    }
}

fn join_numbers(slides: &[usize]) -> String {
    slides
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn media_names(card: &NormalizedCard) -> Vec<String> {
    card.media
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect()
}

/// `<img src="a.jpg"><img src="b.jpg">`, or empty.
fn image_field(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("<img src=\"{}\">", escape_attr(n)))
        .collect()
}

const BASE91_TABLE: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!#$%&()*+,-./:;<=>?@[]^_`{|}~";

/// Stable note GUID: base91 of the first 8 bytes of a SHA-256 over the
/// deck id, question and slide numbers.
pub fn note_guid(deck_id: i64, question: &str, slides: &[usize], salt: Option<usize>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(deck_id.to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(question.as_bytes());
    hasher.update([0x1f]);
    hasher.update(join_numbers(slides).as_bytes());
    if let Some(salt) = salt {
        hasher.update([0x1f]);
        hasher.update(salt.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    base91(u64::from_be_bytes(head))
}

fn base91(mut n: u64) -> String {
    if n == 0 {
        return (BASE91_TABLE[0] as char).to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(BASE91_TABLE[(n % 91) as usize]);
        n /= 91;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

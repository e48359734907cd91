//! Pipeline stages for turning card payloads into Anki packages.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! payload ──▶ normalize ──▶ media ──▶ assemble ──▶ package
//! (JSON body)  (per card)   (pools)   (DeckSpec)   (.apkg)
//! ```
//!
//! 1. [`payload`]: sniff the body's shape into one `CardRequest`
//! 2. [`normalize`]: case-insensitive field lookup, defaults, slide numbers
//! 3. [`media`]: attach images by explicit reference or slide-number suffix
//! 4. [`assemble`]: note type, fields, annotations, GUIDs
//! 5. [`package`]: validate against the media manifest and write the zip
//!
//! [`postprocess`] sits beside the chain: it cleans LLM output for
//! [`crate::summarize`].

pub mod assemble;
pub mod media;
pub mod normalize;
pub mod package;
pub mod payload;
pub mod postprocess;

//! # lecture2anki
//!
//! Turn lecture slide decks into importable Anki flashcard packages.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF ──▶ extract ──▶ summarize ──▶ cards JSON
//!                                       │
//!                                       ▼
//!          payload ─▶ normalize ─▶ media ─▶ assemble ─▶ package ─▶ .apkg
//!                                   ▲
//!                     drive folder ─┘ + local ./media
//! ```
//!
//! * [`extract`]: pdfium text per page
//! * [`summarize`]: one LLM call per slide (OpenAI, Anthropic, Gemini, Ollama, … via edgequake-llm)
//! * [`pipeline`]: the deterministic card → package chain
//! * [`drive`]: slide images from a Google Drive folder
//! * [`server`]: the HTTP service wrapping all of the above
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lecture2anki::{build_package, Collaborators, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().local_media_dir("media").build()?;
//!     let collaborators = Collaborators::from_config(&config);
//!     let body = br#"{"cards": [{"question": "Q1", "answer": "A1"}], "deck_name": "Biology"}"#;
//!     let package = build_package(body, &collaborators, &config).await?;
//!     std::fs::write(&package.file_name, &package.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `lecture2anki` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod drive;
pub mod error;
pub mod extract;
pub mod generate;
pub mod optimize;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;
pub mod summarize;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DeckConfig, DriveCredentials, ServiceConfig, ServiceConfigBuilder};
pub use drive::{GoogleDriveStore, RemoteFile, RemoteFileStore};
pub use error::{CardMediaError, ErrorClass, Lecture2AnkiError};
pub use extract::{PageText, PageTextExtractor, PdfiumTextExtractor, Slide};
pub use generate::{
    build_from_request, build_package, extract_slides, generate_cards, parse_slides_payload,
    BuiltPackage, Collaborators, SlideCard,
};
pub use optimize::{ImageOptimizer, JpegOptimizer};
pub use pipeline::assemble::{assemble_deck, DeckSpec, TemplateDef, TemplateVariant};
pub use pipeline::media::{MediaAsset, MediaManifest, MediaPool, MediaResolver};
pub use pipeline::normalize::{normalize_card, normalize_cards, NormalizedCard};
pub use pipeline::package::write_package;
pub use pipeline::payload::{parse_payload, CardRequest, RawCard};
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use server::{build_router, AppState};
pub use summarize::{GeneratedCard, LlmSummarizer, TextSummarizer};

//! Error types for the lecture2anki library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Lecture2AnkiError`]: **Fatal**: the request cannot proceed at all
//!   (malformed payload, not a PDF, summarizer unavailable, a package that
//!   would reference a missing image). Returned as `Err(Lecture2AnkiError)`
//!   from the top-level functions in [`crate::generate`].
//!
//! * [`CardMediaError`]: **Non-fatal**: media lookup for one card (or the
//!   whole remote pool) failed. The card is still packaged, just without
//!   the image, and the failure is logged.
//!
//! Every fatal error belongs to exactly one [`ErrorClass`]; the HTTP layer
//! turns the class into a status code.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a fatal error, used to pick the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed JSON, wrong payload shape, missing file or cards. Never retried.
    ClientInput,
    /// A collaborator (LLM, cloud drive) is missing or failed.
    UpstreamUnavailable,
    /// The pipeline produced something self-contradictory, e.g. a note that
    /// references an image which is not in the package.
    InternalConsistency,
}

/// All fatal errors returned by the lecture2anki library.
///
/// Card-level media failures use [`CardMediaError`] and never abort a request.
#[derive(Debug, Error)]
pub enum Lecture2AnkiError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Request body (or the JSON string inside it) is not valid JSON.
    #[error("invalid JSON: {detail}")]
    InvalidJson { detail: String },

    /// Body parsed, but is neither a card list nor an object carrying one.
    #[error("unsupported payload shape: {detail}")]
    UnsupportedPayload { detail: String },

    /// Payload contained no cards after flattening.
    #[error("no cards supplied")]
    NoCards,

    /// A multipart upload did not contain the expected field.
    #[error("No {field} provided")]
    MissingFile { field: String },

    /// Uploaded bytes are not a PDF.
    #[error("File is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// Generation request carried no slides with text.
    #[error("no slides supplied")]
    NoSlides,

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium could not open the document.
    #[error("PDF is corrupt or encrypted: {detail}")]
    CorruptPdf { detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Upstream errors ───────────────────────────────────────────────────
    /// No LLM provider could be resolved.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    SummarizerNotConfigured { provider: String, hint: String },

    /// The LLM call failed or returned something that is not a flashcard.
    #[error("Flashcard generation failed for slide {slide}: {detail}")]
    SummarizerFailed { slide: usize, detail: String },

    /// The LLM call exceeded `api_timeout_secs`.
    #[error("Flashcard generation timed out after {secs}s for slide {slide}")]
    SummarizerTimeout { slide: usize, secs: u64 },

    /// Cloud drive credentials are missing.
    #[error("Remote file store is not configured: {hint}")]
    RemoteStoreNotConfigured { hint: String },

    /// Cloud drive request failed.
    #[error("Remote file store request failed for '{reference}': {reason}")]
    RemoteStoreFailed { reference: String, reason: String },

    // ── Packaging errors ──────────────────────────────────────────────────
    /// A manifest entry does not exist (or is unreadable) at packaging time.
    #[error("Media file '{}' is missing at packaging time: {detail}", path.display())]
    MissingMedia { path: PathBuf, detail: String },

    /// A note's Image field names a file that is not in the media manifest.
    #[error("Note {note} references '{file_name}' which is not in the media manifest")]
    DanglingMediaReference { note: usize, file_name: String },

    /// SQLite or zip writing failed.
    #[error("Failed to write package: {0}")]
    PackageWriteFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Lecture2AnkiError {
    /// Which bucket of the error taxonomy this error falls into.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidJson { .. }
            | Self::UnsupportedPayload { .. }
            | Self::NoCards
            | Self::MissingFile { .. }
            | Self::NotAPdf { .. }
            | Self::NoSlides
            | Self::CorruptPdf { .. } => ErrorClass::ClientInput,

            Self::SummarizerNotConfigured { .. }
            | Self::SummarizerFailed { .. }
            | Self::SummarizerTimeout { .. }
            | Self::RemoteStoreNotConfigured { .. }
            | Self::RemoteStoreFailed { .. } => ErrorClass::UpstreamUnavailable,

            Self::MissingMedia { .. }
            | Self::DanglingMediaReference { .. }
            | Self::PackageWriteFailed(_)
            | Self::PdfiumBindingFailed(_)
            | Self::InvalidConfig(_)
            | Self::Internal(_) => ErrorClass::InternalConsistency,
        }
    }

    /// Attach the slide number to a summarizer failure.
    ///
    /// [`crate::summarize::TextSummarizer`] only sees slide text, so it reports
    /// slide `0`; the generation stage fills in the real number.
    pub fn for_slide(self, slide_number: usize) -> Self {
        match self {
            Self::SummarizerFailed { detail, .. } => Self::SummarizerFailed {
                slide: slide_number,
                detail,
            },
            Self::SummarizerTimeout { secs, .. } => Self::SummarizerTimeout {
                slide: slide_number,
                secs,
            },
            other => other,
        }
    }

    /// True when the collaborator is absent rather than failing.
    pub fn is_not_configured(&self) -> bool {
        matches!(
            self,
            Self::SummarizerNotConfigured { .. } | Self::RemoteStoreNotConfigured { .. }
        )
    }
}

impl From<rusqlite::Error> for Lecture2AnkiError {
    fn from(e: rusqlite::Error) -> Self {
        Self::PackageWriteFailed(format!("sqlite: {e}"))
    }
}

impl From<zip::result::ZipError> for Lecture2AnkiError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::PackageWriteFailed(format!("zip: {e}"))
    }
}

/// A non-fatal media failure.
///
/// Logged by the media stage; the affected card (or the whole remote pool)
/// simply carries no image from that source.
#[derive(Debug, Clone, Error)]
pub enum CardMediaError {
    /// The remote folder could not be listed or located.
    #[error("remote folder '{reference}' unavailable: {detail}")]
    RemoteFolderUnavailable { reference: String, detail: String },

    /// A single remote file could not be stored locally.
    #[error("could not store remote file '{name}': {detail}")]
    RemoteFileSkipped { name: String, detail: String },

    /// `<img src='…'>` named a file present in neither pool.
    #[error("card {card}: image '{file_name}' not found in any media pool")]
    ExplicitReferenceUnresolved { card: usize, file_name: String },
}

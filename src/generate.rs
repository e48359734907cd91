//! Request-level entry points.
//!
//! * [`build_package`]: card payload → `.apkg` bytes (the `/generate-apkg` flow)
//! * [`extract_slides`]: PDF bytes → non-empty slides (the `/extract-text` flow)
//! * [`generate_cards`]: slides → LLM-written cards (the `/generate-flashcards` flow)
//!
//! Collaborators are passed in through [`Collaborators`] so the HTTP layer,
//! the CLI and the tests can each plug in their own.

use crate::config::ServiceConfig;
use crate::drive::{GoogleDriveStore, RemoteFile, RemoteFileStore};
use crate::error::{CardMediaError, Lecture2AnkiError};
use crate::extract::{pages_to_slides, PageTextExtractor, PdfiumTextExtractor, Slide};
use crate::optimize::{ImageOptimizer, JpegOptimizer};
use crate::pipeline::assemble::{assemble_deck, TemplateVariant};
use crate::pipeline::media::{MediaPool, MediaResolver};
use crate::pipeline::normalize::normalize_cards;
use crate::pipeline::package::{package_file_name, write_package};
use crate::pipeline::payload::{parse_payload, CardRequest};
use crate::progress::ProgressCallback;
use crate::summarize::{LlmSummarizer, TextSummarizer};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// The external capabilities a request may need.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn PageTextExtractor>,
    /// `None` when no LLM provider is configured.
    pub summarizer: Option<Arc<dyn TextSummarizer>>,
    /// `None` when no drive credentials are configured.
    pub remote: Option<Arc<dyn RemoteFileStore>>,
    pub optimizer: Arc<dyn ImageOptimizer>,
}

impl Collaborators {
    /// Production collaborators. Missing LLM or drive configuration is logged
    /// and leaves the corresponding slot empty.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let summarizer: Option<Arc<dyn TextSummarizer>> = match LlmSummarizer::from_config(config) {
            Ok(s) => Some(Arc::new(s)),
            Err(e) => {
                warn!("Flashcard generation disabled: {e}");
                None
            }
        };
        let remote: Option<Arc<dyn RemoteFileStore>> = match GoogleDriveStore::from_config(config) {
            Ok(s) => Some(Arc::new(s)),
            Err(e) => {
                info!("Remote media disabled: {e}");
                None
            }
        };
        Self {
            extractor: Arc::new(PdfiumTextExtractor),
            summarizer,
            remote,
            optimizer: Arc::new(JpegOptimizer::from_config(config)),
        }
    }

    /// The summarizer, or the error explaining why there is none.
    pub fn require_summarizer(&self) -> Result<Arc<dyn TextSummarizer>, Lecture2AnkiError> {
        self.summarizer
            .clone()
            .ok_or_else(|| Lecture2AnkiError::SummarizerNotConfigured {
                provider: "auto".into(),
                hint: "Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or EDGEQUAKE_LLM_PROVIDER + EDGEQUAKE_MODEL.".into(),
            })
    }
}

/// A finished package, fully in memory.
#[derive(Debug, Clone)]
pub struct BuiltPackage {
    /// `"<deck name>.apkg"`, sanitised.
    pub file_name: String,
    pub deck_name: String,
    pub bytes: Vec<u8>,
    pub note_count: usize,
    pub media_count: usize,
}

/// Build a package from a raw `/generate-apkg` body.
///
/// # Errors
/// Payload errors are returned before any work starts. Remote media failures
/// are logged and never returned. Packaging inconsistencies
/// ([`Lecture2AnkiError::MissingMedia`], [`Lecture2AnkiError::DanglingMediaReference`])
/// abort the request.
pub async fn build_package(
    body: &[u8],
    collaborators: &Collaborators,
    config: &ServiceConfig,
) -> Result<BuiltPackage, Lecture2AnkiError> {
    let request = parse_payload(body)?;
    build_from_request(request, collaborators, config).await
}

/// [`build_package`] for an already parsed request.
pub async fn build_from_request(
    request: CardRequest,
    collaborators: &Collaborators,
    config: &ServiceConfig,
) -> Result<BuiltPackage, Lecture2AnkiError> {
    let start = Instant::now();
    info!("Building package: {} cards", request.cards.len());

    // All transient files live here; dropping it removes them on every path.
    let workdir = TempDir::new()
        .map_err(|e| Lecture2AnkiError::Internal(format!("Failed to create temp dir: {e}")))?;

    // ── Step 1: Remote pool ───────────────────────────────────────────────
    let remote_pool = fetch_remote_pool(&request, collaborators, workdir.path()).await;

    // ── Step 2: Normalise, resolve, assemble, write (blocking) ────────────
    let out_dir = workdir.path().to_path_buf();
    let local_dir = config.local_media_dir.clone();
    let deck_config = config.deck.clone();

    let package = tokio::task::spawn_blocking(move || {
        let local_pool = match MediaPool::from_dir("local", &local_dir) {
            Ok(pool) => pool,
            Err(e) => {
                warn!("Local media folder {} unreadable: {e}", local_dir.display());
                MediaPool::empty("local")
            }
        };
        debug!(
            "Media pools: remote={} local={}",
            remote_pool.len(),
            local_pool.len()
        );

        let mut cards = normalize_cards(&request.cards);
        let manifest = MediaResolver::new(vec![&remote_pool, &local_pool]).resolve_all(&mut cards);

        let variant = if request.slide_field {
            TemplateVariant::SlideField
        } else {
            TemplateVariant::Annotated
        };
        let deck = assemble_deck(cards, request.deck_name.as_deref(), &deck_config, variant);
        let file_name = package_file_name(&deck.name);

        let path = write_package(&deck, &manifest, &out_dir, &file_name)?;
        let bytes = std::fs::read(&path)
            .map_err(|e| Lecture2AnkiError::PackageWriteFailed(format!("read back: {e}")))?;

        Ok::<_, Lecture2AnkiError>(BuiltPackage {
            file_name,
            deck_name: deck.name,
            bytes,
            note_count: deck.notes.len(),
            media_count: manifest.len(),
        })
    })
    .await
    .map_err(|e| Lecture2AnkiError::Internal(format!("Packaging task panicked: {e}")))??;

    drop(workdir);
    info!(
        "Package '{}' ready: {} notes, {} media, {} bytes, {}ms",
        package.file_name,
        package.note_count,
        package.media_count,
        package.bytes.len(),
        start.elapsed().as_millis()
    );
    Ok(package)
}

/// Download the request's remote images into `<workdir>/remote/`.
///
/// Never fails: every problem is logged and yields a smaller (or empty) pool.
async fn fetch_remote_pool(
    request: &CardRequest,
    collaborators: &Collaborators,
    workdir: &Path,
) -> MediaPool {
    let reference = match (&request.drive_folder, &request.lecture_file) {
        (None, None) => return MediaPool::empty("remote"),
        (Some(folder), _) => folder.clone(),
        (None, Some(file)) => file.clone(),
    };

    let Some(store) = collaborators.remote.as_ref() else {
        warn!(
            "{}",
            CardMediaError::RemoteFolderUnavailable {
                reference,
                detail: "no drive credentials configured".into(),
            }
        );
        return MediaPool::empty("remote");
    };

    let folder = match &request.drive_folder {
        Some(folder) => folder.clone(),
        None => match store.find_sibling_folder(&reference).await {
            Ok(Some(folder)) => folder,
            Ok(None) => {
                warn!(
                    "{}",
                    CardMediaError::RemoteFolderUnavailable {
                        reference,
                        detail: "no image folder next to the lecture file".into(),
                    }
                );
                return MediaPool::empty("remote");
            }
            Err(e) => {
                warn!(
                    "{}",
                    CardMediaError::RemoteFolderUnavailable {
                        reference,
                        detail: e.to_string(),
                    }
                );
                return MediaPool::empty("remote");
            }
        },
    };

    let files = match store.list_images(&folder).await {
        Ok(files) => files,
        Err(e) => {
            warn!(
                "{}",
                CardMediaError::RemoteFolderUnavailable {
                    reference: folder,
                    detail: e.to_string(),
                }
            );
            return MediaPool::empty("remote");
        }
    };

    let dir = workdir.join("remote");
    let optimizer = Arc::clone(&collaborators.optimizer);
    tokio::task::spawn_blocking(move || store_remote_files(files, optimizer.as_ref(), &dir))
        .await
        .unwrap_or_else(|e| {
            warn!("Storing remote images panicked: {e}");
            MediaPool::empty("remote")
        })
}

/// Optimise and write each file to `dir`, then list `dir` as a pool.
fn store_remote_files(files: Vec<RemoteFile>, optimizer: &dyn ImageOptimizer, dir: &Path) -> MediaPool {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Cannot create {}: {e}", dir.display());
        return MediaPool::empty("remote");
    }

    for file in files {
        let name = safe_file_name(&file.name);
        let bytes = match optimizer.optimize(&file.bytes) {
            Ok(optimised) => optimised,
            Err(e) => {
                debug!("Keeping original bytes for {name}: {e}");
                file.bytes
            }
        };
        let path: PathBuf = dir.join(&name);
        if let Err(e) = std::fs::write(&path, &bytes) {
            warn!(
                "{}",
                CardMediaError::RemoteFileSkipped {
                    name,
                    detail: e.to_string(),
                }
            );
        }
    }

    MediaPool::from_dir("remote", dir).unwrap_or_else(|e| {
        warn!("Cannot list {}: {e}", dir.display());
        MediaPool::empty("remote")
    })
}

/// Remote names may contain path separators; keep them inside the pool dir.
fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "unnamed".to_string(),
        _ => cleaned,
    }
}

/// Extract the non-empty slides of a PDF.
pub async fn extract_slides(
    pdf: Vec<u8>,
    extractor: &dyn PageTextExtractor,
) -> Result<Vec<Slide>, Lecture2AnkiError> {
    let pages = extractor.extract(pdf).await?;
    let total = pages.len();
    let slides = pages_to_slides(pages);
    info!("Extracted {} non-empty slides from {} pages", slides.len(), total);
    Ok(slides)
}

/// One LLM-written card, tied to its slide. Serialises in the shape
/// `/generate-apkg` accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideCard {
    pub question: String,
    pub answer: String,
    pub explanation: String,
    pub slide_number: usize,
}

/// Generate one card per slide, preserving slide order.
///
/// Up to `config.concurrency` LLM calls run at once. The first failure
/// aborts the whole batch.
pub async fn generate_cards(
    slides: &[Slide],
    summarizer: Arc<dyn TextSummarizer>,
    config: &ServiceConfig,
    progress: Option<ProgressCallback>,
) -> Result<Vec<SlideCard>, Lecture2AnkiError> {
    if slides.is_empty() {
        return Err(Lecture2AnkiError::NoSlides);
    }
    let total = slides.len();
    let start = Instant::now();
    let succeeded = Arc::new(AtomicUsize::new(0));

    if let Some(ref cb) = progress {
        cb.on_generation_start(total);
    }

    let result = stream::iter(slides.iter().cloned().map(|slide| {
        let summarizer = Arc::clone(&summarizer);
        let progress = progress.clone();
        let succeeded = Arc::clone(&succeeded);
        async move {
            if let Some(ref cb) = progress {
                cb.on_slide_start(slide.slide_number, total);
            }
            match summarizer.summarize(&slide.text).await {
                Ok(card) => {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                    if let Some(ref cb) = progress {
                        cb.on_slide_complete(slide.slide_number, total);
                    }
                    Ok(SlideCard {
                        question: card.question,
                        answer: card.answer,
                        explanation: card.explanation,
                        slide_number: slide.slide_number,
                    })
                }
                Err(e) => {
                    let e = e.for_slide(slide.slide_number);
                    if let Some(ref cb) = progress {
                        cb.on_slide_error(slide.slide_number, total, &e.to_string());
                    }
                    Err(e)
                }
            }
        }
    }))
    .buffered(config.concurrency.max(1))
    .try_collect::<Vec<_>>()
    .await;

    if let Some(ref cb) = progress {
        cb.on_generation_complete(total, succeeded.load(Ordering::SeqCst));
    }
    if let Ok(ref cards) = result {
        info!("Generated {} cards in {}ms", cards.len(), start.elapsed().as_millis());
    }
    result
}

#[derive(Debug, Deserialize)]
struct SlideInput {
    #[serde(default)]
    slide_number: Option<usize>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SlidesPayload {
    Wrapped { slides: Vec<SlideInput> },
    Bare(Vec<SlideInput>),
}

/// Parse a `/generate-flashcards` body: `{"slides": [...]}` or a bare list.
///
/// Slides without a number take their 1-based position; blank slides are dropped.
pub fn parse_slides_payload(body: &[u8]) -> Result<Vec<Slide>, Lecture2AnkiError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| Lecture2AnkiError::InvalidJson {
        detail: e.to_string(),
    })?;
    let payload: SlidesPayload =
        serde_json::from_value(value).map_err(|e| Lecture2AnkiError::UnsupportedPayload {
            detail: format!("expected {{\"slides\": [{{\"slide_number\", \"text\"}}]}}: {e}"),
        })?;
    let inputs = match payload {
        SlidesPayload::Wrapped { slides } | SlidesPayload::Bare(slides) => slides,
    };

    let slides: Vec<Slide> = inputs
        .into_iter()
        .enumerate()
        .filter_map(|(i, s)| {
            let text = s.text.trim();
            (!text.is_empty()).then(|| Slide {
                slide_number: s.slide_number.filter(|n| *n > 0).unwrap_or(i + 1),
                text: text.to_string(),
            })
        })
        .collect();
    if slides.is_empty() {
        return Err(Lecture2AnkiError::NoSlides);
    }
    Ok(slides)
}

//! HTTP-level tests against the router with in-process fakes for the PDF
//! engine, the LLM and the cloud drive.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use lecture2anki::server::HEALTH_MESSAGE;
use lecture2anki::{
    build_router, AppState, Collaborators, GeneratedCard, ImageOptimizer, Lecture2AnkiError,
    PageText, PageTextExtractor, RemoteFile, RemoteFileStore, ServiceConfig, TextSummarizer,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

// ── Fakes ────────────────────────────────────────────────────────────────────

struct FakeExtractor;

#[async_trait]
impl PageTextExtractor for FakeExtractor {
    async fn extract(&self, _pdf: Vec<u8>) -> Result<Vec<PageText>, Lecture2AnkiError> {
        Ok(vec![
            PageText { index: 1, text: "  Intro  ".into() },
            PageText { index: 2, text: " \n ".into() },
            PageText { index: 3, text: "Cells".into() },
        ])
    }
}

struct FakeSummarizer;

#[async_trait]
impl TextSummarizer for FakeSummarizer {
    async fn summarize(&self, slide_text: &str) -> Result<GeneratedCard, Lecture2AnkiError> {
        Ok(GeneratedCard {
            question: format!("What is {slide_text}?"),
            answer: slide_text.to_uppercase(),
            explanation: String::new(),
        })
    }
}

struct FakeStore;

#[async_trait]
impl RemoteFileStore for FakeStore {
    async fn list_images(&self, folder_ref: &str) -> Result<Vec<RemoteFile>, Lecture2AnkiError> {
        if folder_ref != "folder-1" {
            return Err(Lecture2AnkiError::RemoteStoreFailed {
                reference: folder_ref.into(),
                reason: "404".into(),
            });
        }
        Ok(vec![RemoteFile {
            name: "lec-00002.jpg".into(),
            bytes: b"remote".to_vec(),
        }])
    }

    async fn find_sibling_folder(&self, _file_ref: &str) -> Result<Option<String>, Lecture2AnkiError> {
        Ok(Some("folder-1".into()))
    }
}

struct PassThrough;

impl ImageOptimizer for PassThrough {
    fn optimize(&self, bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
        Ok(bytes.to_vec())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn app(media: &Path, with_summarizer: bool) -> Router {
    let config = ServiceConfig::builder()
        .local_media_dir(media)
        .build()
        .unwrap();
    let summarizer: Option<Arc<dyn TextSummarizer>> = if with_summarizer {
        Some(Arc::new(FakeSummarizer))
    } else {
        None
    };
    let collaborators = Collaborators {
        extractor: Arc::new(FakeExtractor),
        summarizer,
        remote: Some(Arc::new(FakeStore)),
        optimizer: Arc::new(PassThrough),
    };
    build_router(AppState::new(config, collaborators))
}

fn post_json(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn multipart(field: &str, data: &[u8]) -> Request<Body> {
    let boundary = "XBOUNDARYX";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"lec.pdf\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/pdf\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Request::builder()
        .method("POST")
        .uri("/extract-text")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Unpacked `.apkg`: the `media` map, the stored files, and an open collection.
struct Package {
    _dir: TempDir,
    media: Value,
    files: Vec<(String, Vec<u8>)>,
    conn: Connection,
}

fn open_package(bytes: &[u8]) -> Package {
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();

    let mut media = String::new();
    zip.by_name("media").unwrap().read_to_string(&mut media).unwrap();
    let media: Value = serde_json::from_str(&media).unwrap();

    let mut files = Vec::new();
    for key in media.as_object().unwrap().keys() {
        let mut data = Vec::new();
        zip.by_name(key).unwrap().read_to_end(&mut data).unwrap();
        files.push((key.clone(), data));
    }

    let mut db = Vec::new();
    zip.by_name("collection.anki2").unwrap().read_to_end(&mut db).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collection.anki2");
    std::fs::write(&path, db).unwrap();
    let conn = Connection::open(&path).unwrap();

    Package { _dir: dir, media, files, conn }
}

impl Package {
    fn notes(&self) -> Vec<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT flds FROM notes ORDER BY id").unwrap();
        stmt.query_map([], |r| r.get::<_, String>(0))
            .unwrap()
            .map(|f| f.unwrap().split('\x1f').map(str::to_string).collect())
            .collect()
    }
}

// ── Routes ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_check() {
    let media = tempfile::tempdir().unwrap();
    let response = app(media.path(), true)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, HEALTH_MESSAGE.as_bytes());
}

#[tokio::test]
async fn generate_apkg_single_card() {
    let media = tempfile::tempdir().unwrap();
    let body = json!([{"question": "Q1", "answer": "A1"}]).to_string();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/apkg");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Lecture Deck.apkg\""
    );

    let package = open_package(&body_bytes(response).await);
    assert_eq!(package.media, json!({}));
    let notes = package.notes();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0][0], "Q1");
    assert_eq!(notes[0][1], "A1");
    assert_eq!(notes[0][2], "(Slide 1)");
    assert_eq!(notes[0][3], "");
}

#[tokio::test]
async fn generate_apkg_uses_deck_name() {
    let media = tempfile::tempdir().unwrap();
    let body = json!({"cards": [{"Question": "Q"}], "deck_name": "Biology 101"}).to_string();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Biology 101.apkg\""
    );

    let package = open_package(&body_bytes(response).await);
    let decks: String = package
        .conn
        .query_row("SELECT decks FROM col", [], |r| r.get(0))
        .unwrap();
    let decks: Value = serde_json::from_str(&decks).unwrap();
    assert!(decks
        .as_object()
        .unwrap()
        .values()
        .any(|d| d["name"] == "Biology 101"));
}

#[tokio::test]
async fn generate_apkg_attaches_local_media_by_slide_number() {
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("lecture-00004.jpg"), b"slide four").unwrap();
    std::fs::write(media.path().join("lecture-00005.jpg"), b"slide five").unwrap();

    let body = json!([
        {"question": "Q1", "slide_number": 4},
        {"question": "Q2", "slide_number": "4"},
        {"question": "Q3", "slide_number": [9]},
    ])
    .to_string();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let package = open_package(&body_bytes(response).await);
    assert_eq!(package.media, json!({"0": "lecture-00004.jpg"}));
    assert_eq!(package.files[0].1, b"slide four");

    let notes = package.notes();
    assert_eq!(notes[0][3], "<img src=\"lecture-00004.jpg\">");
    assert_eq!(notes[1][3], "<img src=\"lecture-00004.jpg\">");
    assert_eq!(notes[2][3], "");
}

#[tokio::test]
async fn generate_apkg_accepts_apostrophe_in_media_name() {
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("Men's Health-00001.jpg"), b"slide one").unwrap();

    let body = json!([{"question": "Q1", "slide_number": 1}]).to_string();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let package = open_package(&body_bytes(response).await);
    assert_eq!(package.media, json!({"0": "Men's Health-00001.jpg"}));
    assert_eq!(package.notes()[0][3], "<img src=\"Men's Health-00001.jpg\">");
}

#[tokio::test]
async fn remote_folder_wins_over_local_media() {
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("lec-00002.jpg"), b"local").unwrap();

    let body = json!({
        "cards": [{"question": "Q", "slide_number": 2}],
        "image_folder_drive_id": "folder-1",
    })
    .to_string();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let package = open_package(&body_bytes(response).await);
    assert_eq!(package.media, json!({"0": "lec-00002.jpg"}));
    assert_eq!(package.files[0].1, b"remote");
}

#[tokio::test]
async fn unreachable_remote_folder_falls_back_to_local() {
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("lec-00002.jpg"), b"local").unwrap();

    let body = json!({
        "cards": [{"question": "Q", "slide_number": 2}],
        "image_folder_drive_id": "no-such-folder",
    })
    .to_string();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let package = open_package(&body_bytes(response).await);
    assert_eq!(package.files[0].1, b"local");
}

#[tokio::test]
async fn lecture_file_reference_finds_sibling_folder() {
    let media = tempfile::tempdir().unwrap();
    let body = json!({
        "cards": [{"question": "Q", "slide_number": 2}],
        "lecture_file_drive_id": "lecture-file",
    })
    .to_string();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let package = open_package(&body_bytes(response).await);
    assert_eq!(package.files[0].1, b"remote");
}

#[tokio::test]
async fn slide_field_variant_adds_field() {
    let media = tempfile::tempdir().unwrap();
    let body = json!({
        "cards": [{"question": "Q", "explanation": "E", "slide_number": [3, 4]}],
        "slide_field": true,
    })
    .to_string();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let notes = open_package(&body_bytes(response).await).notes();
    assert_eq!(notes[0].len(), 5);
    assert_eq!(notes[0][2], "E");
}

#[tokio::test]
async fn empty_object_is_bad_request() {
    let media = tempfile::tempdir().unwrap();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["status"], 400);
    assert!(json["error"].as_str().unwrap().contains("no cards"));
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let media = tempfile::tempdir().unwrap();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-apkg", "[{\"question\": "))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().starts_with("invalid JSON"));
}

#[tokio::test]
async fn extract_text_returns_non_empty_slides() {
    let media = tempfile::tempdir().unwrap();
    let response = app(media.path(), true)
        .oneshot(multipart("file", b"%PDF-1.7 fake"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"slides": [
            {"slide_number": 1, "text": "Intro"},
            {"slide_number": 3, "text": "Cells"},
        ]})
    );
}

#[tokio::test]
async fn extract_text_without_file_field() {
    let media = tempfile::tempdir().unwrap();
    let response = app(media.path(), true)
        .oneshot(multipart("upload", b"%PDF-1.7 fake"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No file provided");
}

#[tokio::test]
async fn extract_text_rejects_non_multipart() {
    let media = tempfile::tempdir().unwrap();
    let response = app(media.path(), true)
        .oneshot(post_json("/extract-text", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generate_flashcards_one_card_per_slide() {
    let media = tempfile::tempdir().unwrap();
    let body = json!({"slides": [
        {"slide_number": 2, "text": "mitosis"},
        {"slide_number": 5, "text": "meiosis"},
    ]})
    .to_string();
    let response = app(media.path(), true)
        .oneshot(post_json("/generate-flashcards", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"cards": [
            {"question": "What is mitosis?", "answer": "MITOSIS", "explanation": "", "slide_number": 2},
            {"question": "What is meiosis?", "answer": "MEIOSIS", "explanation": "", "slide_number": 5},
        ]})
    );
}

#[tokio::test]
async fn generate_flashcards_without_llm_is_unavailable() {
    let media = tempfile::tempdir().unwrap();
    let body = json!({"slides": [{"slide_number": 1, "text": "x"}]}).to_string();
    let response = app(media.path(), false)
        .oneshot(post_json("/generate-flashcards", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], 503);
}

#[tokio::test]
async fn generated_cards_feed_back_into_generate_apkg() {
    let media = tempfile::tempdir().unwrap();
    let router = app(media.path(), true);

    let slides = json!({"slides": [{"slide_number": 7, "text": "osmosis"}]}).to_string();
    let response = router
        .clone()
        .oneshot(post_json("/generate-flashcards", slides))
        .await
        .unwrap();
    let cards = body_bytes(response).await;

    let response = router.oneshot(post_json("/generate-apkg", cards)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let notes = open_package(&body_bytes(response).await).notes();
    assert_eq!(notes[0][0], "What is osmosis?");
    assert_eq!(notes[0][2], "(Slide 7)");
}

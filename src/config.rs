//! Configuration types for deck generation and the surrounding service.
//!
//! Two structs split the knobs by lifetime:
//!
//! * [`DeckConfig`]: everything that shapes the produced package: fixed
//!   deck/note-type identifiers, styling, card templates. These used to be
//!   module-level constants; carrying them in a value lets tests and callers
//!   build decks with different identities side by side.
//! * [`ServiceConfig`]: everything the pipeline needs to *reach* its
//!   collaborators: local media folder, cloud drive credentials, LLM
//!   settings, limits. Built via [`ServiceConfigBuilder`].

use crate::error::Lecture2AnkiError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default CSS applied to every card.
pub const DEFAULT_CSS: &str = r#".card {
  font-family: arial;
  font-size: 20px;
  text-align: center;
  color: black;
  background-color: white;
}
.explanation {
  margin-top: 1em;
  font-size: 16px;
  color: #444;
}
.slide {
  margin-top: 0.5em;
  font-size: 14px;
  color: #888;
}
img {
  max-width: 100%;
}"#;

/// Front side: the question only.
pub const DEFAULT_FRONT_TEMPLATE: &str = "{{Question}}";

/// Back side for the annotated variant (slide number folded into Explanation).
pub const DEFAULT_BACK_TEMPLATE: &str = r#"{{FrontSide}}
<hr id="answer">
{{Answer}}
<div class="explanation">{{Explanation}}</div>
{{Image}}"#;

/// Back side when slide numbers are carried in their own field.
pub const SLIDE_FIELD_BACK_TEMPLATE: &str = r#"{{FrontSide}}
<hr id="answer">
{{Answer}}
<div class="explanation">{{Explanation}}</div>
{{Image}}
<div class="slide">{{Slide Number}}</div>"#;

/// Identity and presentation of the generated deck.
///
/// `deck_id` and `model_id` are fixed on purpose: importing a second package
/// with the same identifiers updates the existing deck in Anki instead of
/// creating a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckConfig {
    /// Anki deck id. Default: 2059400110.
    pub deck_id: i64,
    /// Anki note-type (model) id. Default: 1607392319.
    pub model_id: i64,
    /// Note-type name shown in Anki. Default: "Lecture Flashcard".
    pub model_name: String,
    /// Deck name used when the payload does not carry one. Default: "Lecture Deck".
    pub default_deck_name: String,
    /// Card stylesheet.
    pub css: String,
    /// Question-side template.
    pub front_template: String,
    /// Answer-side template for the annotated variant.
    pub back_template: String,
    /// Answer-side template for the slide-field variant.
    pub slide_field_back_template: String,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            deck_id: 2059400110,
            model_id: 1607392319,
            model_name: "Lecture Flashcard".to_string(),
            default_deck_name: "Lecture Deck".to_string(),
            css: DEFAULT_CSS.to_string(),
            front_template: DEFAULT_FRONT_TEMPLATE.to_string(),
            back_template: DEFAULT_BACK_TEMPLATE.to_string(),
            slide_field_back_template: SLIDE_FIELD_BACK_TEMPLATE.to_string(),
        }
    }
}

/// Credentials for the cloud drive REST API.
#[derive(Clone, PartialEq, Eq)]
pub enum DriveCredentials {
    /// OAuth access token, sent as `Authorization: Bearer …`.
    BearerToken(String),
    /// API key, sent as the `key` query parameter (public folders only).
    ApiKey(String),
}

impl fmt::Debug for DriveCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveCredentials::BearerToken(_) => f.write_str("BearerToken(<redacted>)"),
            DriveCredentials::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
        }
    }
}

/// Configuration for the flashcard service.
///
/// Built via [`ServiceConfig::builder()`] or using [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use lecture2anki::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .local_media_dir("slides/media")
///     .max_image_dimension(1024)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Read-only fallback folder of slide images. Default: `./media`.
    ///
    /// Files named `<anything>-NNNNN.jpg` are matched to cards by slide number.
    pub local_media_dir: PathBuf,

    /// Longest edge, in pixels, of images pulled from the cloud drive. Default: 1280.
    pub max_image_dimension: u32,

    /// JPEG quality used when re-encoding downloaded images. Default: 80.
    pub jpeg_quality: u8,

    /// Base URL of the Drive v3 REST API.
    pub drive_api_base: String,

    /// Drive credentials. `None` disables remote media.
    pub drive_credentials: Option<DriveCredentials>,

    /// Timeout for each cloud drive request in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for flashcard generation. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens per generated card. Default: 1024.
    pub max_tokens: usize,

    /// Per-LLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Number of concurrent LLM calls when generating cards. Default: 4.
    pub concurrency: usize,

    /// Custom system prompt for card generation. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// Largest accepted request body in bytes. Default: 100 MiB.
    pub max_body_bytes: usize,

    /// Deck identity and styling.
    pub deck: DeckConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            local_media_dir: PathBuf::from("media"),
            max_image_dimension: 1280,
            jpeg_quality: 80,
            drive_api_base: "https://www.googleapis.com/drive/v3".to_string(),
            drive_credentials: None,
            download_timeout_secs: 120,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 1024,
            api_timeout_secs: 60,
            concurrency: 4,
            system_prompt: None,
            max_body_bytes: 100 * 1024 * 1024,
            deck: DeckConfig::default(),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("local_media_dir", &self.local_media_dir)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("drive_api_base", &self.drive_api_base)
            .field("drive_credentials", &self.drive_credentials)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("deck", &self.deck)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn local_media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.local_media_dir = dir.into();
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px.max(64);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn drive_api_base(mut self, url: impl Into<String>) -> Self {
        self.config.drive_api_base = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn drive_credentials(mut self, creds: DriveCredentials) -> Self {
        self.config.drive_credentials = Some(creds);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_body_bytes(mut self, n: usize) -> Self {
        self.config.max_body_bytes = n;
        self
    }

    pub fn deck(mut self, deck: DeckConfig) -> Self {
        self.config.deck = deck;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Lecture2AnkiError> {
        let c = &self.config;
        if c.deck.deck_id <= 1 {
            // Deck id 1 is Anki's built-in "Default" deck.
            return Err(Lecture2AnkiError::InvalidConfig(format!(
                "deck_id must be > 1, got {}",
                c.deck.deck_id
            )));
        }
        if c.deck.model_id <= 0 {
            return Err(Lecture2AnkiError::InvalidConfig(format!(
                "model_id must be positive, got {}",
                c.deck.model_id
            )));
        }
        if c.deck.default_deck_name.trim().is_empty() {
            return Err(Lecture2AnkiError::InvalidConfig(
                "default deck name must not be empty".into(),
            ));
        }
        if c.max_body_bytes == 0 {
            return Err(Lecture2AnkiError::InvalidConfig(
                "max_body_bytes must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

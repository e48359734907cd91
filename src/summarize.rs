//! Flashcard text generation: slide text → question / answer / explanation.
//!
//! [`TextSummarizer`] is the seam; [`LlmSummarizer`] drives an edgequake-llm
//! provider. All prompt wording lives in [`crate::prompts`].
//!
//! There is no retry loop. A failed or timed-out call is reported straight
//! back to the caller, which aborts the generation request.

use crate::config::ServiceConfig;
use crate::error::Lecture2AnkiError;
use crate::pipeline::normalize::lookup_text;
use crate::pipeline::postprocess::{clean_field, clean_llm_output};
use crate::prompts::{slide_message, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One generated flashcard, before it is tied to a slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCard {
    pub question: String,
    pub answer: String,
    pub explanation: String,
}

/// Given one slide's text, produce one flashcard.
///
/// Errors carry slide `0`; see [`Lecture2AnkiError::for_slide`].
#[async_trait]
pub trait TextSummarizer: Send + Sync {
    async fn summarize(&self, slide_text: &str) -> Result<GeneratedCard, Lecture2AnkiError>;
}

/// edgequake-llm backed summarizer.
pub struct LlmSummarizer {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ServiceConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve a provider from `config` and the environment.
    ///
    /// # Errors
    /// [`Lecture2AnkiError::SummarizerNotConfigured`] when no provider can be found.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, Lecture2AnkiError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }
}

#[async_trait]
impl TextSummarizer for LlmSummarizer {
    async fn summarize(&self, slide_text: &str) -> Result<GeneratedCard, Lecture2AnkiError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user(slide_message(slide_text)),
        ];

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Lecture2AnkiError::SummarizerTimeout {
                slide: 0,
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| Lecture2AnkiError::SummarizerFailed {
                slide: 0,
                detail: e.to_string(),
            })?;

        debug!(
            "{} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        parse_generated_card(&response.content).map_err(|detail| {
            Lecture2AnkiError::SummarizerFailed { slide: 0, detail }
        })
    }
}

/// Build `CompletionOptions` from the service config.
fn build_options(config: &ServiceConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Parse a raw completion into a card.
///
/// Keys are matched case-insensitively. A missing or blank question is an
/// error; a missing answer or explanation is left empty.
pub fn parse_generated_card(raw: &str) -> Result<GeneratedCard, String> {
    let json = clean_llm_output(raw).ok_or_else(|| {
        format!(
            "response contains no JSON object: {:?}",
            raw.chars().take(80).collect::<String>()
        )
    })?;
    let obj = match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(obj)) => obj,
        Ok(_) => return Err("response is not a JSON object".into()),
        Err(e) => return Err(format!("response is not valid JSON: {e}")),
    };

    let field = |key: &str| lookup_text(&obj, key).map(|s| clean_field(&s)).unwrap_or_default();
    let question = field("question");
    if question.is_empty() {
        return Err("response has no question".into());
    }
    Ok(GeneratedCard {
        question,
        answer: field("answer"),
        explanation: field("explanation"),
    })
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Lecture2AnkiError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Lecture2AnkiError::SummarizerNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`)
/// 2. **Named provider + model** (`config.provider_name`)
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`)
/// 4. **OpenAI key** (`OPENAI_API_KEY`): preferred when several keys exist
/// 5. **Full auto-detection** (`ProviderFactory::from_env`)
pub fn resolve_provider(config: &ServiceConfig) -> Result<Arc<dyn LLMProvider>, Lecture2AnkiError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Lecture2AnkiError::SummarizerNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

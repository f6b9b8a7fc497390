//! Completion capability.
//!
//! [`CompletionProvider`] is the only way the pipeline talks to a language
//! model: a prompt in, one text completion out. [`OllamaCompletion`] backs it
//! with rig-core's Ollama client.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;
use rig::providers::ollama;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CompletionError;

/// Sampling temperature for query formulation, URL selection and evaluation.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Sampling temperature for the final synthesized answer.
pub const FINAL_TEMPERATURE: f32 = 0.2;

/// A text-completion service.
///
/// Implementations are shared across the whole run behind an `Arc`.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Produce one completion for `prompt`.
    async fn infer(
        &self,
        prompt: &str,
        enable_reasoning: bool,
        temperature: f32,
    ) -> Result<String, CompletionError>;

    /// Abort the call currently in flight, if any.
    ///
    /// Returns `true` when a call was cancelled.
    fn cancel_current(&self) -> bool {
        false
    }

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Cancel handle of the single in-flight completion call.
///
/// Guarded by its own mutex so `cancel` never waits on the call it cancels.
#[derive(Debug, Default)]
pub struct InFlight {
    slot: StdMutex<Option<CancellationToken>>,
}

impl InFlight {
    /// Register a fresh call and return its token.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        token
    }

    pub fn finish(&self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn cancel(&self) -> bool {
        match self.slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// OLLAMA (RIG) IMPLEMENTATION
// =============================================================================
/// Completion backed by a local Ollama server through rig-core.
///
/// Calls are serialized: at most one completion is in flight at a time, which
/// is what lets a single [`InFlight`] slot track the cancel handle.
pub struct OllamaCompletion {
    client: ollama::Client,
    model: String,
    max_tokens: u64,
    serial: Mutex<()>,
    in_flight: InFlight,
}

impl OllamaCompletion {
    pub fn new(config: &Config) -> Self {
        // rig's Ollama client reads its base URL from the environment
        std::env::set_var("OLLAMA_API_BASE_URL", &config.ollama_host);
        let client = ollama::Client::from_env();

        debug!(
            host = %config.ollama_host,
            model = %config.model,
            "Created Ollama completion client"
        );

        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            serial: Mutex::new(()),
            in_flight: InFlight::default(),
        }
    }
}

#[async_trait]
impl CompletionProvider for OllamaCompletion {
    async fn infer(
        &self,
        prompt: &str,
        enable_reasoning: bool,
        temperature: f32,
    ) -> Result<String, CompletionError> {
        let _serial = self.serial.lock().await;
        let token = self.in_flight.begin();

        info!(
            model = %self.model,
            reasoning = enable_reasoning,
            temperature,
            "Calling completion model"
        );

        let agent = self
            .client
            .agent(&self.model)
            .temperature(f64::from(temperature))
            .max_tokens(self.max_tokens)
            .additional_params(serde_json::json!({ "think": enable_reasoning }))
            .build();

        let result = tokio::select! {
            _ = token.cancelled() => Err(CompletionError::Cancelled),
            response = async { agent.prompt(prompt).await } => {
                response.map_err(|e| CompletionError::Request(e.to_string()))
            }
        };

        self.in_flight.finish();

        let text = result?;
        if text.trim().is_empty() {
            warn!(model = %self.model, "Completion returned empty text");
            return Err(CompletionError::EmptyResponse);
        }
        Ok(text)
    }

    fn cancel_current(&self) -> bool {
        let cancelled = self.in_flight.cancel();
        if cancelled {
            info!(model = %self.model, "Cancelled in-flight completion");
        }
        cancelled
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

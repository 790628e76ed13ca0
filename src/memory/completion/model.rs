//! Completion model wrapper for Rig + Ollama.

use std::future::Future;
use std::pin::Pin;

use reqwest::Client as ReqwestClient;
use rig::client::CompletionClient;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;
use rig::providers::ollama;

use crate::memory::core::config::LlmConfig;
use crate::memory::core::errors::{MemoryError, MemoryResult};

/// Boxed future type for completion calls.
pub type CompletionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A model that turns a system preamble and a prompt into text.
pub trait LanguageModel: Send + Sync {
    /// Run one completion and return the aggregated assistant text.
    ///
    /// # Errors
    /// Returns an error if the model call fails.
    fn complete<'a>(
        &'a self,
        system: &'a str,
        prompt: &'a str,
    ) -> CompletionFuture<'a, MemoryResult<String>>;
}

/// Ollama completion model using the Rig provider.
#[derive(Clone)]
pub struct OllamaLanguageModel {
    model: ollama::CompletionModel,
    temperature: f64,
    max_tokens: Option<u64>,
}

impl OllamaLanguageModel {
    /// Create a new model from config.
    ///
    /// # Errors
    /// Returns an error if the Ollama client cannot be built.
    pub fn new(config: &LlmConfig) -> MemoryResult<Self> {
        let builder = ollama::Client::<ReqwestClient>::builder().api_key(rig::client::Nothing);
        let builder = if let Some(base_url) = &config.base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        let client = builder.build().map_err(MemoryError::from)?;
        let model = client.completion_model(config.model.clone());
        Ok(Self {
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

impl LanguageModel for OllamaLanguageModel {
    fn complete<'a>(
        &'a self,
        system: &'a str,
        prompt: &'a str,
    ) -> CompletionFuture<'a, MemoryResult<String>> {
        Box::pin(async move {
            let request = self
                .model
                .completion_request(prompt.to_string())
                .preamble(system.to_string())
                .temperature(self.temperature)
                .max_tokens_opt(self.max_tokens)
                .build();

            let response = self.model.completion(request).await?;
            Ok(extract_text(&response.choice))
        })
    }
}

/// Concatenate every text part of a (possibly multi-part) assistant reply.
fn extract_text(choice: &rig::OneOrMany<AssistantContent>) -> String {
    let mut out = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            out.push_str(&text.text);
        }
    }
    out
}

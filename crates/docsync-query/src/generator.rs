//! Answer generators and prompt assembly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use docsync_core::config::{LlmBackend, LlmSettings};
use docsync_core::traits::Generator;
use docsync_core::Chunk;

pub const NO_CONTEXT_REPLY: &str = "No relevant passages were found in the indexed documents.";

/// Numbered context passages followed by the question.
pub fn build_prompt(query: &str, context: &[Chunk]) -> String {
    let mut prompt = String::from(
        "Answer the question using only the passages below. Cite passages by their number. \
         If the passages do not contain the answer, say so.\n\n",
    );
    if context.is_empty() {
        prompt.push_str("(no passages)\n");
    }
    for (i, chunk) in context.iter().enumerate() {
        prompt.push_str(&format!("[{}] ({})\n{}\n\n", i + 1, chunk.doc_id, chunk.content.trim()));
    }
    prompt.push_str(&format!("Question: {}\nAnswer:", query.trim()));
    prompt
}

/// Model-free generator: quotes the retrieved passages with their sources.
#[derive(Debug, Default, Clone)]
pub struct ExtractiveGenerator;

impl Generator for ExtractiveGenerator {
    fn generate(&self, _query: &str, context: &[Chunk]) -> Result<String> {
        if context.is_empty() {
            return Ok(NO_CONTEXT_REPLY.to_string());
        }
        let body = context
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {} ({})", i + 1, c.content.trim(), c.doc_id))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(body)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Calls a local Ollama server's `/api/generate`.
pub struct OllamaGenerator {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/api/generate", endpoint.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Generator for OllamaGenerator {
    fn generate(&self, query: &str, context: &[Chunk]) -> Result<String> {
        let prompt = build_prompt(query, context);
        debug!(url = %self.url, model = %self.model, passages = context.len(), "requesting completion");
        let response: GenerateResponse = self
            .client
            .post(&self.url)
            .json(&GenerateRequest { model: &self.model, prompt: &prompt, stream: false })
            .send()
            .with_context(|| format!("POST {}", self.url))?
            .error_for_status()?
            .json()
            .context("decoding generate response")?;
        Ok(response.response.trim().to_string())
    }
}

pub fn generator_from_settings(settings: &LlmSettings) -> Result<Box<dyn Generator>> {
    Ok(match settings.backend {
        LlmBackend::Extractive => Box::new(ExtractiveGenerator),
        LlmBackend::Ollama => Box::new(OllamaGenerator::new(
            &settings.endpoint,
            &settings.model,
            Duration::from_secs(settings.timeout_secs),
        )?),
    })
}

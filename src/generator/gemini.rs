//! Gemini `generateContent` backend.
//!
//! Builds the Electra prompt (persona, optional knowledge snippets, the
//! sender's recent exchanges and the message) and posts it to
//! `{base_url}/models/{model}:generateContent` with the `x-goog-api-key`
//! header. Each sender keeps a bounded tail of `Usuario:/Bot:` lines that is
//! folded into the next prompt.

use crate::config::GeneratorConfig;
use crate::error::{BotError, Result};
use crate::generator::{GenerateError, ResponseGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ── Wire types ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Concatenated text of the first candidate, or `None` if there is none.
fn first_candidate_text(body: &str) -> Option<String> {
    let parsed: GenerateResponse = serde_json::from_str(body).ok()?;
    let content = parsed.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().map(|p| p.text).collect();
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_owned())
    }
}

// ── Prompt ─────────────────────────────────────────────────────

/// Compose the prompt sent for one message.
pub fn build_prompt(knowledge: &str, history: &str, message: &str) -> String {
    let mut prompt = String::from(
        "Eres un asistente virtual llamado Electra amigable y profesional de ElectronicsJS. \
         Tu objetivo es proporcionar la mejor atención posible siguiendo estas pautas:\n",
    );
    if !knowledge.is_empty() {
        prompt.push_str("\nCONTEXTO RELEVANTE:\n");
        prompt.push_str(knowledge);
        prompt.push('\n');
    }
    prompt.push_str("\nHistorial del usuario: ");
    prompt.push_str(history);
    prompt.push_str("\n\nRESPONDE A: \"");
    prompt.push_str(message);
    prompt.push_str(
        "\"\n\nFORMATO DE RESPUESTA:\n\
         - Mantén las respuestas concisas (máximo 4-5 líneas)\n\
         - Usa viñetas para listas largas\n\
         - Incluye emojis relevantes ocasionalmente",
    );
    prompt
}

/// Last `max_chars` characters of `text`.
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

/// Append one exchange to a sender's history, keeping the tail bounded.
pub fn append_exchange(history: &str, max_chars: usize, message: &str, reply: &str) -> String {
    format!(
        "{}\nUsuario: {message}\nBot: {reply}",
        tail_chars(history, max_chars)
    )
    .trim()
    .to_owned()
}

/// Read knowledge snippets, skipping files that cannot be read.
pub fn load_knowledge(paths: &[impl AsRef<Path>]) -> String {
    let mut sections = Vec::new();
    for path in paths {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => sections.push(text.trim().to_owned()),
            Ok(_) => tracing::debug!(path = %path.display(), "knowledge file is empty"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping knowledge file");
            }
        }
    }
    sections.join("\n\n")
}

// ── Generator ──────────────────────────────────────────────────

struct Conversation {
    history: String,
    last_used: Instant,
}

/// [`ResponseGenerator`] backed by the Gemini REST API.
pub struct GeminiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    context_chars: usize,
    knowledge: String,
    contexts: Mutex<HashMap<String, Conversation>>,
}

impl GeminiGenerator {
    /// Build a generator from config, reading knowledge files once.
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(BotError::Config(
                "generator.api_key (GEMINI_API_KEY) is not set".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BotError::Generator(format!("cannot build HTTP client: {e}")))?;
        let knowledge = load_knowledge(&config.knowledge_paths);
        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            api_key: config.api_key.clone(),
            context_chars: config.context_chars,
            knowledge,
            contexts: Mutex::new(HashMap::new()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stored history for `context_key`.
    pub fn history(&self, context_key: &str) -> Option<String> {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(context_key)
            .map(|c| c.history.clone())
    }

    async fn request(&self, prompt: &str) -> std::result::Result<String, GenerateError> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerateError::Failed(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerateError::Failed(format!("cannot read body: {e}")))?;
        if !status.is_success() {
            let snippet: String = text.chars().take(300).collect();
            return Err(GenerateError::Failed(format!("HTTP {status}: {snippet}")));
        }
        first_candidate_text(&text)
            .ok_or_else(|| GenerateError::Failed("response carried no candidate text".into()))
    }
}

#[async_trait]
impl ResponseGenerator for GeminiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        context_key: &str,
        timeout: Duration,
    ) -> std::result::Result<String, GenerateError> {
        let history = self.history(context_key).unwrap_or_default();
        let full_prompt = build_prompt(&self.knowledge, &history, prompt);

        let reply = match tokio::time::timeout(timeout, self.request(&full_prompt)).await {
            Ok(result) => result?,
            Err(_) => return Err(GenerateError::Timeout(timeout)),
        };

        let updated = append_exchange(&history, self.context_chars, prompt, &reply);
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                context_key.to_owned(),
                Conversation {
                    history: updated,
                    last_used: Instant::now(),
                },
            );
        Ok(reply)
    }

    fn trim_context(&self) -> usize {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let trimmed = contexts.len();
        contexts.clear();
        trimmed
    }

    fn sweep_idle_context(&self, idle: Duration) -> usize {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let before = contexts.len();
        contexts.retain(|_, c| c.last_used.elapsed() < idle);
        before - contexts.len()
    }
}

#[cfg(test)]
#[path = "gemini_tests.rs"]
mod gemini_tests;

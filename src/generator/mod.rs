//! Response generation contract.
//!
//! The admission pipeline only sees [`ResponseGenerator`]: prompt text and a
//! context key in, generated text out, with a timeout reported separately
//! from every other failure so the pipeline can retry it.

pub mod gemini;

use async_trait::async_trait;
use std::time::Duration;

pub use gemini::GeminiGenerator;

/// Failure of a single generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    /// The backend did not answer within the allotted time.
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    /// Any other failure (HTTP error, empty candidate, malformed body).
    #[error("generation failed: {0}")]
    Failed(String),
}

impl GenerateError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Text generation backend.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a reply to `prompt`, threading per-conversation context under `context_key`.
    async fn generate(
        &self,
        prompt: &str,
        context_key: &str,
        timeout: Duration,
    ) -> Result<String, GenerateError>;

    /// Drop conversation context. Returns the number of conversations trimmed.
    fn trim_context(&self) -> usize {
        0
    }

    /// Drop conversations unused for at least `idle`. Returns how many went.
    fn sweep_idle_context(&self, idle: Duration) -> usize {
        let _ = idle;
        0
    }
}

/// Call `generator` until it succeeds, fails with a non-timeout error, or
/// `max_retries` timeouts have been retried.
pub async fn generate_with_retry(
    generator: &dyn ResponseGenerator,
    prompt: &str,
    context_key: &str,
    timeout: Duration,
    max_retries: u32,
) -> Result<String, GenerateError> {
    let mut retries = 0u32;
    loop {
        match generator.generate(prompt, context_key, timeout).await {
            Err(err) if err.is_timeout() && retries < max_retries => {
                retries += 1;
                tracing::warn!(
                    context_key,
                    retries,
                    max_retries,
                    "response generation timed out, retrying"
                );
            }
            other => return other,
        }
    }
}

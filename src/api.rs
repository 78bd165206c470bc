//! Generation backend client with exponential backoff retry logic.
//!
//! This module is the only place that talks to the text-generation service.
//! It uses a trait-based design so the pipeline never depends on a concrete
//! backend:
//!
//! - [`GenerateAsync`]: core trait defining one prompt-in, text-out call
//! - [`ChatClient`]: OpenAI-compatible chat completions client over HTTP
//! - [`RetryGenerate`]: decorator that adds retry logic to any
//!   [`GenerateAsync`] implementation
//!
//! # Retry Strategy
//!
//! - Exponential backoff starting at the configured base delay
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//!
//! The stage deadline is imposed by the caller (see `stages`), so a retry
//! sequence that runs long is cut off there rather than here.

use std::fmt;
use std::time::{Duration as StdDuration, Instant};

use rand::{rng, Rng};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{error, instrument, warn};

use crate::config::ModelParams;
use crate::error::StageError;

/// One request to the generation backend.
///
/// The `system` string carries the stage's fixed role instructions and the
/// `input` string carries the story text or summary being transformed.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system: &'a str,
    pub input: &'a str,
    pub params: &'a ModelParams,
}

/// Trait for async text generation.
///
/// Implementors send one prompt pair to a generation backend and return the
/// produced text. The abstraction allows decorators (like retry logic) and
/// scripted test backends to slot in behind the same pipeline.
pub trait GenerateAsync {
    /// Send one request to the backend and return the generated text.
    async fn generate(&self, req: &ChatRequest<'_>) -> Result<String, StageError>;
}

/// OpenAI-compatible chat completions client.
///
/// Sends `POST {base_url}/chat/completions` with a system message carrying
/// the stage role and a user message carrying the input text. Works against
/// any service speaking the same wire format, including local inference
/// servers.
pub struct ChatClient {
    http: reqwest::Client,
    completions_url: String,
    api_key: String,
}

impl ChatClient {
    /// Build a client for the backend rooted at `base_url`.
    pub fn new(base_url: &str, api_key: String) -> Self {
        ChatClient {
            http: reqwest::Client::new(),
            completions_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        }
    }
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("completions_url", &self.completions_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl GenerateAsync for ChatClient {
    #[instrument(level = "info", skip_all, fields(model = %req.params.model))]
    async fn generate(&self, req: &ChatRequest<'_>) -> Result<String, StageError> {
        let t0 = Instant::now();
        let body = serde_json::json!({
            "model": req.params.model,
            "temperature": req.params.temperature,
            "messages": [
                { "role": "system", "content": req.system },
                { "role": "user", "content": req.input },
            ],
        });

        let response = self
            .http
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let dt = t0.elapsed();
            warn!(
                status = status.as_u16(),
                elapsed_ms = dt.as_millis() as u128,
                body = %crate::utils::truncate_for_log(&body, 300),
                "Generation request rejected"
            );
            return Err(StageError::Backend(format!(
                "status {}: {}",
                status.as_u16(),
                crate::utils::truncate_for_log(&body, 300)
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| StageError::Malformed(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| StageError::Malformed("response carried no choices".to_string()))
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`GenerateAsync`]
/// implementation.
///
/// This decorator transparently retries transient failures. It's designed to
/// be resilient against rate limiting, network issues, and temporary server
/// errors.
///
/// # Backoff Strategy
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryGenerate<T> {
    /// The underlying backend client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryGenerate<T>
where
    T: GenerateAsync,
{
    /// Create a new retry wrapper around an existing [`GenerateAsync`]
    /// implementation.
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        RetryGenerate {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryGenerate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryGenerate")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> GenerateAsync for RetryGenerate<T>
where
    T: GenerateAsync + fmt::Debug,
{
    #[instrument(level = "info", skip_all)]
    async fn generate(&self, req: &ChatRequest<'_>) -> Result<String, StageError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.generate(req).await {
                Ok(resp) => {
                    return Ok(resp);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                            elapsed_ms_total = total_dt.as_millis() as u128,
                            error = %e,
                            "generate() exhausted retries"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                        elapsed_ms_total = total_dt.as_millis() as u128,
                        ?delay,
                        error = %e,
                        "generate() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

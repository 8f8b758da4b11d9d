pub mod openrouter;

pub use openrouter::{LlmConfig, OpenRouterClient};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing api key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Hosted text generation: one prompt in, free-form text out.
#[async_trait]
pub trait GenerationService: Send + Sync + 'static {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[cfg(test)]
pub mod stub {
    use super::{GenerationService, LlmError};
    use async_trait::async_trait;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    /// Returns a fixed reply (or failure) and records every prompt it saw.
    pub struct StubGenerator {
        reply: Option<String>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl StubGenerator {
        pub fn replying(text: impl Into<String>) -> Self {
            Self {
                reply: Some(text.into()),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                reply: None,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_prompt(&self) -> Option<String> {
            self.prompts.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl GenerationService for StubGenerator {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply
                .clone()
                .ok_or_else(|| LlmError::Http("HTTP 503 Service Unavailable".into()))
        }
    }
}

//! The LLM registry: one client handle behind a process-wide semaphore.

use std::sync::Arc;

use tokio::sync::Semaphore;

use pandora_domain::error::{Error, Result};

use crate::roles::Role;
use crate::traits::{ChatMessage, ChatRequest, ChatResponse, LlmClient};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caps simultaneous LLM calls across all turns. Phases acquire a permit for
/// the duration of each call; the permit is released even on error.
pub struct LlmRegistry {
    client: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl LlmRegistry {
    pub fn new(client: Arc<dyn LlmClient>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Complete a prompt under the given sampling role.
    pub async fn complete(
        &self,
        role: Role,
        messages: Vec<ChatMessage>,
        json_mode: bool,
    ) -> Result<ChatResponse> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("llm semaphore closed".into()))?;

        let started = std::time::Instant::now();
        let req = ChatRequest {
            messages,
            temperature: Some(role.temperature()),
            max_tokens: None,
            json_mode,
            model: None,
        };
        let result = self.client.complete(req).await;
        tracing::debug!(
            role = role.name(),
            client = self.client.client_id(),
            duration_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "llm call finished"
        );
        result
    }
}

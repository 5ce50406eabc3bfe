//! Assistant lifecycle: one shared assistant per process, created lazily and
//! recreated when the upstream copy disappears.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::EngineError;
use crate::config::EngineConfig;
use crate::openai::AssistantsApi;
use crate::openai::types::{Assistant, CreateAssistantRequest, Tool, ToolResources};

const MAX_CREATE_ATTEMPTS: u32 = 3;
const CREATE_BACKOFF_STEP: Duration = Duration::from_secs(1);
const CREATE_BACKOFF_CAP: Duration = Duration::from_secs(3);

pub struct AssistantManager {
    config: EngineConfig,
    // Async mutex: held across the validate/create round-trips so concurrent
    // callers can never race two creations.
    cached: Mutex<Option<Assistant>>,
}

impl AssistantManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cached: Mutex::new(None),
        }
    }

    /// Returns a live assistant, creating one if none is cached. A cached
    /// handle is verified upstream first; a handle that no longer exists is
    /// discarded and replaced within the same call.
    pub async fn ensure<A: AssistantsApi>(&self, api: &A) -> Result<Assistant, EngineError> {
        let mut cached = self.cached.lock().await;
        if let Some(assistant) = cached.as_ref() {
            match api.retrieve_assistant(&assistant.id).await {
                Ok(live) => {
                    debug!(assistant_id = %live.id, "reusing assistant");
                    return Ok(live);
                }
                Err(err) if err.is_not_found() => {
                    warn!(assistant_id = %assistant.id, "cached assistant is gone upstream; recreating");
                    *cached = None;
                }
                Err(err) => {
                    return Err(EngineError::Transport {
                        reason: err.to_string(),
                    });
                }
            }
        }
        let assistant = self.create(api).await?;
        *cached = Some(assistant.clone());
        Ok(assistant)
    }

    async fn create<A: AssistantsApi>(&self, api: &A) -> Result<Assistant, EngineError> {
        // Without a default store there is nothing to search; runs that carry
        // a store override attach the tool themselves.
        let (tools, tool_resources) = match self.config.default_store.as_deref() {
            Some(store) => (
                vec![Tool::file_search()],
                Some(ToolResources::file_search(store)),
            ),
            None => (Vec::new(), None),
        };
        let req = CreateAssistantRequest {
            model: self.config.model.clone(),
            name: Some(self.config.assistant_name.clone()),
            instructions: Some(self.config.instructions.clone()),
            tools,
            tool_resources,
        };

        let mut last_reason = String::new();
        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            match api.create_assistant(&req).await {
                Ok(assistant) => {
                    debug!(assistant_id = %assistant.id, model = %assistant.model, "created assistant");
                    return Ok(assistant);
                }
                Err(err) => {
                    last_reason = err.to_string();
                    if attempt < MAX_CREATE_ATTEMPTS {
                        let delay = (CREATE_BACKOFF_STEP * attempt).min(CREATE_BACKOFF_CAP);
                        warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "assistant creation failed; retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(EngineError::Creation {
            reason: last_reason,
        })
    }
}

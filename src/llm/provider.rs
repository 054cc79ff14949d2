use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{ChatTurn, JobStatus, SpeechClip};

/// One text generation call. `schema` constrains the reply shape when set.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub history: Vec<ChatTurn>,
    pub prompt: String,
    pub schema: Option<Value>,
    pub thinking_budget: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn thinking(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    pub fn history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the raw reply text; shape checking happens in the gateway.
    async fn generate(&self, request: GenerationRequest) -> Result<String>;

    async fn synthesize_speech(&self, text: &str, voice: &str) -> Result<SpeechClip>;

    /// Starts a long-running video job and returns its handle.
    async fn submit_video(&self, prompt: &str) -> Result<String>;

    async fn poll_video(&self, handle: &str) -> Result<JobStatus>;

    fn name(&self) -> &str;
}

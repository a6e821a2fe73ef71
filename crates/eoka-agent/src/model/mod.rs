//! The model seam: one call per iteration, returning at most one action.

mod anthropic;

pub use anthropic::{parse_tool_call, tool_definitions, AnthropicClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{BrowserAction, Conversation};
use crate::Result;

/// What the model decided this turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub thought: Option<String>,
    pub action: Option<BrowserAction>,
    pub complete: bool,
    pub result: Option<String>,
}

impl ModelResponse {
    pub fn act(action: BrowserAction) -> Self {
        Self {
            action: Some(action),
            ..Default::default()
        }
    }

    pub fn done(result: impl Into<String>) -> Self {
        Self {
            complete: true,
            result: Some(result.into()),
            ..Default::default()
        }
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }
}

/// Sends the whole conversation and returns the model's decision.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn send(&self, conversation: &Conversation) -> Result<ModelResponse>;
}

#[async_trait]
impl<M: ModelClient + ?Sized> ModelClient for Box<M> {
    async fn send(&self, conversation: &Conversation) -> Result<ModelResponse> {
        (**self).send(conversation).await
    }
}

//! Anthropic Messages API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ModelClient, ModelResponse};
use crate::types::{
    BrowserAction, ContentPart, Conversation, MessageContent, ScrollDirection,
    DEFAULT_SCROLL_AMOUNT,
};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const RATE_LIMIT_ATTEMPTS: u32 = 5;
/// Longest pause a `wait` tool call may ask for.
const MAX_WAIT_MS: u64 = 30_000;

// ---------------------------------------------------------------------------
// Tool inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct NavigateInput {
    #[schemars(description = "Absolute URL to open")]
    url: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ClickInput {
    #[schemars(description = "CSS selector from the element list")]
    selector: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ClickAtInput {
    #[schemars(description = "Viewport X of the element center")]
    x: f64,
    #[schemars(description = "Viewport Y of the element center")]
    y: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FillInput {
    #[schemars(description = "CSS selector of the input")]
    selector: String,
    #[schemars(description = "Text to enter")]
    value: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PressInput {
    #[schemars(description = "Key name, e.g. Enter, Escape, Tab")]
    key: String,
}

fn default_amount() -> u32 {
    DEFAULT_SCROLL_AMOUNT
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ScrollInput {
    #[serde(default)]
    direction: ScrollDirection,
    #[serde(default = "default_amount")]
    #[schemars(description = "Pixels, for up/down")]
    amount: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CompleteInput {
    #[schemars(description = "What was achieved, or what was found")]
    result: String,
}

/// Not advertised, but accepted if the model asks for it.
#[derive(Debug, Deserialize)]
struct WaitInput {
    #[serde(default)]
    seconds: f64,
}

fn input_schema<T: JsonSchema>() -> Value {
    let generator = schemars::generate::SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| json!({"type": "object"}));
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
    }
    value
}

fn tool<T: JsonSchema>(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "input_schema": input_schema::<T>(),
    })
}

/// Tool list sent with every request. One tool per action, plus `complete_task`.
pub fn tool_definitions() -> Value {
    json!([
        tool::<NavigateInput>("navigate", "Navigate to URL"),
        tool::<ClickInput>("click", "Click element by selector. Prefer [data-qa] selectors"),
        tool::<ClickAtInput>(
            "click_at_coordinates",
            "Click at X,Y. Use the element coords from the list"
        ),
        tool::<FillInput>("fill", "Fill input. Search fields are submitted automatically"),
        tool::<PressInput>("press", "Press keyboard key (e.g. Enter, Escape, Tab)"),
        tool::<ScrollInput>("scroll", "Scroll: down/up/bottom/top"),
        tool::<CompleteInput>("complete_task", "Complete with result"),
    ])
}

fn decode<T: for<'de> Deserialize<'de>>(name: &str, input: Value) -> Result<T> {
    serde_json::from_value(input)
        .map_err(|e| Error::InvalidArgument(format!("invalid input for {}: {}", name, e)))
}

/// Map one tool call to an action. `complete_task` yields `None`.
pub fn parse_tool_call(name: &str, input: Value) -> Result<Option<BrowserAction>> {
    let action = match name {
        "navigate" => {
            let i: NavigateInput = decode(name, input)?;
            BrowserAction::Navigate { url: i.url }
        }
        "click" => {
            let i: ClickInput = decode(name, input)?;
            BrowserAction::Click {
                selector: i.selector,
            }
        }
        "click_at_coordinates" => {
            let i: ClickAtInput = decode(name, input)?;
            BrowserAction::ClickAtPoint { x: i.x, y: i.y }
        }
        "fill" => {
            let i: FillInput = decode(name, input)?;
            BrowserAction::Fill {
                selector: i.selector,
                value: i.value,
            }
        }
        "press" => {
            let i: PressInput = decode(name, input)?;
            BrowserAction::Press { key: i.key }
        }
        "scroll" => {
            let i: ScrollInput = decode(name, input)?;
            BrowserAction::Scroll {
                direction: i.direction,
                amount: i.amount,
            }
        }
        "wait" => {
            let i: WaitInput = decode(name, input)?;
            BrowserAction::Wait {
                ms: ((i.seconds.max(0.0) * 1000.0) as u64).min(MAX_WAIT_MS),
            }
        }
        "complete_task" => return Ok(None),
        other => {
            return Err(Error::InvalidArgument(format!("unknown tool: {}", other)));
        }
    };
    Ok(Some(action))
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

fn wire_messages(conversation: &Conversation) -> Vec<Value> {
    conversation
        .messages()
        .iter()
        .map(|m| {
            let content = match &m.content {
                MessageContent::Text(t) => Value::String(t.clone()),
                MessageContent::Parts(parts) => Value::Array(
                    parts
                        .iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => json!({"type": "text", "text": text}),
                            ContentPart::Image { media_type, data } => json!({
                                "type": "image",
                                "source": {"type": "base64", "media_type": media_type, "data": data},
                            }),
                        })
                        .collect(),
                ),
            };
            json!({"role": m.role, "content": content})
        })
        .collect()
}

fn parse_response(resp: ApiResponse) -> Result<ModelResponse> {
    let mut out = ModelResponse {
        complete: resp.stop_reason.as_deref() == Some("end_turn"),
        ..Default::default()
    };
    let mut thoughts = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => {
                if !text.trim().is_empty() {
                    thoughts.push(text);
                }
            }
            ContentBlock::ToolUse { name, input } => {
                if name == "complete_task" {
                    let done: CompleteInput = decode(&name, input)?;
                    out.complete = true;
                    out.result = Some(done.result);
                } else {
                    out.action = parse_tool_call(&name, input)?;
                }
            }
            ContentBlock::Other => {}
        }
    }

    if !thoughts.is_empty() {
        out.thought = Some(thoughts.join("\n"));
    }
    if out.complete && out.result.is_none() {
        out.result = out.thought.clone();
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Linear backoff before the next attempt. `None` after the last one.
fn rate_limit_backoff(step: Duration, attempt: u32) -> Option<Duration> {
    (attempt + 1 < RATE_LIMIT_ATTEMPTS).then(|| step * (attempt + 1))
}

/// [`ModelClient`] backed by the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
    rate_limit_backoff: Duration,
    tools: Value,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_limit_backoff: Duration::from_secs(5),
            tools: tool_definitions(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, conversation: &Conversation) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": wire_messages(conversation),
            "tools": self.tools,
        })
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn send(&self, conversation: &Conversation) -> Result<ModelResponse> {
        let body = self.request_body(conversation);
        let url = format!("{}/v1/messages", self.base_url);
        debug!("Sending {} messages to {}", conversation.len(), self.model);

        for attempt in 0..RATE_LIMIT_ATTEMPTS {
            let resp = self
                .http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            let text = resp.text().await?;
            let json: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

            if status == StatusCode::TOO_MANY_REQUESTS || json["error"]["type"] == "rate_limit_error" {
                if let Some(wait) = rate_limit_backoff(self.rate_limit_backoff, attempt) {
                    warn!("Rate limited, waiting {}s...", wait.as_secs());
                    tokio::time::sleep(wait).await;
                }
                continue;
            }

            if !status.is_success() {
                return Err(Error::Ai(format!(
                    "API error (status {}): {}",
                    status.as_u16(),
                    text
                )));
            }

            let parsed: ApiResponse = serde_json::from_value(json)
                .map_err(|e| Error::Ai(format!("unexpected response body: {}", e)))?;
            return parse_response(parsed);
        }

        Err(Error::Ai(format!(
            "rate limited after {} attempts",
            RATE_LIMIT_ATTEMPTS
        )))
    }
}

//! Data model shared by the loop, the dispatcher and the actuator.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// =========================================================================
// Task & Step
// =========================================================================

/// Lifecycle of a task. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// One open-ended task handed to the agent ("buy a burger").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// One entry per dispatch attempt, in order.
    pub steps: Vec<Step>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            result: None,
            error: None,
        }
    }

    /// Pending → InProgress. No-op in any other state.
    pub fn begin(&mut self) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::InProgress;
        }
    }

    /// InProgress → Completed. Returns false if the task was not in progress.
    pub fn complete(&mut self, result: impl Into<String>) -> bool {
        if self.status != TaskStatus::InProgress {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.result = Some(result.into());
        self.completed_at = Some(Utc::now());
        true
    }

    /// InProgress → Failed. Returns false if the task was not in progress.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status != TaskStatus::InProgress {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn record(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| !s.success).count()
    }
}

/// Recorded outcome of one dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    /// Wire name of the action kind (e.g. "click").
    pub action: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl Step {
    pub fn succeeded(action: &BrowserAction) -> Self {
        Self::new(action, None)
    }

    pub fn failed(action: &BrowserAction, error: impl Into<String>) -> Self {
        Self::new(action, Some(error.into()))
    }

    fn new(action: &BrowserAction, error: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.kind().to_string(),
            description: action.describe(),
            timestamp: Utc::now(),
            success: error.is_none(),
            error,
        }
    }
}

// =========================================================================
// Actions
// =========================================================================

/// Default pixel offset for relative scrolls.
pub const DEFAULT_SCROLL_AMOUNT: u32 = 500;

/// Scroll direction. `Down`/`Up` are relative, `Bottom`/`Top` jump to the extremes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    #[default]
    Down,
    Up,
    Bottom,
    Top,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Down => "down",
            Self::Up => "up",
            Self::Bottom => "bottom",
            Self::Top => "top",
        })
    }
}

impl FromStr for ScrollDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "down" => Ok(Self::Down),
            "up" => Ok(Self::Up),
            "bottom" => Ok(Self::Bottom),
            "top" => Ok(Self::Top),
            other => Err(Error::InvalidArgument(format!(
                "unknown scroll direction '{}', expected down|up|bottom|top",
                other
            ))),
        }
    }
}

/// A single model-issued browser operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    #[serde(rename = "click_at_coordinates")]
    ClickAtPoint {
        x: f64,
        y: f64,
    },
    Fill {
        selector: String,
        value: String,
    },
    Press {
        key: String,
    },
    Scroll {
        direction: ScrollDirection,
        amount: u32,
    },
    Wait {
        ms: u64,
    },
}

impl BrowserAction {
    /// Wire name, matching the tool names the model sees.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::ClickAtPoint { .. } => "click_at_coordinates",
            Self::Fill { .. } => "fill",
            Self::Press { .. } => "press",
            Self::Scroll { .. } => "scroll",
            Self::Wait { .. } => "wait",
        }
    }

    /// Human-readable one-liner used in steps, logs and confirmation prompts.
    pub fn describe(&self) -> String {
        match self {
            Self::Navigate { url } => url.clone(),
            Self::Click { selector } => format!("selector: {}", selector),
            Self::ClickAtPoint { x, y } => format!("x: {:.0}, y: {:.0}", x, y),
            Self::Fill { selector, value } => {
                format!("selector: {}, value: {}", selector, value)
            }
            Self::Press { key } => format!("key: {}", key),
            Self::Scroll { direction, amount } => {
                format!("direction: {}, amount: {}", direction, amount)
            }
            Self::Wait { ms } => format!("{}ms", ms),
        }
    }
}

impl fmt::Display for BrowserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind(), self.describe())
    }
}

// =========================================================================
// Page state
// =========================================================================

/// Element rectangle in viewport pixels at capture time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One discovered element. Only meaningful for the snapshot it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    pub text: String,
    pub selector: String,
    pub attributes: BTreeMap<String, String>,
    pub clickable: bool,
    pub bbox: BoundingBox,
}

/// Snapshot of the active page, rebuilt after every state-changing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub elements: Vec<Element>,
    pub captured_at: DateTime<Utc>,
}

impl PageState {
    pub fn new(url: impl Into<String>, title: impl Into<String>, elements: Vec<Element>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            elements,
            captured_at: Utc::now(),
        }
    }
}

// =========================================================================
// Conversation
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Part of a multi-part message. Images carry base64 data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Image { media_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// All text in this content, parts joined by newlines.
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn has_image(&self) -> bool {
        matches!(self, Self::Parts(parts) if parts.iter().any(|p| matches!(p, ContentPart::Image { .. })))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Role-tagged message history for one task. Only ever grows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Role::User, MessageContent::Text(text.into()));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(Role::Assistant, MessageContent::Text(text.into()));
    }

    /// User message with an optional inline screenshot placed before the text.
    pub fn push_observation(&mut self, text: impl Into<String>, screenshot: Option<&[u8]>) {
        let text = text.into();
        match screenshot {
            Some(bytes) if !bytes.is_empty() => {
                let parts = vec![
                    ContentPart::Image {
                        media_type: sniff_media_type(bytes).to_string(),
                        data: BASE64.encode(bytes),
                    },
                    ContentPart::Text { text },
                ];
                self.push(Role::User, MessageContent::Parts(parts));
            }
            _ => self.push_user(text),
        }
    }

    fn push(&mut self, role: Role, content: MessageContent) {
        self.messages.push(Message { role, content });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Media type from magic bytes. Defaults to PNG, which is what CDP emits.
pub fn sniff_media_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP") {
        "image/webp"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_transitions_are_one_way() {
        let mut task = Task::new("buy a burger");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.complete("too early"));

        task.begin();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.complete("done"));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());

        // Terminal: neither fail nor complete changes anything.
        assert!(!task.fail("late failure"));
        assert!(!task.complete("again"));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done"));
        assert!(task.error.is_none());
    }

    #[test]
    fn test_describe_covers_every_variant() {
        let cases = [
            (
                BrowserAction::Navigate {
                    url: "https://example.com".into(),
                },
                "https://example.com",
            ),
            (
                BrowserAction::Click {
                    selector: "#login".into(),
                },
                "selector: #login",
            ),
            (
                BrowserAction::ClickAtPoint { x: 10.4, y: 99.6 },
                "x: 10, y: 100",
            ),
            (
                BrowserAction::Fill {
                    selector: "#q".into(),
                    value: "shoes".into(),
                },
                "selector: #q, value: shoes",
            ),
            (BrowserAction::Press { key: "Enter".into() }, "key: Enter"),
            (
                BrowserAction::Scroll {
                    direction: ScrollDirection::Up,
                    amount: 300,
                },
                "direction: up, amount: 300",
            ),
            (BrowserAction::Wait { ms: 250 }, "250ms"),
        ];
        for (action, expected) in cases {
            assert_eq!(action.describe(), expected);
        }
    }

    #[test]
    fn test_action_serde_uses_wire_names() {
        let action = BrowserAction::ClickAtPoint { x: 1.0, y: 2.0 };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "click_at_coordinates");
        assert_eq!(action.kind(), "click_at_coordinates");
    }

    #[test]
    fn test_scroll_direction_parse() {
        assert_eq!("DOWN".parse::<ScrollDirection>().unwrap(), ScrollDirection::Down);
        assert_eq!(" top ".parse::<ScrollDirection>().unwrap(), ScrollDirection::Top);
        assert_eq!("".parse::<ScrollDirection>().unwrap(), ScrollDirection::Down);
        assert!("sideways".parse::<ScrollDirection>().is_err());
    }

    #[test]
    fn test_observation_with_screenshot_is_multipart() {
        let mut conv = Conversation::new();
        conv.push_observation("URL: x", Some(&[0xFF, 0xD8, 0xFF, 0xE0]));
        let msg = conv.last().unwrap();
        assert_eq!(msg.role, Role::User);
        assert!(msg.content.has_image());
        assert_eq!(msg.content.text(), "URL: x");
        match &msg.content {
            MessageContent::Parts(parts) => {
                assert!(matches!(&parts[0], ContentPart::Image { media_type, .. } if media_type == "image/jpeg"));
            }
            other => panic!("expected parts, got {:?}", other),
        }

        conv.push_observation("plain", None);
        assert_eq!(conv.last().unwrap().content, MessageContent::Text("plain".into()));
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn test_bbox_center() {
        let bbox = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 40.0,
        };
        assert_eq!(bbox.center(), (60.0, 40.0));
    }
}

//! # eoka-agent
//!
//! The decision-and-resilience loop between an LLM and a browser.
//!
//! The model sees a compressed text view of the page, picks one action, and the
//! loop executes it against a flaky DOM with escalating retry strategies,
//! duplicate detection and human confirmation for dangerous actions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eoka_agent::{AgentConfig, AgentLoop, AnthropicClient, DenyAll, EokaDriver, LaunchConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_agent::Result<()> {
//! let driver = EokaDriver::launch(LaunchConfig::default()).await?;
//! let model = AnthropicClient::new("sk-...", "claude-sonnet-4-20250514");
//! let mut agent = AgentLoop::new(driver, model, DenyAll, AgentConfig::default());
//!
//! let run = agent.run("find the opening hours of the Louvre", &CancellationToken::new()).await?;
//! println!("{:?}: {:?}", run.task.status, run.task.result);
//! # Ok(())
//! # }
//! ```

pub mod actuator;
pub mod agent;
pub mod browser;
pub mod compress;
pub mod dispatch;
pub mod driver;
pub mod model;
pub mod observe;
pub mod policy;
pub mod types;

pub use actuator::{Actuator, ClickReport, ClickStrategy, StrategyAttempt, Timings};
pub use agent::{AgentConfig, AgentLoop, StopHandle, TaskRun};
pub use browser::{EokaDriver, LaunchConfig};
pub use compress::{compress, CompressLimits};
pub use dispatch::{ActionMemory, DispatchConfig, Dispatcher};
pub use driver::{ClickMode, FillMode, PageDriver};
pub use model::{AnthropicClient, ModelClient, ModelResponse};
pub use policy::{requires_confirmation, AcceptAll, Confirmer, DenyAll};
pub use types::{
    BoundingBox, BrowserAction, ContentPart, Conversation, Element, Message, MessageContent,
    PageState, Role, ScrollDirection, Step, Task, TaskStatus,
};

use std::fmt;

/// Result type for eoka-agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised anywhere between the model and the browser.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("browser not ready: {0}")]
    BrowserNotReady(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("action failed on {target}: {reason}")]
    ActionFailed { target: String, reason: String },

    #[error("duplicate action: {0}")]
    DuplicateAction(String),

    #[error("cancelled by user: {0}")]
    CancelledByUser(String),

    #[error("ai error: {0}")]
    Ai(String),

    #[error("max iterations reached ({0})")]
    MaxIterations(u32),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Shorthand for an [`Error::ActionFailed`].
    pub fn action_failed(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::ActionFailed {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::BrowserNotReady(_) => ErrorKind::BrowserNotReady,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ActionFailed { .. } => ErrorKind::ActionFailed,
            Self::DuplicateAction(_) => ErrorKind::DuplicateAction,
            Self::CancelledByUser(_) => ErrorKind::CancelledByUser,
            Self::Ai(_) | Self::Http(_) => ErrorKind::Ai,
            Self::MaxIterations(_) => ErrorKind::MaxIterations,
            Self::Internal(_) | Self::Browser(_) | Self::Io(_) | Self::Json(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Error classes, independent of the payload each variant carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    BrowserNotReady,
    NotFound,
    Timeout,
    ActionFailed,
    DuplicateAction,
    CancelledByUser,
    Ai,
    MaxIterations,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "invalid_argument",
            Self::BrowserNotReady => "browser_not_ready",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::ActionFailed => "action_failed",
            Self::DuplicateAction => "duplicate_action",
            Self::CancelledByUser => "cancelled_by_user",
            Self::Ai => "ai_error",
            Self::MaxIterations => "max_iterations",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

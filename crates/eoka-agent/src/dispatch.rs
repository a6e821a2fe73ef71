//! Turns one model-issued action into an actuator call, gated by duplicate
//! and safety checks, and reports the outcome into the task and conversation.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::actuator::{pause, Actuator};
use crate::compress::{compress, CompressLimits};
use crate::driver::PageDriver;
use crate::policy::{is_duplicate, requires_confirmation, Confirmer};
use crate::types::{BrowserAction, Conversation, PageState, Step, Task};
use crate::{Error, Result};

pub const DUPLICATE_STEP_ERROR: &str = "duplicate action detected";
pub const CANCELLED_STEP_ERROR: &str = "action cancelled by user";

const DUPLICATE_NOTICE: &str =
    "This action failed on the previous attempt. Try a completely different approach.";
const CANCELLED_NOTICE: &str = "Action was cancelled by user. Try a different approach.";
const CLICK_FALLBACK_HINT: &str =
    " Use click_at_coordinates(x, y) with coordinates from the element list instead.";

/// Dispatcher tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub use_screenshots: bool,
    /// Extra wait after a click at coordinates, before reading the page.
    pub point_click_settle: Duration,
    /// Wait after auto-submitting a search field.
    pub search_settle: Duration,
    pub limits: CompressLimits,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            use_screenshots: true,
            point_click_settle: Duration::from_millis(800),
            search_settle: Duration::from_millis(1500),
            limits: CompressLimits::default(),
        }
    }
}

impl DispatchConfig {
    /// Default behaviour without sleeping. For tests.
    pub fn instant() -> Self {
        Self {
            point_click_settle: Duration::ZERO,
            search_settle: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// What the loop remembers between dispatches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionMemory {
    pub last_action: Option<BrowserAction>,
    pub last_url: Option<String>,
}

/// Result of a successful action, before it is reported.
#[derive(Debug, Default)]
struct Outcome {
    text: String,
    screenshot: Option<Vec<u8>>,
    url: Option<String>,
}

impl Outcome {
    fn message(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Fills whose target looks like a search box are submitted with Enter.
fn is_search_fill(selector: &str, value: &str) -> bool {
    let selector = selector.to_lowercase();
    selector.contains("search") || selector.contains("query") || value.to_lowercase().contains("поиск")
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{} cannot be empty", field)));
    }
    Ok(())
}

fn failure_notice(action: &BrowserAction, err: &Error) -> String {
    let mut msg = format!("Action '{}' failed: {}.", action.kind(), err);
    if matches!(action, BrowserAction::Click { .. }) {
        msg.push_str(CLICK_FALLBACK_HINT);
    }
    msg
}

/// Runs actions for the agent loop. Owns the actuator and the confirmation channel.
pub struct Dispatcher<D, C> {
    actuator: Actuator<D>,
    confirmer: C,
    config: DispatchConfig,
}

impl<D: PageDriver, C: Confirmer> Dispatcher<D, C> {
    pub fn new(actuator: Actuator<D>, confirmer: C, config: DispatchConfig) -> Self {
        Self {
            actuator,
            confirmer,
            config,
        }
    }

    pub fn actuator(&self) -> &Actuator<D> {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut Actuator<D> {
        &mut self.actuator
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn confirmer(&self) -> &C {
        &self.confirmer
    }

    pub fn into_actuator(self) -> Actuator<D> {
        self.actuator
    }

    /// Execute `action`, appending exactly one step to `task` and at most one
    /// user message to `conversation`. Returns the action's error, if any.
    pub async fn dispatch(
        &mut self,
        memory: &mut ActionMemory,
        task: &mut Task,
        action: &BrowserAction,
        conversation: &mut Conversation,
    ) -> Result<()> {
        info!("Action: {}", action);

        let before_url = match self.actuator.current_url().await {
            Ok(url) => Some(url),
            Err(e) => {
                debug!("could not read url before action: {}", e);
                memory.last_url.clone()
            }
        };

        if is_duplicate(memory.last_action.as_ref(), action) {
            warn!("Duplicate action detected: {}", action);
            task.record(Step::failed(action, DUPLICATE_STEP_ERROR));
            conversation.push_user(DUPLICATE_NOTICE);
            return Err(Error::DuplicateAction(action.to_string()));
        }

        let url = before_url.as_deref().unwrap_or_default();
        if requires_confirmation(action, url) {
            info!("Action needs confirmation: {}", action);
            if !self.confirmer.confirm(action).await {
                warn!("Action declined: {}", action);
                task.record(Step::failed(action, CANCELLED_STEP_ERROR));
                conversation.push_user(CANCELLED_NOTICE);
                return Err(Error::CancelledByUser(action.to_string()));
            }
        }

        let result = self.execute(action, before_url.as_deref()).await;
        memory.last_action = Some(action.clone());

        match result {
            Ok(outcome) => {
                if let Some(url) = outcome.url {
                    memory.last_url = Some(url);
                }
                task.record(Step::succeeded(action));
                if !outcome.text.is_empty() {
                    if outcome.screenshot.is_some() {
                        debug!("attaching screenshot to observation");
                    }
                    conversation.push_observation(outcome.text, outcome.screenshot.as_deref());
                }
                Ok(())
            }
            Err(e) => {
                warn!("Action '{}' failed: {}", action.kind(), e);
                task.record(Step::failed(action, e.to_string()));
                conversation.push_user(failure_notice(action, &e));
                Err(e)
            }
        }
    }

    async fn execute(&mut self, action: &BrowserAction, before_url: Option<&str>) -> Result<Outcome> {
        match action {
            BrowserAction::Navigate { url } => {
                require("url", url)?;
                self.actuator.navigate(url).await?;
                let state = self.snapshot().await?;
                let shot = self.capture().await;
                Ok(self.observed(state, shot))
            }
            BrowserAction::Click { selector } => {
                require("selector", selector)?;
                self.actuator.click(selector).await?;
                self.observe_if_changed(before_url).await
            }
            BrowserAction::ClickAtPoint { x, y } => {
                self.actuator.click_at(*x, *y).await?;
                pause(self.config.point_click_settle).await;
                let state = self.snapshot().await?;
                let shot = self.capture().await;
                Ok(self.observed(state, shot))
            }
            BrowserAction::Fill { selector, value } => {
                require("selector", selector)?;
                self.actuator.fill(selector, value).await?;
                if !is_search_fill(selector, value) {
                    return Ok(Outcome::message("Field filled."));
                }

                info!("Submitting search field {}", selector);
                if let Err(e) = self.actuator.press("Enter").await {
                    warn!("Enter after search fill failed: {}", e);
                    return Ok(Outcome::message("Field filled (Enter press failed)."));
                }
                pause(self.config.search_settle).await;
                match self.observe_if_changed(before_url).await {
                    Ok(outcome) => Ok(outcome),
                    Err(e) => {
                        debug!("page state after search submit failed: {}", e);
                        Ok(Outcome::message("Field filled and Enter pressed."))
                    }
                }
            }
            BrowserAction::Press { key } => {
                require("key", key)?;
                self.actuator.press(key).await?;
                if key == "Enter" {
                    self.observe_if_changed(before_url).await
                } else {
                    Ok(Outcome::message(format!("Pressed key: {}", key)))
                }
            }
            BrowserAction::Scroll { direction, amount } => {
                self.actuator.scroll(*direction, *amount).await?;
                let state = self.snapshot().await?;
                Ok(self.observed(state, None))
            }
            BrowserAction::Wait { ms } => {
                pause(Duration::from_millis(*ms)).await;
                Ok(Outcome::message("Wait completed"))
            }
        }
    }

    /// Page observation, with a screenshot only if the URL moved away from `before_url`.
    async fn observe_if_changed(&mut self, before_url: Option<&str>) -> Result<Outcome> {
        let state = self.snapshot().await?;
        let shot = if before_url != Some(state.url.as_str()) {
            debug!("url changed to {}", state.url);
            self.capture().await
        } else {
            None
        };
        Ok(self.observed(state, shot))
    }

    fn observed(&self, state: PageState, screenshot: Option<Vec<u8>>) -> Outcome {
        Outcome {
            text: compress(&state, &self.config.limits),
            screenshot,
            url: Some(state.url),
        }
    }

    async fn snapshot(&mut self) -> Result<PageState> {
        self.actuator.page_state().await.map_err(|e| match e {
            Error::BrowserNotReady(_) => e,
            other => Error::Internal(format!("page state failed: {}", other)),
        })
    }

    /// Best-effort screenshot through a temp file that is removed on every path.
    async fn capture(&mut self) -> Option<Vec<u8>> {
        if !self.config.use_screenshots || !self.actuator.is_ready() {
            return None;
        }
        let file = match tempfile::Builder::new()
            .prefix("eoka-pilot-")
            .suffix(".png")
            .tempfile()
        {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to create screenshot file: {}", e);
                return None;
            }
        };
        if let Err(e) = self.actuator.screenshot(file.path()).await {
            warn!("Failed to take screenshot: {}", e);
            return None;
        }
        match tokio::fs::read(file.path()).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read screenshot: {}", e);
                None
            }
        }
    }
}

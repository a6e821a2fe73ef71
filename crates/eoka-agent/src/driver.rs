//! The primitive browser capability the actuator is built on.

use std::path::Path;

use async_trait::async_trait;

use crate::types::PageState;
use crate::Result;

/// How a selector click is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickMode {
    /// Driver click with actionability checks.
    Native,
    /// Driver click that skips actionability checks.
    Force,
}

/// How a field is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Clear and type through the driver.
    Native,
    /// Set the value directly and fire input/change events.
    Force,
}

/// A single browser page, as seen by the agent.
///
/// Implementations hold exactly one active page. Every method may assume
/// [`PageDriver::ensure_live_page`] has been called first.
#[async_trait]
pub trait PageDriver: Send {
    /// Whether the browser is launched and not shutting down.
    fn is_ready(&self) -> bool;

    /// Reattach to another open page, or open a fresh one, if the active
    /// page was closed underneath us.
    async fn ensure_live_page(&mut self) -> Result<()>;

    async fn goto(&mut self, url: &str) -> Result<()>;

    async fn click(&mut self, selector: &str, mode: ClickMode, timeout_ms: u64) -> Result<()>;

    /// Pointer click at viewport coordinates.
    async fn click_at(&mut self, x: f64, y: f64) -> Result<()>;

    async fn fill(&mut self, selector: &str, value: &str, mode: FillMode) -> Result<()>;

    async fn press_key(&mut self, key: &str) -> Result<()>;

    /// Wait until the selector matches a visible element.
    async fn wait_for_visible(&mut self, selector: &str, timeout_ms: u64) -> Result<()>;

    /// Wait until the selector matches anything.
    async fn wait_for_selector(&mut self, selector: &str, timeout_ms: u64) -> Result<()>;

    /// Evaluate an expression in the page and return its JSON value.
    async fn evaluate(&mut self, js: &str) -> Result<serde_json::Value>;

    /// Write a screenshot of the viewport to `path`.
    async fn screenshot(&mut self, path: &Path) -> Result<()>;

    async fn page_state(&mut self) -> Result<PageState>;

    async fn url(&mut self) -> Result<String>;

    async fn close(&mut self) -> Result<()>;
}

//! Escalating click strategies and the loop that walks them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{pause, Timings};
use crate::driver::{ClickMode, PageDriver};
use crate::{Error, Result};

/// One way of clicking an element. Strategies are tried in order, one per attempt.
#[async_trait]
pub trait ClickStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(
        &self,
        driver: &mut dyn PageDriver,
        selector: &str,
        timings: &Timings,
    ) -> Result<()>;
}

/// Outcome of one strategy attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub strategy: String,
    pub error: Option<String>,
}

/// Every attempt made for one logical click, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickReport {
    pub selector: String,
    pub attempts: Vec<StrategyAttempt>,
}

impl ClickReport {
    pub fn succeeded(&self) -> bool {
        self.attempts.last().is_some_and(|a| a.error.is_none())
    }

    /// Name of the strategy that landed the click.
    pub fn winning_strategy(&self) -> Option<&str> {
        self.attempts
            .last()
            .filter(|a| a.error.is_none())
            .map(|a| a.strategy.as_str())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|a| a.error.as_deref())
    }
}

/// The default ladder: native, forced, in-page script, synthetic pointer.
pub fn default_ladder() -> Vec<Box<dyn ClickStrategy>> {
    vec![
        Box::new(WaitAndClick),
        Box::new(ForceClick),
        Box::new(ScriptClick),
        Box::new(PointerClick),
    ]
}

/// Run up to `timings.max_retries + 1` attempts, attempt `n` using strategy `n`
/// (clamped to the last one). Stops at the first success.
pub async fn run_ladder(
    driver: &mut dyn PageDriver,
    selector: &str,
    strategies: &[Box<dyn ClickStrategy>],
    timings: &Timings,
) -> ClickReport {
    let mut report = ClickReport {
        selector: selector.to_string(),
        attempts: Vec::new(),
    };
    if strategies.is_empty() {
        return report;
    }

    for attempt in 0..=timings.max_retries {
        if attempt > 0 {
            info!("Retrying click on {} (attempt {})", selector, attempt + 1);
            pause(timings.retry_delay).await;
        }

        let idx = (attempt as usize).min(strategies.len() - 1);
        let strategy = &strategies[idx];

        match strategy.attempt(driver, selector, timings).await {
            Ok(()) => {
                pause(timings.click_settle).await;
                report.attempts.push(StrategyAttempt {
                    attempt: attempt + 1,
                    strategy: strategy.name().to_string(),
                    error: None,
                });
                return report;
            }
            Err(e) => {
                warn!("Click strategy {} failed: {}", strategy.name(), e);
                report.attempts.push(StrategyAttempt {
                    attempt: attempt + 1,
                    strategy: strategy.name().to_string(),
                    error: Some(e.to_string()),
                });
            }
        }
    }
    report
}

// ---------------------------------------------------------------------------
// In-page scripts
// ---------------------------------------------------------------------------

/// Result shape shared by the ladder's scripts.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScriptOutcome {
    success: bool,
    error: Option<String>,
    x: Option<f64>,
    y: Option<f64>,
}

/// Wrap `body` so it runs with `el` bound to the first match of `selector`.
fn with_element(selector: &str, body: &str) -> Result<String> {
    let sel = serde_json::to_string(selector)?;
    Ok(format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return {{ success: false, error: 'element not found' }};
    {body}
}})()"#
    ))
}

const VISIBLE_AND_CENTER: &str = r#"const r = el.getBoundingClientRect();
    const s = getComputedStyle(el);
    if (r.width <= 0 || r.height <= 0 || s.display === 'none' || s.visibility === 'hidden' || parseFloat(s.opacity) <= 0) {
        return { success: false, error: 'element not visible' };
    }
    el.scrollIntoView({ behavior: 'instant', block: 'center' });
    return { success: true };"#;

const SCROLL_INTO_VIEW: &str = r#"el.scrollIntoView({ behavior: 'instant', block: 'center' });
    return { success: true };"#;

const DIRECT_CLICK: &str = r#"try {
        el.click();
        return { success: true };
    } catch (e) {
        return { success: false, error: String(e && e.message || e) };
    }"#;

const CENTER_POINT: &str = r#"el.scrollIntoView({ behavior: 'instant', block: 'center' });
    const r = el.getBoundingClientRect();
    return { success: true, x: r.left + r.width / 2, y: r.top + r.height / 2 };"#;

async fn run_script(
    driver: &mut dyn PageDriver,
    selector: &str,
    body: &str,
) -> Result<ScriptOutcome> {
    let js = with_element(selector, body)?;
    let value = driver.evaluate(&js).await?;
    let outcome: ScriptOutcome = serde_json::from_value(value).unwrap_or_default();
    if outcome.success {
        Ok(outcome)
    } else {
        Err(Error::action_failed(
            selector,
            outcome.error.as_deref().unwrap_or("element check failed"),
        ))
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Check visibility, center the element, then click through the driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitAndClick;

#[async_trait]
impl ClickStrategy for WaitAndClick {
    fn name(&self) -> &'static str {
        "wait_and_click"
    }

    async fn attempt(
        &self,
        driver: &mut dyn PageDriver,
        selector: &str,
        timings: &Timings,
    ) -> Result<()> {
        run_script(driver, selector, VISIBLE_AND_CENTER).await?;
        pause(timings.scroll_settle).await;
        driver
            .click(selector, ClickMode::Native, timings.click_timeout_ms)
            .await
    }
}

/// Center the element and click without actionability checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceClick;

#[async_trait]
impl ClickStrategy for ForceClick {
    fn name(&self) -> &'static str {
        "force_click"
    }

    async fn attempt(
        &self,
        driver: &mut dyn PageDriver,
        selector: &str,
        timings: &Timings,
    ) -> Result<()> {
        // Missing elements are left for the driver to report.
        if run_script(driver, selector, SCROLL_INTO_VIEW).await.is_ok() {
            pause(timings.scroll_settle).await;
        }
        driver
            .click(selector, ClickMode::Force, timings.click_timeout_ms)
            .await
    }
}

/// Call `el.click()` inside the page.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptClick;

#[async_trait]
impl ClickStrategy for ScriptClick {
    fn name(&self) -> &'static str {
        "js_direct_click"
    }

    async fn attempt(
        &self,
        driver: &mut dyn PageDriver,
        selector: &str,
        timings: &Timings,
    ) -> Result<()> {
        run_script(driver, selector, SCROLL_INTO_VIEW).await?;
        pause(timings.script_click_delay).await;
        run_script(driver, selector, DIRECT_CLICK).await?;
        Ok(())
    }
}

/// Compute the element's center and dispatch a pointer click there.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointerClick;

#[async_trait]
impl ClickStrategy for PointerClick {
    fn name(&self) -> &'static str {
        "mouse_click"
    }

    async fn attempt(
        &self,
        driver: &mut dyn PageDriver,
        selector: &str,
        timings: &Timings,
    ) -> Result<()> {
        let outcome = run_script(driver, selector, CENTER_POINT).await?;
        let (Some(x), Some(y)) = (outcome.x, outcome.y) else {
            return Err(Error::action_failed(selector, "invalid coordinates"));
        };
        pause(timings.scroll_settle).await;
        driver.click_at(x, y).await
    }
}

//! Executes single browser actions reliably on top of a [`PageDriver`].
//!
//! Every operation checks readiness and page liveness first. Clicks walk an
//! escalating strategy ladder, fills retry with a forced fallback, and the
//! rest are single attempts followed by a settle delay.

mod ladder;

pub use ladder::{
    default_ladder, run_ladder, ClickReport, ClickStrategy, ForceClick, PointerClick, ScriptClick,
    StrategyAttempt, WaitAndClick,
};

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::driver::{FillMode, PageDriver};
use crate::types::{PageState, ScrollDirection};
use crate::{Error, Result};

/// Retry budgets, timeouts and settle delays for the actuator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Retries after the first attempt, for clicks and fills.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub click_timeout_ms: u64,
    pub fill_visible_timeout_ms: u64,
    /// Pause after scrolling an element into view.
    pub scroll_settle: Duration,
    /// Pause after a click strategy succeeds.
    pub click_settle: Duration,
    pub script_click_delay: Duration,
    pub fill_clear_pause: Duration,
    pub fill_settle: Duration,
    pub navigate_settle: Duration,
    pub enter_settle: Duration,
    pub key_settle: Duration,
    pub page_scroll_settle: Duration,
    pub point_click_settle: Duration,
    pub navigation_timeout_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(800),
            click_timeout_ms: 15_000,
            fill_visible_timeout_ms: 5_000,
            scroll_settle: Duration::from_millis(300),
            click_settle: Duration::from_millis(300),
            script_click_delay: Duration::from_millis(200),
            fill_clear_pause: Duration::from_millis(200),
            fill_settle: Duration::from_millis(300),
            navigate_settle: Duration::from_millis(500),
            enter_settle: Duration::from_secs(1),
            key_settle: Duration::from_millis(300),
            page_scroll_settle: Duration::from_millis(500),
            point_click_settle: Duration::from_millis(300),
            navigation_timeout_ms: 30_000,
        }
    }
}

impl Timings {
    /// Same budgets, no sleeping. For tests.
    pub fn instant() -> Self {
        Self {
            retry_delay: Duration::ZERO,
            scroll_settle: Duration::ZERO,
            click_settle: Duration::ZERO,
            script_click_delay: Duration::ZERO,
            fill_clear_pause: Duration::ZERO,
            fill_settle: Duration::ZERO,
            navigate_settle: Duration::ZERO,
            enter_settle: Duration::ZERO,
            key_settle: Duration::ZERO,
            page_scroll_settle: Duration::ZERO,
            point_click_settle: Duration::ZERO,
            ..Self::default()
        }
    }
}

pub(crate) async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

/// Script for a page scroll.
fn scroll_js(direction: ScrollDirection, amount: u32) -> String {
    match direction {
        ScrollDirection::Down => format!("window.scrollBy(0, {})", amount),
        ScrollDirection::Up => format!("window.scrollBy(0, -{})", amount),
        ScrollDirection::Bottom => "window.scrollTo(0, document.body.scrollHeight)".to_string(),
        ScrollDirection::Top => "window.scrollTo(0, 0)".to_string(),
    }
}

/// Keep readiness and existing action failures as they are, wrap the rest.
fn action_error(target: &str, err: Error) -> Error {
    match err {
        Error::BrowserNotReady(_) | Error::ActionFailed { .. } => err,
        other => Error::action_failed(target, other),
    }
}

/// Resilient action executor owning one [`PageDriver`].
pub struct Actuator<D> {
    driver: D,
    timings: Timings,
    ladder: Vec<Box<dyn ClickStrategy>>,
}

impl<D: PageDriver> Actuator<D> {
    pub fn new(driver: D) -> Self {
        Self::with_timings(driver, Timings::default())
    }

    pub fn with_timings(driver: D, timings: Timings) -> Self {
        Self {
            driver,
            timings,
            ladder: default_ladder(),
        }
    }

    /// Replace the click ladder.
    pub fn with_ladder(mut self, ladder: Vec<Box<dyn ClickStrategy>>) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn is_ready(&self) -> bool {
        self.driver.is_ready()
    }

    /// Readiness check plus transparent reattachment to a live page.
    async fn prepare(&mut self) -> Result<()> {
        if !self.driver.is_ready() {
            return Err(Error::BrowserNotReady(
                "browser is not launched or is shutting down".into(),
            ));
        }
        self.driver
            .ensure_live_page()
            .await
            .map_err(|e| match e {
                Error::BrowserNotReady(_) => e,
                other => Error::BrowserNotReady(format!("no live page: {}", other)),
            })
    }

    pub async fn navigate(&mut self, url: &str) -> Result<()> {
        self.prepare().await?;
        info!("Navigating to: {}", url);

        let nav = self.driver.goto(url);
        match tokio::time::timeout(
            Duration::from_millis(self.timings.navigation_timeout_ms),
            nav,
        )
        .await
        {
            Ok(res) => res.map_err(|e| action_error(url, e))?,
            Err(_) => {
                return Err(Error::action_failed(
                    url,
                    format!(
                        "navigation timed out after {}ms",
                        self.timings.navigation_timeout_ms
                    ),
                ))
            }
        }
        pause(self.timings.navigate_settle).await;
        Ok(())
    }

    /// Click through the strategy ladder. Fails with `ActionFailed` once every
    /// attempt in the budget has failed.
    pub async fn click(&mut self, selector: &str) -> Result<ClickReport> {
        self.prepare().await?;
        info!("click: {}", selector);

        let report = run_ladder(&mut self.driver, selector, &self.ladder, &self.timings).await;
        if report.succeeded() {
            debug!(
                "click on {} landed via {:?} after {} attempt(s)",
                selector,
                report.winning_strategy(),
                report.attempts.len()
            );
            Ok(report)
        } else {
            Err(Error::action_failed(
                selector,
                report.last_error().unwrap_or("no click strategy configured"),
            ))
        }
    }

    pub async fn click_at(&mut self, x: f64, y: f64) -> Result<()> {
        self.prepare().await?;
        info!("click_at: ({:.0}, {:.0})", x, y);
        let target = format!("({:.0}, {:.0})", x, y);
        self.driver
            .click_at(x, y)
            .await
            .map_err(|e| action_error(&target, e))?;
        pause(self.timings.point_click_settle).await;
        Ok(())
    }

    /// Fill a field. The first attempt types normally; later attempts clear
    /// the field and force the value in. Returns the number of attempts used.
    pub async fn fill(&mut self, selector: &str, value: &str) -> Result<u32> {
        self.prepare().await?;
        info!("fill: {} = '{}'", selector, value);

        let mut last_error = None;
        for attempt in 0..=self.timings.max_retries {
            if attempt > 0 {
                info!("Retrying fill on {} (attempt {})", selector, attempt + 1);
                pause(self.timings.retry_delay).await;
            }

            if let Err(e) = self
                .driver
                .wait_for_visible(selector, self.timings.fill_visible_timeout_ms)
                .await
            {
                debug!("fill target {} not visible: {}", selector, e);
                last_error = Some(e);
                continue;
            }

            let mode = if attempt > 0 {
                if let Err(e) = self.driver.fill(selector, "", FillMode::Native).await {
                    debug!("clearing {} failed: {}", selector, e);
                }
                pause(self.timings.fill_clear_pause).await;
                FillMode::Force
            } else {
                FillMode::Native
            };

            match self.driver.fill(selector, value, mode).await {
                Ok(()) => {
                    pause(self.timings.fill_settle).await;
                    return Ok(attempt + 1);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::action_failed(
            selector,
            last_error.map_or_else(|| "fill failed".to_string(), |e| e.to_string()),
        ))
    }

    pub async fn press(&mut self, key: &str) -> Result<()> {
        self.prepare().await?;
        debug!("press_key: {}", key);
        self.driver
            .press_key(key)
            .await
            .map_err(|e| action_error(key, e))?;
        let settle = if key == "Enter" {
            self.timings.enter_settle
        } else {
            self.timings.key_settle
        };
        pause(settle).await;
        Ok(())
    }

    pub async fn scroll(&mut self, direction: ScrollDirection, amount: u32) -> Result<()> {
        self.prepare().await?;
        debug!("scroll: {} {}", direction, amount);
        self.driver
            .evaluate(&scroll_js(direction, amount))
            .await
            .map_err(|e| action_error("window", e))?;
        pause(self.timings.page_scroll_settle).await;
        Ok(())
    }

    /// Wait until `selector` exists. Fails with `Timeout`.
    pub async fn wait_for_selector(&mut self, selector: &str, timeout_ms: u64) -> Result<()> {
        self.prepare().await?;
        self.driver
            .wait_for_selector(selector, timeout_ms)
            .await
            .map_err(|e| match e {
                Error::BrowserNotReady(_) => e,
                other => Error::Timeout(format!(
                    "{} not found within {}ms: {}",
                    selector, timeout_ms, other
                )),
            })
    }

    pub async fn page_state(&mut self) -> Result<PageState> {
        self.prepare().await?;
        self.driver.page_state().await
    }

    pub async fn current_url(&mut self) -> Result<String> {
        self.prepare().await?;
        self.driver.url().await
    }

    pub async fn screenshot(&mut self, path: &Path) -> Result<()> {
        self.prepare().await?;
        self.driver.screenshot(path).await
    }

    pub async fn evaluate(&mut self, js: &str) -> Result<serde_json::Value> {
        self.prepare().await?;
        self.driver.evaluate(js).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.driver.close().await
    }
}

//! [`PageDriver`] backed by a stealth `eoka` browser.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use eoka::{Browser, Page, StealthConfig};
use tracing::{debug, info, warn};

use crate::driver::{ClickMode, FillMode, PageDriver};
use crate::observe::{observe_script, parse_elements, ScanLimits};
use crate::types::PageState;
use crate::{Error, Result};

/// Browser launch options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    /// Replace the Chrome binary with a patched copy (`EOKA_PATCH_BINARY`).
    pub patch_binary: bool,
    pub scan: ScanLimits,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: false,
            viewport_width: 1920,
            viewport_height: 1080,
            user_agent: None,
            proxy: None,
            patch_binary: std::env::var("EOKA_PATCH_BINARY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            scan: ScanLimits::default(),
        }
    }
}

/// Set a field's value through the native setter so framework listeners see it.
const FORCE_FILL_JS: &str = r#"(() => {
    const el = document.querySelector(__pilot_sel);
    if (!el) return { success: false, error: 'element not found' };
    const proto = el instanceof HTMLTextAreaElement
        ? HTMLTextAreaElement.prototype
        : HTMLInputElement.prototype;
    const setter = Object.getOwnPropertyDescriptor(proto, 'value');
    el.focus();
    if (setter && setter.set) { setter.set.call(el, __pilot_val); } else { el.value = __pilot_val; }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return { success: true };
})()"#;

/// Full pointer sequence on whatever sits at the point.
const POINT_CLICK_JS: &str = r#"(() => {
    const el = document.elementFromPoint(__pilot_x, __pilot_y);
    if (!el) return { success: false, error: 'no element at point' };
    const opts = { bubbles: true, cancelable: true, view: window, clientX: __pilot_x, clientY: __pilot_y };
    el.dispatchEvent(new PointerEvent('pointerdown', opts));
    el.dispatchEvent(new MouseEvent('mousedown', opts));
    el.dispatchEvent(new PointerEvent('pointerup', opts));
    el.dispatchEvent(new MouseEvent('mouseup', opts));
    el.click();
    return { success: true };
})()"#;

fn script_failure(target: &str, value: &serde_json::Value) -> Option<Error> {
    if value["success"].as_bool() == Some(true) {
        return None;
    }
    let reason = value["error"].as_str().unwrap_or("script failed");
    Some(Error::action_failed(target, reason))
}

/// What to do when checking the active page against the open tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Recovery {
    Keep,
    /// Activate a surviving page this driver already holds.
    Switch(String),
    /// Take over a tab the site opened (popup, `target=_blank`).
    Attach(String),
    OpenBlank,
}

fn plan_recovery(current: Option<&str>, known: &[&str], open: &[String]) -> Recovery {
    if let Some(id) = current {
        if open.iter().any(|o| o == id) {
            return Recovery::Keep;
        }
    }
    if let Some(id) = open.iter().find(|o| known.contains(&o.as_str())) {
        return Recovery::Switch(id.clone());
    }
    match open.first() {
        Some(id) => Recovery::Attach(id.clone()),
        None => Recovery::OpenBlank,
    }
}

/// One browser, one active tab. Pages are kept by target id so a closed tab
/// can be swapped for a surviving one, including tabs the site opened.
pub struct EokaDriver {
    /// `None` once closing has begun.
    browser: Option<Browser>,
    pages: HashMap<String, Page>,
    current: Option<String>,
    scan: ScanLimits,
}

impl EokaDriver {
    pub async fn launch(config: LaunchConfig) -> Result<Self> {
        let stealth = StealthConfig {
            headless: config.headless,
            patch_binary: config.patch_binary,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            ..Default::default()
        };
        info!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_blank_page().await?;
        let id = page.target_id().to_string();

        let mut pages = HashMap::new();
        pages.insert(id.clone(), page);
        Ok(Self {
            browser: Some(browser),
            pages,
            current: Some(id),
            scan: config.scan,
        })
    }

    fn browser(&self) -> Result<&Browser> {
        self.browser
            .as_ref()
            .ok_or_else(|| Error::BrowserNotReady("browser is shutting down".into()))
    }

    fn page(&self) -> Result<&Page> {
        self.browser()?;
        self.current
            .as_ref()
            .and_then(|id| self.pages.get(id))
            .ok_or_else(|| Error::BrowserNotReady("no active page".into()))
    }

    async fn open_blank(&mut self) -> Result<()> {
        let page = self.browser()?.new_blank_page().await?;
        let id = page.target_id().to_string();
        info!("Opened fresh page {}", id);
        self.pages.insert(id.clone(), page);
        self.current = Some(id);
        Ok(())
    }

    async fn run_script(&self, target: &str, js: &str) -> Result<()> {
        let value: serde_json::Value = self.page()?.evaluate(js).await?;
        match script_failure(target, &value) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PageDriver for EokaDriver {
    fn is_ready(&self) -> bool {
        self.browser.is_some()
    }

    async fn ensure_live_page(&mut self) -> Result<()> {
        let open: Vec<String> = self
            .browser()?
            .tabs()
            .await
            .map_err(|e| Error::BrowserNotReady(format!("browser context is gone: {}", e)))?
            .into_iter()
            .map(|t| t.id)
            .collect();

        if let Some(id) = &self.current {
            if !open.contains(id) {
                warn!("Active page {} was closed", id);
            }
        }
        self.pages.retain(|id, _| open.contains(id));

        let plan = {
            let known: Vec<&str> = self.pages.keys().map(String::as_str).collect();
            plan_recovery(self.current.as_deref(), &known, &open)
        };
        match plan {
            Recovery::Keep => Ok(()),
            Recovery::Switch(id) => {
                debug!("Reattaching to page {}", id);
                self.browser()?.activate_tab(&id).await?;
                self.current = Some(id);
                Ok(())
            }
            Recovery::Attach(id) => {
                info!("Attaching to page {} opened by the site", id);
                let browser = self.browser()?;
                let page = browser.attach_page(&id).await?;
                browser.activate_tab(&id).await?;
                self.pages.insert(id.clone(), page);
                self.current = Some(id);
                Ok(())
            }
            Recovery::OpenBlank => self.open_blank().await,
        }
    }

    async fn goto(&mut self, url: &str) -> Result<()> {
        self.page()?.goto(url).await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str, mode: ClickMode, timeout_ms: u64) -> Result<()> {
        let page = self.page()?;
        match mode {
            ClickMode::Native => {
                page.wait_for_visible(selector, timeout_ms).await?;
                page.human_click(selector).await?;
            }
            ClickMode::Force => page.click(selector).await?,
        }
        Ok(())
    }

    async fn click_at(&mut self, x: f64, y: f64) -> Result<()> {
        let page = self.page()?;
        page.session()
            .dispatch_mouse_event(eoka::cdp::MouseEventType::MouseMoved, x, y, None, None)
            .await?;
        let js = format!("var __pilot_x = {}; var __pilot_y = {}; {}", x, y, POINT_CLICK_JS);
        self.run_script(&format!("({:.0}, {:.0})", x, y), &js).await
    }

    async fn fill(&mut self, selector: &str, value: &str, mode: FillMode) -> Result<()> {
        match mode {
            FillMode::Native => {
                self.page()?.fill(selector, value).await?;
                Ok(())
            }
            FillMode::Force => {
                let js = format!(
                    "var __pilot_sel = {}; var __pilot_val = {}; {}",
                    serde_json::to_string(selector)?,
                    serde_json::to_string(value)?,
                    FORCE_FILL_JS
                );
                self.run_script(selector, &js).await
            }
        }
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        self.page()?.human().press_key(key).await?;
        Ok(())
    }

    async fn wait_for_visible(&mut self, selector: &str, timeout_ms: u64) -> Result<()> {
        self.page()?
            .wait_for_visible(selector, timeout_ms)
            .await
            .map_err(|e| Error::Timeout(format!("{} not visible: {}", selector, e)))?;
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout_ms: u64) -> Result<()> {
        self.page()?
            .wait_for(selector, timeout_ms)
            .await
            .map_err(|e| Error::Timeout(format!("{} not found: {}", selector, e)))?;
        Ok(())
    }

    async fn evaluate(&mut self, js: &str) -> Result<serde_json::Value> {
        let value: Option<serde_json::Value> = self.page()?.evaluate(js).await?;
        Ok(value.unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        let png = self.page()?.screenshot().await?;
        tokio::fs::write(path, png).await?;
        Ok(())
    }

    async fn page_state(&mut self) -> Result<PageState> {
        let page = self.page()?;
        let url = page.url().await?;
        let title = page.title().await.unwrap_or_default();

        let elements = match page.evaluate::<String>(&observe_script(self.scan)).await {
            Ok(json) => parse_elements(&json).unwrap_or_else(|e| {
                warn!("Element discovery returned bad data: {}", e);
                Vec::new()
            }),
            Err(e) => {
                warn!("Element discovery failed on {}: {}", url, e);
                Vec::new()
            }
        };
        debug!("observed {} elements on {}", elements.len(), url);
        Ok(PageState::new(url, title, elements))
    }

    async fn url(&mut self) -> Result<String> {
        Ok(self.page()?.url().await?)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(browser) = self.browser.take() else {
            return Ok(());
        };
        self.current = None;
        self.pages.clear();
        info!("Closing browser");
        browser.close().await?;
        Ok(())
    }
}

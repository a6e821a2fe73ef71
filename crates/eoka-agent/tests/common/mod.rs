//! In-memory doubles for the browser, the model and the human.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use eoka_agent::{
    BoundingBox, BrowserAction, ClickMode, Confirmer, Conversation, Element, Error, FillMode,
    ModelClient, ModelResponse, PageDriver, PageState, Result,
};
use serde_json::{json, Value};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

/// Scripted page. Records every action-level call in `actions`; `url`,
/// `page_state` and liveness checks are queries and are not recorded.
pub struct MockDriver {
    pub ready: bool,
    pub live: bool,
    pub url: String,
    pub title: String,
    pub elements: Vec<Element>,
    pub actions: Vec<String>,
    pub screenshots: usize,
    pub reattachments: usize,
    /// Calls whose signature starts with a key fail with the value.
    pub failures: HashMap<String, String>,
    /// First rule whose key occurs in the script answers it.
    pub eval_rules: Vec<(String, Value)>,
    /// URL the page moves to after the keyed call succeeds.
    pub url_after: HashMap<String, String>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            ready: true,
            live: true,
            url: "about:blank".into(),
            title: String::new(),
            elements: Vec::new(),
            actions: Vec::new(),
            screenshots: 0,
            reattachments: 0,
            failures: HashMap::new(),
            eval_rules: Vec::new(),
            url_after: HashMap::new(),
        }
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(url: &str) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn fail(mut self, signature: &str, reason: &str) -> Self {
        self.failures.insert(signature.into(), reason.into());
        self
    }

    pub fn on_eval(mut self, needle: &str, value: Value) -> Self {
        self.eval_rules.push((needle.into(), value));
        self
    }

    pub fn moves_to(mut self, signature: &str, url: &str) -> Self {
        self.url_after.insert(signature.into(), url.into());
        self
    }

    pub fn with_elements(mut self, elements: Vec<Element>) -> Self {
        self.elements = elements;
        self
    }

    /// Action calls whose signature starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.actions.iter().filter(|a| a.starts_with(prefix)).count()
    }

    fn call(&mut self, signature: String) -> Result<()> {
        self.actions.push(signature.clone());
        if let Some((_, reason)) = self
            .failures
            .iter()
            .find(|(key, _)| signature.starts_with(key.as_str()))
        {
            return Err(Error::NotFound(reason.clone()));
        }
        if let Some(url) = self
            .url_after
            .iter()
            .find(|(key, _)| signature.starts_with(key.as_str()))
            .map(|(_, url)| url.clone())
        {
            self.url = url;
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn ensure_live_page(&mut self) -> Result<()> {
        if !self.live {
            self.live = true;
            self.reattachments += 1;
        }
        Ok(())
    }

    async fn goto(&mut self, url: &str) -> Result<()> {
        self.call(format!("goto:{}", url))?;
        self.url = url.to_string();
        Ok(())
    }

    async fn click(&mut self, selector: &str, mode: ClickMode, _timeout_ms: u64) -> Result<()> {
        let mode = match mode {
            ClickMode::Native => "native",
            ClickMode::Force => "force",
        };
        self.call(format!("click:{}:{}", mode, selector))
    }

    async fn click_at(&mut self, x: f64, y: f64) -> Result<()> {
        self.call(format!("click_at:{},{}", x, y))
    }

    async fn fill(&mut self, selector: &str, value: &str, mode: FillMode) -> Result<()> {
        let mode = match mode {
            FillMode::Native => "native",
            FillMode::Force => "force",
        };
        self.call(format!("fill:{}:{}={}", mode, selector, value))
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        self.call(format!("press:{}", key))
    }

    async fn wait_for_visible(&mut self, selector: &str, _timeout_ms: u64) -> Result<()> {
        self.call(format!("visible:{}", selector))
    }

    async fn wait_for_selector(&mut self, selector: &str, _timeout_ms: u64) -> Result<()> {
        self.call(format!("wait:{}", selector))
    }

    async fn evaluate(&mut self, js: &str) -> Result<Value> {
        self.call(format!("eval:{}", js))?;
        Ok(self
            .eval_rules
            .iter()
            .find(|(needle, _)| js.contains(needle.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| json!({"success": true})))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        self.screenshots += 1;
        std::fs::write(path, PNG_BYTES)?;
        Ok(())
    }

    async fn page_state(&mut self) -> Result<PageState> {
        Ok(PageState::new(
            self.url.clone(),
            self.title.clone(),
            self.elements.clone(),
        ))
    }

    async fn url(&mut self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.ready = false;
        Ok(())
    }
}

/// Replays canned responses, then `fallback` (or an error) once they run out.
/// Keeps a copy of every conversation it was sent.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelResponse>>>,
    fallback: Option<ModelResponse>,
    pub seen: Mutex<Vec<Conversation>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<ModelResponse>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn always(response: ModelResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_conversation(&self) -> Conversation {
        self.seen.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn send(&self, conversation: &Conversation) -> Result<ModelResponse> {
        self.seen.lock().unwrap().push(conversation.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| Error::Ai("no scripted reply left".into())),
        }
    }
}

/// Fixed answer, counting how often it was asked.
#[derive(Default)]
pub struct CountingConfirmer {
    pub answer: bool,
    pub asked: AtomicUsize,
}

impl CountingConfirmer {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Confirmer for CountingConfirmer {
    async fn confirm(&self, _action: &BrowserAction) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

pub fn button(text: &str, selector: &str, x: f64, y: f64) -> Element {
    Element {
        tag: "button".into(),
        text: text.into(),
        selector: selector.into(),
        attributes: Default::default(),
        clickable: true,
        bbox: BoundingBox {
            x,
            y,
            width: 100.0,
            height: 40.0,
        },
    }
}

pub fn navigate(url: &str) -> BrowserAction {
    BrowserAction::Navigate { url: url.into() }
}

pub fn click(selector: &str) -> BrowserAction {
    BrowserAction::Click {
        selector: selector.into(),
    }
}

pub fn fill(selector: &str, value: &str) -> BrowserAction {
    BrowserAction::Fill {
        selector: selector.into(),
        value: value.into(),
    }
}

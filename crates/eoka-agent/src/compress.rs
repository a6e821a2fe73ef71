//! Bounded text rendering of a [`PageState`] for the model.

use std::fmt::Write;

use crate::observe::truncate_chars;
use crate::types::PageState;

/// Output bounds for [`compress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressLimits {
    pub max_clickable: usize,
    pub max_other: usize,
    /// Cap on rendered text, ellipsis included.
    pub max_text_chars: usize,
    /// Cap on rendered selectors, ellipsis included.
    pub max_selector_chars: usize,
    /// Non-clickable elements with shorter text are dropped.
    pub min_other_text_chars: usize,
}

impl Default for CompressLimits {
    fn default() -> Self {
        Self {
            max_clickable: 40,
            max_other: 10,
            max_text_chars: 200,
            max_selector_chars: 100,
            min_other_text_chars: 3,
        }
    }
}

/// Render the page as a header plus ranked element sections.
///
/// ```text
/// URL: https://example.com/
/// Title: Example
///
/// Clickable elements:
/// 1. [a] More information | selector: a | coords: (640,210) size: 120x18
///
/// Other content:
/// 1. [h1] Example Domain
/// ```
pub fn compress(state: &PageState, limits: &CompressLimits) -> String {
    let mut out = String::with_capacity(64 + state.elements.len() * 96);
    let _ = write!(out, "URL: {}\nTitle: {}\n\n", state.url, state.title);

    if state.elements.is_empty() {
        return out;
    }

    out.push_str("Clickable elements:\n");
    for (n, el) in state
        .elements
        .iter()
        .filter(|e| e.clickable)
        .take(limits.max_clickable)
        .enumerate()
    {
        let (cx, cy) = el.bbox.center();
        let _ = writeln!(
            out,
            "{}. [{}] {} | selector: {} | coords: ({:.0},{:.0}) size: {:.0}x{:.0}",
            n + 1,
            el.tag,
            truncate_chars(&el.text, limits.max_text_chars),
            truncate_chars(&el.selector, limits.max_selector_chars),
            cx,
            cy,
            el.bbox.width,
            el.bbox.height,
        );
    }

    let mut others = state
        .elements
        .iter()
        .filter(|e| !e.clickable && e.text.chars().count() >= limits.min_other_text_chars)
        .take(limits.max_other)
        .peekable();

    if others.peek().is_some() {
        out.push_str("\nOther content:\n");
        for (n, el) in others.enumerate() {
            let _ = writeln!(
                out,
                "{}. [{}] {}",
                n + 1,
                el.tag,
                truncate_chars(&el.text, limits.max_text_chars)
            );
        }
    }

    out
}

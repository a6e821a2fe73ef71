//! DOM enumeration. The script only gathers raw facts about visible elements;
//! selector synthesis, labelling and clickability are decided in Rust.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::{BoundingBox, Element};
use crate::{Error, Result};

/// Tags scanned first, in this order.
pub const PRIORITY_TAGS: [&str; 5] = ["a", "button", "input", "select", "textarea"];
/// Tags scanned after the priority pass.
pub const SECONDARY_TAGS: [&str; 9] = ["h1", "h2", "h3", "h4", "h5", "h6", "span", "div", "label"];

/// Placeholder label for icon-only controls.
pub const ICON_BUTTON_LABEL: &str = "[ICON_BUTTON]";
/// Placeholder label for tiny role=button / onclick controls.
pub const SMALL_BUTTON_LABEL: &str = "[SMALL_BUTTON]";

const MAX_LABEL_CHARS: usize = 200;
const QA_ATTRS: [&str; 5] = ["data-test-id", "data-testid", "data-test", "data-qa", "data-cy"];

/// Per-tag caps for one discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    pub priority_per_tag: usize,
    pub secondary_per_tag: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            priority_per_tag: 50,
            secondary_per_tag: 20,
        }
    }
}

/// Raw facts gathered by [`OBSERVE_JS`] for one element.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawElement {
    pub tag: String,
    /// First QA attribute present, as `[name, value]`.
    pub qa: Option<(String, String)>,
    pub id: String,
    pub name: String,
    pub aria_label: String,
    pub role: String,
    /// `el.type` (inputs report "text" when unset, buttons "submit").
    pub input_type: String,
    pub placeholder: String,
    pub class_name: String,
    pub title: String,
    /// Up to three `tag:nth-child(n)` segments, innermost last; may start with `#id`.
    pub path: Vec<String>,
    pub value: String,
    pub inner_text: String,
    pub text_content: String,
    pub href: String,
    pub test_id: String,
    pub onclick: bool,
    pub cursor_pointer: bool,
    pub icon_child: bool,
    pub parent_tag: String,
    pub parent_role: String,
    pub parent_onclick: bool,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// JavaScript that lists visible elements by tag priority. Expects
/// `__pilot_priority`/`__pilot_secondary` caps to be declared before it.
pub const OBSERVE_JS: &str = r#"
(() => {
    const PRIORITY = ['a', 'button', 'input', 'select', 'textarea'];
    const SECONDARY = ['h1', 'h2', 'h3', 'h4', 'h5', 'h6', 'span', 'div', 'label'];
    const QA = ['data-test-id', 'data-testid', 'data-test', 'data-qa', 'data-cy'];
    const all = document.querySelectorAll('*');
    const seen = new Set();
    const results = [];

    const str = (v) => (typeof v === 'string' ? v : '');

    function iconChild(el, rect) {
        const svg = el.querySelector('svg');
        if (svg) {
            const html = svg.outerHTML.toLowerCase();
            if (html.includes('plus') || html.includes('+') || html.includes('add')) return true;
            const shapes = svg.querySelectorAll('path, circle, line').length;
            if (shapes > 0 && shapes < 5) return true;
        }
        if (el.querySelector('[class*="icon"], [class*="Icon"], i')) return true;
        if (rect.width > 20 && rect.width < 60 && rect.height > 20 && rect.height < 60) {
            const t = (el.innerText || el.textContent || '').trim();
            if (t === '' || t === '+' || t === '-') return true;
        }
        return false;
    }

    function nthPath(el) {
        const path = [];
        let node = el;
        for (let depth = 0; node && node.tagName && depth < 3; depth++) {
            if (node.id) {
                path.unshift('#' + node.id);
                break;
            }
            const idx = Array.from(node.parentNode ? node.parentNode.children : []).indexOf(node);
            if (idx >= 0) path.unshift(node.tagName.toLowerCase() + ':nth-child(' + (idx + 1) + ')');
            node = node.parentElement;
        }
        return path;
    }

    function scan(tags, cap) {
        for (const want of tags) {
            let count = 0;
            for (let i = 0; i < all.length && count < cap; i++) {
                const el = all[i];
                if (el.tagName.toLowerCase() !== want || seen.has(el)) continue;

                const rect = el.getBoundingClientRect();
                const style = getComputedStyle(el);
                if (rect.width <= 0 || rect.height <= 0) continue;
                if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') continue;
                if (rect.top >= innerHeight + 500 || rect.bottom <= -500) continue;

                seen.add(el);
                count++;

                let qa = null;
                for (const a of QA) {
                    const v = el.getAttribute(a);
                    if (v) { qa = [a, v]; break; }
                }
                const parent = el.parentElement;
                results.push({
                    tag: want,
                    qa,
                    id: str(el.id),
                    name: str(el.name),
                    aria_label: el.getAttribute('aria-label') || '',
                    role: el.getAttribute('role') || '',
                    input_type: str(el.type),
                    placeholder: str(el.placeholder),
                    class_name: str(el.className),
                    title: el.getAttribute('title') || '',
                    path: nthPath(el),
                    value: str(el.value),
                    inner_text: str(el.innerText),
                    text_content: str(el.textContent),
                    href: str(el.href),
                    test_id: el.getAttribute('data-test-id') || el.getAttribute('data-testid') || '',
                    onclick: el.onclick !== null && el.onclick !== undefined,
                    cursor_pointer: style.cursor === 'pointer',
                    icon_child: (want === 'button' || want === 'div') ? iconChild(el, rect) : false,
                    parent_tag: parent ? parent.tagName.toLowerCase() : '',
                    parent_role: parent ? (parent.getAttribute('role') || '') : '',
                    parent_onclick: parent ? (parent.onclick !== null && parent.onclick !== undefined) : false,
                    x: Math.round(rect.left),
                    y: Math.round(rect.top),
                    width: Math.round(rect.width),
                    height: Math.round(rect.height),
                });
            }
        }
    }

    try {
        scan(PRIORITY, __pilot_priority);
        scan(SECONDARY, __pilot_secondary);
    } catch (e) {
        return '[]';
    }
    return JSON.stringify(results);
})()
"#;

/// The discovery script with its caps prepended.
pub fn observe_script(limits: ScanLimits) -> String {
    format!(
        "var __pilot_priority = {}; var __pilot_secondary = {}; {}",
        limits.priority_per_tag, limits.secondary_per_tag, OBSERVE_JS
    )
}

/// Parse the script output into elements.
pub fn parse_elements(json: &str) -> Result<Vec<Element>> {
    let raw: Vec<RawElement> = serde_json::from_str(json)
        .map_err(|e| Error::Internal(format!("observe parse error: {}", e)))?;
    Ok(raw.iter().map(build_element).collect())
}

pub fn build_element(raw: &RawElement) -> Element {
    let mut text = derive_label(raw);
    let clickable = infer_clickable(raw, &mut text);
    let mut selector = synthesize_selector(raw);
    if selector.is_empty() {
        selector = raw.tag.clone();
    }
    Element {
        tag: raw.tag.clone(),
        text,
        selector,
        attributes: kept_attributes(raw),
        clickable,
        bbox: BoundingBox {
            x: raw.x,
            y: raw.y,
            width: raw.width,
            height: raw.height,
        },
    }
}

/// First applicable selector form, most stable first.
pub fn synthesize_selector(raw: &RawElement) -> String {
    let tag = raw.tag.as_str();

    if let Some((attr, val)) = &raw.qa {
        if QA_ATTRS.contains(&attr.as_str()) && !val.is_empty() {
            return format!("{}[{}=\"{}\"]", tag, attr, css_string(val));
        }
    }
    if raw.id.starts_with(|c: char| c.is_ascii_alphabetic()) && !raw.id.contains(' ') {
        return format!("#{}", raw.id);
    }
    if !raw.name.is_empty() && matches!(tag, "input" | "select" | "textarea" | "button") {
        return format!("{}[name=\"{}\"]", tag, css_string(&raw.name));
    }
    let aria = raw.aria_label.as_str();
    if !aria.is_empty() && aria.chars().count() < 80 {
        return format!("[aria-label=\"{}\"]", css_string(aria));
    }
    if !raw.role.is_empty() {
        return if aria.is_empty() {
            format!("[role=\"{}\"]", css_string(&raw.role))
        } else {
            format!(
                "[role=\"{}\"][aria-label=\"{}\"]",
                css_string(&raw.role),
                css_string(aria)
            )
        };
    }
    if tag == "input" && !raw.input_type.is_empty() {
        return if raw.placeholder.is_empty() {
            format!("input[type=\"{}\"]", css_string(&raw.input_type))
        } else {
            format!(
                "input[type=\"{}\"][placeholder=\"{}\"]",
                css_string(&raw.input_type),
                css_string(&raw.placeholder)
            )
        };
    }
    let classes: Vec<&str> = raw
        .class_name
        .split(' ')
        .filter(|c| usable_class(c))
        .take(2)
        .collect();
    if !classes.is_empty() {
        return format!(".{}", classes.join("."));
    }
    if !raw.title.is_empty() && raw.title.chars().count() < 50 {
        return format!("[title=\"{}\"]", css_string(&raw.title));
    }
    if !raw.path.is_empty() {
        return raw.path.join(" > ");
    }
    tag.to_string()
}

/// Escape a value for a double-quoted CSS attribute selector.
fn css_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\a "),
            '\r' => out.push_str("\\d "),
            _ => out.push(c),
        }
    }
    out
}

/// Class names that look hand-written rather than generated.
fn usable_class(c: &str) -> bool {
    if c.is_empty() || c.len() >= 40 || c.starts_with(|ch: char| ch.is_ascii_digit()) {
        return false;
    }
    let hashlike = c.len() >= 8 && c.chars().all(|ch| matches!(ch, 'a'..='f' | '0'..='9'));
    !hashlike
}

/// Visible label: value, rendered text, raw text, aria-label, then test-id tokens.
pub fn derive_label(raw: &RawElement) -> String {
    let label = if !raw.value.is_empty() {
        raw.value.clone()
    } else if !raw.inner_text.trim().is_empty() {
        raw.inner_text.clone()
    } else if !raw.text_content.trim().is_empty() {
        raw.text_content.clone()
    } else if !raw.aria_label.is_empty() {
        raw.aria_label.clone()
    } else if !raw.test_id.is_empty() {
        test_id_label(&raw.test_id)
    } else {
        String::new()
    };
    truncate_chars(label.trim(), MAX_LABEL_CHARS)
}

/// "cart-add-button_main" → "[CART ADD BUTTON]".
fn test_id_label(test_id: &str) -> String {
    let tokens: Vec<String> = test_id
        .split(['-', '_', '.'])
        .filter(|t| t.chars().count() > 2)
        .take(3)
        .map(str::to_uppercase)
        .collect();
    format!("[{}]", tokens.join(" "))
}

/// Decide clickability. May replace an empty or tiny label with a placeholder.
pub fn infer_clickable(raw: &RawElement, label: &mut String) -> bool {
    let tag = raw.tag.as_str();
    let test_id = raw.test_id.to_lowercase();
    let aria = raw.aria_label.to_lowercase();

    let mut clickable = matches!(tag, "a" | "button" | "input" | "select")
        || raw.onclick
        || matches!(raw.role.as_str(), "button" | "link" | "tab" | "menuitem")
        || raw.cursor_pointer
        || test_id.contains("button")
        || test_id.contains("add")
        || aria.contains("add")
        || aria.contains("plus");

    if matches!(tag, "button" | "div") {
        if raw.icon_child {
            clickable = true;
            if label.is_empty() {
                *label = ICON_BUTTON_LABEL.to_string();
            }
        }
        if (raw.role == "button" || raw.onclick) && raw.width < 80.0 && raw.height < 80.0 {
            clickable = true;
            if label.chars().count() < 2 {
                *label = SMALL_BUTTON_LABEL.to_string();
            }
        }
    }

    if !clickable {
        clickable = matches!(raw.parent_tag.as_str(), "a" | "button")
            || raw.parent_role == "button"
            || raw.parent_onclick;
    }
    clickable
}

fn kept_attributes(raw: &RawElement) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    let mut keep = |key: &str, val: &str, cap: Option<usize>| {
        if !val.is_empty() {
            let v = match cap {
                Some(n) => val.chars().take(n).collect(),
                None => val.to_string(),
            };
            attrs.insert(key.to_string(), v);
        }
    };
    keep("type", &raw.input_type, None);
    keep("placeholder", &raw.placeholder, Some(50));
    keep("name", &raw.name, None);
    keep("aria-label", &raw.aria_label, Some(100));
    keep("href", &raw.href, Some(100));
    keep("role", &raw.role, None);
    keep("data-test-id", &raw.test_id, None);
    attrs
}

/// Truncate to at most `max` chars, the trailing "..." included.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

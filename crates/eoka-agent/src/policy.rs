//! Pure predicates deciding whether an action is a repeat or needs a human.

use async_trait::async_trait;

use crate::types::BrowserAction;

const SENSITIVE_FIELDS: [&str; 4] = ["password", "card", "cvv", "pin"];
const DELETION_WORDS: [&str; 3] = ["delete", "remove", "удалить"];
const COMMITTING_CLICKS: [&str; 7] = ["delete", "remove", "удалить", "pay", "оплат", "купить", "buy"];
const PAYMENT_PAGES: [&str; 4] = ["payment", "checkout", "cart", "оплата"];
const SHORT_CODE_MAX_CHARS: usize = 6;

/// True when `next` repeats `prev` in kind and in every discriminating field.
///
/// Press and Wait are never considered repeats.
pub fn is_duplicate(prev: Option<&BrowserAction>, next: &BrowserAction) -> bool {
    use BrowserAction::*;

    let Some(prev) = prev else {
        return false;
    };
    match (prev, next) {
        (Navigate { url: a }, Navigate { url: b }) => a == b,
        (Click { selector: a }, Click { selector: b }) => a == b,
        (
            Fill {
                selector: sa,
                value: va,
            },
            Fill {
                selector: sb,
                value: vb,
            },
        ) => sa == sb && va == vb,
        (
            Scroll {
                direction: da,
                amount: aa,
            },
            Scroll {
                direction: db,
                amount: ab,
            },
        ) => da == db && aa == ab,
        (ClickAtPoint { x: xa, y: ya }, ClickAtPoint { x: xb, y: yb }) => xa == xb && ya == yb,
        _ => false,
    }
}

/// True when `action` must be confirmed by a human before it runs on `current_url`.
pub fn requires_confirmation(action: &BrowserAction, current_url: &str) -> bool {
    match action {
        BrowserAction::Fill { selector, value } => {
            let selector = selector.to_lowercase();
            let value_lower = value.to_lowercase();
            let sensitive = SENSITIVE_FIELDS.iter().any(|w| selector.contains(w))
                || (selector.contains("code") && value.chars().count() <= SHORT_CODE_MAX_CHARS);
            sensitive || DELETION_WORDS.iter().any(|w| value_lower.contains(w))
        }
        BrowserAction::Click { selector } => {
            let selector = selector.to_lowercase();
            let url = current_url.to_lowercase();
            COMMITTING_CLICKS.iter().any(|w| selector.contains(w))
                && PAYMENT_PAGES.iter().any(|w| url.contains(w))
        }
        _ => false,
    }
}

/// Interpret a typed confirmation answer. Only "yes" or "y" confirm.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}

/// Asks a human to approve a dangerous action. Blocks until answered.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, action: &BrowserAction) -> bool;
}

/// Approves everything. For unattended runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl Confirmer for AcceptAll {
    async fn confirm(&self, _action: &BrowserAction) -> bool {
        true
    }
}

/// Declines everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl Confirmer for DenyAll {
    async fn confirm(&self, _action: &BrowserAction) -> bool {
        false
    }
}

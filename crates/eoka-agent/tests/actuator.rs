//! Actuator behaviour against a scripted page.

mod common;

use common::MockDriver;
use eoka_agent::actuator::{PointerClick, ScriptClick};
use eoka_agent::{Actuator, ClickStrategy, Error, ScrollDirection, Timings};
use serde_json::json;

fn actuator(driver: MockDriver) -> Actuator<MockDriver> {
    Actuator::with_timings(driver, Timings::instant())
}

/// Breaks the first three rungs; the pointer click still lands.
fn stubborn_button() -> MockDriver {
    MockDriver::new()
        .fail("click:native:#buy", "covered by overlay")
        .fail("click:force:#buy", "covered by overlay")
        .on_eval("el.click()", json!({"success": false, "error": "click swallowed"}))
        .on_eval("r.left + r.width / 2", json!({"success": true, "x": 10.0, "y": 20.0}))
}

#[tokio::test]
async fn test_click_first_strategy() {
    let mut act = actuator(MockDriver::new());
    let report = act.click("#ok").await.unwrap();

    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.winning_strategy(), Some("wait_and_click"));
    assert_eq!(act.driver().count("click:native:#ok"), 1);
    assert_eq!(act.driver().count("click:force"), 0);
}

#[tokio::test]
async fn test_click_escalates_to_pointer() {
    let mut act = actuator(stubborn_button());
    let report = act.click("#buy").await.unwrap();

    let names: Vec<&str> = report.attempts.iter().map(|a| a.strategy.as_str()).collect();
    assert_eq!(
        names,
        ["wait_and_click", "force_click", "js_direct_click", "mouse_click"]
    );
    assert_eq!(report.attempts.len(), 4);
    assert!(report.attempts[..3].iter().all(|a| a.error.is_some()));
    assert_eq!(report.winning_strategy(), Some("mouse_click"));
    assert_eq!(act.driver().count("click_at:10,20"), 1);
}

#[tokio::test]
async fn test_click_exhausts_budget() {
    let mut act = actuator(stubborn_button().fail("click_at", "nothing there"));
    let err = act.click("#buy").await.unwrap_err();

    match err {
        Error::ActionFailed { target, reason } => {
            assert_eq!(target, "#buy");
            assert!(reason.contains("nothing there"), "{}", reason);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(act.driver().count("click:native"), 1);
    assert_eq!(act.driver().count("click_at"), 1);
}

#[tokio::test]
async fn test_click_budget_beyond_ladder_reuses_last_rung() {
    let timings = Timings {
        max_retries: 5,
        ..Timings::instant()
    };
    let driver = stubborn_button().fail("click_at", "nothing there");
    let mut act = Actuator::with_timings(driver, timings.clone());

    let report = eoka_agent::actuator::run_ladder(
        act.driver_mut(),
        "#buy",
        &eoka_agent::actuator::default_ladder(),
        &timings,
    )
    .await;

    assert_eq!(report.attempts.len(), 6);
    assert!(!report.succeeded());
    assert_eq!(report.attempts[4].strategy, "mouse_click");
    assert_eq!(report.attempts[5].strategy, "mouse_click");
    assert_eq!(report.attempts[5].attempt, 6);
}

#[tokio::test]
async fn test_custom_ladder() {
    let ladder: Vec<Box<dyn ClickStrategy>> = vec![Box::new(ScriptClick), Box::new(PointerClick)];
    let mut act = actuator(MockDriver::new()).with_ladder(ladder);

    let report = act.click("#a").await.unwrap();
    assert_eq!(report.winning_strategy(), Some("js_direct_click"));
    assert_eq!(act.driver().count("click:"), 0);
}

#[tokio::test]
async fn test_not_ready_touches_nothing() {
    let driver = MockDriver {
        ready: false,
        ..MockDriver::new()
    };
    let mut act = actuator(driver);

    assert!(matches!(act.click("#a").await, Err(Error::BrowserNotReady(_))));
    assert!(matches!(act.navigate("https://a.test").await, Err(Error::BrowserNotReady(_))));
    assert!(matches!(act.fill("#q", "x").await, Err(Error::BrowserNotReady(_))));
    assert!(act.driver().actions.is_empty());
}

#[tokio::test]
async fn test_closed_page_is_replaced_transparently() {
    let driver = MockDriver {
        live: false,
        ..MockDriver::new()
    };
    let mut act = actuator(driver);

    act.navigate("https://example.com").await.unwrap();
    assert_eq!(act.driver().reattachments, 1);
    assert_eq!(act.current_url().await.unwrap(), "https://example.com");
}

#[tokio::test]
async fn test_fill_first_try() {
    let mut act = actuator(MockDriver::new());
    assert_eq!(act.fill("#email", "a@b.c").await.unwrap(), 1);
    assert_eq!(
        act.driver().actions,
        ["visible:#email", "fill:native:#email=a@b.c"]
    );
}

#[tokio::test]
async fn test_fill_retry_clears_then_forces() {
    let mut act = actuator(MockDriver::new().fail("fill:native:#q=shoes", "detached"));
    assert_eq!(act.fill("#q", "shoes").await.unwrap(), 2);
    assert_eq!(
        act.driver().actions,
        [
            "visible:#q",
            "fill:native:#q=shoes",
            "visible:#q",
            "fill:native:#q=",
            "fill:force:#q=shoes",
        ]
    );
}

#[tokio::test]
async fn test_fill_gives_up_when_never_visible() {
    let mut act = actuator(MockDriver::new().fail("visible:#q", "hidden"));
    let err = act.fill("#q", "shoes").await.unwrap_err();
    assert!(matches!(err, Error::ActionFailed { ref target, .. } if target == "#q"));
    assert_eq!(act.driver().count("visible:#q"), 4);
    assert_eq!(act.driver().count("fill:"), 0);
}

#[tokio::test]
async fn test_navigate_failure_names_url() {
    let mut act = actuator(MockDriver::new().fail("goto", "dns failure"));
    let err = act.navigate("https://nope.test").await.unwrap_err();
    assert!(matches!(err, Error::ActionFailed { ref target, .. } if target == "https://nope.test"));
}

#[tokio::test]
async fn test_wait_for_selector_times_out() {
    let mut act = actuator(MockDriver::new().fail("wait:#late", "not yet"));
    let err = act.wait_for_selector("#late", 100).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(act.wait_for_selector("#here", 100).await.is_ok());
}

#[tokio::test]
async fn test_scroll_and_press() {
    let mut act = actuator(MockDriver::new());
    act.scroll(ScrollDirection::Up, 300).await.unwrap();
    act.press("Tab").await.unwrap();
    assert_eq!(
        act.driver().actions,
        ["eval:window.scrollBy(0, -300)", "press:Tab"]
    );
}

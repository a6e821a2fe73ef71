//! Agent loop against a scripted model and page.

mod common;

use std::sync::Mutex;

use async_trait::async_trait;
use common::{click, navigate, MockDriver, ScriptedModel};
use eoka_agent::{
    AcceptAll, AgentConfig, AgentLoop, BrowserAction, Conversation, Error, ModelClient,
    ModelResponse, Role, StopHandle, TaskStatus,
};
use tokio_util::sync::CancellationToken;

fn agent<M: ModelClient>(driver: MockDriver, model: M) -> AgentLoop<MockDriver, M, AcceptAll> {
    AgentLoop::new(driver, model, AcceptAll, AgentConfig::instant())
}

fn ai_down() -> eoka_agent::Result<ModelResponse> {
    Err(Error::Ai("API error (status 529): overloaded".into()))
}

#[tokio::test]
async fn test_navigate_then_click_then_complete() {
    let model = ScriptedModel::new(vec![
        Ok(ModelResponse::act(navigate("https://example.com"))),
        Ok(ModelResponse::act(click("#login"))),
        Ok(ModelResponse::done("Logged in")),
    ]);
    let mut agent = agent(MockDriver::new(), model);

    let run = agent
        .run("navigate to example.com and click Login", &CancellationToken::new())
        .await
        .unwrap();

    assert!(run.succeeded());
    assert_eq!(run.task.status, TaskStatus::Completed);
    assert_eq!(run.task.result.as_deref(), Some("Logged in"));
    assert_eq!(run.task.steps.len(), 2);
    assert!(run.task.steps.iter().all(|s| s.success));
    assert_eq!(run.iterations, 3);
    assert!(!agent.is_running());

    let driver = agent.dispatcher().actuator().driver();
    assert_eq!(driver.screenshots, 1);
    assert_eq!(driver.count("goto:https://example.com"), 1);
    assert_eq!(driver.count("click:native:#login"), 1);

    let seen = agent.model().last_conversation();
    let messages = seen.messages();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].content.text().contains("Task: navigate to example.com and click Login"));
    assert!(messages[1].content.has_image());
    assert!(!messages[2].content.has_image());
    assert!(messages[2].content.text().starts_with("URL: https://example.com"));
}

#[tokio::test]
async fn test_thoughts_join_the_conversation() {
    let model = ScriptedModel::new(vec![
        Ok(ModelResponse::default().with_thought("Looking around first.")),
        Ok(ModelResponse::done("nothing to do")),
    ]);
    let mut agent = agent(MockDriver::new(), model);
    let run = agent.run("look", &CancellationToken::new()).await.unwrap();

    assert!(run.succeeded());
    assert!(run.task.steps.is_empty());
    let seen = agent.model().last_conversation();
    let last = seen.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content.text(), "Looking around first.");
}

#[tokio::test]
async fn test_stops_at_iteration_budget() {
    let model = ScriptedModel::always(ModelResponse::act(BrowserAction::Wait { ms: 0 }));
    let config = AgentConfig {
        max_iterations: 5,
        ..AgentConfig::instant()
    };
    let mut agent = AgentLoop::new(MockDriver::new(), model, AcceptAll, config);

    let run = agent.run("loop forever", &CancellationToken::new()).await.unwrap();

    assert_eq!(run.iterations, 5);
    assert_eq!(agent.model().calls(), 5);
    assert_eq!(run.task.status, TaskStatus::Failed);
    assert_eq!(run.task.error.as_deref(), Some("max iterations reached"));
    assert!(matches!(run.error, Some(Error::MaxIterations(5))));
    assert_eq!(run.task.steps.len(), 5);
}

#[tokio::test]
async fn test_three_model_failures_abort() {
    let model = ScriptedModel::new(vec![ai_down(), ai_down(), ai_down()]);
    let mut agent = agent(MockDriver::new(), model);

    let run = agent.run("anything", &CancellationToken::new()).await.unwrap();

    assert_eq!(run.task.status, TaskStatus::Failed);
    assert!(matches!(run.error, Some(Error::Ai(_))));
    assert!(run
        .task
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("too many AI errors"));
    assert_eq!(run.iterations, 0);
    assert_eq!(agent.model().calls(), 3);
}

#[tokio::test]
async fn test_success_resets_error_budget() {
    let model = ScriptedModel::new(vec![
        ai_down(),
        ai_down(),
        Ok(ModelResponse::default().with_thought("still here")),
        ai_down(),
        Ok(ModelResponse::done("made it")),
    ]);
    let mut agent = agent(MockDriver::new(), model);

    let run = agent.run("flaky", &CancellationToken::new()).await.unwrap();

    assert!(run.succeeded(), "{:?}", run.task.error);
    assert_eq!(run.iterations, 2);
    assert_eq!(agent.model().calls(), 5);
}

#[tokio::test]
async fn test_model_and_action_failures_share_one_budget() {
    let driver = MockDriver::new().fail("goto", "net::ERR_NAME_NOT_RESOLVED");
    let model = ScriptedModel::new(vec![
        ai_down(),
        Ok(ModelResponse::act(navigate("https://nowhere.invalid"))),
        ai_down(),
        Ok(ModelResponse::done("unreachable")),
    ]);
    let mut agent = agent(driver, model);

    let run = agent.run("mixed failures", &CancellationToken::new()).await.unwrap();

    assert_eq!(run.task.status, TaskStatus::Failed);
    assert!(matches!(run.error, Some(Error::Ai(_))));
    assert!(run
        .task
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("too many AI errors"));
    assert_eq!(agent.model().calls(), 3);
    assert_eq!(run.iterations, 1);
    assert_eq!(run.task.failed_steps(), 1);
}

#[tokio::test]
async fn test_only_a_clean_iteration_resets_the_budget() {
    let driver = MockDriver::new().fail("goto", "net::ERR_NAME_NOT_RESOLVED");
    let model = ScriptedModel::new(vec![
        ai_down(),
        Ok(ModelResponse::act(navigate("https://a.invalid"))),
        Ok(ModelResponse::act(BrowserAction::Wait { ms: 0 })),
        ai_down(),
        Ok(ModelResponse::act(navigate("https://b.invalid"))),
        Ok(ModelResponse::done("recovered")),
    ]);
    let mut agent = agent(driver, model);

    let run = agent.run("flaky site", &CancellationToken::new()).await.unwrap();

    assert!(run.succeeded(), "{:?}", run.task.error);
    assert_eq!(agent.model().calls(), 6);
    assert_eq!(run.iterations, 4);
    assert_eq!(run.task.steps.len(), 3);
    assert_eq!(run.task.failed_steps(), 2);
}

#[tokio::test]
async fn test_repeated_failing_action_aborts() {
    let driver = MockDriver::new()
        .fail("click", "covered")
        .on_eval("el.click()", serde_json::json!({"success": false, "error": "swallowed"}));
    let model = ScriptedModel::always(ModelResponse::act(click("#gone")));
    let mut agent = agent(driver, model);

    let run = agent.run("click it", &CancellationToken::new()).await.unwrap();

    assert_eq!(run.task.status, TaskStatus::Failed);
    assert!(run
        .task
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("too many consecutive action errors"));
    assert!(matches!(run.error, Some(Error::ActionFailed { ref target, .. }) if target == "click"));
    assert_eq!(run.iterations, 3);
    assert_eq!(run.task.steps.len(), 3);
    assert_eq!(run.task.failed_steps(), 3);
    // Only the first click reached the page; the repeats were caught.
    assert_eq!(agent.dispatcher().actuator().driver().count("click:native"), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let model = ScriptedModel::always(ModelResponse::done("never"));
    let mut agent = agent(MockDriver::new(), model);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = agent.run("anything", &cancel).await.unwrap();

    assert_eq!(run.task.error.as_deref(), Some("context cancelled"));
    assert!(matches!(run.error, Some(Error::Internal(_))));
    assert_eq!(agent.model().calls(), 0);
}

/// Presses the loop's stop handle from inside a model call.
struct StoppingModel {
    handle: Mutex<Option<StopHandle>>,
}

#[async_trait]
impl ModelClient for StoppingModel {
    async fn send(&self, _conversation: &Conversation) -> eoka_agent::Result<ModelResponse> {
        if let Some(handle) = self.handle.lock().unwrap().as_ref() {
            handle.stop();
        }
        Ok(ModelResponse::act(BrowserAction::Wait { ms: 0 }))
    }
}

#[tokio::test]
async fn test_stop_handle_ends_run_at_next_iteration() {
    let model = StoppingModel {
        handle: Mutex::new(None),
    };
    let mut agent = agent(MockDriver::new(), model);
    *agent.model().handle.lock().unwrap() = Some(agent.stop_handle());

    let run = agent.run("stop me", &CancellationToken::new()).await.unwrap();

    assert_eq!(run.iterations, 1);
    assert_eq!(run.task.error.as_deref(), Some("stopped by user"));
    assert!(matches!(run.error, Some(Error::CancelledByUser(_))));

    // The next run starts with the stop cleared.
    *agent.model().handle.lock().unwrap() = None;
    let run = agent.run("keep going", &CancellationToken::new()).await.unwrap();
    assert_eq!(run.iterations, agent.config().max_iterations);
    assert_eq!(run.task.error.as_deref(), Some("max iterations reached"));
}

#[tokio::test]
async fn test_empty_task_is_rejected() {
    let mut agent = agent(MockDriver::new(), ScriptedModel::new(vec![]));
    let err = agent.run("   ", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_unready_browser_fails_fast() {
    let driver = MockDriver {
        ready: false,
        ..MockDriver::new()
    };
    let mut agent = agent(driver, ScriptedModel::always(ModelResponse::done("x")));

    let run = agent.run("anything", &CancellationToken::new()).await.unwrap();

    assert_eq!(run.task.status, TaskStatus::Failed);
    assert!(matches!(run.error, Some(Error::BrowserNotReady(_))));
    assert_eq!(agent.model().calls(), 0);
}

#[tokio::test]
async fn test_close_marks_browser_unready() {
    let mut agent = agent(MockDriver::new(), ScriptedModel::new(vec![]));
    agent.close().await.unwrap();
    assert!(!agent.dispatcher().actuator().is_ready());
}

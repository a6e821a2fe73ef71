//! The task state machine: ask the model, act on the page, repeat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::actuator::{Actuator, Timings};
use crate::dispatch::{ActionMemory, DispatchConfig, Dispatcher};
use crate::driver::PageDriver;
use crate::model::ModelClient;
use crate::policy::Confirmer;
use crate::types::{Conversation, Task};
use crate::{Error, Result};

pub const REASON_CANCELLED: &str = "context cancelled";
pub const REASON_STOPPED: &str = "stopped by user";
pub const REASON_MAX_ITERATIONS: &str = "max iterations reached";
pub const REASON_NOT_READY: &str = "browser is not ready";

/// Loop budgets and pacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Successful model turns allowed per task.
    pub max_iterations: u32,
    /// Consecutive failures (model or action) that abort the task.
    pub max_consecutive_errors: u32,
    /// Wait after a failed model call.
    pub error_backoff: Duration,
    /// Wait between iterations.
    pub pacing: Duration,
    pub timings: Timings,
    pub dispatch: DispatchConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 16,
            max_consecutive_errors: 3,
            error_backoff: Duration::from_secs(2),
            pacing: Duration::from_millis(500),
            timings: Timings::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Default budgets with every delay set to zero. For tests.
    pub fn instant() -> Self {
        Self {
            error_backoff: Duration::ZERO,
            pacing: Duration::ZERO,
            timings: Timings::instant(),
            dispatch: DispatchConfig::instant(),
            ..Self::default()
        }
    }
}

/// Out-of-band stop request, safe to trigger from a signal handler task.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns false if one was already pending.
    pub fn stop(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Final record of one task. `error` carries the typed cause of a failure.
#[derive(Debug)]
pub struct TaskRun {
    pub task: Task,
    pub error: Option<Error>,
    /// Model turns consumed.
    pub iterations: u32,
}

impl TaskRun {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.task.status == crate::types::TaskStatus::Completed
    }
}

/// First message of every conversation.
pub fn task_prompt(description: &str, max_iterations: u32) -> String {
    format!(
        "You are a browser automation agent. Complete tasks efficiently.

Task: {description}

Available actions:
- navigate(url)
- click_at_coordinates(x, y) - PRIMARY method, click at screen position
- click(selector) - backup method if coordinates not available
- fill(selector, value) - auto-submits search fields
- press(key)
- scroll(direction, amount)
- complete_task(result)

IMPORTANT RULES:
1. Clickable elements show: text | selector | coords (x,y) | size WxH
2. Coordinates are CENTER of element - use these for clicking
3. ALWAYS prefer click_at_coordinates(x,y) - it's more reliable
4. When a click changes the page you get a screenshot - check what happened
5. Look for [ICON_BUTTON] and [SMALL_BUTTON] placeholders and [TEST ID] labels
6. Search fields auto-submit with Enter
7. NEVER repeat failed actions
8. Before completing - VERIFY result (check cart, confirmation, new elements)
9. Only complete when you SEE proof of success

Max {max_iterations} iterations."
    )
}

/// How a run ended, before it is folded into a [`TaskRun`].
enum Exit {
    Completed,
    Failed(Error),
}

/// Drives one task at a time through the model and the browser.
pub struct AgentLoop<D, M, C> {
    dispatcher: Dispatcher<D, C>,
    model: M,
    config: AgentConfig,
    stop: StopHandle,
    running: bool,
}

impl<D: PageDriver, M: ModelClient, C: Confirmer> AgentLoop<D, M, C> {
    pub fn new(driver: D, model: M, confirmer: C, config: AgentConfig) -> Self {
        let actuator = Actuator::with_timings(driver, config.timings.clone());
        let dispatcher = Dispatcher::new(actuator, confirmer, config.dispatch.clone());
        Self::from_dispatcher(dispatcher, model, config)
    }

    pub fn from_dispatcher(dispatcher: Dispatcher<D, C>, model: M, config: AgentConfig) -> Self {
        Self {
            dispatcher,
            model,
            config,
            stop: StopHandle::new(),
            running: false,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher<D, C> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<D, C> {
        &mut self.dispatcher
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Handle that stops the current run at the next iteration boundary.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Request a stop. A no-op if one is already pending.
    pub fn stop(&self) {
        if self.stop.stop() {
            info!("Stopping agent...");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Close the browser behind this loop.
    pub async fn close(&mut self) -> Result<()> {
        self.dispatcher.actuator_mut().close().await
    }

    /// Run one task to completion or failure.
    ///
    /// Only an empty description is an `Err`; every other outcome, including
    /// an unready browser, comes back as a [`TaskRun`] with a terminal task.
    pub async fn run(&mut self, description: &str, cancel: &CancellationToken) -> Result<TaskRun> {
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::InvalidArgument(
                "task description cannot be empty".into(),
            ));
        }

        let mut task = Task::new(description);
        task.begin();
        info!("Task {}: {}", task.id, description);

        if !self.dispatcher.actuator().is_ready() {
            task.fail(REASON_NOT_READY);
            return Ok(TaskRun {
                task,
                error: Some(Error::BrowserNotReady(REASON_NOT_READY.into())),
                iterations: 0,
            });
        }

        let mut conversation = Conversation::new();
        conversation.push_user(task_prompt(description, self.config.max_iterations));

        self.stop.reset();
        self.running = true;
        let (exit, iterations) = self.drive(&mut task, &mut conversation, cancel).await;
        self.running = false;

        let error = match exit {
            Exit::Completed => {
                info!(
                    "Task {} completed after {} iteration(s): {}",
                    task.id,
                    iterations,
                    task.result.as_deref().unwrap_or_default()
                );
                None
            }
            Exit::Failed(e) => {
                warn!("Task {} failed: {}", task.id, task.error.as_deref().unwrap_or_default());
                Some(e)
            }
        };
        Ok(TaskRun {
            task,
            error,
            iterations,
        })
    }

    async fn drive(
        &mut self,
        task: &mut Task,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> (Exit, u32) {
        let max_errors = self.config.max_consecutive_errors;
        let mut memory = ActionMemory::default();
        let mut iterations = 0u32;
        let mut consecutive_errors = 0u32;

        while iterations < self.config.max_iterations {
            if cancel.is_cancelled() {
                task.fail(REASON_CANCELLED);
                return (Exit::Failed(Error::Internal(REASON_CANCELLED.into())), iterations);
            }
            if self.stop.is_stopped() {
                task.fail(REASON_STOPPED);
                return (
                    Exit::Failed(Error::CancelledByUser(REASON_STOPPED.into())),
                    iterations,
                );
            }

            let response = match self.model.send(conversation).await {
                Ok(r) => r,
                Err(e) => {
                    error!("AI request failed: {}", e);
                    consecutive_errors += 1;
                    if consecutive_errors >= max_errors {
                        let reason = format!("too many AI errors: {}", e);
                        task.fail(reason.clone());
                        return (Exit::Failed(Error::Ai(reason)), iterations);
                    }
                    wait_unless_cancelled(self.config.error_backoff, cancel).await;
                    continue;
                }
            };

            iterations += 1;
            info!("Iteration {}/{}", iterations, self.config.max_iterations);

            if let Some(thought) = response.thought.filter(|t| !t.trim().is_empty()) {
                info!("Model: {}", thought);
                conversation.push_assistant(thought);
            }

            if response.complete {
                task.complete(response.result.unwrap_or_default());
                return (Exit::Completed, iterations);
            }

            let mut clean = true;
            if let Some(action) = response.action {
                if let Err(e) = self
                    .dispatcher
                    .dispatch(&mut memory, task, &action, conversation)
                    .await
                {
                    error!("Action failed: {}", e);
                    clean = false;
                    consecutive_errors += 1;
                    if consecutive_errors >= max_errors {
                        let reason = format!("too many consecutive action errors: {}", e);
                        task.fail(reason.clone());
                        return (
                            Exit::Failed(Error::action_failed(action.kind(), reason)),
                            iterations,
                        );
                    }
                }
            }
            if clean {
                consecutive_errors = 0;
            }

            wait_unless_cancelled(self.config.pacing, cancel).await;
        }

        task.fail(REASON_MAX_ITERATIONS);
        (
            Exit::Failed(Error::MaxIterations(self.config.max_iterations)),
            iterations,
        )
    }
}

/// Sleep, waking early if the token fires. The loop re-checks at its top.
async fn wait_unless_cancelled(d: Duration, cancel: &CancellationToken) {
    if d.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(d) => {}
        _ = cancel.cancelled() => {}
    }
}

//! Interactive console and human confirmation over stdin.

use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;

use async_trait::async_trait;
use eoka_agent::policy::is_affirmative;
use eoka_agent::{AgentLoop, BrowserAction, Confirmer, ModelClient, PageDriver, TaskRun};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const BANNER: &str = r#"
eoka-pilot - autonomous browser agent

Type a task and press Enter. Commands: help, exit
"#;

const HELP: &str = r#"Commands:
  help, h          show this message
  exit, quit, q    leave the console
  <anything else>  run it as a task

Examples:
  find the opening hours of the Louvre
  search for wireless headphones and add the cheapest one to the cart

Ctrl-C stops the running task and exits."#;

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Empty,
    Help,
    Exit,
    Task(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    match line.to_lowercase().as_str() {
        "" => Command::Empty,
        "help" | "h" => Command::Help,
        "exit" | "quit" | "q" => Command::Exit,
        _ => Command::Task(line),
    }
}

/// Lines from a blocking source, read on a dedicated thread.
///
/// The reader thread is detached, so a read still pending at shutdown never
/// holds up the runtime. `next_line` is cancel-safe.
#[derive(Clone)]
pub struct LineReader {
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl LineReader {
    pub fn stdin() -> Self {
        Self::spawn(BufReader::new(std::io::stdin()))
    }

    pub fn spawn<R: BufRead + Send + 'static>(mut source: R) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let reader = std::thread::Builder::new()
            .name("console-input".into())
            .spawn(move || loop {
                let mut line = String::new();
                match source.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                }
            });
        if let Err(e) = reader {
            warn!("Failed to start input reader: {}", e);
        }
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// The next line, `None` on EOF.
    pub async fn next_line(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// Asks on the terminal. EOF or anything but yes/y declines.
#[derive(Clone)]
pub struct StdinConfirmer {
    lines: LineReader,
}

impl StdinConfirmer {
    pub fn new(lines: LineReader) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, action: &BrowserAction) -> bool {
        println!();
        println!("! Dangerous action: {}", action);
        prompt("Confirm (yes/no): ");
        match self.lines.next_line().await {
            Some(answer) => is_affirmative(&answer),
            None => false,
        }
    }
}

/// Print a finished task, as text or as JSON.
pub fn report(run: &TaskRun, json: bool) {
    if json {
        match serde_json::to_string_pretty(&run.task) {
            Ok(s) => println!("{}", s),
            Err(e) => warn!("Failed to serialise task: {}", e),
        }
        return;
    }

    println!();
    if run.succeeded() {
        println!("✓ Success");
        if let Some(ref result) = run.task.result {
            println!("  Result: {}", result);
        }
    } else {
        println!("✗ Failed");
        if let Some(ref error) = run.task.error {
            println!("  Error: {}", error);
        }
    }
    println!("  Steps: {}", run.task.steps.len());
    if run.task.failed_steps() > 0 {
        println!("  Failed steps: {}", run.task.failed_steps());
    }
    println!("  Iterations: {}", run.iterations);
}

/// Stop the running task on Ctrl-C. The returned token fires once it has.
fn watch_interrupt<D, M, C>(agent: &AgentLoop<D, M, C>) -> CancellationToken
where
    D: PageDriver,
    M: ModelClient,
    C: Confirmer,
{
    let shutdown = CancellationToken::new();
    let stop = agent.stop_handle();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if stop.stop() {
                info!("Interrupt received, stopping");
            }
            token.cancel();
        }
    });
    shutdown
}

/// Read tasks until `exit`, EOF or Ctrl-C.
pub async fn run<D, M, C>(
    agent: &mut AgentLoop<D, M, C>,
    lines: &LineReader,
    json: bool,
) -> anyhow::Result<()>
where
    D: PageDriver,
    M: ModelClient,
    C: Confirmer,
{
    let shutdown = watch_interrupt(agent);
    println!("{}", BANNER);

    loop {
        prompt("> ");
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.cancelled() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match parse_command(&line) {
            Command::Empty => continue,
            Command::Help => println!("{}", HELP),
            Command::Exit => break,
            Command::Task(task) => {
                let run = agent.run(task, &CancellationToken::new()).await?;
                report(&run, json);
            }
        }

        if shutdown.is_cancelled() {
            break;
        }
    }
    println!("Goodbye!");
    Ok(())
}

/// Run a single task, wiring Ctrl-C to the stop handle.
pub async fn run_once<D, M, C>(agent: &mut AgentLoop<D, M, C>, task: &str) -> anyhow::Result<TaskRun>
where
    D: PageDriver,
    M: ModelClient,
    C: Confirmer,
{
    let _shutdown = watch_interrupt(agent);
    Ok(agent.run(task, &CancellationToken::new()).await?)
}

//! Run one task end to end: Claude decides, eoka acts.
//!
//! Set AI_API_KEY before running:
//!   cargo run -p eoka-agent --example agent_task -- "find the price of a Raspberry Pi 5"

use eoka_agent::{AcceptAll, AgentConfig, AgentLoop, AnthropicClient, EokaDriver, LaunchConfig};
use tokio_util::sync::CancellationToken;

const MODEL: &str = "claude-sonnet-4-20250514";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let task = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "open example.com and report the page heading".into());
    let api_key = std::env::var("AI_API_KEY")?;

    let driver = EokaDriver::launch(LaunchConfig::default()).await?;
    let model = AnthropicClient::new(api_key, MODEL);
    let mut agent = AgentLoop::new(driver, model, AcceptAll, AgentConfig::default());

    let run = agent.run(&task, &CancellationToken::new()).await?;
    println!("{:?} after {} iteration(s)", run.task.status, run.iterations);
    for step in &run.task.steps {
        let mark = if step.success { "ok" } else { "failed" };
        println!("  {} {} {}", mark, step.action, step.description);
    }
    match (&run.task.result, &run.task.error) {
        (Some(result), _) => println!("Result: {}", result),
        (_, Some(error)) => println!("Error: {}", error),
        _ => {}
    }

    agent.close().await?;
    Ok(())
}

mod config;
mod console;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use eoka_agent::{AgentLoop, AnthropicClient, EokaDriver};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Settings;
use console::{LineReader, StdinConfirmer};

#[derive(Parser)]
#[command(name = "eoka-pilot")]
#[command(about = "Autonomous browser agent: describe a task, watch it happen")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// YAML settings file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run in headless mode (overrides config)
    #[arg(long)]
    headless: bool,

    /// Print finished tasks as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task and exit
    Run {
        /// What the agent should do
        task: String,
    },
}

fn init_logging(cli: &Cli, settings: &Settings) {
    let directive = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => settings.log_directive(),
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if cli.headless {
        settings.browser.headless = true;
    }
    init_logging(&cli, &settings);

    let model = AnthropicClient::new(settings.api_key()?, settings.ai.model.as_str())
        .with_base_url(settings.ai.base_url.as_str())
        .with_max_tokens(settings.ai.max_tokens);
    info!("Using model {}", model.model());

    let driver = EokaDriver::launch(settings.launch_config())
        .await
        .context("Failed to launch browser")?;
    let lines = LineReader::stdin();
    let mut agent = AgentLoop::new(
        driver,
        model,
        StdinConfirmer::new(lines.clone()),
        settings.agent_config(),
    );

    let outcome = match cli.command {
        Some(Command::Run { ref task }) => console::run_once(&mut agent, task)
            .await
            .map(|run| {
                console::report(&run, cli.json);
                run.succeeded()
            }),
        None => console::run(&mut agent, &lines, cli.json).await.map(|()| true),
    };

    agent.close().await.context("Failed to close browser")?;

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

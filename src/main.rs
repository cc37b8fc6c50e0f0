//! `agent` command line
//!
//! ```text
//! agent run "What's the weather in Paris?" --provider openai --model gpt-4o-mini
//! ```
//!
//! Text goes to stdout as it streams; reasoning and tool activity go to
//! stderr. `--json` writes raw wire chunks instead.

use agent_runtime::wire::{encode_chunk, is_terminal};
use agent_runtime::{
    Agent, AgentOptions, ContentBlock, MessageType, Provider, get_base_url, get_model,
};
use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;

#[derive(Debug, Parser)]
#[command(name = "agent", version, about = "Run tasks against an LLM agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Perform one task and stream the result
    Run {
        /// The user message
        message: String,

        /// anthropic, openai or local
        #[arg(long, default_value = "anthropic")]
        provider: String,

        /// Model name; falls back to AGENT_MODEL
        #[arg(long)]
        model: Option<String>,

        /// API key; falls back to the provider's environment variable
        #[arg(long)]
        api_key: Option<String>,

        /// Endpoint; falls back to AGENT_BASE_URL, then the provider default
        #[arg(long)]
        base_url: Option<String>,

        /// System prompt
        #[arg(long)]
        system: Option<String>,

        /// Write wire chunks instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Run {
            message,
            provider,
            model,
            api_key,
            base_url,
            system,
            json,
        } => {
            let provider = Provider::from_str(&provider)
                .ok_or_else(|| anyhow!("unknown provider: {}", provider))?;
            if provider == Provider::Local {
                bail!("the local provider needs a host program that registers models");
            }
            let model = get_model(model.as_deref(), model.is_none())
                .ok_or_else(|| anyhow!("no model given; pass --model or set AGENT_MODEL"))?;

            let mut builder = AgentOptions::builder()
                .provider(provider)
                .model(model)
                .base_url(base_url.unwrap_or_else(|| get_base_url(provider, None)));
            if let Some(key) = api_key {
                builder = builder.api_key(key);
            }
            if let Some(system) = system {
                builder = builder.system_prompt(system);
            }
            let agent = Agent::new(builder.build()?).context("failed to create agent")?;

            let cancel = agent.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            run(&agent, &message, json).await
        }
    }
}

async fn run(agent: &Agent, message: &str, json: bool) -> anyhow::Result<()> {
    let task = agent.perform_task(message).await;
    let mut stdout = std::io::stdout();

    if json {
        let mut stream = task.stream;
        while let Some(message) = stream.next().await {
            write!(stdout, "{}", encode_chunk(&message)?)?;
            stdout.flush()?;
            if is_terminal(&message) {
                if let Some(error) = message.error_message() {
                    bail!(error.to_string());
                }
                break;
            }
        }
        return Ok(());
    }

    let mut stream = task.stream;
    let mut failure = None;
    while let Some(message) = stream.next().await {
        match message.kind {
            MessageType::Text => {
                write!(stdout, "{}", message.text())?;
                stdout.flush()?;
            }
            MessageType::Thinking => {
                for block in &message.content {
                    if let ContentBlock::Thinking(t) = block {
                        eprint!("{}", t.thinking);
                    }
                }
            }
            MessageType::ToolUse => {
                for tool_use in message.tool_uses() {
                    eprintln!("\n[tool] {}", tool_use.name);
                }
            }
            MessageType::ToolResult => {
                for block in &message.content {
                    if let ContentBlock::ToolResult(r) = block {
                        let label = if r.is_error { "error" } else { "result" };
                        eprintln!("[{}] {}", label, r.content_text());
                    }
                }
            }
            MessageType::Error => {
                failure = message.error_message().map(str::to_string);
            }
            _ => {}
        }
    }
    writeln!(stdout)?;

    log::debug!(
        "usage: {} input, {} output tokens",
        task.usage.input_tokens(),
        task.usage.output_tokens()
    );

    match failure {
        Some(message) => bail!(message),
        None => Ok(()),
    }
}

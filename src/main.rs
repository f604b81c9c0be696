// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use craft_config::Config;
use craft_context::ContextPipeline;
use craft_core::{Engine, EngineError, EventSink};
use craft_model::{AuthStyle, MockProvider, ModelProvider, OpenAICompatProvider};
use craft_store::SessionStore;
use craft_tools::{CodeRunnerTool, CommandTool, FileManagerTool, ToolRegistry};

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Subcommands that need no engine.
    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = craft_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
            Commands::Sessions { limit } => {
                let config = craft_config::load(cli.config.as_deref())?;
                return print_sessions(&config, *limit);
            }
        }
    }

    let mut config = craft_config::load(cli.config.as_deref())?;
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }

    let mut engine = build_engine(&config)?;

    // Attach a session: explicit request first, then recovery order.
    if let Some(wanted) = &cli.session {
        match engine.load_session(wanted)? {
            Some(id) => eprintln!("session {}", short_id(&id)),
            None => anyhow::bail!("no session matches '{wanted}'"),
        }
    } else {
        engine.attach_startup_session()?;
    }

    // One-shot prompt mode.
    if let Some(message) = &cli.message {
        let sink = PrintSink;
        return match engine.handle_message(message, &sink).await {
            Ok(()) => Ok(()),
            Err(e) => Err(anyhow::anyhow!(e)),
        };
    }

    repl(&mut engine, &config).await
}

// ── Engine wiring ─────────────────────────────────────────────────────────────

fn build_engine(config: &Config) -> anyhow::Result<Engine> {
    let store = SessionStore::open(Path::new(&config.store.state_dir))
        .context("opening the session store")?;

    let mut registry = ToolRegistry::new();
    registry.register(FileManagerTool::new(config.tools.ignored_paths.clone()));
    registry.register(CodeRunnerTool::new().context("creating the code runner scratch dir")?);
    registry.register(CommandTool::from_config(&config.tools));

    Ok(Engine::new(
        store,
        build_provider(config)?,
        Arc::new(registry),
        ContextPipeline::new(config.context.clone()),
        config.agent.clone(),
    ))
}

fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match config.model.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider)),
        "openai" => {
            let api_key = config.model.api_key.clone().or_else(|| {
                config
                    .model
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            });
            let base_url = config
                .model
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string());
            // Local endpoints (Ollama, vLLM) run without credentials.
            let auth = if api_key.is_some() {
                AuthStyle::Bearer
            } else {
                AuthStyle::None
            };
            Ok(Arc::new(OpenAICompatProvider::new(
                config.model.name.clone(),
                api_key,
                &base_url,
                config.model.max_tokens,
                config.model.temperature,
                auth,
            )))
        }
        other => anyhow::bail!("unknown model provider '{other}' (expected openai or mock)"),
    }
}

fn print_sessions(config: &Config, limit: usize) -> anyhow::Result<()> {
    let store = SessionStore::open(Path::new(&config.store.state_dir))?;
    for entry in store.list_sessions()?.into_iter().take(limit) {
        println!(
            "{}  {}  {:>4} turns  {}",
            short_id(&entry.id),
            entry.meta.updated.format("%Y-%m-%d %H:%M"),
            entry.meta.message_count,
            entry.meta.title,
        );
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

// ── Interactive loop ──────────────────────────────────────────────────────────

async fn repl(engine: &mut Engine, config: &Config) -> anyhow::Result<()> {
    println!(
        "bytecraft {} — model {} — /help for commands",
        env!("CARGO_PKG_VERSION"),
        engine.model_name()
    );

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            return Ok(()); // EOF is a clean shutdown
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(rest) = input.strip_prefix('/') {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let command = parts.next().unwrap_or_default();
            let arg = parts.next().unwrap_or("").trim();
            match command {
                "exit" | "quit" => return Ok(()),
                "help" => print_help(),
                "new" | "clear" => {
                    let id = engine.new_session()?;
                    println!("new session {}", short_id(&id));
                }
                "model" => {
                    if arg.is_empty() {
                        println!("model: {}", engine.model_name());
                    } else {
                        let mut cfg = config.clone();
                        cfg.model.name = arg.to_string();
                        engine.set_model(build_provider(&cfg)?);
                        println!("model: {arg}");
                    }
                }
                "load" => match engine.load_session(arg)? {
                    Some(id) => println!("loaded session {}", short_id(&id)),
                    None => println!("no session matches '{arg}'"),
                },
                other => println!("unknown command: /{other} (try /help)"),
            }
            continue;
        }

        let sink = PrintSink;
        match engine.handle_message(input, &sink).await {
            Ok(()) => println!(),
            Err(EngineError::Model(e)) => eprintln!("\nmodel error: {e}"),
            // A fatal error aborts this message only; the session stays usable.
            Err(e) => eprintln!("\nerror: {e}"),
        }
    }
}

fn print_help() {
    println!(
        "/new            start a fresh session\n\
         /model <alias>  switch model\n\
         /load <id>      load a session by id, prefix, or title fragment\n\
         /clear          clear context (starts a fresh session)\n\
         /help           this text\n\
         /exit           quit"
    );
}

// ── Output sink ───────────────────────────────────────────────────────────────

/// Streams tokens straight to stdout; tool activity goes to stderr so piped
/// output stays clean.
struct PrintSink;

impl EventSink for PrintSink {
    fn on_token(&self, delta: &str) {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }
    fn on_tool_call(&self, name: &str, args: &serde_json::Value) {
        eprintln!("[tool] {name} {args}");
    }
    fn on_tool_result(&self, name: &str, result: &str) {
        let preview: String = result.chars().take(200).collect();
        eprintln!("[tool] {name} → {preview}");
    }
    fn on_complete(&self, _final_text: &str) {
        println!();
    }
    fn on_error(&self, err: &EngineError) {
        eprintln!("[error] {err}");
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Silent by default; `--verbose` enables debug, and BYTECRAFT_LOG / RUST_LOG
/// take precedence when set.
fn init_logging(verbose: bool) {
    let filter = std::env::var("BYTECRAFT_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| if verbose { "debug".into() } else { "off".into() });
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

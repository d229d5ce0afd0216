// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod app;
mod cli;

use std::io::{IsTerminal, Read, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use app::AppContext;
use asimi_config::{discover_provider, Config};
use asimi_core::{slug, Session, SessionEvent, SessionOptions};
use asimi_model::{Auth, ConfigAuth, ModelClient};
use asimi_tools::builtin_registry;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = asimi_config::load(cli.config.as_deref())?;
    apply_provider_discovery(&mut config);

    match cli.command {
        Commands::Ask { prompt, resume } => run_ask(config, prompt, resume).await,
        Commands::Sessions { limit } => run_sessions(config, limit),
        Commands::Cleanup => run_cleanup(config),
        Commands::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    // The interactive front-end owns the terminal; keep stderr quiet unless
    // asked for.
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// When no provider was configured explicitly, pick one from the API keys
/// present in the environment.
fn apply_provider_discovery(config: &mut Config) {
    let default = asimi_config::LlmConfig::default();
    let untouched = config.llm.provider == default.provider && config.llm.model == default.model;
    if untouched && std::env::var("OPENAI_API_KEY").is_err() {
        let provider = discover_provider(|key| std::env::var(key).is_ok());
        config.llm.provider = provider.to_string();
        config.llm.model = match provider {
            "anthropic" => "claude-sonnet-4-5".to_string(),
            "google" => "gemini-2.0-flash".to_string(),
            "ollama" => "qwen2.5-coder".to_string(),
            _ => config.llm.model.clone(),
        };
    }
}

async fn run_ask(
    config: Config,
    prompt: Vec<String>,
    resume: Option<String>,
) -> anyhow::Result<()> {
    let prompt = read_prompt(prompt)?;
    let workdir = std::env::current_dir().context("resolving working directory")?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = spawn_event_printer(events_rx);

    let ctx = AppContext::build(&config, &workdir, events_tx.clone()).await?;

    let auth: Arc<dyn Auth> = Arc::new(ConfigAuth::from_config(&config.llm));
    let client: Arc<dyn ModelClient> =
        Arc::from(asimi_model::from_config(&config.llm, Arc::clone(&auth))?);
    let registry = Arc::new(builtin_registry(
        workdir.clone(),
        Arc::clone(&ctx.shell) as Arc<dyn asimi_shell::ShellRunner>,
    ));

    let mut session = Session::new(
        SessionOptions {
            provider: config.llm.provider.clone(),
            model: config.llm.model.clone(),
            working_dir: workdir,
            max_turns: config.llm.max_turns,
            disable_sanitization: config.llm.disable_sanitization,
            ..SessionOptions::default()
        },
        client,
        auth,
        registry,
        events_tx,
    );

    if let Some(id) = resume {
        let store = ctx
            .store
            .as_ref()
            .context("session persistence is disabled; cannot resume")?;
        let snap = store
            .load_session(&id)?
            .with_context(|| format!("no saved session {id}"))?;
        session.load_snapshot(snap);
    }

    // Ctrl-C cancels cooperatively: in-flight tools get synthetic abort
    // responses and the partial answer is kept.
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        canceller.cancel();
    });

    let result = session.ask_stream(&prompt, cancel).await;

    if config.session.auto_save {
        if let Some(handle) = &ctx.store_handle {
            handle.save_session(session.snapshot());
        }
        if let Some(store) = &ctx.store {
            let _ = store.add_prompt(&session.project_slug, &session.branch_slug, &prompt);
        }
    }

    ctx.shutdown().await;
    drop(session);
    let _ = printer.await;
    result
}

fn run_sessions(config: Config, limit: u32) -> anyhow::Result<()> {
    let workdir = std::env::current_dir()?;
    let store = asimi_store::SessionStore::open(&asimi_store::default_db_path()?)?;
    let limit = if limit == 0 { config.session.list_limit } else { limit };
    let entries = store.list_sessions(
        &slug::project_slug(&workdir),
        &slug::branch_slug(&workdir),
        limit,
    )?;
    if entries.is_empty() {
        println!("no saved sessions for this project/branch");
        return Ok(());
    }
    for e in entries {
        println!(
            "{}  {}  {:>4} msgs  {}/{}  {}",
            e.id,
            e.last_updated.format("%Y-%m-%d %H:%M"),
            e.message_count,
            e.provider,
            e.model,
            e.first_prompt
        );
    }
    Ok(())
}

fn run_cleanup(config: Config) -> anyhow::Result<()> {
    let workdir = std::env::current_dir()?;
    let store = asimi_store::SessionStore::open(&asimi_store::default_db_path()?)?;
    let deleted = store.cleanup_old_sessions(
        &slug::project_slug(&workdir),
        &slug::branch_slug(&workdir),
        config.session.max_sessions,
        config.session.max_age_days,
    )?;
    println!("deleted {deleted} session(s)");
    Ok(())
}

fn read_prompt(words: Vec<String>) -> anyhow::Result<String> {
    if !words.is_empty() {
        return Ok(words.join(" "));
    }
    if std::io::stdin().is_terminal() {
        anyhow::bail!("no prompt given; pass it as arguments or pipe it on stdin");
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    let prompt = buf.trim().to_string();
    if prompt.is_empty() {
        anyhow::bail!("empty prompt on stdin");
    }
    Ok(prompt)
}

/// Render session events for headless use: answer text to stdout, tool and
/// lifecycle notices to stderr.
fn spawn_event_printer(
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut out = std::io::stdout();
        while let Some(ev) = rx.recv().await {
            match ev {
                SessionEvent::StreamChunk(chunk) => {
                    let _ = out.write_all(chunk.as_bytes());
                    let _ = out.flush();
                }
                SessionEvent::StreamComplete => {
                    let _ = out.write_all(b"\n");
                    let _ = out.flush();
                }
                SessionEvent::StreamInterrupted { .. } => {
                    eprintln!("\n[interrupted]");
                }
                SessionEvent::StreamError { error } => {
                    eprintln!("\nerror: {error}");
                }
                SessionEvent::StreamMaxTurnsExceeded { max } => {
                    eprintln!("\n[stopped after {max} turns]");
                }
                SessionEvent::StreamMaxTokensReached { .. } => {
                    eprintln!("\n[response truncated by the model's output limit]");
                }
                SessionEvent::ToolCallExecuting { tool_name, .. } => {
                    eprintln!("⚙ {tool_name}");
                }
                SessionEvent::ToolCallError { tool_name, error, .. } => {
                    eprintln!("⚠ {tool_name}: {error}");
                }
                SessionEvent::Warning(text) => {
                    eprintln!("warning: {text}");
                }
                SessionEvent::ContextCompacted { tokens_before, tokens_after } => {
                    eprintln!("[context compacted: {tokens_before} → {tokens_after} tokens]");
                }
                _ => {}
            }
        }
    })
}

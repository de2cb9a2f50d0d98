//! parley - command-line chat client

mod commands;
mod config;
mod render;

use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parley_api::{HttpBackend, SearchHit};
use parley_engine::{Engine, EngineEvent, ExchangeOutcome, HistoryLoad};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use commands::ChatCommand;
use render::ReplyPrinter;

/// parley - chat with the assistant backend from the terminal
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// API root of the backend (overrides the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Wait for complete replies instead of streaming them
    #[arg(long, global = true)]
    no_stream: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sessions, newest first
    Sessions,
    /// Print the stored history of a session
    History {
        session_id: String,
        /// How many pages to load, newest first
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Send a single query and print the reply
    Ask {
        /// Continue this session instead of starting a new one
        #[arg(long)]
        session: Option<String>,
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Rename a session
    Rename { session_id: String, name: String },
    /// Delete a session
    Delete { session_id: String },
    /// Search all messages
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Interactive chat (default)
    Chat {
        /// Open this session instead of the most recent one
        #[arg(long)]
        session: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "parley=debug,parley_api=debug,parley_engine=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let path = config::Config::init().context("Error creating config")?;
        println!("Config file at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load();
    let mut backend_config = cfg.backend_config();
    if let Some(base_url) = args.base_url {
        backend_config.base_url = base_url;
    }
    let mut engine_config = cfg.engine_config();
    if args.no_stream {
        engine_config.stream = false;
    }

    let backend = Arc::new(HttpBackend::new(backend_config)?);
    let engine = Engine::new(backend.clone(), backend, engine_config);

    match args.command.unwrap_or(Command::Chat { session: None }) {
        Command::Sessions => {
            engine.refresh_sessions().await?;
            let active = engine.active_session_id();
            render::print_sessions(&mut io::stdout(), &engine.sessions(), active.as_deref())?;
        }
        Command::History { session_id, pages } => {
            show_history(&engine, &session_id, pages).await?;
        }
        Command::Ask { session, query } => {
            ask(&engine, session.as_deref(), &query.join(" ")).await?;
        }
        Command::Rename { session_id, name } => {
            engine.refresh_sessions().await?;
            engine.rename_session(&session_id, &name).await?;
            println!("Renamed {} to {:?}", session_id, name.trim());
        }
        Command::Delete { session_id } => {
            engine.delete_session(&session_id).await?;
            println!("Deleted {}", session_id);
        }
        Command::Search { query } => {
            let hits = engine.search(&query.join(" ")).await?;
            render::print_hits(&mut io::stdout(), &hits)?;
        }
        Command::Chat { session } => {
            run_chat(&engine, session.as_deref()).await?;
        }
    }
    Ok(())
}

async fn show_history(engine: &Engine, session_id: &str, pages: usize) -> anyhow::Result<()> {
    engine.refresh_sessions().await?;
    let mut load = engine.select_session(session_id).await?;
    for _ in 1..pages {
        if !matches!(load, HistoryLoad::Loaded { exhausted: false, .. }) {
            break;
        }
        load = engine.load_older().await;
    }
    if load == HistoryLoad::Failed {
        anyhow::bail!("Failed to load history for {}", session_id);
    }

    let mut out = io::stdout();
    for message in engine.messages() {
        render::print_message(&mut out, &message)?;
    }
    Ok(())
}

async fn ask(engine: &Engine, session: Option<&str>, query: &str) -> anyhow::Result<()> {
    match session {
        Some(session_id) => {
            engine.refresh_sessions().await?;
            engine.select_session(session_id).await?;
        }
        None => engine.new_session(),
    }

    let mut events = engine.subscribe();
    let mut printer = ReplyPrinter::new();
    let outcome = drive(engine.send(query), &mut events, &mut printer).await?;

    if let ExchangeOutcome::Failed { failure, .. } = outcome {
        anyhow::bail!("{}", failure);
    }
    if let Some(session_id) = engine.active_session_id() {
        eprintln!("session: {}", session_id);
    }
    Ok(())
}

/// Await an exchange while printing its events as they arrive
async fn drive(
    exchange: impl Future<Output = parley_engine::Result<ExchangeOutcome>>,
    events: &mut broadcast::Receiver<EngineEvent>,
    printer: &mut ReplyPrinter,
) -> anyhow::Result<ExchangeOutcome> {
    let mut out = io::stdout();
    tokio::pin!(exchange);
    loop {
        tokio::select! {
            outcome = &mut exchange => {
                while let Ok(event) = events.try_recv() {
                    printer.handle(&mut out, &event)?;
                }
                return Ok(outcome?);
            }
            event = events.recv() => match event {
                Ok(event) => printer.handle(&mut out, &event)?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Output skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Ok((&mut exchange).await?);
                }
            }
        }
    }
}

/// Id of the reply `/retry` targets by default: the last failed reply, else
/// the last reply
fn default_retry_target(engine: &Engine) -> Option<String> {
    let messages = engine.messages();
    messages
        .iter()
        .rev()
        .find(|m| m.is_assistant() && m.is_error)
        .or_else(|| messages.iter().rev().find(|m| m.is_assistant()))
        .map(|m| m.id.clone())
}

fn print_timeline(engine: &Engine) -> io::Result<()> {
    let mut out = io::stdout();
    for message in engine.messages() {
        render::print_message(&mut out, &message)?;
    }
    Ok(())
}

fn print_banner(engine: &Engine) {
    match engine.active_session() {
        Some(session) => eprintln!("parley: {} ({})", session.display_name(), session.id),
        None => eprintln!("parley: new conversation"),
    }
}

async fn run_chat(engine: &Engine, session: Option<&str>) -> anyhow::Result<()> {
    if let Err(e) = engine.refresh_sessions().await {
        eprintln!("Could not load sessions: {}", e);
    }
    if let Some(session_id) = session {
        engine.select_session(session_id).await?;
    }

    if std::io::IsTerminal::is_terminal(&io::stderr()) {
        print_banner(engine);
        eprintln!("Type /help for commands.\n");
    }
    print_timeline(engine)?;

    let mut events = engine.subscribe();
    let mut printer = ReplyPrinter::new();
    let mut hits: Vec<SearchHit> = Vec::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        // Events from earlier commands are already reflected in the output
        events = events.resubscribe();

        let Some(command) = commands::parse(input) else {
            match drive(engine.send(input), &mut events, &mut printer).await {
                Ok(_) => {}
                Err(e) => eprintln!("Error: {}", e),
            }
            continue;
        };

        match command {
            ChatCommand::Quit => break,
            ChatCommand::Help => println!("{}", commands::help_message()),
            ChatCommand::Usage(usage) => println!("Usage: {}", usage),
            ChatCommand::Unknown(cmd) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
            ChatCommand::Retry(target) => {
                let Some(target) = target.or_else(|| default_retry_target(engine)) else {
                    println!("Nothing to retry.");
                    continue;
                };
                if let Err(e) = drive(engine.retry(&target), &mut events, &mut printer).await {
                    eprintln!("Error: {}", e);
                }
            }
            ChatCommand::More => match engine.load_older().await {
                HistoryLoad::Loaded { count, exhausted } => {
                    let mut out = io::stdout();
                    for message in engine.messages().iter().take(count) {
                        render::print_message(&mut out, message)?;
                    }
                    let suffix = if exhausted { " (start of conversation)" } else { "" };
                    println!("Loaded {} older messages{}", count, suffix);
                }
                HistoryLoad::Exhausted => println!("Start of conversation."),
                HistoryLoad::InProgress => println!("Still loading."),
                HistoryLoad::NoSession => println!("This conversation has no stored history."),
                HistoryLoad::Failed => println!("Could not load history; try /more again."),
                HistoryLoad::Discarded => {}
            },
            ChatCommand::New => {
                engine.new_session();
                println!("Started a new conversation.");
            }
            ChatCommand::Switch(session_id) => match engine.select_session(&session_id).await {
                Ok(_) => {
                    print_banner(engine);
                    print_timeline(engine)?;
                }
                Err(e) => eprintln!("Error: {}", e),
            },
            ChatCommand::Sessions => {
                if let Err(e) = engine.refresh_sessions().await {
                    eprintln!("Error: {}", e);
                }
                let active = engine.active_session_id();
                render::print_sessions(&mut io::stdout(), &engine.sessions(), active.as_deref())?;
            }
            ChatCommand::Search(query) => match engine.search(&query).await {
                Ok(found) => {
                    hits = found;
                    render::print_hits(&mut io::stdout(), &hits)?;
                }
                Err(e) => eprintln!("Error: {}", e),
            },
            ChatCommand::Open(n) => {
                let Some(hit) = hits.get(n - 1) else {
                    println!("No hit {}; run /search first.", n);
                    continue;
                };
                match engine.open_hit(hit).await {
                    Ok(true) => {
                        print_banner(engine);
                        let focused = hit.message_id.as_deref().and_then(|id| engine.message(id));
                        if let Some(message) = focused {
                            render::print_message(&mut io::stdout(), &message)?;
                        }
                    }
                    Ok(false) => println!("Opened the session, but the message is not in recent history."),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            ChatCommand::Rename(name) => match engine.active_session_id() {
                Some(session_id) => match engine.rename_session(&session_id, &name).await {
                    Ok(()) => println!("Renamed to {:?}", name),
                    Err(e) => eprintln!("Error: {}", e),
                },
                None => println!("Send a message first; new conversations get a name from the server."),
            },
        }
    }

    Ok(())
}

// berthwatch/src/main.rs
//
// Berthwatch — vessel delay-risk publisher and CRITICAL alert monitor
//
// Four subcommands:
//   publish  — load scoring output, dedup against the store, append new rows
//   monitor  — periodic CRITICAL onset alerts to the Telegram chat
//   bot      — monitor + operator Q&A over Telegram (Gemini-backed)
//   ask      — one-shot operator question against the live store
//
// Usage:
//   berthwatch publish --input predictions.csv
//   berthwatch publish --input predictions.csv --reset
//   berthwatch --store file --store-file port.csv monitor
//   berthwatch bot
//   berthwatch ask "which vessels are critical right now?"

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod chat;
mod clients;
mod config;
mod engine;
mod error;
mod ingest;
mod monitor;
mod pipeline;
mod records;
mod state;
#[cfg(test)]
mod testing;

use clients::{file_store::CsvFileStore, gemini::GeminiClient, sheets::SheetsStore, telegram::TelegramClient};
use clients::{Assistant, RecordStore};
use config::{Config, StoreBackend};
use error::PublishError;
use pipeline::{PublishPipeline, PublishReport};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "berthwatch",
    about   = "Vessel delay-risk publisher and CRITICAL alert monitor",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, global = true, env = "BERTHWATCH_STORE", help = "Store backend: sheets | file")]
    store: Option<StoreBackend>,

    #[arg(long, global = true, env = "STORE_FILE", help = "CSV path for the file store")]
    store_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish new predictions from a scoring output CSV
    Publish {
        #[arg(long, short)]
        input: PathBuf,

        #[arg(long, help = "Clear the store and rewrite the header first")]
        reset: bool,
    },
    /// Run the CRITICAL alert loop
    Monitor,
    /// Run the alert loop and answer operator questions on Telegram
    Bot,
    /// Ask one question about the current port dataset
    Ask {
        question: Vec<String>,
    },
}

// ── Component wiring ──────────────────────────────────────────────────────────

fn build_store(cfg: &Config) -> Result<Arc<dyn RecordStore>> {
    let store = cfg.store()?;
    Ok(match store.backend {
        StoreBackend::File => Arc::new(CsvFileStore::new(&store.file)),
        StoreBackend::Sheets => Arc::new(SheetsStore::new(
            store.require_spreadsheet_id()?,
            &store.sheet_name,
            store.sheet_gid,
            store.require_access_token()?,
            cfg.call_timeout()?,
        )?),
    })
}

fn build_assistant(cfg: &Config) -> Result<Arc<dyn Assistant>> {
    let assistant = cfg.assistant()?;
    Ok(Arc::new(GeminiClient::new(
        &assistant.api_base,
        &assistant.model,
        assistant.require_api_key()?,
        cfg.call_timeout()?,
    )?))
}

fn build_monitor(cfg: &Config, store: Arc<dyn RecordStore>) -> Result<monitor::Monitor> {
    let notifier = cfg.notifier()?;
    let timeout  = cfg.call_timeout()?;
    let chat_id  = notifier.require_chat_id()?;
    let telegram = TelegramClient::new(&notifier.api_base, notifier.require_bot_token()?, timeout)?;
    Ok(monitor::Monitor::new(store, Arc::new(telegram), chat_id, cfg.monitor()?, timeout))
}

fn build_chat(cfg: &Config, store: Arc<dyn RecordStore>) -> Result<(Arc<chat::ChatHandler>, Arc<TelegramClient>)> {
    let assistant = build_assistant(cfg)?;
    let notifier  = cfg.notifier()?;
    let timeout   = cfg.call_timeout()?;
    // Long poll holds the request open for poll_secs; the client timeout must outlast it.
    let poll_timeout = timeout + std::time::Duration::from_secs(notifier.poll_secs);
    let telegram = TelegramClient::new(&notifier.api_base, notifier.require_bot_token()?, poll_timeout)?;
    let handler  = chat::ChatHandler::new(store, assistant, timeout, cfg.assistant()?.max_snapshot_rows);
    Ok((Arc::new(handler), Arc::new(telegram)))
}

fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl+C, running until killed");
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

// ── Subcommands ───────────────────────────────────────────────────────────────

async fn run_publish(cfg: &Config, input: PathBuf, reset: bool) -> Result<()> {
    let publish  = cfg.publish()?;
    let store    = build_store(cfg)?;
    let loaded   = ingest::load_path(&input, &publish.cuts).await?;
    let pipeline = PublishPipeline::new(store, publish.clone(), cfg.call_timeout()?);

    println!("  Mode: \x1b[96mPUBLISH\x1b[0m  |  {}", input.display());
    if reset {
        pipeline.reset().await?;
        println!("  \x1b[93mStore reset\x1b[0m");
    }

    match pipeline.run(loaded.records, loaded.malformed.len()).await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e @ PublishError::Partial { .. }) => {
            println!("\n\x1b[91;1m✗ partial publish: {} rows committed before failure\x1b[0m", e.published());
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_monitor(cfg: &Config) -> Result<()> {
    let store   = build_store(cfg)?;
    let monitor = build_monitor(cfg, store)?;
    let every   = cfg.monitor()?;
    println!("  Mode: \x1b[91;1mMONITOR\x1b[0m  |  every {}s, predicate {}", every.interval().as_secs(), every.criticality);
    println!("  Press Ctrl+C to stop.\n");
    monitor.run(shutdown_signal()).await?;
    Ok(())
}

async fn run_bot(cfg: &Config) -> Result<()> {
    let store    = build_store(cfg)?;
    let shutdown = shutdown_signal();
    let mut tasks = Vec::new();

    // Each component checks its own configuration; one missing does not stop the other.
    match build_monitor(cfg, Arc::clone(&store)) {
        Ok(m)  => tasks.push(tokio::spawn({
            let rx = shutdown.clone();
            async move {
                if let Err(e) = m.run(rx).await { error!(error = %e, "alert monitor not started"); }
            }
        })),
        Err(e) => error!(error = %e, "alert monitor disabled"),
    }

    match build_chat(cfg, Arc::clone(&store)) {
        Ok((handler, telegram)) => tasks.push(tokio::spawn(chat::serve(
            handler,
            telegram.clone(),
            telegram,
            cfg.notifier()?.poll_secs,
            shutdown.clone(),
        ))),
        Err(e) => error!(error = %e, "chat handler disabled"),
    }

    if tasks.is_empty() { bail!("neither the alert monitor nor the chat handler could start"); }

    println!("  Mode: \x1b[93mBOT\x1b[0m  |  {} component(s) running", tasks.len());
    println!("  Press Ctrl+C to stop.\n");
    for t in tasks {
        if let Err(e) = t.await { error!(error = %e, "component task failed"); }
    }
    Ok(())
}

async fn run_ask(cfg: &Config, question: String) -> Result<()> {
    let store   = build_store(cfg)?;
    let handler = chat::ChatHandler::new(store, build_assistant(cfg)?, cfg.call_timeout()?, cfg.assistant()?.max_snapshot_rows);
    if let Some(reply) = handler.handle("cli", &question).await {
        println!("{reply}");
    }
    Ok(())
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner() {
    println!("\x1b[1m");
    println!("  ┏┓ ┏━╸┏━┓╺┳╸╻ ╻╻ ╻┏━┓╺┳╸┏━╸╻ ╻");
    println!("  ┣┻┓┣╸ ┣┳┛ ┃ ┣━┫┃╻┃┣━┫ ┃ ┃  ┣━┫");
    println!("  ┗━┛┗━╸╹┗╸ ╹ ╹ ╹┗┻┛╹ ╹ ╹ ┗━╸╹ ╹");
    println!("\x1b[0m");
    println!("  \x1b[90mVessel delay-risk publishing and CRITICAL alerting\x1b[0m\n");
}

fn print_report(r: &PublishReport) {
    let color = if r.published > 0 { "\x1b[92;1m" } else { "\x1b[90m" };
    let reset = "\x1b[0m";
    println!("\n{}── publish  candidates={}  new={}  selected={}  published={}  malformed={} ──{}",
        color, r.candidates, r.new, r.selected, r.published, r.skipped_malformed, reset);
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("berthwatch=info".parse()?))
        .compact().init();

    let mut cfg = Config::from_env();
    let cli     = Cli::parse();
    cfg.override_store(cli.store, cli.store_file);
    for (section, e) in cfg.section_errors() {
        warn!(section, error = %e, "configuration section invalid, components using it will not start");
    }

    print_banner();

    match cli.command {
        Command::Publish { input, reset } => run_publish(&cfg, input, reset).await,
        Command::Monitor                  => run_monitor(&cfg).await,
        Command::Bot                      => run_bot(&cfg).await,
        Command::Ask { question }         => {
            let question = question.join(" ");
            if question.trim().is_empty() { bail!("ask needs a question"); }
            run_ask(&cfg, question).await
        }
    }
}

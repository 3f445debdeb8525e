//! mailtap - extract tabular files from a Gmail mailbox
//!
//! Singer-style tap binary: reads a JSON config, optionally a state and
//! catalog file, and writes SCHEMA / RECORD / STATE messages to stdout.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use mailtap::{
    GmailAuth, GmailClient, GmailCredentials, JsonLinesSink, State, TapConfig, do_discover,
    do_sync,
};

#[derive(Parser)]
#[command(name = "mailtap", about = "Extract tabular files from a Gmail mailbox")]
struct Args {
    /// Config file
    #[arg(short, long)]
    config: PathBuf,

    /// State file
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Catalog file with externally supplied schemas
    #[arg(short = 'p', long, visible_alias = "catalog")]
    properties: Option<PathBuf>,

    /// Discover schemas for the configured tables instead of syncing
    #[arg(short, long)]
    discover: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Run failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = TapConfig::load(&args.config)?;
    let mut state = State::load(args.state.as_deref())?;
    let catalog = args
        .properties
        .as_deref()
        .map(|path| {
            config::load_json_file::<serde_json::Value>(path)
                .with_context(|| format!("Failed to load catalog: {}", path.display()))
        })
        .transpose()?;

    let credentials = GmailCredentials::load()?;
    let auth = match &config.token_base64 {
        Some(token) => GmailAuth::from_token_base64(credentials, token)?,
        None => GmailAuth::from_token_file(credentials)?,
    };
    let client = GmailClient::new(auth);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut sink = JsonLinesSink::new(&mut out);

    if args.discover {
        do_discover(&config, &client, &mut sink)?;
    } else {
        do_sync(&config, &client, &mut state, &mut sink, catalog.as_ref())?;
    }

    drop(sink);
    out.flush().context("Failed to flush output")?;
    Ok(())
}

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

mod cli;

use chatpool_client::{ChatRequest, Client};
use chatpool_common::{AccountCredentials, ClientConfig};

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("chatpool failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let raw = std::fs::read_to_string(&cli.accounts)?;
    let accounts: Vec<AccountCredentials> = serde_json::from_str(&raw)?;
    if accounts.is_empty() {
        return Err(format!("no accounts in {}", cli.accounts).into());
    }
    info!(accounts = accounts.len(), "accounts loaded");

    let mut config = ClientConfig::with_accounts(accounts);
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    config.stats_path = cli.stats.map(PathBuf::from);

    let client = Client::connect(config).await?;

    let mut request = ChatRequest::new(&cli.message).with_attachments(cli.attachments.clone());
    if let Some(model) = cli.model {
        request = request.with_model(model);
    }

    let mut stream = client.chat_stream(request);
    let mut stdout = std::io::stdout();
    let mut failed = false;
    while let Some(item) = stream.next_chunk().await {
        match item {
            Ok(chunk) => {
                stdout.write_all(chunk.as_bytes())?;
                stdout.flush()?;
            }
            Err(err) => {
                eprintln!("\nchat failed: {err}");
                failed = true;
            }
        }
    }
    stdout.write_all(b"\n")?;

    if cli.report {
        let report = client.performance_report().await;
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }

    client.shutdown().await;
    if failed {
        return Err("chat did not complete".into());
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chatpool=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

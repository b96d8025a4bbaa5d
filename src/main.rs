use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeep::admission::{Admission, AdmissionResponse};
use gatekeep::config::GatekeepConfig;
use gatekeep::ratelimit::RateLimiter;

/// Replay requests through the admission limiter.
///
/// Reads one request per line from stdin, `<remote_addr> [token]`, and prints
/// `<status> <body>` for each.
#[derive(Debug, Parser)]
#[command(name = "gatekeep", version, about)]
struct Args {
    /// YAML configuration file; GATEKEEP__* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing; logs go to stderr so stdout carries only decisions
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Gatekeep");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GatekeepConfig::load(args.config.as_deref())?;
    let limiter_config = config.limiter_config()?;
    let sweep_interval = config.sweep_interval()?;
    info!(
        ip_limit = limiter_config.ip.requests_per_window(),
        token_header = ?limiter_config.token_header(),
        sweep_interval_ms = sweep_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let store = config.store.open().await?;
    let limiter = RateLimiter::new(store, limiter_config)
        .with_sweep_interval(sweep_interval)
        .start();
    let admission = Admission::new(limiter.clone());

    tokio::select! {
        result = replay(&admission) => result?,
        signal = termination() => {
            let signal = signal?;
            info!(signal, "Shutting down");
        }
    }

    limiter.stop_sweep();
    info!("Gatekeep stopped");
    Ok(())
}

async fn replay(admission: &Admission) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());

    while let Some(line) = lines.next().await {
        let line = line?;
        let mut parts = line.split_whitespace();
        let Some(remote_addr) = parts.next() else {
            continue;
        };

        let headers: Vec<(&str, &str)> = match (admission.limiter().config().token_header(), parts.next()) {
            (Some(header), Some(token)) => vec![(header, token)],
            _ => Vec::new(),
        };
        if parts.next().is_some() {
            warn!(line = %line, "Ignoring trailing fields");
        }

        let response = admission.evaluate(remote_addr, headers).await;
        print_response(&response);
    }

    Ok(())
}

fn print_response(response: &AdmissionResponse) {
    match &response.body {
        Some(body) => println!("{} {}", response.status, body),
        None => println!("{}", response.status),
    }
}

/// Resolve with the name of the first termination signal received.
async fn termination() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|()| "Ctrl+C")
    }
}

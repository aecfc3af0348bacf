// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Context, Result};
use cib::Cib;
use clap::{Parser, Subcommand};
use sdx_common::log::{init_file_logger, init_term_logger};
use sdx_common::thread::ManagedThread;
use slog::{error, info, Logger};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::Duration;
use xctrl::{Exchange, ExchangeRuntime, FederationConfig};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one exchange of a federation.
    Run(RunArgs),
    /// Parse and validate a federation configuration, then exit.
    Check {
        /// Federation configuration file.
        config: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Federation configuration file.
    #[arg(short, long, env = "XCTRL_CONFIG")]
    config: PathBuf,

    /// Id of the exchange to run.
    #[arg(short, long, env = "XCTRL_SDX_ID")]
    sdx_id: u32,

    /// Keep the cib in a sled database at this path instead of in memory.
    #[arg(long)]
    cib_path: Option<String>,

    /// Write bunyan formatted logs to this file instead of the terminal.
    #[arg(long)]
    log_file: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Check { config } => {
            let c = FederationConfig::from_file(&config).with_context(|| {
                format!("loading {}", config.display())
            })?;
            println!(
                "{}: {} exchanges, {} participants",
                config.display(),
                c.exchanges.len(),
                c.participants.len()
            );
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    let log = match &args.log_file {
        Some(path) => init_file_logger(path)
            .with_context(|| format!("opening log file {path}"))?,
        None => init_term_logger(),
    };

    let config = FederationConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let cib = match &args.cib_path {
        Some(path) => Cib::persistent(args.sdx_id, path, log.clone())
            .with_context(|| format!("opening cib at {path}"))?,
        None => Cib::in_memory(args.sdx_id, log.clone()),
    };

    let exchange = Exchange::new(&config, args.sdx_id, cib, log.clone())
        .context("building exchange")?;
    let runtime = ExchangeRuntime::start(exchange, &config, log.clone())
        .context("starting exchange")?;
    let _watcher = watch_supersets(&runtime, log.clone())?;

    let (stop_tx, stop_rx) = channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("setting termination handler")?;

    info!(log, "exchange {} running", args.sdx_id);
    stop_rx
        .recv()
        .map_err(|_| anyhow!("termination handler dropped"))?;
    info!(log, "terminating");
    runtime.shutdown();
    Ok(())
}

/// Log every superset change. Participant controllers consume the same
/// feed to reprogram their match rules.
fn watch_supersets(
    runtime: &ExchangeRuntime,
    log: Logger,
) -> Result<ManagedThread> {
    let changes = runtime.watch("xctrld")?;
    let t = ManagedThread::spawn("xctrld-supersets", move |shutdown| {
        while !shutdown.load(Ordering::Acquire) {
            match changes.recv_timeout(Duration::from_millis(100)) {
                Ok(change) => match serde_json::to_string(&change) {
                    Ok(json) => {
                        info!(log, "superset change"; "change" => json)
                    }
                    Err(e) => error!(log, "superset change: {e}"),
                },
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })?;
    Ok(t)
}

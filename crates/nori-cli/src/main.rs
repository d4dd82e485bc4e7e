//! nori - Celery 互換の AMQP タスク worker
//!
//! ```text
//! nori run --config worker.yaml --name tasks
//! nori admin declare-queue tasks
//! nori admin bind --exchange nori --queue tasks --routing-key tasks
//! ```

mod admin;
mod management;
mod tasks;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use nori_core::config::DEFAULT_BROKER_URL;
use nori_core::impls::AmqpTransport;
use nori_core::{WorkerBuilder, WorkerConfig, WorkerState};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "nori", version, about = "Celery-compatible AMQP task worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// worker を起動し、Ctrl-C まで consume する
    Run(RunArgs),
    /// broker の exchange / queue / binding を操作する
    Admin {
        #[arg(long, env = "NORI_BROKER_URL", default_value = DEFAULT_BROKER_URL)]
        broker_url: String,
        #[command(subcommand)]
        command: admin::AdminCommand,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// YAML の設定ファイル。フラグは設定ファイルより優先される
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    queue: Option<String>,
    #[arg(long, env = "NORI_BROKER_URL")]
    broker_url: Option<String>,
    #[arg(long)]
    exchange: Option<String>,
    #[arg(long)]
    exchange_kind: Option<String>,
    /// setup 失敗後の待ち時間（秒）
    #[arg(long)]
    backoff: Option<u64>,
    #[arg(long)]
    management_addr: Option<SocketAddr>,
}

impl RunArgs {
    fn load_config(self) -> anyhow::Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::from_file(path)
                .with_context(|| format!("cannot load {}", path.display()))?,
            None => WorkerConfig::default(),
        };

        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(queue) = self.queue {
            config.queue = Some(queue);
        }
        if let Some(broker_url) = self.broker_url {
            config.broker_url = broker_url;
        }
        if let Some(exchange) = self.exchange {
            config.exchange.name = exchange;
        }
        if let Some(kind) = self.exchange_kind {
            config.exchange.kind = kind;
        }
        if let Some(backoff) = self.backoff {
            config.setup_backoff_secs = backoff;
        }
        if let Some(addr) = self.management_addr {
            config.management_addr = Some(addr);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().compact().with_target(false))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args.load_config()?).await,
        Command::Admin {
            broker_url,
            command,
        } => admin::run(&broker_url, command).await,
    }
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let transport = AmqpTransport::from_config(&config)?;
    let mut worker = tasks::register(WorkerBuilder::from_config(config.clone()))?
        .expect_tasks(tasks::NAMES)
        .transport(transport)
        .build()?;

    worker.run()?;

    let management = match config.management_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("cannot bind management endpoint on {addr}"))?;
            let mut state = worker.subscribe_state();
            let shutdown = async move {
                let _ = state
                    .wait_for(|s| matches!(s, WorkerState::Dying | WorkerState::Closed))
                    .await;
            };
            Some(tokio::spawn(management::serve(
                listener,
                worker.status_reporter(),
                shutdown,
            )))
        }
        None => None,
    };

    let mut state = worker.subscribe_state();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("received Ctrl-C, shutting down");
        }
        _ = state.wait_for(|s| *s == WorkerState::Closed) => {}
    }

    worker.stop();
    let result = worker.wait().await;

    if let Some(handle) = management {
        handle.abort();
        if let Ok(Err(e)) = handle.await {
            warn!(error = %e, "management endpoint failed");
        }
    }
    result?;
    info!("worker stopped");
    Ok(())
}

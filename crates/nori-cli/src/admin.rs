//! broker の topology を手で操作するサブコマンド
//!
//! exchange / queue / binding の宣言と削除、queue の purge。
//! `--arguments` は JSON オブジェクトで、そのまま AMQP の argument table になります。

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use nori_core::impls::amqp::{
    AmqpAdmin, Binding, Destination, Exchange, ExchangeKind, LoggingListener, Queue,
    SingleConnectionFactory,
};
use serde_json::{Map, Value};

#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    /// exchange を宣言する（既定は durable）
    DeclareExchange {
        name: String,
        #[arg(long, default_value = "direct")]
        kind: ExchangeKind,
        #[arg(long)]
        transient: bool,
        #[arg(long)]
        auto_delete: bool,
        #[arg(long)]
        internal: bool,
        #[arg(long)]
        arguments: Option<String>,
    },
    DeleteExchange {
        name: String,
        #[arg(long)]
        if_unused: bool,
    },
    /// durable な queue を宣言する
    DeclareQueue {
        name: String,
        #[arg(long)]
        arguments: Option<String>,
    },
    /// broker が名前を決める exclusive queue を宣言し、名前を表示する
    DeclareAnonymousQueue,
    DeleteQueue {
        name: String,
        #[arg(long)]
        if_unused: bool,
        #[arg(long)]
        if_empty: bool,
    },
    PurgeQueue {
        name: String,
    },
    Bind(BindingArgs),
    Unbind(BindingArgs),
}

#[derive(Debug, Args)]
pub struct BindingArgs {
    /// 送り元の exchange
    #[arg(long)]
    pub exchange: String,
    #[arg(long, conflicts_with = "to_exchange")]
    pub queue: Option<String>,
    #[arg(long)]
    pub to_exchange: Option<String>,
    #[arg(long, default_value = "")]
    pub routing_key: String,
    #[arg(long)]
    pub arguments: Option<String>,
}

impl BindingArgs {
    fn into_binding(self) -> anyhow::Result<Binding> {
        let destination = match (self.queue, self.to_exchange) {
            (Some(queue), None) => Destination::Queue(queue),
            (None, Some(exchange)) => Destination::Exchange(exchange),
            _ => bail!("exactly one of --queue or --to-exchange is required"),
        };
        let mut binding = Binding::new(destination, self.exchange, self.routing_key);
        binding.arguments = parse_arguments(self.arguments.as_deref())?;
        Ok(binding)
    }
}

pub async fn run(broker_url: &str, command: AdminCommand) -> anyhow::Result<()> {
    let factory = SingleConnectionFactory::new(broker_url, vec![Arc::new(LoggingListener)]);
    let admin = AmqpAdmin::open(&factory)
        .await
        .with_context(|| format!("cannot open a channel on {}", factory.display_url()))?;

    let result = execute(&admin, command).await;

    // broker がエラーで channel を閉じた後の close 失敗より、操作自体のエラーを優先する
    let closed = admin.close().await;
    factory.close().await?;
    result?;
    closed?;
    Ok(())
}

async fn execute(admin: &AmqpAdmin, command: AdminCommand) -> anyhow::Result<()> {
    match command {
        AdminCommand::DeclareExchange {
            name,
            kind,
            transient,
            auto_delete,
            internal,
            arguments,
        } => {
            let mut exchange = Exchange::new(name, kind);
            exchange.durable = !transient;
            exchange.auto_delete = auto_delete;
            exchange.internal = internal;
            exchange.arguments = parse_arguments(arguments.as_deref())?;
            admin.declare_exchange(&exchange).await?;
        }
        AdminCommand::DeleteExchange { name, if_unused } => {
            admin.delete_exchange(&name, if_unused).await?;
        }
        AdminCommand::DeclareQueue { name, arguments } => {
            let mut queue = Queue::durable(name);
            queue.arguments = parse_arguments(arguments.as_deref())?;
            admin.declare_queue(&queue).await?;
        }
        AdminCommand::DeclareAnonymousQueue => {
            let name = admin.declare_anonymous_queue().await?;
            println!("{name}");
        }
        AdminCommand::DeleteQueue {
            name,
            if_unused,
            if_empty,
        } => {
            admin.delete_queue(&name, if_unused, if_empty).await?;
        }
        AdminCommand::PurgeQueue { name } => {
            admin.purge_queue(&name).await?;
        }
        AdminCommand::Bind(args) => {
            admin.declare_binding(&args.into_binding()?).await?;
        }
        AdminCommand::Unbind(args) => {
            admin.remove_binding(&args.into_binding()?).await?;
        }
    }
    Ok(())
}

fn parse_arguments(raw: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str(raw).context("--arguments must be JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--arguments must be a JSON object, got {other}"),
    }
}

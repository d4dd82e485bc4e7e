//! AmqpTransport - lapin による本番用 Transport
//!
//! # トポロジ
//! - `setup`: exchange（既定 `nori` / `direct`）を durable で宣言
//! - `consume`: worker の queue を durable・非 exclusive で宣言し、routing key = queue 名で bind
//! - `reply`: default exchange へ routing key = reply_to で publish（persistent, mandatory）

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{StreamExt, stream};
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use ulid::Ulid;

use super::connection::{ConnectionListener, SingleConnectionFactory};
use super::topology::{Binding, Destination, ExchangeKind, Queue, to_field_table};
use crate::app::WorkerContext;
use crate::config::WorkerConfig;
use crate::domain::{Request, Response};
use crate::impls::pump::{Inbound, pump};
use crate::ports::transport::reply_destination;
use crate::ports::{Delivery, Transport, TransportError};
use crate::protocol::{self, JSON_CONTENT_TYPE};

/// 接続とチャネルの開閉をログに出す listener
pub struct LoggingListener;

impl ConnectionListener for LoggingListener {
    fn on_connection_open(&self, url: &str) {
        info!(%url, "broker connection opened");
    }

    fn on_connection_close(&self, url: &str) {
        info!(%url, "broker connection closed");
    }

    fn on_channel_open(&self, channel_id: u16) {
        debug!(channel = channel_id, "broker channel opened");
    }
}

pub struct AmqpTransport {
    factory: SingleConnectionFactory,
    exchange: String,
    kind: ExchangeKind,
    ctx: Option<WorkerContext>,
    channel: Option<Channel>,
}

impl AmqpTransport {
    pub fn new(url: impl Into<String>, exchange: impl Into<String>, kind: ExchangeKind) -> Self {
        Self::with_listeners(url, exchange, kind, vec![Arc::new(LoggingListener)])
    }

    pub fn with_listeners(
        url: impl Into<String>,
        exchange: impl Into<String>,
        kind: ExchangeKind,
        listeners: Vec<Arc<dyn ConnectionListener>>,
    ) -> Self {
        Self {
            factory: SingleConnectionFactory::new(url, listeners),
            exchange: exchange.into(),
            kind,
            ctx: None,
            channel: None,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self, TransportError> {
        let kind = config.exchange.kind.parse()?;
        Ok(Self::new(&config.broker_url, &config.exchange.name, kind))
    }

    fn channel(&self) -> Result<&Channel, TransportError> {
        self.channel.as_ref().ok_or(TransportError::NotConnected)
    }
}

impl fmt::Display for AmqpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "amqp {} (exchange {}, {})",
            self.factory.display_url(),
            self.exchange,
            self.kind
        )
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    fn init(&mut self, ctx: WorkerContext) -> Result<(), TransportError> {
        if self.ctx.is_some() {
            return Err(TransportError::AlreadyInitialized);
        }
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn setup(&mut self) -> Result<(), TransportError> {
        if self.ctx.is_none() {
            return Err(TransportError::NotInitialized);
        }

        let channel = self.factory.create_channel().await?;
        channel
            .exchange_declare(
                &self.exchange,
                self.kind.into(),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        info!(exchange = %self.exchange, kind = %self.kind, "exchange declared");
        self.channel = Some(channel);
        Ok(())
    }

    async fn consume(&mut self, queue: &str) -> Result<mpsc::Receiver<Request>, TransportError> {
        let ctx = self.ctx.as_ref().ok_or(TransportError::NotInitialized)?;
        let channel = self.channel()?.clone();

        let declared = Queue::durable(queue);
        channel
            .queue_declare(
                &declared.name,
                QueueDeclareOptions {
                    durable: declared.durable,
                    exclusive: declared.exclusive,
                    auto_delete: declared.auto_delete,
                    ..Default::default()
                },
                to_field_table(&declared.arguments),
            )
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        let binding = Binding::new(Destination::Queue(queue.to_string()), &self.exchange, queue);
        channel
            .queue_bind(
                binding.destination.name(),
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        let consumer_tag = consumer_tag(ctx);
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        info!(%queue, %consumer_tag, "consuming");

        let deliveries = Box::pin(stream::unfold(consumer, move |mut consumer| {
            let channel = channel.clone();
            async move {
                match consumer.next().await {
                    Some(Ok(delivery)) => Some((inbound(delivery, channel), consumer)),
                    Some(Err(err)) => {
                        error!(error = %err, "consumer failed");
                        None
                    }
                    None => None,
                }
            }
        }));

        let (sink, requests) = mpsc::channel(1);
        let cancel = ctx.cancellation();
        let queue = queue.to_string();
        ctx.spawn("inbound", async move {
            pump(deliveries, sink, cancel, queue).await;
            Ok(())
        });
        Ok(requests)
    }

    async fn reply(&self, _request: &Request, response: &Response) -> Result<(), TransportError> {
        let routing_key = reply_destination(response)?;
        let channel = self.channel()?;
        let body = protocol::encode_to_vec(response)?;

        let properties = BasicProperties::default()
            .with_content_type(JSON_CONTENT_TYPE.into())
            .with_delivery_mode(2)
            .with_correlation_id(response.id().into())
            .with_timestamp(Utc::now().timestamp().max(0) as u64);

        debug!(task_id = %response.id(), %routing_key, "publishing reply");
        channel
            .basic_publish(
                "",
                routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &body,
                properties,
            )
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(channel) = self.channel.take()
            && channel.status().connected()
            && let Err(err) = channel.close(200, "Normal shutdown").await
        {
            debug!(error = %err, "channel close failed");
        }
        self.factory.close().await
    }
}

fn inbound(delivery: lapin::message::Delivery, channel: Channel) -> Inbound {
    let properties = &delivery.properties;
    Inbound {
        content_type: properties.content_type().as_ref().map(|s| s.to_string()),
        reply_to: properties.reply_to().as_ref().map(|s| s.to_string()),
        body: delivery.data.clone(),
        delivery: Arc::new(AmqpDelivery {
            channel,
            tag: delivery.delivery_tag,
        }),
    }
}

struct AmqpDelivery {
    channel: Channel,
    tag: u64,
}

impl fmt::Debug for AmqpDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpDelivery")
            .field("channel", &self.channel.id())
            .field("tag", &self.tag)
            .finish()
    }
}

#[async_trait]
impl Delivery for AmqpDelivery {
    async fn ack(&self) -> Result<(), TransportError> {
        self.channel
            .basic_ack(self.tag, BasicAckOptions::default())
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.channel
            .basic_nack(
                self.tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn reject(&self, requeue: bool) -> Result<(), TransportError> {
        self.channel
            .basic_reject(self.tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }
}

/// broker の管理画面でどの worker のどの接続か分かる tag
fn consumer_tag(ctx: &WorkerContext) -> String {
    format!("{}@{}-{}", ctx.worker_name(), ctx.hostname(), Ulid::new())
}

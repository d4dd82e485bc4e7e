//! AmqpAdmin - broker の管理操作
//!
//! 引数を検証してから、そのまま broker の宣言・削除メソッドへ渡します。

use lapin::Channel;
use lapin::options::{
    ExchangeBindOptions, ExchangeDeclareOptions, ExchangeDeleteOptions, ExchangeUnbindOptions,
    QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions, QueuePurgeOptions,
};
use tracing::info;

use super::connection::SingleConnectionFactory;
use super::topology::{Binding, Destination, Exchange, Queue, to_field_table};
use crate::ports::TransportError;

pub struct AmqpAdmin {
    channel: Channel,
}

impl AmqpAdmin {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// factory の共有接続に新しいチャネルを開く
    pub async fn open(factory: &SingleConnectionFactory) -> Result<Self, TransportError> {
        Ok(Self::new(factory.create_channel().await?))
    }

    pub async fn declare_exchange(&self, exchange: &Exchange) -> Result<(), TransportError> {
        exchange.validate()?;
        self.channel
            .exchange_declare(
                &exchange.name,
                exchange.kind.into(),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    internal: exchange.internal,
                    ..Default::default()
                },
                to_field_table(&exchange.arguments),
            )
            .await
            .map_err(channel_error)?;
        info!(exchange = %exchange.name, kind = %exchange.kind, "exchange declared");
        Ok(())
    }

    pub async fn delete_exchange(&self, name: &str, if_unused: bool) -> Result<(), TransportError> {
        Exchange::new(name, Default::default()).validate()?;
        self.channel
            .exchange_delete(
                name,
                ExchangeDeleteOptions {
                    if_unused,
                    ..Default::default()
                },
            )
            .await
            .map_err(channel_error)?;
        info!(exchange = %name, "exchange deleted");
        Ok(())
    }

    /// queue を宣言し、broker が確定した名前を返す
    pub async fn declare_queue(&self, queue: &Queue) -> Result<String, TransportError> {
        queue.validate()?;
        let declared = self
            .channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    ..Default::default()
                },
                to_field_table(&queue.arguments),
            )
            .await
            .map_err(channel_error)?;
        let name = declared.name().as_str().to_string();
        info!(queue = %name, "queue declared");
        Ok(name)
    }

    /// 名前を broker に任せた exclusive・auto-delete の queue
    pub async fn declare_anonymous_queue(&self) -> Result<String, TransportError> {
        self.declare_queue(&Queue::anonymous()).await
    }

    pub async fn delete_queue(
        &self,
        name: &str,
        if_unused: bool,
        if_empty: bool,
    ) -> Result<(), TransportError> {
        require_queue(name)?;
        self.channel
            .queue_delete(
                name,
                QueueDeleteOptions {
                    if_unused,
                    if_empty,
                    ..Default::default()
                },
            )
            .await
            .map_err(channel_error)?;
        info!(queue = %name, "queue deleted");
        Ok(())
    }

    pub async fn purge_queue(&self, name: &str) -> Result<(), TransportError> {
        require_queue(name)?;
        self.channel
            .queue_purge(name, QueuePurgeOptions::default())
            .await
            .map_err(channel_error)?;
        info!(queue = %name, "queue purged");
        Ok(())
    }

    pub async fn declare_binding(&self, binding: &Binding) -> Result<(), TransportError> {
        binding.validate()?;
        let arguments = to_field_table(&binding.arguments);
        match &binding.destination {
            Destination::Queue(queue) => self
                .channel
                .queue_bind(
                    queue,
                    &binding.exchange,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    arguments,
                )
                .await
                .map_err(channel_error)?,
            Destination::Exchange(destination) => self
                .channel
                .exchange_bind(
                    destination,
                    &binding.exchange,
                    &binding.routing_key,
                    ExchangeBindOptions::default(),
                    arguments,
                )
                .await
                .map_err(channel_error)?,
        }
        info!(
            exchange = %binding.exchange,
            destination = %binding.destination.name(),
            routing_key = %binding.routing_key,
            "binding declared"
        );
        Ok(())
    }

    pub async fn remove_binding(&self, binding: &Binding) -> Result<(), TransportError> {
        binding.validate()?;
        let arguments = to_field_table(&binding.arguments);
        match &binding.destination {
            Destination::Queue(queue) => self
                .channel
                .queue_unbind(queue, &binding.exchange, &binding.routing_key, arguments)
                .await
                .map_err(channel_error)?,
            Destination::Exchange(destination) => self
                .channel
                .exchange_unbind(
                    destination,
                    &binding.exchange,
                    &binding.routing_key,
                    ExchangeUnbindOptions::default(),
                    arguments,
                )
                .await
                .map_err(channel_error)?,
        }
        info!(
            exchange = %binding.exchange,
            destination = %binding.destination.name(),
            routing_key = %binding.routing_key,
            "binding removed"
        );
        Ok(())
    }

    pub async fn close(self) -> Result<(), TransportError> {
        self.channel
            .close(200, "Normal shutdown")
            .await
            .map_err(channel_error)
    }
}

fn require_queue(name: &str) -> Result<(), TransportError> {
    if name.trim().is_empty() {
        return Err(TransportError::Broker(
            "queue name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn channel_error(err: lapin::Error) -> TransportError {
    TransportError::Channel(err.to_string())
}

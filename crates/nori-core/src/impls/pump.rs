//! Inbound pump - 受信した delivery を decode して Request のチャネルへ流す
//!
//! AMQP / in-memory の両 Transport が使う共通部分です。
//! decode に失敗した delivery は nack(requeue=false) して捨て、次の delivery へ進みます。

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::domain::Request;
use crate::ports::Delivery;
use crate::protocol;

/// broker から届いた生の delivery
#[derive(Debug)]
pub struct Inbound {
    pub content_type: Option<String>,
    pub reply_to: Option<String>,
    pub body: Vec<u8>,
    pub delivery: Arc<dyn Delivery>,
}

impl Inbound {
    /// decode して delivery handle を結びつける
    pub fn decode(self) -> Result<Request, (protocol::CodecError, Arc<dyn Delivery>)> {
        match protocol::decode(
            &self.body,
            self.content_type.as_deref(),
            self.reply_to.as_deref(),
        ) {
            Ok(request) => Ok(request.with_delivery(self.delivery)),
            Err(err) => Err((err, self.delivery)),
        }
    }
}

/// `source` が尽きるか `cancel` されるまで回る。
///
/// Request の受け手（consume ループ）が 1 件処理し終えるまで次を送らない。
pub async fn pump<S>(
    mut source: S,
    sink: mpsc::Sender<Request>,
    cancel: CancellationToken,
    queue: String,
) where
    S: Stream<Item = Inbound> + Unpin + Send,
{
    loop {
        let inbound = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = source.next() => match next {
                Some(inbound) => inbound,
                None => {
                    debug!(%queue, "delivery stream ended");
                    break;
                }
            },
        };

        let request = match inbound.decode() {
            Ok(request) => request,
            Err((err, delivery)) => {
                warn!(%queue, error = %err, "dropping undecodable delivery");
                if let Err(err) = delivery.nack(false).await {
                    error!(%queue, error = %err, "nack of undecodable delivery failed");
                }
                continue;
            }
        };

        debug!(%queue, task = %request.name, task_id = %request.id, "delivery decoded");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sink.send(request) => {
                if sent.is_err() {
                    debug!(%queue, "request receiver dropped");
                    break;
                }
            }
        }
    }
}

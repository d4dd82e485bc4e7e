//! InMemoryTransport - 開発・テスト用の Transport
//!
//! `InMemoryBroker` はプロセス内の broker です。queue ごとに未配送のメッセージを持ち、
//! 配送済みで未確認（in-flight）のメッセージを接続ごとに追跡します。
//! 接続が閉じると、その接続の in-flight メッセージは queue の先頭へ戻ります（AMQP と同じ）。
//!
//! decode は本番と同じ `pump` を通るので、content type や壊れた JSON の扱いも本番と同じです。
//!
//! # 障害の注入
//! - `fail_setups(n)`: 次の n 回の `setup` を失敗させる
//! - `stall_setups(n)`: 次の n 回の `setup` を終わらせない（タイムアウトの確認用）
//! - `drop_connections()`: 開いている接続をすべて切る

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::pump::{Inbound, pump};
use crate::app::WorkerContext;
use crate::domain::{Request, Response};
use crate::ports::transport::reply_destination;
use crate::ports::{Delivery, Transport, TransportError};
use crate::protocol::{self, CeleryResult, CeleryTask, JSON_CONTENT_TYPE};

/// delivery に対して最後に行われた確認操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Nacked { requeue: bool },
    Rejected { requeue: bool },
}

/// 返信として publish されたメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedReply {
    pub routing_key: String,
    pub correlation_id: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl PublishedReply {
    pub fn decode(&self) -> Result<CeleryResult, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Clone)]
struct Message {
    tag: u64,
    content_type: Option<String>,
    reply_to: Option<String>,
    body: Vec<u8>,
}

#[derive(Debug)]
struct InFlight {
    queue: String,
    connection: u64,
    message: Message,
}

#[derive(Debug, Clone, Copy)]
enum SetupFault {
    Fail,
    Stall,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, VecDeque<Message>>,
    in_flight: HashMap<u64, InFlight>,
    outcomes: HashMap<u64, Outcome>,
    replies: Vec<PublishedReply>,
    connections: HashMap<u64, CancellationToken>,
    setup_faults: VecDeque<SetupFault>,
    setup_attempts: usize,
    next_tag: u64,
    next_connection: u64,
}

#[derive(Debug)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    changes: watch::Sender<u64>,
}

/// プロセス内 broker のハンドル（clone すると同じ broker を指す）
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                changes,
            }),
        }
    }

    /// この broker につながる Transport を作る
    pub fn transport(&self, exchange: impl Into<String>) -> InMemoryTransport {
        InMemoryTransport {
            broker: self.clone(),
            exchange: exchange.into(),
            ctx: None,
            connection: None,
        }
    }

    /// 生のメッセージを queue へ入れ、追跡用の tag を返す
    pub fn publish(
        &self,
        queue: &str,
        content_type: Option<&str>,
        reply_to: Option<&str>,
        body: impl Into<Vec<u8>>,
    ) -> u64 {
        self.mutate(|state| {
            state.next_tag += 1;
            let tag = state.next_tag;
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(Message {
                    tag,
                    content_type: content_type.map(str::to_string),
                    reply_to: reply_to.map(str::to_string),
                    body: body.into(),
                });
            tag
        })
    }

    /// タスク envelope を `application/json` で queue へ入れる
    pub fn publish_task(
        &self,
        queue: &str,
        task: &CeleryTask,
        reply_to: Option<&str>,
    ) -> Result<u64, serde_json::Error> {
        let body = serde_json::to_vec(task)?;
        Ok(self.publish(queue, Some(JSON_CONTENT_TYPE), reply_to, body))
    }

    pub fn outcome(&self, tag: u64) -> Option<Outcome> {
        self.lock().outcomes.get(&tag).copied()
    }

    /// 配送済みで、まだ確認されていない
    pub fn is_in_flight(&self, tag: u64) -> bool {
        self.lock().in_flight.contains_key(&tag)
    }

    /// queue に残っている未配送メッセージの数
    pub fn queued(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.lock().exchanges.contains(exchange)
    }

    pub fn replies(&self) -> Vec<PublishedReply> {
        self.lock().replies.clone()
    }

    pub fn setup_attempts(&self) -> usize {
        self.lock().setup_attempts
    }

    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn fail_setups(&self, count: usize) {
        self.mutate(|state| {
            state
                .setup_faults
                .extend(std::iter::repeat_n(SetupFault::Fail, count))
        });
    }

    pub fn stall_setups(&self, count: usize) {
        self.mutate(|state| {
            state
                .setup_faults
                .extend(std::iter::repeat_n(SetupFault::Stall, count))
        });
    }

    /// 開いている接続をすべて切る。in-flight のメッセージは queue に戻る
    pub fn drop_connections(&self) {
        let ids: Vec<u64> = self.lock().connections.keys().copied().collect();
        for id in ids {
            self.disconnect(id);
        }
    }

    pub async fn wait_for_outcome(&self, tag: u64) -> Outcome {
        self.wait_until(|state| state.outcomes.get(&tag).copied())
            .await
    }

    /// `routing_key` 宛ての返信が `count` 件そろうまで待つ
    pub async fn wait_for_replies(&self, routing_key: &str, count: usize) -> Vec<PublishedReply> {
        self.wait_until(|state| {
            let replies: Vec<PublishedReply> = state
                .replies
                .iter()
                .filter(|reply| reply.routing_key == routing_key)
                .cloned()
                .collect();
            (replies.len() >= count).then_some(replies)
        })
        .await
    }

    pub async fn wait_for_setup_attempts(&self, count: usize) {
        self.wait_until(|state| (state.setup_attempts >= count).then_some(()))
            .await
    }

    async fn wait_until<T>(&self, mut probe: impl FnMut(&BrokerState) -> Option<T>) -> T {
        let mut changes = self.inner.changes.subscribe();
        loop {
            let found = probe(&self.lock());
            if let Some(found) = found {
                return found;
            }
            // sender は self が持っているので閉じない
            let _ = changes.changed().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut BrokerState) -> T) -> T {
        let result = f(&mut self.lock());
        self.inner.changes.send_modify(|version| *version += 1);
        result
    }

    fn connect(&self, exchange: &str) -> Result<(u64, CancellationToken), SetupFault> {
        self.mutate(|state| {
            state.setup_attempts += 1;
            if let Some(fault) = state.setup_faults.pop_front() {
                return Err(fault);
            }
            state.exchanges.insert(exchange.to_string());
            state.next_connection += 1;
            let id = state.next_connection;
            let token = CancellationToken::new();
            state.connections.insert(id, token.clone());
            Ok((id, token))
        })
    }

    fn disconnect(&self, connection: u64) {
        self.mutate(|state| {
            if let Some(token) = state.connections.remove(&connection) {
                token.cancel();
            }
            let orphaned: Vec<u64> = state
                .in_flight
                .iter()
                .filter(|(_, flight)| flight.connection == connection)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in orphaned {
                if let Some(flight) = state.in_flight.remove(&tag) {
                    state
                        .queues
                        .entry(flight.queue)
                        .or_default()
                        .push_front(flight.message);
                }
            }
        });
    }

    fn declare_queue(&self, queue: &str) {
        self.mutate(|state| {
            state.queues.entry(queue.to_string()).or_default();
        });
    }

    fn take(&self, queue: &str, connection: u64) -> Option<Message> {
        let mut state = self.lock();
        if !state.connections.contains_key(&connection) {
            return None;
        }
        let message = state.queues.get_mut(queue)?.pop_front()?;
        state.in_flight.insert(
            message.tag,
            InFlight {
                queue: queue.to_string(),
                connection,
                message: message.clone(),
            },
        );
        Some(message)
    }

    fn settle(&self, tag: u64, outcome: Outcome) -> Result<(), TransportError> {
        self.mutate(|state| {
            let flight = state.in_flight.remove(&tag).ok_or_else(|| {
                TransportError::Broker(format!("delivery {tag} is not outstanding"))
            })?;
            let requeue = matches!(
                outcome,
                Outcome::Nacked { requeue: true } | Outcome::Rejected { requeue: true }
            );
            if requeue {
                state
                    .queues
                    .entry(flight.queue)
                    .or_default()
                    .push_back(flight.message);
            }
            state.outcomes.insert(tag, outcome);
            Ok(())
        })
    }

    fn record_reply(&self, reply: PublishedReply) {
        self.mutate(|state| state.replies.push(reply));
    }

    /// 接続が切れるまで `queue` のメッセージを流す
    fn deliveries(
        &self,
        queue: String,
        connection: u64,
        closed: CancellationToken,
    ) -> impl futures_util::Stream<Item = Inbound> + Unpin + Send + 'static {
        let broker = self.clone();
        Box::pin(stream::unfold(
            (broker, queue, connection, closed),
            |(broker, queue, connection, closed)| async move {
                loop {
                    let mut changes = broker.inner.changes.subscribe();
                    if let Some(message) = broker.take(&queue, connection) {
                        let inbound = Inbound {
                            content_type: message.content_type,
                            reply_to: message.reply_to,
                            body: message.body,
                            delivery: Arc::new(InMemoryDelivery {
                                broker: broker.clone(),
                                tag: message.tag,
                            }),
                        };
                        return Some((inbound, (broker, queue, connection, closed)));
                    }
                    tokio::select! {
                        _ = closed.cancelled() => return None,
                        _ = changes.changed() => {}
                    }
                }
            },
        ))
    }
}

struct InMemoryDelivery {
    broker: InMemoryBroker,
    tag: u64,
}

impl fmt::Debug for InMemoryDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDelivery")
            .field("tag", &self.tag)
            .finish()
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    async fn ack(&self) -> Result<(), TransportError> {
        self.broker.settle(self.tag, Outcome::Acked)
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.broker.settle(self.tag, Outcome::Nacked { requeue })
    }

    async fn reject(&self, requeue: bool) -> Result<(), TransportError> {
        self.broker.settle(self.tag, Outcome::Rejected { requeue })
    }
}

pub struct InMemoryTransport {
    broker: InMemoryBroker,
    exchange: String,
    ctx: Option<WorkerContext>,
    connection: Option<u64>,
}

impl fmt::Display for InMemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in-memory broker (exchange {})", self.exchange)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
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
        match self.broker.connect(&self.exchange) {
            Ok((id, _)) => {
                self.connection = Some(id);
                info!(connection = id, exchange = %self.exchange, "in-memory broker connected");
                Ok(())
            }
            Err(SetupFault::Fail) => Err(TransportError::Connection(
                "connection refused by in-memory broker".to_string(),
            )),
            Err(SetupFault::Stall) => {
                std::future::pending::<()>().await;
                Err(TransportError::Closed)
            }
        }
    }

    async fn consume(&mut self, queue: &str) -> Result<mpsc::Receiver<Request>, TransportError> {
        let ctx = self.ctx.as_ref().ok_or(TransportError::NotInitialized)?;
        let connection = self.connection.ok_or(TransportError::NotConnected)?;
        let closed = self
            .broker
            .lock()
            .connections
            .get(&connection)
            .cloned()
            .ok_or(TransportError::Closed)?;

        self.broker.declare_queue(queue);
        let deliveries = self.broker.deliveries(queue.to_string(), connection, closed);

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
        if self.connection.is_none() {
            return Err(TransportError::NotConnected);
        }
        let body = protocol::encode_to_vec(response)?;
        debug!(task_id = %response.id(), %routing_key, "publishing reply");
        self.broker.record_reply(PublishedReply {
            routing_key: routing_key.to_string(),
            correlation_id: response.id().to_string(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            body,
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(id) = self.connection.take() {
            self.broker.disconnect(id);
            debug!(connection = id, "in-memory connection closed");
        }
        Ok(())
    }
}

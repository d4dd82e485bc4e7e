//! Worker - 接続・受信・dispatch・返信のループ
//!
//! # ループ
//! 1. `setup` を試す。失敗、または backoff と同じ時間内に終わらなければ backoff だけ待って再試行
//! 2. `consume` で Request のチャネルを受け取る
//! 3. 1 件ずつ dispatch → 成功なら reply → ack
//!    - Handler のエラー（panic を含む）はログに残し、ack しない（再配送は broker に任せる）
//!    - reply の失敗はログに残し、ack は行う
//! 4. チャネルが閉じたら（接続断）transport を閉じて 1 へ戻る
//!
//! 停止要求はすべての待ち合わせ点で確認します。実行中の Handler は中断しません。

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::WorkerContext;
use super::status::{StatusReporter, StatusSnapshot, WorkerState};
use super::supervisor::Supervisor;
use crate::config::WorkerConfig;
use crate::domain::Request;
use crate::ports::{Transport, TransportError};
use crate::typed::TaskRegistry;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no transport configured")]
    NoTransportConfigured,

    #[error("worker is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct Worker {
    config: WorkerConfig,
    hostname: String,
    registry: Arc<TaskRegistry>,
    transport: Option<Box<dyn Transport>>,
    transport_description: String,
    started: bool,
    supervisor: Supervisor,
    state: Arc<watch::Sender<WorkerState>>,
}

impl Worker {
    pub(crate) fn new(
        config: WorkerConfig,
        registry: TaskRegistry,
        transport: Option<Box<dyn Transport>>,
    ) -> Self {
        let transport_description = transport
            .as_ref()
            .map_or_else(|| "none".to_string(), |t| t.to_string());
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            config,
            hostname: local_hostname(),
            registry: Arc::new(registry),
            transport,
            transport_description,
            started: false,
            supervisor: Supervisor::new(),
            state: Arc::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn queue(&self) -> &str {
        self.config.queue_name()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// ループを起動する。完了は待たない（tokio runtime 内で呼ぶこと）
    pub fn run(&mut self) -> Result<(), WorkerError> {
        if self.started {
            return Err(WorkerError::AlreadyRunning);
        }
        let mut transport = self
            .transport
            .take()
            .ok_or(WorkerError::NoTransportConfigured)?;
        self.started = true;

        let ctx = WorkerContext::new(&self.config.name, &self.hostname, self.supervisor.clone());
        transport.init(ctx)?;

        info!(
            worker = %self.config.name,
            hostname = %self.hostname,
            transport = %transport,
            queue = %self.config.queue_name(),
            tasks = ?self.registry.names(),
            "starting worker"
        );
        for binding in self.registry.bindings() {
            debug!(
                task = %binding.name,
                request = binding.request_type,
                response = binding.response_type,
                shape = ?binding.shape,
                "task bound"
            );
        }

        let worker_loop = WorkerLoop {
            transport,
            registry: Arc::clone(&self.registry),
            queue: self.config.queue_name().to_string(),
            backoff: self.config.setup_backoff(),
            state: Arc::clone(&self.state),
            cancel: self.supervisor.token(),
        };
        self.supervisor.spawn("worker", worker_loop.run());
        Ok(())
    }

    /// 停止を要求する。完了は `wait` で待つ
    pub fn stop(&self) {
        if !self.supervisor.is_killed() {
            info!(worker = %self.config.name, "stop requested");
        }
        self.supervisor.kill();
    }

    /// 起動した処理がすべて終わるまで待ち、最初のエラーを返す
    pub async fn wait(&self) -> Result<(), WorkerError> {
        self.supervisor.wait().await
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn status_reporter(&self) -> StatusReporter {
        StatusReporter::new(
            self.config.name.clone(),
            self.hostname.clone(),
            self.config.queue_name().to_string(),
            self.transport_description.clone(),
            Arc::clone(&self.registry),
            self.state.subscribe(),
        )
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status_reporter().snapshot()
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

struct WorkerLoop {
    transport: Box<dyn Transport>,
    registry: Arc<TaskRegistry>,
    queue: String,
    backoff: Duration,
    state: Arc<watch::Sender<WorkerState>>,
    cancel: CancellationToken,
}

impl WorkerLoop {
    async fn run(mut self) -> Result<(), WorkerError> {
        while !self.cancel.is_cancelled() {
            self.set_state(WorkerState::Connecting);
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                attempt = tokio::time::timeout(self.backoff, self.transport.setup()) => attempt,
            };
            match attempt {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(error = %err, backoff = ?self.backoff, "transport setup failed");
                    if !self.back_off().await {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    error!(backoff = ?self.backoff, "transport setup timed out");
                    if !self.back_off().await {
                        break;
                    }
                    continue;
                }
            }

            let mut inbound = match self.transport.consume(&self.queue).await {
                Ok(inbound) => inbound,
                Err(err) => {
                    error!(queue = %self.queue, error = %err, "consume failed");
                    if !self.back_off().await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(WorkerState::Consuming);
            info!(queue = %self.queue, "consuming");
            self.receive(&mut inbound).await;
            if self.cancel.is_cancelled() {
                break;
            }

            warn!(queue = %self.queue, "delivery stream ended; reconnecting");
            self.release().await;
        }

        self.set_state(WorkerState::Dying);
        info!(queue = %self.queue, "worker shutting down");
        let closed = self.transport.close().await;
        self.set_state(WorkerState::Closed);
        closed.map_err(WorkerError::from)
    }

    /// backoff だけ待つ。停止要求が来たら false
    async fn back_off(&mut self) -> bool {
        self.release().await;
        self.set_state(WorkerState::BackoffWait);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }

    async fn release(&mut self) {
        if let Err(err) = self.transport.close().await {
            warn!(error = %err, "transport close failed");
        }
    }

    async fn receive(&self, inbound: &mut mpsc::Receiver<Request>) {
        loop {
            let request = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                next = inbound.recv() => match next {
                    Some(request) => request,
                    None => return,
                },
            };
            self.process(request).await;
        }
    }

    async fn process(&self, request: Request) {
        debug!(task = %request.name, task_id = %request.id, "dispatching");

        let response = match self.registry.dispatch(&request).await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    task = %request.name,
                    task_id = %request.id,
                    error = %err,
                    "task failed; delivery left unacknowledged"
                );
                return;
            }
        };

        if let Err(err) = self.transport.reply(&request, &response).await {
            error!(task = %request.name, task_id = %request.id, error = %err, "reply failed");
        }
        if let Err(err) = self.transport.ack(&request).await {
            error!(task = %request.name, task_id = %request.id, error = %err, "ack failed");
            return;
        }
        debug!(task = %request.name, task_id = %request.id, "task done");
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "worker state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::WorkerBuilder;
    use crate::impls::{InMemoryBroker, Outcome};
    use crate::domain::ArgMap;
    use crate::protocol::{CeleryTask, JSON_CONTENT_TYPE};
    use crate::typed::handler::fixtures::{AddHandler, ExplodeHandler};
    use crate::typed::task::fixtures::{Add, Explode};
    use serde_json::json;
    use tokio::time::{Instant, timeout};

    const WAIT: Duration = Duration::from_secs(30);
    const BACKOFF: Duration = Duration::from_secs(5);

    fn worker(broker: &InMemoryBroker) -> Worker {
        WorkerBuilder::new("tasks")
            .register::<Add, _>(AddHandler)
            .unwrap()
            .register::<Explode, _>(ExplodeHandler)
            .unwrap()
            .transport(broker.transport("nori"))
            .build()
            .unwrap()
    }

    fn publish(broker: &InMemoryBroker, body: &str, reply_to: Option<&str>) -> u64 {
        broker.publish("tasks", Some(JSON_CONTENT_TYPE), reply_to, body)
    }

    async fn shutdown(worker: &Worker) {
        worker.stop();
        timeout(WAIT, worker.wait()).await.unwrap().unwrap();
        assert_eq!(worker.state(), WorkerState::Closed);
    }

    #[tokio::test]
    async fn add_task_end_to_end() {
        let broker = InMemoryBroker::new();
        let mut worker = worker(&broker);
        worker.run().unwrap();

        let tag = publish(
            &broker,
            r#"{"task":"tasks.add","id":"X","args":[2,3],"kwargs":{}}"#,
            Some("reply.q"),
        );

        let outcome = timeout(WAIT, broker.wait_for_outcome(tag)).await.unwrap();
        assert_eq!(outcome, Outcome::Acked);

        let replies = broker.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].routing_key, "reply.q");
        assert_eq!(replies[0].correlation_id, "X");
        let result = replies[0].decode().unwrap();
        assert_eq!(result.task_id, "X");
        assert_eq!(result.status, "SUCCESS");
        assert_eq!(result.result, json!(5));

        assert!(broker.has_queue("tasks"));
        assert!(broker.has_exchange("nori"));
        shutdown(&worker).await;
    }

    #[tokio::test]
    async fn undecodable_delivery_does_not_block_the_next() {
        let broker = InMemoryBroker::new();
        let mut worker = worker(&broker);
        worker.run().unwrap();

        let malformed = publish(&broker, "{not json", Some("reply.q"));
        let valid = publish(
            &broker,
            r#"{"task":"tasks.add","id":"2","args":[1,1]}"#,
            Some("reply.q"),
        );

        assert_eq!(
            timeout(WAIT, broker.wait_for_outcome(valid)).await.unwrap(),
            Outcome::Acked
        );
        assert_eq!(
            broker.outcome(malformed),
            Some(Outcome::Nacked { requeue: false })
        );
        let replies = timeout(WAIT, broker.wait_for_replies("reply.q", 1))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].decode().unwrap().result, json!(2));

        shutdown(&worker).await;
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_consumption() {
        let broker = InMemoryBroker::new();
        let mut worker = worker(&broker);
        worker.run().unwrap();

        let exploding = publish(&broker, r#"{"task":"tasks.explode","id":"1"}"#, Some("reply.q"));
        let adding = publish(
            &broker,
            r#"{"task":"tasks.add","id":"2","args":[20,22]}"#,
            Some("reply.q"),
        );

        assert_eq!(
            timeout(WAIT, broker.wait_for_outcome(adding)).await.unwrap(),
            Outcome::Acked
        );
        // panic したタスクは返信も ack もされない
        assert_eq!(broker.outcome(exploding), None);
        assert!(broker.is_in_flight(exploding));
        let replies = broker.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].correlation_id, "2");

        // 停止で接続が閉じると未確認のメッセージは queue に戻る
        shutdown(&worker).await;
        assert_eq!(broker.queued("tasks"), 1);
    }

    #[tokio::test]
    async fn unknown_task_is_left_unacknowledged() {
        let broker = InMemoryBroker::new();
        let mut worker = worker(&broker);
        worker.run().unwrap();

        let unknown = publish(&broker, r#"{"task":"other.add","id":"1"}"#, Some("reply.q"));
        let known = publish(
            &broker,
            r#"{"task":"tasks.add","id":"2","args":[1,2]}"#,
            Some("reply.q"),
        );

        timeout(WAIT, broker.wait_for_outcome(known)).await.unwrap();
        assert!(broker.is_in_flight(unknown));
        assert_eq!(broker.outcome(unknown), None);

        shutdown(&worker).await;
    }

    #[tokio::test]
    async fn missing_reply_destination_still_acknowledges() {
        let broker = InMemoryBroker::new();
        let mut worker = worker(&broker);
        worker.run().unwrap();

        let tag = publish(&broker, r#"{"task":"tasks.add","id":"1","args":[1,2]}"#, None);

        assert_eq!(
            timeout(WAIT, broker.wait_for_outcome(tag)).await.unwrap(),
            Outcome::Acked
        );
        assert!(broker.replies().is_empty());

        shutdown(&worker).await;
    }

    #[tokio::test(start_paused = true)]
    async fn setup_failures_are_retried_after_backoff() {
        let broker = InMemoryBroker::new();
        broker.fail_setups(2);
        let mut worker = worker(&broker);
        let started = Instant::now();
        worker.run().unwrap();

        let tag = publish(&broker, r#"{"task":"tasks.add","id":"1","args":[1,2]}"#, None);
        timeout(WAIT, broker.wait_for_outcome(tag)).await.unwrap();

        assert_eq!(broker.setup_attempts(), 3);
        assert!(started.elapsed() >= BACKOFF * 2);
        assert_eq!(worker.state(), WorkerState::Consuming);

        shutdown(&worker).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_setup_is_treated_as_a_timeout() {
        let broker = InMemoryBroker::new();
        broker.stall_setups(1);
        let mut worker = worker(&broker);
        let started = Instant::now();
        worker.run().unwrap();

        let tag = publish(&broker, r#"{"task":"tasks.add","id":"1","args":[1,2]}"#, None);
        timeout(WAIT, broker.wait_for_outcome(tag)).await.unwrap();

        assert_eq!(broker.setup_attempts(), 2);
        // timeout までの待ちと backoff の待ち
        assert!(started.elapsed() >= BACKOFF * 2);

        shutdown(&worker).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_closes_the_worker() {
        let broker = InMemoryBroker::new();
        broker.fail_setups(1000);
        let mut worker = worker(&broker);
        let mut states = worker.subscribe_state();
        worker.run().unwrap();

        timeout(WAIT, states.wait_for(|state| *state == WorkerState::BackoffWait))
            .await
            .unwrap()
            .unwrap();
        shutdown(&worker).await;
        assert_eq!(broker.setup_attempts(), 1);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn reconnects_when_the_connection_drops() {
        let broker = InMemoryBroker::new();
        let mut worker = worker(&broker);
        worker.run().unwrap();

        let first = publish(&broker, r#"{"task":"tasks.add","id":"1","args":[1,2]}"#, None);
        timeout(WAIT, broker.wait_for_outcome(first)).await.unwrap();

        broker.drop_connections();
        timeout(WAIT, broker.wait_for_setup_attempts(2)).await.unwrap();

        let second = broker
            .publish_task(
                "tasks",
                &CeleryTask {
                    name: "tasks.add".to_string(),
                    id: "2".to_string(),
                    args: ArgMap::from(vec![json!(3), json!(4)]),
                    ..Default::default()
                },
                Some("reply.q"),
            )
            .unwrap();
        assert_eq!(
            timeout(WAIT, broker.wait_for_outcome(second)).await.unwrap(),
            Outcome::Acked
        );
        assert_eq!(broker.setup_attempts(), 2);
        let replies = timeout(WAIT, broker.wait_for_replies("reply.q", 1))
            .await
            .unwrap();
        assert_eq!(replies[0].decode().unwrap().result, json!(7));

        shutdown(&worker).await;
    }

    #[tokio::test]
    async fn run_requires_a_transport() {
        let mut worker = WorkerBuilder::new("tasks").build().unwrap();
        assert!(matches!(
            worker.run(),
            Err(WorkerError::NoTransportConfigured)
        ));
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let broker = InMemoryBroker::new();
        let mut worker = worker(&broker);
        worker.run().unwrap();
        assert!(matches!(worker.run(), Err(WorkerError::AlreadyRunning)));
        shutdown(&worker).await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let broker = InMemoryBroker::new();
        let mut worker = worker(&broker);
        worker.run().unwrap();
        worker.stop();
        shutdown(&worker).await;
    }

    #[tokio::test]
    async fn status_reports_tasks_and_state() {
        let broker = InMemoryBroker::new();
        let mut worker = worker(&broker);
        let mut states = worker.subscribe_state();
        worker.run().unwrap();
        timeout(WAIT, states.wait_for(|state| *state == WorkerState::Consuming))
            .await
            .unwrap()
            .unwrap();

        let status = worker.status();
        assert_eq!(status.worker, "tasks");
        assert_eq!(status.queue, "tasks");
        assert_eq!(status.state, WorkerState::Consuming);
        assert_eq!(status.tasks, vec!["tasks.add", "tasks.explode"]);
        assert!(status.transport.contains("in-memory"));

        shutdown(&worker).await;
    }
}

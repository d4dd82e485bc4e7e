//! Status - worker の状態と status snapshot
//!
//! snapshot は読み取り専用です。HTTP の `GET /tasks` などでそのまま JSON にできます。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::typed::{TaskBinding, TaskRegistry};

/// worker の状態遷移
///
/// `Idle → Connecting → Consuming → Dying → Closed`、
/// setup に失敗すると `Connecting → BackoffWait → Connecting`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Idle,
    Connecting,
    BackoffWait,
    Consuming,
    Dying,
    Closed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Connecting => "connecting",
            WorkerState::BackoffWait => "backoff_wait",
            WorkerState::Consuming => "consuming",
            WorkerState::Dying => "dying",
            WorkerState::Closed => "closed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub worker: String,
    pub hostname: String,
    pub queue: String,
    pub transport: String,
    pub state: WorkerState,
    /// 登録済みの修飾タスク名（登録順）
    pub tasks: Vec<String>,
    pub bindings: Vec<TaskBinding>,
}

/// snapshot を作るためのハンドル。clone して HTTP handler などに渡せる
#[derive(Clone)]
pub struct StatusReporter {
    worker: String,
    hostname: String,
    queue: String,
    transport: String,
    registry: Arc<TaskRegistry>,
    state: watch::Receiver<WorkerState>,
}

impl StatusReporter {
    pub(crate) fn new(
        worker: String,
        hostname: String,
        queue: String,
        transport: String,
        registry: Arc<TaskRegistry>,
        state: watch::Receiver<WorkerState>,
    ) -> Self {
        Self {
            worker,
            hostname,
            queue,
            transport,
            registry,
            state,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            worker: self.worker.clone(),
            hostname: self.hostname.clone(),
            queue: self.queue.clone(),
            transport: self.transport.clone(),
            state: *self.state.borrow(),
            tasks: self.registry.names(),
            bindings: self.registry.bindings().to_vec(),
        }
    }
}

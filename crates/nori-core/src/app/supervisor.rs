//! Supervisor - worker が起動する非同期処理の木
//!
//! - 停止は 1 つの `CancellationToken` で全体に伝わる（2 回目以降の停止要求は何もしない）
//! - 起動した処理は `TaskTracker` で join する
//! - 最初に報告されたエラーだけを保持し、`wait` が返す
//!
//! どれかの処理がエラーで終わると木全体を停止します。

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::error;

use super::worker_loop::WorkerError;

#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    token: CancellationToken,
    tracker: TaskTracker,
    first_error: Arc<Mutex<Option<WorkerError>>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 監視下で `unit` を起動する
    pub fn spawn<F>(&self, name: &'static str, unit: F)
    where
        F: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        let supervisor = self.clone();
        self.tracker.spawn(async move {
            if let Err(err) = unit.await {
                error!(unit = name, error = %err, "supervised unit failed");
                supervisor.record(err);
                supervisor.kill();
            }
        });
    }

    /// 停止を要求する。完了は待たない
    pub fn kill(&self) {
        self.token.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 起動済みの処理がすべて終わるまで待ち、最初のエラーを返す
    pub async fn wait(&self) -> Result<(), WorkerError> {
        self.tracker.close();
        self.tracker.wait().await;

        let first = self
            .first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(&self, err: WorkerError) {
        let mut slot = self
            .first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

//! WorkerContext - Transport に渡す worker の情報

use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::supervisor::Supervisor;
use super::worker_loop::WorkerError;

#[derive(Debug, Clone)]
pub struct WorkerContext {
    worker_name: String,
    hostname: String,
    supervisor: Supervisor,
}

impl WorkerContext {
    pub fn new(
        worker_name: impl Into<String>,
        hostname: impl Into<String>,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            hostname: hostname.into(),
            supervisor,
        }
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// worker 全体の停止シグナル
    pub fn cancellation(&self) -> CancellationToken {
        self.supervisor.token()
    }

    /// Transport 内部の処理（delivery の decode など）を worker の監視下で起動する
    pub fn spawn<F>(&self, name: &'static str, unit: F)
    where
        F: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        self.supervisor.spawn(name, unit);
    }
}

//! WorkerBuilder - worker の構築とワイヤリング
//!
//! # Fail-fast
//! - タスク名の二重登録は `register` の時点で `RegistryError`
//! - `expect_tasks` で宣言したタスクが揃っていなければ `build` が `BuildError`
//! - 設定の検証も `build` で行う
//!
//! いずれも broker に触れる前に起動を止めます。

use super::worker_loop::Worker;
use crate::config::{ConfigError, WorkerConfig};
use crate::ports::Transport;
use crate::typed::{DynHandler, Handler, RegistryError, Task, TaskRegistry};

/// WorkerBuilder は Worker を構築
///
/// # 使用例
/// ```ignore
/// let worker = WorkerBuilder::new("tasks")
///     .register::<Add, _>(AddHandler)?
///     .expect_tasks(&["add"])
///     .transport(AmqpTransport::from_config(&config)?)
///     .build()?;
/// ```
pub struct WorkerBuilder {
    config: WorkerConfig,
    registry: TaskRegistry,
    transport: Option<Box<dyn Transport>>,
    expected_tasks: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing tasks: {0:?}. These tasks were expected but not registered.")]
    MissingTaskNames(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl WorkerBuilder {
    /// 既定の設定で、worker 名だけを指定する
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(WorkerConfig::named(name))
    }

    /// タスクの namespace は `config.name`
    pub fn from_config(config: WorkerConfig) -> Self {
        Self {
            registry: TaskRegistry::new(config.name.clone()),
            config,
            transport: None,
            expected_tasks: None,
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_dyn(
        mut self,
        local: &str,
        handler: impl DynHandler + 'static,
    ) -> Result<Self, RegistryError> {
        self.registry.register_dyn(local, handler)?;
        Ok(self)
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// 必ず登録されているべきタスクのローカル名
    pub fn expect_tasks(mut self, local_names: &[&str]) -> Self {
        self.expected_tasks = Some(
            local_names
                .iter()
                .map(|local| self.registry.qualify(local))
                .collect(),
        );
        self
    }

    pub fn build(self) -> Result<Worker, BuildError> {
        self.config.validate()?;

        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskNames(missing_tasks));
            }
        }

        Ok(Worker::new(self.config, self.registry, self.transport))
    }
}

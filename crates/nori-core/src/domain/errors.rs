//! Errors - タスク実行のエラー
//!
//! dispatch 経路で起きるものだけをここに置く。
//! 接続系は `ports::TransportError`、登録系は `typed::RegistryError`。

use std::fmt;

use thiserror::Error;

/// TaskError は 1 件の Request の処理失敗
///
/// どの variant でも delivery は ack されず、再配送は broker の方針に任せる。
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("unknown task {0:?}")]
    UnknownTask(String),

    #[error("invalid arguments for task {task:?}: {source}")]
    InvalidArguments {
        task: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode output of task {task:?}: {source}")]
    InvalidOutput {
        task: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    /// Handler が返す汎用エラー
    pub fn failed(message: impl fmt::Display) -> Self {
        TaskError::Failed(message.to_string())
    }
}

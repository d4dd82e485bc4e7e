//! TaskStatus - 実行結果の状態
//!
//! ワイヤ上では SCREAMING_SNAKE_CASE（`SUCCESS` / `FAILURE` / ...）で表す。

use std::fmt;

use serde::{Deserialize, Serialize};

/// Celery の result backend が知っている状態
///
/// Handler が明示しない限り `Success`。
/// `Failure` / `Revoked` / `Success` が終端状態で、body が意味を持つのは終端のときだけ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Success,
    Failure,
    Revoked,
    Started,
    Received,
    Retry,
    Pending,
}

impl TaskStatus {
    /// ワイヤ上の status 文字列
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::Revoked => "REVOKED",
            TaskStatus::Started => "STARTED",
            TaskStatus::Received => "RECEIVED",
            TaskStatus::Retry => "RETRY",
            TaskStatus::Pending => "PENDING",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Revoked
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! App - アプリケーション層
//!
//! ports と typed を組み合わせて worker を動かします。
//!
//! # 主要コンポーネント
//! - **WorkerBuilder**: 登録・設定・起動時検証
//! - **Worker**: 接続・受信・dispatch・返信のループ
//! - **Supervisor**: 停止シグナルと join、最初のエラーの保持
//! - **StatusReporter**: 読み取り専用の status snapshot

pub mod builder;
pub mod context;
pub mod status;
pub mod supervisor;
pub mod worker_loop;

pub use self::builder::{BuildError, WorkerBuilder};
pub use self::context::WorkerContext;
pub use self::status::{StatusReporter, StatusSnapshot, WorkerState};
pub use self::supervisor::Supervisor;
pub use self::worker_loop::{Worker, WorkerError};

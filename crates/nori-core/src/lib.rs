//! nori-core
//!
//! Celery 互換の AMQP タスク worker を作るための部品です。
//!
//! # モジュール構成
//! - **domain**: 引数コンテナ（ArgMap / KWArgMap）、Request / Response、TaskStatus、TaskError
//! - **protocol**: Celery protocol v1 の envelope と codec
//! - **typed**: 型付き Task API（Task trait, Handler trait, TaskRegistry）
//! - **ports**: Transport / Delivery の抽象
//! - **impls**: AMQP（lapin）と in-memory の Transport、AMQP の管理操作
//! - **app**: WorkerBuilder, Worker, Supervisor, status snapshot
//! - **config**: WorkerConfig

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod protocol;
pub mod typed;

pub use crate::app::{BuildError, Worker, WorkerBuilder, WorkerError, WorkerState};
pub use crate::config::{ConfigError, WorkerConfig};
pub use crate::domain::{ArgMap, KWArgMap, Request, Response, TaskError, TaskStatus};
pub use crate::typed::{ArgShape, DynHandler, FnHandler, Handler, Task};

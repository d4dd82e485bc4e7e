//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **AmqpTransport**: lapin による本番用 Transport（`amqp`）
//! - **AmqpAdmin**: exchange / queue / binding の管理操作（`amqp`）
//! - **InMemoryTransport**: 開発・テスト用の Transport

pub mod amqp;
pub mod inmem_transport;
pub mod pump;

pub use self::amqp::{AmqpAdmin, AmqpTransport};
pub use self::inmem_transport::{InMemoryBroker, InMemoryTransport, Outcome, PublishedReply};

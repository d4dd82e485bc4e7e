//! Ports - 抽象化レイヤー
//!
//! worker が broker に求めるものはここにある trait だけです。
//! - **Transport**: 接続・トポロジ宣言・受信・返信
//! - **Delivery**: 受信した 1 メッセージへの ack / nack / reject
//!
//! 本番実装（AMQP）とテスト用実装（in-memory）は `impls` にあります。

pub mod delivery;
pub mod transport;

pub use self::delivery::Delivery;
pub use self::transport::{Transport, TransportError};

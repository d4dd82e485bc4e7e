//! Delivery port - broker から届いた 1 メッセージの確認ハンドル
//!
//! Transport が decode 時に `Request` へ結びつけます。
//! 同じ delivery に対して確認操作を行うのは 1 回だけです。

use std::fmt;

use async_trait::async_trait;

use super::transport::TransportError;

#[async_trait]
pub trait Delivery: Send + Sync + fmt::Debug {
    /// 処理済みとして broker から消す
    async fn ack(&self) -> Result<(), TransportError>;

    /// 否認する。`requeue = false` なら破棄（poison message）
    async fn nack(&self, requeue: bool) -> Result<(), TransportError>;

    async fn reject(&self, requeue: bool) -> Result<(), TransportError>;
}

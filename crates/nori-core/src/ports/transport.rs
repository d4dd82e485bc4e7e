//! Transport port - broker との接続と配送
//!
//! # 呼び出し順
//! 1. `init`: worker の context を結びつける（1 回だけ）
//! 2. `setup`: 接続・チャネルを開き exchange を宣言する（接続試行ごとに 1 回）
//! 3. `consume`: queue を宣言・bind して、decode 済み Request のチャネルを返す
//! 4. `reply` / `ack` / `nack` / `reject`: 1 件ごと
//! 5. `close`: 接続を解放する（未接続でも安全）
//!
//! decode に失敗した delivery は Transport の中で nack(requeue=false) され、
//! Request のチャネルには流れません。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::delivery::Delivery;
use crate::app::WorkerContext;
use crate::domain::{Request, Response};
use crate::protocol::CodecError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is already initialized")]
    AlreadyInitialized,

    #[error("transport is not initialized")]
    NotInitialized,

    #[error("transport is not connected")]
    NotConnected,

    #[error("task {task_id} has no reply destination")]
    NoReplyDestination { task_id: String },

    #[error("task {task_id} carries no delivery handle")]
    NoDeliveryHandle { task_id: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("transport is closed")]
    Closed,
}

impl From<lapin::Error> for TransportError {
    fn from(err: lapin::Error) -> Self {
        TransportError::Broker(err.to_string())
    }
}

/// broker transport
///
/// `Display` は起動ログと status snapshot に出る説明文（資格情報は含めない）。
#[async_trait]
pub trait Transport: Send + Sync + fmt::Display {
    /// worker の context を結びつける。2 回目は `AlreadyInitialized`
    fn init(&mut self, ctx: WorkerContext) -> Result<(), TransportError>;

    async fn setup(&mut self) -> Result<(), TransportError>;

    async fn consume(&mut self, queue: &str) -> Result<mpsc::Receiver<Request>, TransportError>;

    /// response を返信先へ publish する。返信先がなければ `NoReplyDestination`
    async fn reply(&self, request: &Request, response: &Response) -> Result<(), TransportError>;

    async fn ack(&self, request: &Request) -> Result<(), TransportError> {
        delivery_of(request)?.ack().await
    }

    async fn nack(&self, request: &Request, requeue: bool) -> Result<(), TransportError> {
        delivery_of(request)?.nack(requeue).await
    }

    async fn reject(&self, request: &Request, requeue: bool) -> Result<(), TransportError> {
        delivery_of(request)?.reject(requeue).await
    }

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Request が持つ delivery handle。合成された Request には無い。
pub fn delivery_of(request: &Request) -> Result<&Arc<dyn Delivery>, TransportError> {
    request
        .delivery()
        .ok_or_else(|| TransportError::NoDeliveryHandle {
            task_id: request.id.clone(),
        })
}

/// reply の宛先。Response 側の返信先を正とする。
pub fn reply_destination(response: &Response) -> Result<&str, TransportError> {
    response
        .reply_to()
        .ok_or_else(|| TransportError::NoReplyDestination {
            task_id: response.id().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_request_has_no_delivery_handle() {
        let request = Request::new("tasks.add", "X");
        let err = delivery_of(&request).unwrap_err();
        assert!(matches!(err, TransportError::NoDeliveryHandle { task_id } if task_id == "X"));
    }

    #[test]
    fn response_without_reply_to_has_no_destination() {
        let response = Request::new("tasks.add", "X").new_response();
        let err = reply_destination(&response).unwrap_err();
        assert!(matches!(err, TransportError::NoReplyDestination { task_id } if task_id == "X"));
    }

    #[test]
    fn reply_destination_comes_from_response() {
        let response = Request::new("tasks.add", "X")
            .with_reply_to("amq.gen-1")
            .new_response();
        assert_eq!(reply_destination(&response).unwrap(), "amq.gen-1");
    }
}

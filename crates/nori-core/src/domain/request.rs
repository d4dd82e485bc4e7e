//! Request / Response - 1 回のタスク呼び出しとその結果
//!
//! # ライフサイクル
//! - `Request`: Transport が delivery を decode して作る → dispatch で 1 回だけ消費 → reply/ack 後に破棄
//! - `Response`: `Request::new_response()` で作る → Handler が `set_body` → Transport が encode
//!
//! delivery handle（ack/nack/reject の相手）は Request 自身が持つ。
//! 合成した Request（テストなど）は handle を持たないので ack できない。

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Number, Value};

use super::args::{ArgMap, KWArgMap};
use super::status::TaskStatus;
use super::timestamp::Timestamp;
use crate::ports::Delivery;
use crate::protocol::CeleryExceptionResult;

#[derive(Debug, Clone, Default)]
pub struct Request {
    /// 修飾済みタスク名（`server.local`）
    pub name: String,
    /// producer が振った相関 ID。Response にそのまま引き継ぐ
    pub id: String,
    pub args: ArgMap,
    pub kwargs: KWArgMap,
    pub retries: u32,
    pub eta: Option<Timestamp>,
    pub expires: Option<Timestamp>,
    pub utc: bool,
    pub callbacks: Vec<String>,
    pub errbacks: Vec<String>,
    /// `[soft, hard]` 秒。数値は受け取った表記のまま（整数は整数）
    pub timelimit: Option<[Option<Number>; 2]>,
    pub taskset: Option<String>,
    pub chord: Option<String>,
    reply_to: Option<String>,
    delivery: Option<Arc<dyn Delivery>>,
}

impl Request {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: ArgMap) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: KWArgMap) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// 空文字は「返信先なし」とみなす。
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        let reply_to = reply_to.into();
        self.reply_to = (!reply_to.is_empty()).then_some(reply_to);
        self
    }

    /// Transport が元の delivery を結びつける。
    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn delivery(&self) -> Option<&Arc<dyn Delivery>> {
        self.delivery.as_ref()
    }

    pub fn has_delivery(&self) -> bool {
        self.delivery.is_some()
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Handler 本体向け。欠けていれば panic（dispatch が回収する）。
    pub fn must_arg(&self, index: usize) -> &Value {
        self.args.must_get(index)
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    /// Handler 本体向け。欠けていれば panic（dispatch が回収する）。
    pub fn must_kwarg(&self, key: &str) -> &Value {
        self.kwargs.must_get(key)
    }

    /// ID と返信先を引き継いだ `Success` の Response を作る。
    pub fn new_response(&self) -> Response {
        Response {
            id: self.id.clone(),
            status: TaskStatus::Success,
            body: Value::Null,
            reply_to: self.reply_to.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    id: String,
    status: TaskStatus,
    body: Value,
    reply_to: Option<String>,
}

impl Response {
    /// 返信先のない Response。通常は `Request::new_response()` を使う。
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Success,
            body: Value::Null,
            reply_to: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    pub fn set_body<T: Serialize + ?Sized>(&mut self, body: &T) -> Result<(), serde_json::Error> {
        self.body = serde_json::to_value(body)?;
        Ok(())
    }

    /// 失敗を reply で明示する。status は `Failure`、body は Celery の例外形式。
    pub fn set_exception(&mut self, exc_type: impl Into<String>, message: impl Into<String>) {
        self.status = TaskStatus::Failure;
        self.body = CeleryExceptionResult::new(exc_type, message).into_value();
    }
}

//! TaskRegistry - Handler の登録と dispatch
//!
//! # 名前
//! 登録名は `{namespace}.{local}`（namespace は worker 名）。
//! 二重登録は `RegistryError::AlreadyRegistered` で、起動を中止させる前提です。
//!
//! # dispatch
//! Handler の panic は回収して `TaskError::HandlerPanicked` に変換します。
//! consume ループまで panic が伝わることはありません。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::{ArgShape, Task};
use crate::domain::{Request, Response, TaskError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task {0:?} is already registered")]
    AlreadyRegistered(String),

    #[error("invalid task name {0:?}")]
    InvalidName(String),
}

/// 登録時に一度だけ作る Handler の型情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskBinding {
    pub name: String,
    pub request_type: &'static str,
    pub response_type: &'static str,
    pub shape: Option<ArgShape>,
}

pub struct TaskRegistry {
    namespace: String,
    handlers: HashMap<String, Arc<dyn DynHandler>>,
    bindings: Vec<TaskBinding>,
}

impl TaskRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            handlers: HashMap::new(),
            bindings: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `{namespace}.{local}`
    pub fn qualify(&self, local: &str) -> String {
        format!("{}.{}", self.namespace, local)
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<&TaskBinding, RegistryError> {
        self.register_dyn(T::NAME, TypedHandler::<T, H>::new(handler))
    }

    /// Request を直接扱う Handler を登録する
    pub fn register_dyn(
        &mut self,
        local: &str,
        handler: impl DynHandler + 'static,
    ) -> Result<&TaskBinding, RegistryError> {
        if local.trim().is_empty() {
            return Err(RegistryError::InvalidName(local.to_string()));
        }

        let name = self.qualify(local);
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }

        let binding = TaskBinding {
            name: name.clone(),
            request_type: handler.request_type(),
            response_type: handler.response_type(),
            shape: handler.shape(),
        };
        self.handlers.insert(name, Arc::new(handler));
        self.bindings.push(binding);

        let index = self.bindings.len() - 1;
        Ok(&self.bindings[index])
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// 登録順の修飾名
    pub fn names(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.name.clone()).collect()
    }

    pub fn bindings(&self) -> &[TaskBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Request の名前で Handler を引いて実行する
    pub async fn dispatch(&self, request: &Request) -> Result<Response, TaskError> {
        let handler = self
            .get(&request.name)
            .ok_or_else(|| TaskError::UnknownTask(request.name.clone()))?;

        match AssertUnwindSafe(handler.call(request)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(TaskError::HandlerPanicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

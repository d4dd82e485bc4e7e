//! Handler trait - Task を実行する Handler の定義
//!
//! # 二層構造
//! - `Handler<T>`: 型付き。引数は `T` に decode 済み、戻り値は `T::Output`
//! - `DynHandler`: object-safe。Request を受けて Response を返す
//!
//! `TypedHandler<T, H>` が前者を後者に変換します（type erasure）。
//! Request を直接扱いたい Handler は `DynHandler` を実装するか、`FnHandler` でクロージャを包みます。

use std::any::type_name;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec::bind_args;
use super::task::{ArgShape, Task};
use crate::domain::{Request, Response, TaskError};

/// Handler は Task を実行して出力を返す
///
/// # 使用例
/// ```ignore
/// struct AddHandler;
///
/// #[async_trait]
/// impl Handler<Add> for AddHandler {
///     async fn handle(&self, _request: &Request, task: Add) -> Result<i64, TaskError> {
///         Ok(task.0 + task.1)
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, request: &Request, task: T) -> Result<T::Output, TaskError>;
}

/// DynHandler は object-safe な Handler
///
/// `HashMap<String, Arc<dyn DynHandler>>` に格納できます。
/// `request_type` / `response_type` / `shape` は登録時に一度だけ読まれます。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn call(&self, request: &Request) -> Result<Response, TaskError>;

    fn request_type(&self) -> &'static str {
        type_name::<Request>()
    }

    fn response_type(&self) -> &'static str {
        type_name::<Response>()
    }

    /// 型付き Handler だけが引数の形を持つ
    fn shape(&self) -> Option<ArgShape> {
        None
    }
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn call(&self, request: &Request) -> Result<Response, TaskError> {
        let task = bind_args::<T>(request)?;
        let output = self.handler.handle(request, task).await?;

        let mut response = request.new_response();
        response
            .set_body(&output)
            .map_err(|source| TaskError::InvalidOutput {
                task: request.name.clone(),
                source,
            })?;
        Ok(response)
    }

    fn request_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn response_type(&self) -> &'static str {
        type_name::<T::Output>()
    }

    fn shape(&self) -> Option<ArgShape> {
        Some(T::SHAPE)
    }
}

/// 同期クロージャを DynHandler にする
///
/// ```ignore
/// registry.register_dyn("ping", FnHandler::new(|request: &Request| {
///     let mut response = request.new_response();
///     response.set_body("pong").map_err(TaskError::failed)?;
///     Ok(response)
/// }))?;
/// ```
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Request) -> Result<Response, TaskError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> DynHandler for FnHandler<F>
where
    F: Fn(&Request) -> Result<Response, TaskError> + Send + Sync,
{
    async fn call(&self, request: &Request) -> Result<Response, TaskError> {
        (self.f)(request)
    }
}

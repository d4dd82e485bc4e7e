//! デモ用タスク
//!
//! worker 名が `tasks` なら `tasks.add` / `tasks.hello_world` として登録されます。

use async_trait::async_trait;
use nori_core::typed::RegistryError;
use nori_core::{Handler, Request, Task, TaskError, WorkerBuilder};
use serde::Deserialize;

/// `add(a, b) -> a + b`
#[derive(Debug, Deserialize)]
pub struct Add(pub i64, pub i64);

impl Task for Add {
    const NAME: &'static str = "add";
    type Output = i64;
}

pub struct AddHandler;

#[async_trait]
impl Handler<Add> for AddHandler {
    async fn handle(&self, _request: &Request, task: Add) -> Result<i64, TaskError> {
        let Add(a, b) = task;
        a.checked_add(b)
            .ok_or_else(|| TaskError::failed(format!("{a} + {b} overflows")))
    }
}

/// 引数なしで挨拶を返す
#[derive(Debug, Deserialize)]
pub struct HelloWorld {}

impl Task for HelloWorld {
    const NAME: &'static str = "hello_world";
    type Output = String;
}

pub struct HelloWorldHandler;

#[async_trait]
impl Handler<HelloWorld> for HelloWorldHandler {
    async fn handle(&self, request: &Request, _task: HelloWorld) -> Result<String, TaskError> {
        tracing::info!(task_id = %request.id, "hello world");
        Ok("Hello, world!".to_string())
    }
}

pub fn register(builder: WorkerBuilder) -> Result<WorkerBuilder, RegistryError> {
    builder
        .register::<Add, _>(AddHandler)?
        .register::<HelloWorld, _>(HelloWorldHandler)
}

pub const NAMES: &[&str] = &[Add::NAME, HelloWorld::NAME];

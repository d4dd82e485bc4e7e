//! Typed - 型付き Task API
//!
//! タスク名の typo を型で排除し、Handler との対応付けを登録時に確定させます。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::bind_args;
pub use self::handler::{DynHandler, FnHandler, Handler, TypedHandler};
pub use self::registry::{RegistryError, TaskBinding, TaskRegistry};
pub use self::task::{ArgShape, Task};

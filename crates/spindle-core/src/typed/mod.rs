//! Typed - handler 登録と型付き Task API
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `TaskHandler` trait - object-safe, payload bytes を受け取る

pub mod codec;
pub mod context;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::context::TaskContext;
pub use self::handler::{Handler, HandlerError, HandlerFn, TaskHandler, TypedHandler};
pub use self::registry::HandlerRegistry;
pub use self::task::Task;

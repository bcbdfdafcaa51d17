//! Task executor implementations.

pub mod local;

pub use local::{FnHandler, LocalTaskExecutor, TaskHandler};

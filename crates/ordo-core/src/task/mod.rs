//! Task dispatch boundary.
//!
//! Task and TaskChain strategies hand a `TaskRequest` to a `TaskExecutor`
//! and get back a task id. The executor later delivers the result, or a
//! `ResponseData::Error` wrapper, by resolving that id through the
//! wait/notify engine.

pub mod box_executor;
pub mod executor;

pub use box_executor::BoxTaskExecutor;
pub use executor::{TaskExecutor, TaskExecutorError};

//! Node execution engine and repository trait definitions for Ordo.
//!
//! This crate defines the "ports" (repository, task executor and step traits)
//! that the infrastructure layer and step authors implement, plus the
//! orchestration engine that drives node executions through their strategies.
//! It depends only on `ordo-types` -- never on `ordo-infra` or any database
//! crate.

pub mod engine;
pub mod event;
pub mod passthrough;
pub mod plan;
pub mod repository;
pub mod rollback;
pub mod step;
mod strategy;
pub mod task;
pub mod wait_notify;

//! Shared domain types for Ordo.
//!
//! This crate contains the vocabulary of the node execution engine: plans and
//! plan nodes, the ambiance context, node executions and their status machine,
//! executable responses, step responses, delegated task descriptions, rollback
//! sections and plans, engine events, configuration and repository errors.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod ambiance;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod plan;
pub mod response;
pub mod rollback;
pub mod task;

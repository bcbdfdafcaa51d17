//! Repository trait definitions (ports).
//!
//! The infrastructure layer (ordo-infra) implements these against SQLite; an
//! in-memory implementation lives here for tests and single-process use.

pub mod memory;
pub mod node_execution;

pub use memory::InMemoryNodeExecutionRepository;
pub use node_execution::NodeExecutionRepository;

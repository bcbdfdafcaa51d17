//! Infrastructure layer for Ordo.
//!
//! Contains implementations of the ports defined in `ordo-core`: the SQLite
//! node execution repository, an in-process task executor, and the
//! configuration loader.

pub mod config;
pub mod sqlite;
pub mod task;

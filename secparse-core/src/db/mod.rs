//! Database layer for secparse
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations rendered against configurable table names
//! - Sessions as the unit of work for reads and writes
//! - Chunked `IN (...)` lookups that stay under SQLite's parameter limit

pub mod query;
pub mod repo;
pub mod schema;

pub use query::{Field, FilingKey, SearchQuery, Table, CHUNK_SIZE, SQLITE_MAX_PARAMS};
pub use repo::{Conflict, ConflictKind, Database, InsertOutcome, Session};

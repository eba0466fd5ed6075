//! # secparse-core
//!
//! Storage for SEC EDGAR filing metadata and the financial data points
//! extracted from filing spreadsheets.
//!
//! This library provides:
//! - Domain types for industries, companies, filings and data points
//! - Database storage layer with SQLite
//! - Ingestion of statement grids into data points
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use secparse_core::{Company, Config, Database, Filing};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::from_config(&config).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let mut session = db.session().expect("failed to start session");
//! session.insert(Company::stub("0000320193")).expect("insert failed");
//! session
//!     .insert(Filing::new("0000320193-20-000096", "0000320193"))
//!     .expect("insert failed");
//! session.close().expect("commit failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::{CommitPolicy, Config, TableNames};
pub use db::{
    Conflict, ConflictKind, Database, Field, FilingKey, InsertOutcome, SearchQuery, Session, Table,
};
pub use error::{Error, Result};
pub use ingest::{Cell, IngestOutcome, Sheet};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod types;

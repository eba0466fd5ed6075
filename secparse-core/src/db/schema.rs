//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! Table names are not fixed: every migration is rendered against the
//! [`TableNames`] the store was opened with.

use crate::config::TableNames;
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
fn migrations(tables: &TableNames) -> Vec<String> {
    let TableNames {
        industry,
        company,
        filing,
        filing_data,
    } = tables;

    vec![
        // Version 1: industries, companies, filings and their data points
        format!(
            r#"
    CREATE TABLE IF NOT EXISTS {industry} (
        sic_code                TEXT PRIMARY KEY,
        ad_office               TEXT,
        industry_title          TEXT
    );

    CREATE TABLE IF NOT EXISTS {company} (
        company_cik             TEXT PRIMARY KEY,
        company_name            TEXT,
        company_ticker          TEXT,
        company_sic             TEXT REFERENCES {industry}(sic_code),
        company_state           TEXT,
        company_info_attempted  BOOLEAN NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS {filing} (
        filing_accession        TEXT PRIMARY KEY,
        company_cik             TEXT NOT NULL REFERENCES {company}(company_cik),
        form                    TEXT,
        period                  INTEGER,
        filed                   INTEGER,
        filing_url              TEXT,
        excel_url               TEXT,
        excel_path              TEXT,
        parsed_data             BOOLEAN NOT NULL DEFAULT 0,
        parsing_attempted       BOOLEAN NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS {filing_data} (
        filing_accession        TEXT NOT NULL REFERENCES {filing}(filing_accession),
        filing_term             TEXT NOT NULL,
        filing_type             TEXT,
        filing_value            REAL,
        value_period            INTEGER NOT NULL,

        PRIMARY KEY (filing_accession, filing_term, value_period)
    );

    CREATE INDEX IF NOT EXISTS idx_{filing}_cik ON {filing}(company_cik, filing_accession);
    "#
        ),
        // Version 2: lookups by URL during deduplication and download bookkeeping
        format!(
            r#"
    CREATE INDEX IF NOT EXISTS idx_{filing}_url ON {filing}(filing_url);
    CREATE INDEX IF NOT EXISTS idx_{filing}_excel_url ON {filing}(excel_url);
    CREATE INDEX IF NOT EXISTS idx_{company}_name ON {company}(company_name);
    "#
        ),
    ]
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection, tables: &TableNames) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in migrations(tables).iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

//! Filing data ingestion
//!
//! Turns the grid of one financial statement into [`FilingDataPoint`] rows.
//!
//! ```text
//!              column 1                 column 2
//! ┌──────────┬────────────────────────┬───────────────┐
//! │ Item     │ USD ($) Dec. 31, 2020  │ Dec. 31, 2019 │  ← headers name the period
//! ├──────────┼────────────────────────┼───────────────┤
//! │ Revenue  │ 100                    │ 90            │  ← one data point per cell
//! │ Section  │                        │               │  ← blank trailing cell, skipped
//! └──────────┴────────────────────────┴───────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use secparse_core::{Database, Sheet};
//!
//! let mut session = db.session()?;
//! for filing in session.select_filings_by_accessions(&["0000320193-20-000096"])? {
//!     let outcome = session.set_filing_data(&filing, &sheet, "BS")?;
//!     if !outcome.is_success() {
//!         tracing::warn!(?outcome, "Statement not stored");
//!     }
//! }
//! session.close()?;
//! ```

pub mod period;
mod sheet;

pub use sheet::{Cell, Sheet};

use crate::config::{CommitPolicy, TableNames};
use crate::db::repo::{insert_data_point, roll_back, Conflict, Session};
use crate::error::Result;
use crate::types::{FilingDataPoint, FilingWithCompany};
use rusqlite::Connection;

/// Result of storing one statement grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Every column was stored
    Stored { columns: usize, points: usize },
    /// The header row has no cell for this column
    MissingHeader { column: usize },
    /// The header is not text, or holds nothing beyond the currency annotation
    UnreadableHeader { column: usize },
    /// The header does not name a date
    UnparseablePeriod { column: usize, header: String },
    /// A data point was rejected by the store
    Conflict { column: usize, conflict: Conflict },
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IngestOutcome::Stored { .. })
    }
}

impl Session<'_> {
    /// Store the data points of `sheet` for `filing`, tagged with `data_type`.
    ///
    /// Each column after the first is one reporting period. After a column's
    /// points are written the filing is flagged `parsed_data`.
    ///
    /// With [`CommitPolicy::Atomic`] a failure leaves nothing from this call
    /// behind. With [`CommitPolicy::PerColumn`] every stored column is
    /// committed immediately, so columns before a failure persist. Work staged
    /// by other calls on this session is never discarded.
    pub fn set_filing_data(
        &mut self,
        filing: &FilingWithCompany,
        sheet: &Sheet,
        data_type: &str,
    ) -> Result<IngestOutcome> {
        let accession = filing.filing.accession.as_str();
        let width = sheet.width();

        if width <= 1 {
            tracing::debug!(accession, "Sheet has no value columns");
            return Ok(IngestOutcome::Stored {
                columns: 0,
                points: 0,
            });
        }

        let outcome = match self.commit_policy {
            CommitPolicy::Atomic => self.ingest_atomic(accession, sheet, data_type)?,
            CommitPolicy::PerColumn => self.ingest_per_column(accession, sheet, data_type)?,
        };

        match &outcome {
            IngestOutcome::Stored { columns, points } => {
                tracing::info!(accession, data_type, columns, points, "Filing data stored")
            }
            failure => tracing::warn!(accession, data_type, ?failure, "Filing data not stored"),
        }
        Ok(outcome)
    }

    fn ingest_atomic(
        &mut self,
        accession: &str,
        sheet: &Sheet,
        data_type: &str,
    ) -> Result<IngestOutcome> {
        let sp = self.conn.savepoint()?;
        let mut points = 0;

        for column in 1..sheet.width() {
            let column_points = match read_column(sheet, column, accession, data_type) {
                Ok(p) => p,
                Err(failure) => {
                    roll_back(sp)?;
                    return Ok(failure);
                }
            };

            if let Err(err) = store_column(&sp, self.tables, accession, &column_points) {
                let conflict = Conflict::from_sqlite(err)?;
                roll_back(sp)?;
                return Ok(IngestOutcome::Conflict { column, conflict });
            }
            points += column_points.len();
        }

        sp.commit()?;
        Ok(IngestOutcome::Stored {
            columns: sheet.width() - 1,
            points,
        })
    }

    fn ingest_per_column(
        &mut self,
        accession: &str,
        sheet: &Sheet,
        data_type: &str,
    ) -> Result<IngestOutcome> {
        let mut points = 0;

        for column in 1..sheet.width() {
            let column_points = match read_column(sheet, column, accession, data_type) {
                Ok(p) => p,
                Err(failure) => return Ok(failure),
            };

            let sp = self.conn.savepoint()?;
            if let Err(err) = store_column(&sp, self.tables, accession, &column_points) {
                let conflict = Conflict::from_sqlite(err)?;
                roll_back(sp)?;
                return Ok(IngestOutcome::Conflict { column, conflict });
            }
            sp.commit()?;
            self.commit()?;

            tracing::debug!(accession, column, points = column_points.len(), "Column committed");
            points += column_points.len();
        }

        Ok(IngestOutcome::Stored {
            columns: sheet.width() - 1,
            points,
        })
    }
}

/// Build the data points of one column, or the reason it cannot be stored.
fn read_column(
    sheet: &Sheet,
    column: usize,
    accession: &str,
    data_type: &str,
) -> std::result::Result<Vec<FilingDataPoint>, IngestOutcome> {
    let header = sheet
        .header(column)
        .ok_or(IngestOutcome::MissingHeader { column })?;
    let cleaned = header
        .as_text()
        .and_then(period::clean_header)
        .ok_or(IngestOutcome::UnreadableHeader { column })?;
    let date = period::parse_period(&cleaned).ok_or_else(|| IngestOutcome::UnparseablePeriod {
        column,
        header: cleaned.clone(),
    })?;
    let value_period = period::period_key(date);

    let last_column = sheet.width() - 1;
    let mut points = Vec::new();
    for row in sheet.data_rows() {
        // Section headings and notes leave the last column blank or absent
        match row.get(last_column) {
            Some(trailing) if !trailing.is_blank() => {}
            _ => continue,
        }
        let Some(cell) = row.get(column) else {
            continue;
        };

        let term = row.first().map(Cell::to_term).unwrap_or_default();
        let value = cell.to_value();
        if value.is_none() {
            tracing::warn!(
                accession,
                term = %term,
                column,
                cell = ?cell,
                "Non-numeric value stored as NULL"
            );
        }

        points.push(FilingDataPoint {
            accession: accession.to_string(),
            term,
            data_type: data_type.to_string(),
            value,
            value_period,
        });
    }

    Ok(points)
}

/// Insert a column's points and flag the filing as parsed.
fn store_column(
    conn: &Connection,
    tables: &TableNames,
    accession: &str,
    points: &[FilingDataPoint],
) -> rusqlite::Result<()> {
    for point in points {
        insert_data_point(conn, tables, point)?;
    }
    conn.execute(
        &format!(
            "UPDATE {} SET parsed_data = 1 WHERE filing_accession = ?1",
            tables.filing
        ),
        [accession],
    )?;
    Ok(())
}

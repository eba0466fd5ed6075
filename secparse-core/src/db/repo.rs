//! Database repository layer
//!
//! [`Database`] owns the connection; [`Session`] is one unit of work over it
//! and carries every query and insert operation.

use super::query::{chunk_terms, escape_like, placeholders, Field, FilingKey, SearchQuery, Table};
use crate::config::{CommitPolicy, Config, TableNames};
use crate::error::{Error, Result};
use crate::types::*;
use rusqlite::types::ToSql;
use rusqlite::{
    ffi, params, params_from_iter, Connection, DropBehavior, ErrorCode, OptionalExtension, Row,
    Savepoint,
};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Filing columns in join order, aliased `f`
const FILING_COLUMNS: &str = "f.filing_accession, f.company_cik, f.form, f.period, f.filed, \
     f.filing_url, f.excel_url, f.excel_path, f.parsed_data, f.parsing_attempted";

/// Number of columns in [`FILING_COLUMNS`]
const FILING_WIDTH: usize = 10;

/// Company columns in join order, aliased `c`
const COMPANY_COLUMNS: &str = "c.company_cik, c.company_name, c.company_ticker, c.company_sic, \
     c.company_state, c.company_info_attempted";

/// Kind of constraint a write ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Primary key or unique constraint
    Duplicate,
    /// Foreign key points at a missing row
    MissingReference,
    /// NOT NULL, CHECK and anything else
    Other,
}

/// A write rejected by a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// SQLite's message, e.g. "UNIQUE constraint failed: company_info.company_cik"
    pub message: String,
}

impl Conflict {
    /// Split constraint violations from every other SQLite failure.
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> std::result::Result<Self, rusqlite::Error> {
        if let rusqlite::Error::SqliteFailure(e, msg) = &err {
            if e.code == ErrorCode::ConstraintViolation {
                let kind = match e.extended_code {
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
                        ConflictKind::Duplicate
                    }
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConflictKind::MissingReference,
                    _ => ConflictKind::Other,
                };
                return Ok(Conflict {
                    kind,
                    message: msg.clone().unwrap_or_else(|| e.to_string()),
                });
            }
        }
        Err(err)
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Result of a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Every record was staged; holds the count
    Inserted(usize),
    /// A constraint rejected a record; nothing from the batch was kept
    Conflict(Conflict),
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

/// Database handle (single connection, serialized through sessions)
pub struct Database {
    conn: Mutex<Connection>,
    tables: TableNames,
    commit_policy: CommitPolicy,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path, tables: TableNames) -> Result<Self> {
        tables.validate()?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        tracing::debug!(path = %path.display(), "Opened database");

        Ok(Self {
            conn: Mutex::new(conn),
            tables,
            commit_policy: CommitPolicy::default(),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(tables: TableNames) -> Result<Self> {
        tables.validate()?;
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
            tables,
            commit_policy: CommitPolicy::default(),
        })
    }

    /// Open the database described by a loaded [`Config`]
    pub fn from_config(config: &Config) -> Result<Self> {
        let db = Self::open(
            &config.resolved_database_path(),
            config.database.tables.clone(),
        )?;
        Ok(db.with_commit_policy(config.ingest.commit))
    }

    /// Choose how [`Session::set_filing_data`] commits
    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit_policy = policy;
        self
    }

    /// Table names this store was opened with
    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        super::schema::run_migrations(&conn, &self.tables)
    }

    /// Begin a unit of work.
    ///
    /// The session holds the connection until it is closed or dropped.
    /// Closing commits; dropping without closing rolls back. While a session
    /// is open, further calls return [`Error::SessionInProgress`].
    pub fn session(&self) -> Result<Session<'_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN DEFERRED")?;
        tracing::trace!("Session opened");
        Ok(Session {
            conn,
            tables: &self.tables,
            commit_policy: self.commit_policy,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.try_lock().map_err(|e| match e {
            TryLockError::WouldBlock => Error::SessionInProgress,
            TryLockError::Poisoned(_) => Error::LockPoisoned,
        })
    }
}

/// One unit of work against a [`Database`].
///
/// All reads see the session's own uncommitted writes.
pub struct Session<'db> {
    pub(crate) conn: MutexGuard<'db, Connection>,
    pub(crate) tables: &'db TableNames,
    pub(crate) commit_policy: CommitPolicy,
}

impl<'db> Session<'db> {
    /// Table names in use
    pub fn tables(&self) -> &TableNames {
        self.tables
    }

    // ============================================
    // Transaction control
    // ============================================

    /// Commit pending writes and start a fresh transaction
    pub fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.conn.execute_batch("BEGIN DEFERRED")?;
        tracing::debug!("Session committed");
        Ok(())
    }

    /// Discard pending writes and start a fresh transaction
    pub fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        self.conn.execute_batch("BEGIN DEFERRED")?;
        tracing::debug!("Session rolled back");
        Ok(())
    }

    /// Commit pending writes and end the session.
    ///
    /// A failed commit is returned to the caller and the pending writes are
    /// rolled back when the session drops.
    pub fn close(self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        tracing::trace!("Session closed");
        Ok(())
    }

    // ============================================
    // Existence checks
    // ============================================

    /// True iff at least one row has `field = value`
    pub fn exists<V: ToSql>(&self, field: Field, value: V) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            field.table().name(self.tables),
            field.column()
        );
        let found: bool = self.conn.query_row(&sql, [value], |r| r.get(0))?;
        Ok(found)
    }

    pub fn cik_exists(&self, cik: &str) -> Result<bool> {
        self.exists(Field::CompanyCik, cik)
    }

    pub fn filing_url_exists(&self, filing_url: &str) -> Result<bool> {
        self.exists(Field::FilingUrl, filing_url)
    }

    pub fn accession_exists(&self, accession: &str) -> Result<bool> {
        self.exists(Field::FilingAccession, accession)
    }

    /// Row count of a table
    pub fn count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name(self.tables));
        let count: i64 = self.conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(count)
    }

    pub fn count_industries(&self) -> Result<i64> {
        self.count(Table::Industry)
    }

    // ============================================
    // Single-row reads
    // ============================================

    /// Get a company by CIK
    pub fn get_company(&self, cik: &str) -> Result<Option<Company>> {
        let sql = format!(
            "SELECT {} FROM {} c WHERE c.company_cik = ?1",
            COMPANY_COLUMNS, self.tables.company
        );
        self.conn
            .query_row(&sql, [cik], |row| row_to_company(row, 0))
            .optional()
            .map_err(Error::from)
    }

    /// Get a filing by accession number
    pub fn get_filing(&self, accession: &str) -> Result<Option<Filing>> {
        let sql = format!(
            "SELECT {} FROM {} f WHERE f.filing_accession = ?1",
            FILING_COLUMNS, self.tables.filing
        );
        self.conn
            .query_row(&sql, [accession], |row| row_to_filing(row, 0))
            .optional()
            .map_err(Error::from)
    }

    /// Data points stored for a filing, by period then term
    pub fn get_data_points(&self, accession: &str) -> Result<Vec<FilingDataPoint>> {
        let sql = format!(
            "SELECT filing_accession, filing_term, filing_type, filing_value, value_period
             FROM {} WHERE filing_accession = ?1
             ORDER BY value_period ASC, filing_term ASC",
            self.tables.filing_data
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let points = stmt
            .query_map([accession], row_to_data_point)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(points)
    }

    // ============================================
    // Filing / company joins
    // ============================================

    fn filing_join_sql(&self) -> String {
        format!(
            "SELECT {}, {} FROM {} f JOIN {} c ON c.company_cik = f.company_cik",
            FILING_COLUMNS, COMPANY_COLUMNS, self.tables.filing, self.tables.company
        )
    }

    fn query_filings<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<FilingWithCompany>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, row_to_filing_with_company)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every filing with its company
    pub fn select_all_filings(&self) -> Result<Vec<FilingWithCompany>> {
        self.query_filings(&self.filing_join_sql(), [])
    }

    /// Filings whose `key` column matches any of `terms`.
    ///
    /// Long term lists are queried in chunks; results come back chunk by
    /// chunk in input order, each chunk in the store's natural order.
    pub fn select_filings_by<S: AsRef<str>>(
        &self,
        key: FilingKey,
        terms: &[S],
    ) -> Result<Vec<FilingWithCompany>> {
        let chunks = chunk_terms(terms);
        if chunks.len() > 1 {
            tracing::debug!(
                terms = terms.len(),
                chunks = chunks.len(),
                ?key,
                "Chunking filing lookup"
            );
        }

        let mut results = Vec::new();
        for chunk in chunks {
            let sql = format!(
                "{} WHERE {} IN ({})",
                self.filing_join_sql(),
                key.qualified_column(),
                placeholders(chunk.len())
            );
            let params = params_from_iter(chunk.iter().map(|s| s.as_ref()));
            results.extend(self.query_filings(&sql, params)?);
        }
        Ok(results)
    }

    pub fn select_filings_by_ciks<S: AsRef<str>>(&self, ciks: &[S]) -> Result<Vec<FilingWithCompany>> {
        self.select_filings_by(FilingKey::Cik, ciks)
    }

    pub fn select_filings_by_accessions<S: AsRef<str>>(
        &self,
        accessions: &[S],
    ) -> Result<Vec<FilingWithCompany>> {
        self.select_filings_by(FilingKey::Accession, accessions)
    }

    pub fn select_filings_by_urls<S: AsRef<str>>(&self, urls: &[S]) -> Result<Vec<FilingWithCompany>> {
        self.select_filings_by(FilingKey::Url, urls)
    }

    /// Filings of an accepted form type that nobody has tried to parse yet
    pub fn select_filings_to_parse<S: AsRef<str>>(
        &self,
        valid_forms: &[S],
    ) -> Result<Vec<FilingWithCompany>> {
        if valid_forms.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{} WHERE f.parsing_attempted = 0 AND f.form IN ({})",
            self.filing_join_sql(),
            placeholders(valid_forms.len())
        );
        self.query_filings(&sql, params_from_iter(valid_forms.iter().map(|s| s.as_ref())))
    }

    /// Filings whose data has been stored
    pub fn select_parsed_filings(&self) -> Result<Vec<Filing>> {
        let sql = format!(
            "SELECT {} FROM {} f WHERE f.parsed_data = 1",
            FILING_COLUMNS, self.tables.filing
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let filings = stmt
            .query_map([], |row| row_to_filing(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(filings)
    }

    /// Resolve a search to CIKs, then to filings.
    ///
    /// `None` when the search matched no company.
    pub fn search(&self, query: &SearchQuery) -> Result<Option<Vec<FilingWithCompany>>> {
        let ciks = match query {
            SearchQuery::All => return self.select_all_filings().map(Some),
            SearchQuery::Cik(term) => self.select_ciks_by_cik(term)?,
            SearchQuery::Ticker(term) => self.select_ciks_by_ticker(term)?,
            SearchQuery::Sic(term) => self.select_ciks_by_sic(term)?,
            SearchQuery::State(term) => self.select_ciks_by_state(term)?,
            SearchQuery::Name(term) => self.select_ciks_by_name(term)?,
        };

        match ciks {
            Some(ciks) => self.select_filings_by_ciks(&ciks).map(Some),
            None => Ok(None),
        }
    }

    // ============================================
    // CIK lookups
    // ============================================

    /// Every stored CIK
    pub fn select_all_ciks(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT company_cik FROM {} ORDER BY company_cik",
            self.tables.company
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let ciks = stmt
            .query_map([], |r| r.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ciks)
    }

    fn select_ciks_where(
        &self,
        field: Field,
        condition: &str,
        term: &str,
    ) -> Result<Option<Vec<String>>> {
        let sql = format!(
            "SELECT DISTINCT company_cik FROM {} WHERE {} {} ORDER BY company_cik",
            self.tables.company,
            field.column(),
            condition
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let ciks = stmt
            .query_map([term], |r| r.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        if ciks.is_empty() {
            tracing::info!(column = field.column(), term, "No companies matched");
            return Ok(None);
        }
        Ok(Some(ciks))
    }

    fn select_ciks_matching(&self, field: Field, term: &str) -> Result<Option<Vec<String>>> {
        self.select_ciks_where(field, "= ?1 COLLATE NOCASE", term)
    }

    /// Case-insensitive exact match on CIK
    pub fn select_ciks_by_cik(&self, cik: &str) -> Result<Option<Vec<String>>> {
        self.select_ciks_matching(Field::CompanyCik, cik)
    }

    /// Case-insensitive exact match on state
    pub fn select_ciks_by_state(&self, state: &str) -> Result<Option<Vec<String>>> {
        self.select_ciks_matching(Field::CompanyState, state)
    }

    /// Exact match on SIC code
    pub fn select_ciks_by_sic(&self, sic_code: &str) -> Result<Option<Vec<String>>> {
        self.select_ciks_matching(Field::CompanySic, sic_code)
    }

    /// Case-insensitive exact match on ticker
    pub fn select_ciks_by_ticker(&self, ticker: &str) -> Result<Option<Vec<String>>> {
        self.select_ciks_matching(Field::CompanyTicker, ticker)
    }

    /// Case-insensitive substring match on company name
    pub fn select_ciks_by_name(&self, name: &str) -> Result<Option<Vec<String>>> {
        let pattern = format!("%{}%", escape_like(name));
        self.select_ciks_where(Field::CompanyName, "LIKE ?1 ESCAPE '\\'", &pattern)
    }

    /// Companies never enriched: no name and no attempt recorded
    pub fn select_ciks_needing_info(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT company_cik FROM {}
             WHERE company_name IS NULL AND company_info_attempted = 0
             ORDER BY company_cik",
            self.tables.company
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let ciks = stmt
            .query_map([], |r| r.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ciks)
    }

    /// Every data point joined with its filing, company and industry
    pub fn select_data_export(&self) -> Result<Vec<DataExportRow>> {
        let sql = format!(
            "SELECT d.filing_accession, d.filing_term, d.filing_type, d.filing_value, d.value_period,
                    f.form, f.period, f.filed, f.filing_url,
                    c.company_cik, c.company_name, c.company_ticker, c.company_state,
                    c.company_sic, s.ad_office, s.industry_title
             FROM {} d
             LEFT JOIN {} f ON f.filing_accession = d.filing_accession
             LEFT JOIN {} c ON c.company_cik = f.company_cik
             LEFT JOIN {} s ON s.sic_code = c.company_sic
             ORDER BY d.filing_accession, d.value_period, d.filing_term",
            self.tables.filing_data, self.tables.filing, self.tables.company, self.tables.industry
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DataExportRow {
                    accession: row.get(0)?,
                    term: row.get(1)?,
                    data_type: row.get(2)?,
                    value: row.get(3)?,
                    value_period: row.get(4)?,
                    form: row.get(5)?,
                    period: row.get(6)?,
                    filed: row.get(7)?,
                    filing_url: row.get(8)?,
                    company_cik: row.get(9)?,
                    company_name: row.get(10)?,
                    ticker: row.get(11)?,
                    state: row.get(12)?,
                    sic_code: row.get(13)?,
                    ad_office: row.get(14)?,
                    industry_title: row.get(15)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ============================================
    // Inserts
    // ============================================

    /// Stage one record
    pub fn insert<R: Into<Record>>(&mut self, record: R) -> Result<InsertOutcome> {
        self.insert_all(std::iter::once(record))
    }

    /// Stage records in order, without checking for existing keys first.
    ///
    /// The batch is all-or-nothing: on a constraint violation every record
    /// from this call is discarded and the conflict is returned. Writes are
    /// not committed until [`Session::commit`] or [`Session::close`].
    pub fn insert_all<I>(&mut self, records: I) -> Result<InsertOutcome>
    where
        I: IntoIterator,
        I::Item: Into<Record>,
    {
        let sp = self.conn.savepoint()?;
        let mut inserted = 0;

        for record in records {
            let record = record.into();
            if let Err(err) = insert_record(&sp, self.tables, &record) {
                let conflict = Conflict::from_sqlite(err)?;
                tracing::warn!(key = %record.key(), %conflict, "Insert rejected");
                roll_back(sp)?;
                return Ok(InsertOutcome::Conflict(conflict));
            }
            inserted += 1;
        }

        sp.commit()?;
        tracing::debug!(inserted, "Records staged");
        Ok(InsertOutcome::Inserted(inserted))
    }

    /// Insert a company or fill in its enrichment fields.
    ///
    /// Known values are never overwritten with `None`, and a recorded
    /// enrichment attempt is never cleared.
    pub fn upsert_company(&mut self, company: &Company) -> Result<InsertOutcome> {
        let sql = format!(
            r#"
            INSERT INTO {table} (company_cik, company_name, company_ticker, company_sic,
                                 company_state, company_info_attempted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(company_cik) DO UPDATE SET
                company_name = COALESCE(excluded.company_name, {table}.company_name),
                company_ticker = COALESCE(excluded.company_ticker, {table}.company_ticker),
                company_sic = COALESCE(excluded.company_sic, {table}.company_sic),
                company_state = COALESCE(excluded.company_state, {table}.company_state),
                company_info_attempted = MAX(excluded.company_info_attempted,
                                             {table}.company_info_attempted)
            "#,
            table = self.tables.company
        );

        let result = self.conn.execute(
            &sql,
            params![
                company.cik,
                company.name,
                company.ticker,
                company.sic_code,
                company.state,
                company.info_attempted,
            ],
        );

        match result {
            Ok(n) => Ok(InsertOutcome::Inserted(n)),
            Err(err) => {
                let conflict = Conflict::from_sqlite(err)?;
                tracing::warn!(cik = %company.cik, %conflict, "Company upsert rejected");
                Ok(InsertOutcome::Conflict(conflict))
            }
        }
    }

    /// Insert or refresh SIC industries; returns rows written
    pub fn upsert_industries<I>(&mut self, industries: I) -> Result<usize>
    where
        I: IntoIterator<Item = Industry>,
    {
        let sql = format!(
            r#"
            INSERT INTO {} (sic_code, ad_office, industry_title)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(sic_code) DO UPDATE SET
                ad_office = excluded.ad_office,
                industry_title = excluded.industry_title
            "#,
            self.tables.industry
        );

        let sp = self.conn.savepoint()?;
        let mut written = 0;
        {
            let mut stmt = sp.prepare(&sql)?;
            for industry in industries {
                written += stmt.execute(params![
                    industry.sic_code,
                    industry.ad_office,
                    industry.industry_title,
                ])?;
            }
        }
        sp.commit()?;

        tracing::info!(written, "Industries upserted");
        Ok(written)
    }

    // ============================================
    // Updates
    // ============================================

    /// Record where the workbook of the filing at `filing_url` was saved
    pub fn update_excel_path(&mut self, excel_path: &str, filing_url: &str) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET excel_path = ?1 WHERE filing_url = ?2",
            self.tables.filing
        );
        Ok(self.conn.execute(&sql, params![excel_path, filing_url])?)
    }

    /// Record where the workbook downloaded from `excel_url` was saved
    pub fn set_excel_path_for_excel_url(
        &mut self,
        excel_path: &str,
        excel_url: &str,
    ) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET excel_path = ?1 WHERE excel_url = ?2",
            self.tables.filing
        );
        Ok(self.conn.execute(&sql, params![excel_path, excel_url])?)
    }

    /// Forget a workbook path after the file has been removed
    pub fn clear_excel_path(&mut self, excel_path: &str) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET excel_path = NULL WHERE excel_path = ?1",
            self.tables.filing
        );
        Ok(self.conn.execute(&sql, [excel_path])?)
    }

    /// Flag filings at these URLs as having been through parsing
    pub fn mark_parsing_attempted<S: AsRef<str>>(&mut self, filing_urls: &[S]) -> Result<usize> {
        self.set_flag_where_in(Table::Filing, "parsing_attempted", "filing_url", filing_urls)
    }

    /// Flag these companies as having been through enrichment
    pub fn mark_company_info_attempted<S: AsRef<str>>(&mut self, ciks: &[S]) -> Result<usize> {
        self.set_flag_where_in(Table::Company, "company_info_attempted", "company_cik", ciks)
    }

    fn set_flag_where_in<S: AsRef<str>>(
        &mut self,
        table: Table,
        flag: &str,
        key: &str,
        terms: &[S],
    ) -> Result<usize> {
        let mut updated = 0;
        for chunk in chunk_terms(terms) {
            let sql = format!(
                "UPDATE {} SET {} = 1 WHERE {} IN ({})",
                table.name(self.tables),
                flag,
                key,
                placeholders(chunk.len())
            );
            updated += self
                .conn
                .execute(&sql, params_from_iter(chunk.iter().map(|s| s.as_ref())))?;
        }
        tracing::debug!(?table, flag, updated, "Flags set");
        Ok(updated)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            match self.conn.execute_batch("ROLLBACK") {
                Ok(()) => tracing::trace!("Session dropped, pending writes rolled back"),
                Err(e) => tracing::warn!(error = %e, "Rollback on session drop failed"),
            }
        }
    }
}

/// Roll a savepoint back and release it.
pub(crate) fn roll_back(mut sp: Savepoint<'_>) -> Result<()> {
    sp.set_drop_behavior(DropBehavior::Rollback);
    sp.finish()?;
    Ok(())
}

fn insert_record(conn: &Connection, tables: &TableNames, record: &Record) -> rusqlite::Result<()> {
    match record {
        Record::Industry(industry) => {
            conn.prepare_cached(&format!(
                "INSERT INTO {} (sic_code, ad_office, industry_title) VALUES (?1, ?2, ?3)",
                tables.industry
            ))?
            .execute(params![
                industry.sic_code,
                industry.ad_office,
                industry.industry_title,
            ])?;
        }
        Record::Company(company) => {
            conn.prepare_cached(&format!(
                r#"
                INSERT INTO {} (company_cik, company_name, company_ticker, company_sic,
                                company_state, company_info_attempted)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                tables.company
            ))?
            .execute(params![
                company.cik,
                company.name,
                company.ticker,
                company.sic_code,
                company.state,
                company.info_attempted,
            ])?;
        }
        Record::Filing(filing) => {
            conn.prepare_cached(&format!(
                r#"
                INSERT INTO {} (filing_accession, company_cik, form, period, filed, filing_url,
                                excel_url, excel_path, parsed_data, parsing_attempted)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                tables.filing
            ))?
            .execute(params![
                filing.accession,
                filing.company_cik,
                filing.form,
                filing.period,
                filing.filed,
                filing.filing_url,
                filing.excel_url,
                filing.excel_path,
                filing.parsed_data,
                filing.parsing_attempted,
            ])?;
        }
        Record::DataPoint(point) => insert_data_point(conn, tables, point)?,
    }
    Ok(())
}

pub(crate) fn insert_data_point(
    conn: &Connection,
    tables: &TableNames,
    point: &FilingDataPoint,
) -> rusqlite::Result<()> {
    conn.prepare_cached(&format!(
        r#"
        INSERT INTO {} (filing_accession, filing_term, filing_type, filing_value, value_period)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        tables.filing_data
    ))?
    .execute(params![
        point.accession,
        point.term,
        point.data_type,
        point.value,
        point.value_period,
    ])?;
    Ok(())
}

fn row_to_company(row: &Row, offset: usize) -> rusqlite::Result<Company> {
    Ok(Company {
        cik: row.get(offset)?,
        name: row.get(offset + 1)?,
        ticker: row.get(offset + 2)?,
        sic_code: row.get(offset + 3)?,
        state: row.get(offset + 4)?,
        info_attempted: row.get::<_, Option<bool>>(offset + 5)?.unwrap_or(false),
    })
}

fn row_to_filing(row: &Row, offset: usize) -> rusqlite::Result<Filing> {
    Ok(Filing {
        accession: row.get(offset)?,
        company_cik: row.get(offset + 1)?,
        form: row.get(offset + 2)?,
        period: row.get(offset + 3)?,
        filed: row.get(offset + 4)?,
        filing_url: row.get(offset + 5)?,
        excel_url: row.get(offset + 6)?,
        excel_path: row.get(offset + 7)?,
        parsed_data: row.get::<_, Option<bool>>(offset + 8)?.unwrap_or(false),
        parsing_attempted: row.get::<_, Option<bool>>(offset + 9)?.unwrap_or(false),
    })
}

fn row_to_filing_with_company(row: &Row) -> rusqlite::Result<FilingWithCompany> {
    Ok(FilingWithCompany {
        filing: row_to_filing(row, 0)?,
        company: row_to_company(row, FILING_WIDTH)?,
    })
}

fn row_to_data_point(row: &Row) -> rusqlite::Result<FilingDataPoint> {
    Ok(FilingDataPoint {
        accession: row.get(0)?,
        term: row.get(1)?,
        data_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        value: row.get(3)?,
        value_period: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory(TableNames::default()).unwrap();
        db.migrate().unwrap();
        db
    }

    fn create_test_company(cik: &str, name: &str) -> Company {
        Company {
            cik: cik.to_string(),
            name: Some(name.to_string()),
            ticker: None,
            sic_code: None,
            state: None,
            info_attempted: true,
        }
    }

    fn create_test_filing(accession: &str, cik: &str) -> Filing {
        Filing {
            form: Some("10-K".to_string()),
            period: Some(20201231),
            filed: Some(20210115163012),
            filing_url: Some(format!("https://www.sec.gov/{}-index.htm", accession)),
            excel_url: Some(Filing::excel_url_for(cik, accession)),
            ..Filing::new(accession, cik)
        }
    }

    #[test]
    fn test_company_and_filing_crud() {
        let db = test_db();
        let mut session = db.session().unwrap();

        let company = create_test_company("0000320193", "Apple Inc");
        assert!(session.insert(company.clone()).unwrap().is_inserted());

        let filing = create_test_filing("0000320193-20-000096", "0000320193");
        assert!(session.insert(filing.clone()).unwrap().is_inserted());

        assert_eq!(session.get_company("0000320193").unwrap(), Some(company));
        assert_eq!(
            session.get_filing("0000320193-20-000096").unwrap(),
            Some(filing)
        );
        assert!(session.get_filing("missing").unwrap().is_none());
    }

    #[test]
    fn test_exists_checks() {
        let db = test_db();
        let mut session = db.session().unwrap();

        assert!(!session.cik_exists("0001").unwrap());
        assert!(!session.accession_exists("A1").unwrap());

        session.insert(create_test_company("0001", "Acme")).unwrap();
        session.insert(create_test_filing("A1", "0001")).unwrap();

        assert!(session.cik_exists("0001").unwrap());
        assert!(session.accession_exists("A1").unwrap());
        assert!(session
            .filing_url_exists("https://www.sec.gov/A1-index.htm")
            .unwrap());
        assert!(!session.filing_url_exists("https://www.sec.gov/A2-index.htm").unwrap());
        assert!(session.exists(Field::CompanyName, "Acme").unwrap());
        assert!(session.exists(Field::FilingForm, "10-K").unwrap());
        assert!(!session.exists(Field::CompanyTicker, "ACME").unwrap());
    }

    #[test]
    fn test_duplicate_insert_is_conflict() {
        let db = test_db();
        let mut session = db.session().unwrap();

        session.insert(create_test_company("0001", "Acme")).unwrap();

        // The batch is discarded as a whole
        let outcome = session
            .insert_all(vec![
                create_test_company("0002", "Beta"),
                create_test_company("0001", "Acme again"),
            ])
            .unwrap();

        match outcome {
            InsertOutcome::Conflict(conflict) => {
                assert_eq!(conflict.kind, ConflictKind::Duplicate);
                assert!(conflict.message.contains("company_cik"));
            }
            other => panic!("Expected conflict, got {:?}", other),
        }
        assert!(!session.cik_exists("0002").unwrap());
        assert_eq!(
            session.get_company("0001").unwrap().unwrap().name.as_deref(),
            Some("Acme")
        );
    }

    #[test]
    fn test_filing_requires_company() {
        let db = test_db();
        let mut session = db.session().unwrap();

        let outcome = session.insert(create_test_filing("A1", "0404")).unwrap();
        match outcome {
            InsertOutcome::Conflict(conflict) => {
                assert_eq!(conflict.kind, ConflictKind::MissingReference)
            }
            other => panic!("Expected conflict, got {:?}", other),
        }

        session.insert(Company::stub("0404")).unwrap();
        assert!(session
            .insert(create_test_filing("A1", "0404"))
            .unwrap()
            .is_inserted());
    }

    #[test]
    fn test_mixed_record_batch() {
        let db = test_db();
        let mut session = db.session().unwrap();

        let records: Vec<Record> = vec![
            Industry {
                sic_code: "3571".to_string(),
                ad_office: Some("Office of Technology".to_string()),
                industry_title: Some("Electronic Computers".to_string()),
            }
            .into(),
            Company {
                sic_code: Some("3571".to_string()),
                ..create_test_company("0001", "Acme")
            }
            .into(),
            create_test_filing("A1", "0001").into(),
        ];

        assert_eq!(
            session.insert_all(records).unwrap(),
            InsertOutcome::Inserted(3)
        );
        assert_eq!(session.count(Table::Filing).unwrap(), 1);
        assert_eq!(session.count_industries().unwrap(), 1);
    }

    #[test]
    fn test_rollback_and_drop_discard_writes() {
        let db = test_db();

        {
            let mut session = db.session().unwrap();
            session.insert(create_test_company("0001", "Acme")).unwrap();
            session.rollback().unwrap();
            assert!(!session.cik_exists("0001").unwrap());

            session.insert(create_test_company("0002", "Beta")).unwrap();
            // dropped without close
        }

        let session = db.session().unwrap();
        assert!(!session.cik_exists("0002").unwrap());
        session.close().unwrap();
    }

    #[test]
    fn test_one_session_at_a_time() {
        let db = test_db();

        let session = db.session().unwrap();
        assert!(matches!(db.session(), Err(Error::SessionInProgress)));
        assert!(matches!(db.migrate(), Err(Error::SessionInProgress)));
        session.close().unwrap();

        assert!(db.session().is_ok());
    }

    #[test]
    fn test_close_commits() {
        let db = test_db();

        let mut session = db.session().unwrap();
        session.insert(create_test_company("0001", "Acme")).unwrap();
        session.close().unwrap();

        let session = db.session().unwrap();
        assert!(session.cik_exists("0001").unwrap());
    }

    #[test]
    fn test_select_filings_by_keys() {
        let db = test_db();
        let mut session = db.session().unwrap();

        session
            .insert_all(vec![
                create_test_company("0001", "Acme"),
                create_test_company("0002", "Beta"),
            ])
            .unwrap();
        session
            .insert_all(vec![
                create_test_filing("A1", "0001"),
                create_test_filing("A2", "0001"),
                create_test_filing("B1", "0002"),
            ])
            .unwrap();

        assert_eq!(session.select_all_filings().unwrap().len(), 3);

        let by_cik = session.select_filings_by_ciks(&["0001"]).unwrap();
        assert_eq!(by_cik.len(), 2);
        assert!(by_cik.iter().all(|r| r.company.cik == "0001"));
        assert_eq!(by_cik[0].company.name.as_deref(), Some("Acme"));

        let by_accession = session.select_filings_by_accessions(&["B1", "nope"]).unwrap();
        assert_eq!(by_accession.len(), 1);
        assert_eq!(by_accession[0].company.cik, "0002");

        let by_url = session
            .select_filings_by_urls(&["https://www.sec.gov/A2-index.htm".to_string()])
            .unwrap();
        assert_eq!(by_url.len(), 1);
        assert_eq!(by_url[0].filing.accession, "A2");

        let none: Vec<String> = Vec::new();
        assert!(session.select_filings_by_ciks(&none).unwrap().is_empty());
    }

    #[test]
    fn test_cik_lookups() {
        let db = test_db();
        let mut session = db.session().unwrap();

        session
            .insert(Industry {
                sic_code: "2834".to_string(),
                ad_office: None,
                industry_title: Some("Pharmaceutical Preparations".to_string()),
            })
            .unwrap();
        session
            .insert_all(vec![
                Company {
                    ticker: Some("ACME".to_string()),
                    state: Some("DE".to_string()),
                    sic_code: Some("2834".to_string()),
                    ..create_test_company("0001", "Acme Pharma Corp")
                },
                Company {
                    ticker: Some("BETA".to_string()),
                    state: Some("CA".to_string()),
                    ..create_test_company("0002", "Beta 100% Holdings")
                },
            ])
            .unwrap();

        assert_eq!(
            session.select_ciks_by_ticker("acme").unwrap(),
            Some(vec!["0001".to_string()])
        );
        assert_eq!(
            session.select_ciks_by_state("ca").unwrap(),
            Some(vec!["0002".to_string()])
        );
        assert_eq!(
            session.select_ciks_by_sic("2834").unwrap(),
            Some(vec!["0001".to_string()])
        );
        assert_eq!(
            session.select_ciks_by_name("PHARMA").unwrap(),
            Some(vec!["0001".to_string()])
        );
        assert_eq!(
            session.select_ciks_by_name("100%").unwrap(),
            Some(vec!["0002".to_string()])
        );
        assert_eq!(
            session.select_ciks_by_cik("0002").unwrap(),
            Some(vec!["0002".to_string()])
        );

        // Empty results are a value, not a failure
        assert_eq!(session.select_ciks_by_ticker("ZZZZ").unwrap(), None);
        assert_eq!(session.select_ciks_by_name("_").unwrap(), None);
        assert_eq!(session.select_ciks_by_state("NY").unwrap(), None);

        assert_eq!(
            session.select_all_ciks().unwrap(),
            vec!["0001".to_string(), "0002".to_string()]
        );
    }

    #[test]
    fn test_search() {
        let db = test_db();
        let mut session = db.session().unwrap();

        session
            .insert(Company {
                state: Some("DE".to_string()),
                ..create_test_company("0001", "Acme")
            })
            .unwrap();
        session.insert(create_test_company("0002", "Beta")).unwrap();
        session
            .insert_all(vec![
                create_test_filing("A1", "0001"),
                create_test_filing("B1", "0002"),
            ])
            .unwrap();

        assert_eq!(session.search(&SearchQuery::All).unwrap().unwrap().len(), 2);

        let found = session
            .search(&SearchQuery::State("DE".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filing.accession, "A1");

        assert!(session
            .search(&SearchQuery::Ticker("NOPE".to_string()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_upsert_company_keeps_known_fields() {
        let db = test_db();
        let mut session = db.session().unwrap();

        session.insert(Company::stub("0001")).unwrap();
        assert_eq!(
            session.select_ciks_needing_info().unwrap(),
            vec!["0001".to_string()]
        );

        session
            .upsert_company(&Company {
                ticker: Some("ACME".to_string()),
                ..create_test_company("0001", "Acme")
            })
            .unwrap();
        session
            .upsert_company(&Company {
                state: Some("DE".to_string()),
                ..Company::stub("0001")
            })
            .unwrap();

        let company = session.get_company("0001").unwrap().unwrap();
        assert_eq!(company.name.as_deref(), Some("Acme"));
        assert_eq!(company.ticker.as_deref(), Some("ACME"));
        assert_eq!(company.state.as_deref(), Some("DE"));
        assert!(company.info_attempted);
        assert!(session.select_ciks_needing_info().unwrap().is_empty());

        // Unknown industry violates the foreign key
        let outcome = session
            .upsert_company(&Company {
                sic_code: Some("9999".to_string()),
                ..Company::stub("0001")
            })
            .unwrap();
        assert!(!outcome.is_inserted());
    }

    #[test]
    fn test_upsert_industries() {
        let db = test_db();
        let mut session = db.session().unwrap();

        let industry = |code: &str, title: &str| Industry {
            sic_code: code.to_string(),
            ad_office: Some("Office of Manufacturing".to_string()),
            industry_title: Some(title.to_string()),
        };

        let written = session
            .upsert_industries(vec![industry("100", "Agriculture"), industry("200", "Food")])
            .unwrap();
        assert_eq!(written, 2);

        session
            .upsert_industries(vec![industry("200", "Agricultural Production")])
            .unwrap();
        assert_eq!(session.count_industries().unwrap(), 2);
        assert!(session
            .exists(Field::IndustryTitle, "Agricultural Production")
            .unwrap());
    }

    #[test]
    fn test_excel_path_bookkeeping() {
        let db = test_db();
        let mut session = db.session().unwrap();

        session.insert(create_test_company("0001", "Acme")).unwrap();
        session.insert(create_test_filing("A1", "0001")).unwrap();

        let updated = session
            .update_excel_path("/data/A1.xlsx", "https://www.sec.gov/A1-index.htm")
            .unwrap();
        assert_eq!(updated, 1);
        assert!(session.exists(Field::ExcelPath, "/data/A1.xlsx").unwrap());

        let excel_url = Filing::excel_url_for("0001", "A1");
        assert_eq!(
            session
                .set_excel_path_for_excel_url("/data/A1-v2.xlsx", &excel_url)
                .unwrap(),
            1
        );
        assert_eq!(
            session.get_filing("A1").unwrap().unwrap().excel_path.as_deref(),
            Some("/data/A1-v2.xlsx")
        );

        assert_eq!(session.clear_excel_path("/data/A1-v2.xlsx").unwrap(), 1);
        assert!(session.get_filing("A1").unwrap().unwrap().excel_path.is_none());
    }

    #[test]
    fn test_parse_flags() {
        let db = test_db();
        let mut session = db.session().unwrap();

        session.insert(create_test_company("0001", "Acme")).unwrap();
        session
            .insert_all(vec![
                create_test_filing("A1", "0001"),
                Filing {
                    form: Some("SC 13G".to_string()),
                    ..create_test_filing("A2", "0001")
                },
                create_test_filing("A3", "0001"),
            ])
            .unwrap();

        let to_parse = session.select_filings_to_parse(&["10-K", "10-Q"]).unwrap();
        assert_eq!(to_parse.len(), 2);

        let marked = session
            .mark_parsing_attempted(&["https://www.sec.gov/A1-index.htm"])
            .unwrap();
        assert_eq!(marked, 1);

        let to_parse = session.select_filings_to_parse(&["10-K", "10-Q"]).unwrap();
        assert_eq!(to_parse.len(), 1);
        assert_eq!(to_parse[0].filing.accession, "A3");

        session.insert(Company::stub("0002")).unwrap();
        assert_eq!(
            session.mark_company_info_attempted(&["0002", "0003"]).unwrap(),
            1
        );
        assert!(session.select_ciks_needing_info().unwrap().is_empty());
    }
}

//! Query vocabulary: tables, columns, lookup keys and parameter chunking.

use crate::config::TableNames;

/// SQLite's default limit on bound parameters per statement.
pub const SQLITE_MAX_PARAMS: usize = 999;

/// Values bound per statement once an `IN (...)` list has to be split.
pub const CHUNK_SIZE: usize = 995;

/// The four stored tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Industry,
    Company,
    Filing,
    FilingData,
}

impl Table {
    /// Configured name of this table
    pub fn name(self, tables: &TableNames) -> &str {
        match self {
            Table::Industry => &tables.industry,
            Table::Company => &tables.company,
            Table::Filing => &tables.filing,
            Table::FilingData => &tables.filing_data,
        }
    }
}

/// A column that can be probed with [`crate::Session::exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    SicCode,
    AdOffice,
    IndustryTitle,
    CompanyCik,
    CompanyName,
    CompanyTicker,
    CompanySic,
    CompanyState,
    FilingAccession,
    FilingCompanyCik,
    FilingForm,
    FilingUrl,
    ExcelUrl,
    ExcelPath,
    DataAccession,
    DataTerm,
    DataType,
}

impl Field {
    /// Table the column lives in
    pub fn table(self) -> Table {
        match self {
            Field::SicCode | Field::AdOffice | Field::IndustryTitle => Table::Industry,
            Field::CompanyCik
            | Field::CompanyName
            | Field::CompanyTicker
            | Field::CompanySic
            | Field::CompanyState => Table::Company,
            Field::FilingAccession
            | Field::FilingCompanyCik
            | Field::FilingForm
            | Field::FilingUrl
            | Field::ExcelUrl
            | Field::ExcelPath => Table::Filing,
            Field::DataAccession | Field::DataTerm | Field::DataType => Table::FilingData,
        }
    }

    /// Column name as stored
    pub fn column(self) -> &'static str {
        match self {
            Field::SicCode => "sic_code",
            Field::AdOffice => "ad_office",
            Field::IndustryTitle => "industry_title",
            Field::CompanyCik | Field::FilingCompanyCik => "company_cik",
            Field::CompanyName => "company_name",
            Field::CompanyTicker => "company_ticker",
            Field::CompanySic => "company_sic",
            Field::CompanyState => "company_state",
            Field::FilingAccession | Field::DataAccession => "filing_accession",
            Field::FilingForm => "form",
            Field::FilingUrl => "filing_url",
            Field::ExcelUrl => "excel_url",
            Field::ExcelPath => "excel_path",
            Field::DataTerm => "filing_term",
            Field::DataType => "filing_type",
        }
    }
}

/// Column used to filter the filing/company join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilingKey {
    Cik,
    Accession,
    Url,
}

impl FilingKey {
    /// Column reference qualified with the join aliases (`f` filing, `c` company)
    pub(crate) fn qualified_column(self) -> &'static str {
        match self {
            FilingKey::Cik => "c.company_cik",
            FilingKey::Accession => "f.filing_accession",
            FilingKey::Url => "f.filing_url",
        }
    }
}

/// What to search filings by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Every stored filing
    All,
    Cik(String),
    Ticker(String),
    Sic(String),
    State(String),
    /// Case-insensitive substring of the company name
    Name(String),
}

/// Split `terms` so no statement binds more than SQLite allows.
///
/// Lists shorter than [`SQLITE_MAX_PARAMS`] go out in one piece; anything
/// longer is cut into [`CHUNK_SIZE`] slices, in order.
pub(crate) fn chunk_terms<T>(terms: &[T]) -> Vec<&[T]> {
    if terms.is_empty() {
        Vec::new()
    } else if terms.len() < SQLITE_MAX_PARAMS {
        vec![terms]
    } else {
        terms.chunks(CHUNK_SIZE).collect()
    }
}

/// `?, ?, ?` with `n` placeholders
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

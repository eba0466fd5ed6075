//! Core domain types for secparse
//!
//! These types mirror the four stored tables.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **CIK** | EDGAR's unique identifier for a filing company |
//! | **Accession** | Unique identifier for one filing submission |
//! | **SIC code** | Standard Industrial Classification code |
//! | **Data point** | One (term, period, value) fact taken from a filing's spreadsheet exhibit |

use serde::{Deserialize, Serialize};

// ============================================
// Industry
// ============================================

/// A SIC industry classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Industry {
    /// SIC code (primary key)
    pub sic_code: String,
    /// SEC office responsible for the industry
    pub ad_office: Option<String>,
    /// Industry title
    pub industry_title: Option<String>,
}

// ============================================
// Company
// ============================================

/// A filing company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    /// CIK (primary key)
    pub cik: String,
    pub name: Option<String>,
    pub ticker: Option<String>,
    /// References [`Industry::sic_code`]
    pub sic_code: Option<String>,
    pub state: Option<String>,
    /// Whether company-info enrichment has been tried for this CIK
    pub info_attempted: bool,
}

impl Company {
    /// A company row carrying only its CIK.
    ///
    /// Filings are often discovered before anything else is known about the
    /// filer; the stub satisfies the filing's foreign key until enrichment
    /// fills in the rest via [`crate::Session::upsert_company`].
    pub fn stub(cik: impl Into<String>) -> Self {
        Self {
            cik: cik.into(),
            name: None,
            ticker: None,
            sic_code: None,
            state: None,
            info_attempted: false,
        }
    }
}

// ============================================
// Filing
// ============================================

/// One regulatory filing submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filing {
    /// Accession number (primary key)
    pub accession: String,
    /// Owning company, references [`Company::cik`]
    pub company_cik: String,
    /// Form type (10-K, 10-Q, ...)
    pub form: Option<String>,
    /// Reporting period as YYYYMMDD
    pub period: Option<i64>,
    /// Acceptance timestamp as YYYYMMDDhhmmss
    pub filed: Option<i64>,
    /// Filing index page
    pub filing_url: Option<String>,
    /// Financial report workbook URL
    pub excel_url: Option<String>,
    /// Where the workbook was downloaded to
    pub excel_path: Option<String>,
    /// Data points have been stored for this filing
    pub parsed_data: bool,
    /// Parsing has been tried, successfully or not
    pub parsing_attempted: bool,
}

impl Filing {
    /// A filing with only its keys set.
    pub fn new(accession: impl Into<String>, company_cik: impl Into<String>) -> Self {
        Self {
            accession: accession.into(),
            company_cik: company_cik.into(),
            form: None,
            period: None,
            filed: None,
            filing_url: None,
            excel_url: None,
            excel_path: None,
            parsed_data: false,
            parsing_attempted: false,
        }
    }

    /// EDGAR location of the `Financial_Report.xlsx` workbook for a filing.
    pub fn excel_url_for(cik: &str, accession: &str) -> String {
        format!(
            "http://www.sec.gov/Archives/edgar/data/{}/{}/Financial_Report.xlsx",
            cik.trim_start_matches('0'),
            accession.replace('-', "")
        )
    }
}

// ============================================
// Filing data
// ============================================

/// One financial fact extracted from a filing.
///
/// Keyed by (`accession`, `term`, `value_period`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingDataPoint {
    /// References [`Filing::accession`]
    pub accession: String,
    /// Line-item name, e.g. "Revenue"
    pub term: String,
    /// Statement tag supplied by the caller, e.g. "BS" or "PL"
    pub data_type: String,
    pub value: Option<f64>,
    /// Period end as YYYYMMDD
    pub value_period: i64,
}

/// A filing joined with its owning company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingWithCompany {
    pub filing: Filing,
    pub company: Company,
}

/// Flattened view of a data point with its filing, company and industry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataExportRow {
    pub accession: String,
    pub term: String,
    pub data_type: Option<String>,
    pub value: Option<f64>,
    pub value_period: i64,
    pub form: Option<String>,
    pub period: Option<i64>,
    pub filed: Option<i64>,
    pub filing_url: Option<String>,
    pub company_cik: Option<String>,
    pub company_name: Option<String>,
    pub ticker: Option<String>,
    pub state: Option<String>,
    pub sic_code: Option<String>,
    pub ad_office: Option<String>,
    pub industry_title: Option<String>,
}

// ============================================
// Records
// ============================================

/// Any row that can be bulk-inserted.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Industry(Industry),
    Company(Company),
    Filing(Filing),
    DataPoint(FilingDataPoint),
}

impl Record {
    /// Primary key, for log messages
    pub fn key(&self) -> String {
        match self {
            Record::Industry(i) => i.sic_code.clone(),
            Record::Company(c) => c.cik.clone(),
            Record::Filing(f) => f.accession.clone(),
            Record::DataPoint(d) => format!("{}/{}/{}", d.accession, d.term, d.value_period),
        }
    }
}

impl From<Industry> for Record {
    fn from(value: Industry) -> Self {
        Record::Industry(value)
    }
}

impl From<Company> for Record {
    fn from(value: Company) -> Self {
        Record::Company(value)
    }
}

impl From<Filing> for Record {
    fn from(value: Filing) -> Self {
        Record::Filing(value)
    }
}

impl From<FilingDataPoint> for Record {
    fn from(value: FilingDataPoint) -> Self {
        Record::DataPoint(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excel_url_for() {
        assert_eq!(
            Filing::excel_url_for("0000320193", "0000320193-20-000096"),
            "http://www.sec.gov/Archives/edgar/data/320193/000032019320000096/Financial_Report.xlsx"
        );
    }

    #[test]
    fn test_company_stub() {
        let company = Company::stub("0001");
        assert_eq!(company.cik, "0001");
        assert!(company.name.is_none());
        assert!(!company.info_attempted);
    }

    #[test]
    fn test_record_key() {
        let point = FilingDataPoint {
            accession: "A1".to_string(),
            term: "Revenue".to_string(),
            data_type: "PL".to_string(),
            value: Some(100.0),
            value_period: 20201231,
        };
        assert_eq!(Record::from(point).key(), "A1/Revenue/20201231");
        assert_eq!(Record::from(Filing::new("A1", "0001")).key(), "A1");
    }
}

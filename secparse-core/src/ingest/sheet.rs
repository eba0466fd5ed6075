//! In-memory spreadsheet grid
//!
//! Row 0 holds column headers, column 0 holds line-item terms. Rows may be
//! ragged; a missing cell reads as absent rather than empty.

use serde::{Deserialize, Serialize};

/// One spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    /// Empty, whitespace-only text, or NaN. Numeric zero is not blank.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(n) => n.is_nan(),
        }
    }

    /// Borrow the text of a text cell
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the cell as a line-item term
    pub fn to_term(&self) -> String {
        match self {
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
            Cell::Empty => String::new(),
        }
    }

    /// Numeric value of the cell.
    ///
    /// Text is parsed after dropping thousands separators and spaces.
    pub fn to_value(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_nan() => None,
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => {
                let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
                cleaned.parse::<f64>().ok().filter(|v| !v.is_nan())
            }
            Cell::Empty => None,
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Number(value as f64)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Empty, Into::into)
    }
}

/// A rectangular-ish grid of cells, row-major.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sheet {
    rows: Vec<Vec<Cell>>,
}

impl Sheet {
    /// Build a sheet from anything convertible into cells.
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = C>,
        C: Into<Cell>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    /// Number of columns in the widest row
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Cell at (`row`, `column`), `None` when the row is too short
    pub fn cell(&self, row: usize, column: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Header cell of a column
    pub fn header(&self, column: usize) -> Option<&Cell> {
        self.cell(0, column)
    }

    /// Every row after the header row
    pub fn data_rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.rows.iter().skip(1).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_cells() {
        assert!(Cell::Empty.is_blank());
        assert!(Cell::from("   ").is_blank());
        assert!(Cell::Number(f64::NAN).is_blank());
        assert!(!Cell::Number(0.0).is_blank());
        assert!(!Cell::from("0").is_blank());
    }

    #[test]
    fn test_to_value() {
        assert_eq!(Cell::from("1,234,567").to_value(), Some(1_234_567.0));
        assert_eq!(Cell::from(" -12.5 ").to_value(), Some(-12.5));
        assert_eq!(Cell::Number(3.0).to_value(), Some(3.0));
        assert_eq!(Cell::from("n/a").to_value(), None);
        assert_eq!(Cell::Empty.to_value(), None);
        assert_eq!(Cell::Number(f64::NAN).to_value(), None);
    }

    #[test]
    fn test_to_term() {
        assert_eq!(Cell::from(" Revenue ").to_term(), "Revenue");
        assert_eq!(Cell::Number(2020.0).to_term(), "2020");
        assert_eq!(Cell::Number(1.5).to_term(), "1.5");
    }

    #[test]
    fn test_ragged_rows() {
        let sheet = Sheet::from_rows(vec![
            vec![Cell::from("Item"), Cell::from("Dec. 31, 2020")],
            vec![Cell::from("Revenue"), Cell::from("100"), Cell::from("200")],
            vec![Cell::from("Note")],
        ]);

        assert_eq!(sheet.width(), 3);
        assert_eq!(sheet.height(), 3);
        assert!(sheet.header(2).is_none());
        assert_eq!(sheet.cell(1, 2), Some(&Cell::from("200")));
        assert!(sheet.cell(2, 1).is_none());
        assert_eq!(sheet.data_rows().count(), 2);
    }

    #[test]
    fn test_deserialize_json_grid() {
        let sheet: Sheet =
            serde_json::from_str(r#"[["Item", "Dec. 31, 2020"], ["Revenue", 100.5], ["Tax", null]]"#)
                .unwrap();

        assert_eq!(sheet.cell(1, 1), Some(&Cell::Number(100.5)));
        assert_eq!(sheet.cell(2, 1), Some(&Cell::Empty));
    }
}

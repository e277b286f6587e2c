//! File identity: the identifier (file name) and the capture date embedded in it.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::error::TransformError;

static DATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{8}").expect("date token pattern is valid"));

/// Identity of one raw file for the duration of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRecord {
    /// File name including extension; also the ledger key.
    pub identifier: String,
    pub captured_date: NaiveDate,
}

impl FileRecord {
    /// Build a record from an identifier, parsing the capture date out of it.
    pub fn from_identifier(identifier: impl Into<String>) -> Result<Self, TransformError> {
        let identifier = identifier.into();
        let captured_date = captured_date_from_identifier(&identifier)?;
        Ok(Self {
            identifier,
            captured_date,
        })
    }

    /// Build a record from a path; the identifier is the path's file name.
    pub fn from_path(path: &Path) -> Result<Self, TransformError> {
        let identifier = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| TransformError::MalformedIdentifier {
                identifier: path.display().to_string(),
                reason: "path has no file name".to_string(),
            })?;
        Self::from_identifier(identifier)
    }

    /// File name without its extension; names the Parquet artifact.
    pub fn stem(&self) -> &str {
        match self.identifier.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.identifier,
        }
    }
}

/// Parse the first 8-digit run of the identifier as `YYYYMMDD`.
///
/// Only the first token is considered: `20160930_20161001.csv` is dated
/// 2016-09-30, and a first token that is not a calendar date is an error
/// even if a later one would parse.
pub fn captured_date_from_identifier(identifier: &str) -> Result<NaiveDate, TransformError> {
    let token = DATE_TOKEN
        .find(identifier)
        .ok_or_else(|| TransformError::MalformedIdentifier {
            identifier: identifier.to_string(),
            reason: "no 8-digit YYYYMMDD date token".to_string(),
        })?;

    NaiveDate::parse_from_str(token.as_str(), "%Y%m%d").map_err(|e| {
        TransformError::MalformedIdentifier {
            identifier: identifier.to_string(),
            reason: format!("'{}' is not a calendar date: {}", token.as_str(), e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_from_dataset_style_name() {
        let record = FileRecord::from_identifier("20160930_203718.csv").unwrap();
        assert_eq!(
            record.captured_date,
            NaiveDate::from_ymd_opt(2016, 9, 30).unwrap()
        );
        assert_eq!(record.stem(), "20160930_203718");
    }

    #[test]
    fn first_eight_digits_of_longer_run_win() {
        let date = captured_date_from_identifier("gas-2024030215.csv").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
    }

    #[test]
    fn rejects_missing_token() {
        let err = captured_date_from_identifier("readings_2024.csv").unwrap_err();
        assert!(matches!(err, TransformError::MalformedIdentifier { .. }));
    }

    #[test]
    fn rejects_non_calendar_date() {
        let err = captured_date_from_identifier("20241341.csv").unwrap_err();
        assert!(err.to_string().contains("not a calendar date"));
    }

    #[test]
    fn from_path_uses_file_name() {
        let record = FileRecord::from_path(Path::new("/data/in/20240302_000000.csv")).unwrap();
        assert_eq!(record.identifier, "20240302_000000.csv");
    }

    #[test]
    fn stem_without_extension() {
        let record = FileRecord::from_identifier("20240302").unwrap();
        assert_eq!(record.stem(), "20240302");
    }
}

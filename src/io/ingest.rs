//! CSV ingest.
//!
//! Two kinds of tables come in through here:
//!
//! - raw mission exports (Kepler / K2 / TESS) whose schemas vary per mission and
//!   which start with `#` comment blocks
//! - the canonical combined CSV written by `preprocess`, with a strict schema
//!
//! Design goals:
//! - **Tolerant** raw reads: a missing mission file is `None`, not an error
//! - **Strict schema** for the canonical file (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{debug, warn};

use crate::domain::{CanonicalDataset, CanonicalRecord, Disposition, Feature, N_FEATURES};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// A raw mission table: normalized header names plus untouched records.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub source: PathBuf,
    pub headers: Vec<String>,
    pub records: Vec<StringRecord>,
    pub row_errors: Vec<RowError>,
    header_map: HashMap<String, usize>,
}

impl RawTable {
    /// Parse a mission CSV from any reader (comment lines start with `#`).
    pub fn from_reader<R: Read>(source: impl Into<PathBuf>, reader: R) -> Result<Self, AppError> {
        let source = source.into();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let raw_headers = reader
            .headers()
            .map_err(|e| {
                AppError::input(format!(
                    "Failed to read CSV headers of '{}': {e}",
                    source.display()
                ))
            })?
            .clone();
        let headers: Vec<String> = raw_headers.iter().map(normalize_header_name).collect();
        let header_map = build_header_map(&headers);

        let mut records = Vec::new();
        let mut row_errors = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            match result {
                Ok(r) => records.push(r),
                Err(e) => row_errors.push(RowError {
                    line: e.position().map(|p| p.line() as usize).unwrap_or(idx + 2),
                    message: format!("CSV parse error: {e}"),
                }),
            }
        }

        Ok(Self {
            source,
            headers,
            records,
            row_errors,
            header_map,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header_map.get(&normalize_header_name(name)).copied()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Trimmed, non-empty cell value.
    pub fn cell<'a>(&self, record: &'a StringRecord, idx: usize) -> Option<&'a str> {
        record.get(idx).map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Read a mission export.
///
/// Missions are optional inputs: a file that is missing, unreadable or has an
/// unparsable header is logged and returned as `Ok(None)`.
pub fn read_mission_csv(path: &Path) -> Result<Option<RawTable>, AppError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "mission file not found, skipping");
            return Ok(None);
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mission file unreadable, skipping");
            return Ok(None);
        }
    };

    let table = match RawTable::from_reader(path, file) {
        Ok(table) => table,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mission file unusable, skipping");
            return Ok(None);
        }
    };
    if !table.row_errors.is_empty() {
        warn!(
            path = %path.display(),
            skipped = table.row_errors.len(),
            "skipped malformed CSV rows"
        );
    }
    debug!(
        path = %path.display(),
        rows = table.records.len(),
        columns = table.headers.len(),
        "read mission table"
    );
    Ok(Some(table))
}

/// Load the canonical combined CSV written by `preprocess`.
pub fn read_canonical_csv(path: &Path) -> Result<CanonicalDataset, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::input(format!(
            "Failed to open combined dataset '{}': {e}",
            path.display()
        ))
    })?;
    let (dataset, row_errors) = parse_canonical(file)?;
    if !row_errors.is_empty() {
        warn!(
            path = %path.display(),
            skipped = row_errors.len(),
            first_line = row_errors[0].line,
            first_error = %row_errors[0].message,
            "skipped invalid rows in combined dataset"
        );
    }
    if dataset.is_empty() {
        return Err(AppError::no_data(format!(
            "Combined dataset '{}' has no valid rows.",
            path.display()
        )));
    }
    Ok(dataset)
}

/// Parse canonical CSV content, returning valid records and row errors.
pub fn parse_canonical<R: Read>(reader: R) -> Result<(CanonicalDataset, Vec<RowError>), AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let names: Vec<String> = headers.iter().map(normalize_header_name).collect();
    let header_map = build_header_map(&names);

    let disposition_idx = *header_map
        .get("disposition")
        .ok_or_else(|| AppError::input("Missing required column: `disposition`"))?;
    let mut feature_idx = [0usize; N_FEATURES];
    for feature in Feature::ALL {
        feature_idx[feature.index()] = *header_map
            .get(feature.name())
            .ok_or_else(|| AppError::input(format!("Missing required column: `{feature}`")))?;
    }

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // +2: records() starts after the header and CSV lines are 1-based.
        let line = idx + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        match parse_canonical_row(&record, disposition_idx, &feature_idx) {
            Ok(r) => records.push(r),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    Ok((CanonicalDataset { records }, row_errors))
}

fn parse_canonical_row(
    record: &StringRecord,
    disposition_idx: usize,
    feature_idx: &[usize; N_FEATURES],
) -> Result<CanonicalRecord, String> {
    let raw = record
        .get(disposition_idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "Missing `disposition` value.".to_string())?;
    let class_id = parse_class_id(raw).ok_or_else(|| format!("Invalid disposition '{raw}'."))?;
    let disposition =
        Disposition::from_class_id(class_id).ok_or_else(|| format!("Unknown class id {class_id}."))?;

    let mut features = [0.0; N_FEATURES];
    for feature in Feature::ALL {
        let cell = record.get(feature_idx[feature.index()]).map(str::trim);
        features[feature.index()] = parse_opt_f64(cell)
            .ok_or_else(|| format!("Missing/invalid `{feature}` value."))?;
    }

    Ok(CanonicalRecord {
        disposition,
        features,
    })
}

fn parse_class_id(s: &str) -> Option<usize> {
    if let Ok(v) = s.parse::<usize>() {
        return Some(v);
    }
    // Tolerate float-formatted integers ("2.0").
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 {
        Some(v as usize)
    } else {
        None
    }
}

fn build_header_map(headers: &[String]) -> HashMap<String, usize> {
    let mut map = HashMap::with_capacity(headers.len());
    for (idx, name) in headers.iter().enumerate() {
        // First occurrence wins for duplicated headers.
        map.entry(name.clone()).or_insert(idx);
    }
    map
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet tools sometimes emit UTF-8 CSVs with a BOM prefix on the first
    // header. Without stripping it the first column never matches.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

/// Parse an optional numeric cell; non-finite values count as missing.
pub fn parse_opt_f64(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

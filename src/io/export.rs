//! Export the combined dataset to the canonical CSV.
//!
//! The file is meant to be easy to consume in spreadsheets or downstream scripts
//! and is what `train` and the inference service read back.

use std::fs::{self, File};
use std::path::Path;

use crate::domain::{CanonicalDataset, Feature};
use crate::error::AppError;

/// Canonical CSV header: `disposition`, then the features in canonical order.
pub fn canonical_header() -> Vec<&'static str> {
    std::iter::once("disposition")
        .chain(Feature::ALL.iter().map(|f| f.name()))
        .collect()
}

/// Write the canonical dataset, creating parent directories as needed.
pub fn write_canonical_csv(path: &Path, dataset: &CanonicalDataset) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::input(format!(
                "Failed to create output directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    let file = File::create(path).map_err(|e| {
        AppError::input(format!("Failed to create CSV '{}': {e}", path.display()))
    })?;
    write_canonical(file, dataset)
}

/// Write canonical CSV content to any writer.
pub fn write_canonical<W: std::io::Write>(
    writer: W,
    dataset: &CanonicalDataset,
) -> Result<(), AppError> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(canonical_header())
        .map_err(|e| AppError::input(format!("Failed to write CSV header: {e}")))?;

    for record in &dataset.records {
        let mut row = Vec::with_capacity(1 + record.features.len());
        row.push(record.disposition.class_id().to_string());
        row.extend(record.features.iter().map(|v| v.to_string()));
        w.write_record(&row)
            .map_err(|e| AppError::input(format!("Failed to write CSV row: {e}")))?;
    }

    w.flush()
        .map_err(|e| AppError::input(format!("Failed to flush CSV: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CanonicalRecord, Disposition};
    use crate::io::ingest::read_canonical_csv;

    #[test]
    fn header_order_is_canonical() {
        let header = canonical_header().join(",");
        assert_eq!(
            header,
            "disposition,period,duration,depth,planet_radius,equilibrium_temp,\
             insolation_flux,model_snr,stellar_temp,stellar_logg,stellar_radius"
        );
    }

    #[test]
    fn written_file_reads_back_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("combined.csv");
        let dataset = CanonicalDataset {
            records: vec![
                CanonicalRecord {
                    disposition: Disposition::Confirmed,
                    features: [9.48, 2.95, 615.8, 2.26, 793.0, 93.59, 35.8, 5455.0, 4.467, 0.927],
                },
                CanonicalRecord {
                    disposition: Disposition::FalsePositive,
                    features: [0.1; 10],
                },
            ],
        };
        write_canonical_csv(&path, &dataset).unwrap();
        let back = read_canonical_csv(&path).unwrap();
        assert_eq!(back, dataset);
    }
}

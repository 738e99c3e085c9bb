//! Synthetic mission catalogs.
//!
//! Generates mission-shaped CSV exports (Kepler, K2, TESS) whose feature
//! distributions depend on the disposition, so the whole pipeline can be run and
//! tested without downloading archive data. Output is fully determined by the
//! seed.
//!
//! The generated files deliberately exercise the normalizer:
//! - `#` comment preambles, like NASA Exoplanet Archive exports
//! - extra columns the canonical schema ignores
//! - K2 exports without `koi_teq` / `koi_model_snr`
//! - TESS labels outside the 3-class vocabulary (`KP`, `APC`)
//! - a small share of empty cells

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{LogNormal, Normal};
use tracing::info;

use crate::domain::{CanonicalDataset, CanonicalRecord, Disposition, Feature, N_FEATURES, ProjectPaths};
use crate::error::AppError;

/// Share of empty feature cells in generated mission files.
const MISSING_RATE: f64 = 0.03;

/// Class-conditioned feature generator.
struct FeatureSampler {
    period: [LogNormal<f64>; 3],
    depth: [LogNormal<f64>; 3],
    radius: [LogNormal<f64>; 3],
    snr: [LogNormal<f64>; 3],
    teq: Normal<f64>,
    steff: Normal<f64>,
    logg: Normal<f64>,
    srad: LogNormal<f64>,
    jitter: Normal<f64>,
}

impl FeatureSampler {
    fn new() -> Result<Self, AppError> {
        let ln = |median: f64, sigma: f64| {
            LogNormal::new(median.ln(), sigma)
                .map_err(|e| AppError::training(format!("Sample distribution error: {e}")))
        };
        let normal = |mean: f64, sd: f64| {
            Normal::new(mean, sd)
                .map_err(|e| AppError::training(format!("Sample distribution error: {e}")))
        };
        // Index by class id: false positive, candidate, confirmed.
        Ok(Self {
            period: [ln(4.0, 1.4)?, ln(18.0, 1.1)?, ln(11.0, 0.9)?],
            depth: [ln(6000.0, 1.2)?, ln(450.0, 0.9)?, ln(900.0, 0.7)?],
            radius: [ln(14.0, 0.9)?, ln(2.8, 0.7)?, ln(2.2, 0.5)?],
            snr: [ln(70.0, 0.9)?, ln(14.0, 0.5)?, ln(45.0, 0.6)?],
            teq: normal(850.0, 320.0)?,
            steff: normal(5600.0, 650.0)?,
            logg: normal(4.4, 0.22)?,
            srad: ln(1.0, 0.3)?,
            jitter: normal(0.0, 0.1)?,
        })
    }

    fn draw(&self, class: Disposition, rng: &mut StdRng) -> [f64; N_FEATURES] {
        let k = class.class_id();
        let period = self.period[k].sample(rng);
        let teq = self.teq.sample(rng).clamp(150.0, 3500.0);
        let mut f = [0.0; N_FEATURES];
        f[Feature::Period.index()] = period;
        f[Feature::Duration.index()] = (1.2 * period.cbrt() * (1.0 + self.jitter.sample(rng))).max(0.3);
        f[Feature::Depth.index()] = self.depth[k].sample(rng);
        f[Feature::PlanetRadius.index()] = self.radius[k].sample(rng);
        f[Feature::EquilibriumTemp.index()] = teq;
        f[Feature::InsolationFlux.index()] = (teq / 255.0).powi(4);
        f[Feature::ModelSnr.index()] = self.snr[k].sample(rng);
        f[Feature::StellarTemp.index()] = self.steff.sample(rng).clamp(2500.0, 10000.0);
        f[Feature::StellarLogg.index()] = self.logg.sample(rng).clamp(3.0, 5.2);
        f[Feature::StellarRadius.index()] = self.srad.sample(rng);
        f
    }
}

/// Class of row `i`: a repeating 40/30/30 confirmed/candidate/false-positive pattern.
fn class_of(i: usize) -> Disposition {
    match i % 10 {
        0..=3 => Disposition::Confirmed,
        4..=6 => Disposition::Candidate,
        _ => Disposition::FalsePositive,
    }
}

/// An in-memory canonical dataset of `n` rows.
pub fn synthetic_dataset(n: usize, seed: u64) -> Result<CanonicalDataset, AppError> {
    let sampler = FeatureSampler::new()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let records = (0..n)
        .map(|i| {
            let disposition = class_of(i);
            CanonicalRecord {
                disposition,
                features: sampler.draw(disposition, &mut rng),
            }
        })
        .collect();
    Ok(CanonicalDataset { records })
}

/// Files written by `write_mission_samples`.
#[derive(Debug, Clone)]
pub struct SampleSummary {
    pub files: Vec<(PathBuf, usize)>,
}

/// Write synthetic Kepler, K2 and TESS exports to the paths in `paths`.
pub fn write_mission_samples(
    paths: &ProjectPaths,
    rows_per_mission: usize,
    seed: u64,
) -> Result<SampleSummary, AppError> {
    if rows_per_mission == 0 {
        return Err(AppError::input("Sample row count must be > 0."));
    }
    let sampler = FeatureSampler::new()?;
    let mut rng = StdRng::seed_from_u64(seed);

    let koi = [
        "koi_period", "koi_duration", "koi_depth", "koi_prad", "koi_teq", "koi_insol",
        "koi_model_snr", "koi_steff", "koi_slogg", "koi_srad",
    ];
    let tess = [
        "pl_orbper", "pl_trandurh", "pl_trandep", "pl_rade", "pl_eqt", "pl_insol", "pl_snr",
        "st_teff", "st_logg", "st_rad",
    ];
    let k2_skip = [Feature::EquilibriumTemp, Feature::ModelSnr];

    let kepler = MissionLayout {
        id_column: "kepid",
        disposition_column: "koi_disposition",
        feature_columns: &koi,
        skip: &[],
        labels: |class, _| match class {
            Disposition::Confirmed => "CONFIRMED",
            Disposition::Candidate => "CANDIDATE",
            Disposition::FalsePositive => "FALSE POSITIVE",
        },
    };
    let k2 = MissionLayout {
        id_column: "epic_name",
        disposition_column: "koi_disposition",
        feature_columns: &koi,
        skip: &k2_skip,
        labels: kepler.labels,
    };
    let toi = MissionLayout {
        id_column: "toi",
        disposition_column: "tfopwg_disp",
        feature_columns: &tess,
        skip: &[],
        // Every 25th row carries a label outside the 3-class vocabulary.
        labels: |class, i| match (class, i % 25) {
            (_, 24) => "APC",
            (Disposition::Confirmed, 12) => "KP",
            (Disposition::Confirmed, _) => "CP",
            (Disposition::Candidate, _) => "PC",
            (Disposition::FalsePositive, _) => "FP",
        },
    };

    let mut files = Vec::new();
    for (layout, path) in [(&kepler, &paths.kepler_csv), (&k2, &paths.k2_csv), (&toi, &paths.tess_csv)] {
        write_mission(path, layout, rows_per_mission, &sampler, &mut rng)?;
        info!(path = %path.display(), rows = rows_per_mission, "wrote synthetic mission file");
        files.push((path.clone(), rows_per_mission));
    }
    Ok(SampleSummary { files })
}

struct MissionLayout<'a> {
    id_column: &'a str,
    disposition_column: &'a str,
    /// Source column per canonical feature, in canonical order.
    feature_columns: &'a [&'a str; N_FEATURES],
    skip: &'a [Feature],
    labels: fn(Disposition, usize) -> &'static str,
}

fn write_mission(
    path: &Path,
    layout: &MissionLayout<'_>,
    rows: usize,
    sampler: &FeatureSampler,
    rng: &mut StdRng,
) -> Result<(), AppError> {
    let io_err = |e: &dyn std::fmt::Display| {
        AppError::input(format!("Failed to write sample '{}': {e}", path.display()))
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(&e))?;
    }
    let mut file = File::create(path).map_err(|e| io_err(&e))?;
    writeln!(file, "# Synthetic transit catalog generated by exoforge").map_err(|e| io_err(&e))?;
    writeln!(file, "# Columns follow the NASA Exoplanet Archive naming").map_err(|e| io_err(&e))?;

    let mut w = csv::Writer::from_writer(file);
    let mut header = vec![layout.id_column, layout.disposition_column];
    for feature in Feature::ALL {
        if !layout.skip.contains(&feature) {
            header.push(layout.feature_columns[feature.index()]);
        }
    }
    header.push("ra");
    w.write_record(&header).map_err(|e| io_err(&e))?;

    for i in 0..rows {
        let class = class_of(i);
        let values = sampler.draw(class, rng);
        let mut record = vec![(i + 1).to_string(), (layout.labels)(class, i).to_string()];
        for feature in Feature::ALL {
            if layout.skip.contains(&feature) {
                continue;
            }
            if rng.gen_bool(MISSING_RATE) {
                record.push(String::new());
            } else {
                record.push(format!("{:.5}", values[feature.index()]));
            }
        }
        record.push(format!("{:.6}", rng.gen_range(0.0..360.0)));
        w.write_record(&record).map_err(|e| io_err(&e))?;
    }
    w.flush().map_err(|e| io_err(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::missions::{K2, KEPLER, TESS};
    use crate::data::normalize::normalize_table;
    use crate::io::ingest::read_mission_csv;

    #[test]
    fn dataset_is_deterministic_and_balanced() {
        let a = synthetic_dataset(100, 9).unwrap();
        let b = synthetic_dataset(100, 9).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.class_counts(), [30, 30, 40]);
        assert!(a.records.iter().all(|r| r.features.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn mission_files_normalize() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::rooted_at(dir.path());
        let summary = write_mission_samples(&paths, 50, 1).unwrap();
        assert_eq!(summary.files.len(), 3);

        let kepler = read_mission_csv(&paths.kepler_csv).unwrap().unwrap();
        let table = normalize_table(&kepler, &KEPLER).unwrap();
        assert_eq!(table.features.len(), N_FEATURES);
        assert_eq!(table.unlabeled_rows(), 0);

        let k2 = read_mission_csv(&paths.k2_csv).unwrap().unwrap();
        let table = normalize_table(&k2, &K2).unwrap();
        assert_eq!(table.features.len(), N_FEATURES - 2);

        let toi = read_mission_csv(&paths.tess_csv).unwrap().unwrap();
        let table = normalize_table(&toi, &TESS).unwrap();
        assert!(table.unlabeled_rows() >= 2);
    }
}

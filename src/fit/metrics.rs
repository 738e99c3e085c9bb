//! Held-out evaluation metrics.

use serde::{Deserialize, Serialize};

use crate::domain::N_CLASSES;
use crate::error::AppError;

/// `matrix[true_class][predicted_class]` counts.
pub type ConfusionMatrix = [[usize; N_CLASSES]; N_CLASSES];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision/recall/F1 plus accuracy and macro/weighted averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: [ClassMetrics; N_CLASSES],
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> Result<f64, AppError> {
    check_lengths(y_true, y_pred)?;
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / y_true.len() as f64)
}

pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize]) -> Result<ConfusionMatrix, AppError> {
    check_lengths(y_true, y_pred)?;
    let mut m = [[0usize; N_CLASSES]; N_CLASSES];
    for (t, p) in y_true.iter().zip(y_pred) {
        if *t >= N_CLASSES || *p >= N_CLASSES {
            return Err(AppError::training(format!("Class id out of range: {t}/{p}.")));
        }
        m[*t][*p] += 1;
    }
    Ok(m)
}

/// Build the report. Undefined ratios (no predictions / no support) are 0.
pub fn classification_report(y_true: &[usize], y_pred: &[usize]) -> Result<ClassificationReport, AppError> {
    let m = confusion_matrix(y_true, y_pred)?;
    let total = y_true.len();

    let per_class: [ClassMetrics; N_CLASSES] = std::array::from_fn(|k| {
        let tp = m[k][k] as f64;
        let predicted: usize = (0..N_CLASSES).map(|t| m[t][k]).sum();
        let support: usize = m[k].iter().sum();
        let precision = ratio(tp, predicted as f64);
        let recall = ratio(tp, support as f64);
        let f1 = ratio(2.0 * precision * recall, precision + recall);
        ClassMetrics {
            precision,
            recall,
            f1,
            support,
        }
    });

    // Macro averages only over classes seen in either the truth or the predictions.
    let present: [bool; N_CLASSES] =
        std::array::from_fn(|k| per_class[k].support > 0 || (0..N_CLASSES).any(|t| m[t][k] > 0));
    let n_present = present.iter().filter(|&&p| p).count();
    let macro_weights: [f64; N_CLASSES] =
        std::array::from_fn(|k| if present[k] { ratio(1.0, n_present as f64) } else { 0.0 });
    let macro_avg = average(&per_class, &macro_weights, total);
    let support_weights: [f64; N_CLASSES] =
        std::array::from_fn(|k| ratio(per_class[k].support as f64, total as f64));
    let weighted_avg = average(&per_class, &support_weights, total);
    let correct: usize = (0..N_CLASSES).map(|k| m[k][k]).sum();

    Ok(ClassificationReport {
        per_class,
        accuracy: ratio(correct as f64, total as f64),
        macro_avg,
        weighted_avg,
    })
}

fn average(
    per_class: &[ClassMetrics; N_CLASSES],
    weights: &[f64; N_CLASSES],
    support: usize,
) -> ClassMetrics {
    let mut out = ClassMetrics {
        precision: 0.0,
        recall: 0.0,
        f1: 0.0,
        support,
    };
    for (c, &w) in per_class.iter().zip(weights) {
        out.precision += w * c.precision;
        out.recall += w * c.recall;
        out.f1 += w * c.f1;
    }
    out
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

fn check_lengths(y_true: &[usize], y_pred: &[usize]) -> Result<(), AppError> {
    if y_true.is_empty() {
        return Err(AppError::training("Cannot evaluate on an empty test set."));
    }
    if y_true.len() != y_pred.len() {
        return Err(AppError::training(format!(
            "Label count mismatch: {} true vs {} predicted.",
            y_true.len(),
            y_pred.len()
        )));
    }
    Ok(())
}

//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the pipeline code stays clean and testable
//! - output changes are localized (the classification report is also written
//!   verbatim into each training run)

use std::path::Path;

use crate::data::combine::CombineSummary;
use crate::domain::{CanonicalDataset, Disposition};
use crate::fit::metrics::{ClassMetrics, ClassificationReport};
use crate::fit::selection::Selection;
use crate::fit::trainer::TrainingOutcome;
use crate::io::bundle::Prediction;
use crate::plot::render_confusion_ascii;
use crate::tracking::RunRecord;

const NAME_WIDTH: usize = 14;

/// Per-class precision / recall / F1 table, laid out like scikit-learn's report.
pub fn format_classification_report(report: &ClassificationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>NAME_WIDTH$} {:>10} {:>10} {:>10} {:>10}\n\n",
        "", "precision", "recall", "f1-score", "support"
    ));
    for class in Disposition::ALL {
        out.push_str(&metrics_line(class.report_name(), &report.per_class[class.class_id()]));
    }
    out.push('\n');
    out.push_str(&format!(
        "{:>NAME_WIDTH$} {:>10} {:>10} {:>10.2} {:>10}\n",
        "accuracy", "", "", report.accuracy, report.weighted_avg.support
    ));
    out.push_str(&metrics_line("macro avg", &report.macro_avg));
    out.push_str(&metrics_line("weighted avg", &report.weighted_avg));
    out
}

fn metrics_line(name: &str, m: &ClassMetrics) -> String {
    format!(
        "{name:>NAME_WIDTH$} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
        m.precision, m.recall, m.f1, m.support
    )
}

/// Summary of a `preprocess` run.
pub fn format_combine_summary(
    summary: &CombineSummary,
    dataset: &CanonicalDataset,
    output: &Path,
) -> String {
    let mut out = String::new();
    out.push_str("=== exo - Preprocess ===\n");
    for (mission, rows) in &summary.missions {
        out.push_str(&format!("- {mission:<8} {rows:>7} rows\n"));
    }
    out.push_str(&format!(
        "Combined: {} rows, {} dropped without a known disposition, {} kept\n",
        summary.rows_before,
        summary.rows_unlabeled,
        dataset.len()
    ));

    let counts = dataset.class_counts();
    let parts: Vec<String> = Disposition::ALL
        .iter()
        .map(|d| format!("{}={}", d.report_name(), counts[d.class_id()]))
        .collect();
    out.push_str(&format!("Classes: {}\n", parts.join(" | ")));

    if summary.imputations.is_empty() {
        out.push_str("Imputation: none needed\n");
    } else {
        out.push_str("Imputation (median):\n");
        for imp in &summary.imputations {
            let note = if imp.fallback { "  (no observed values)" } else { "" };
            out.push_str(&format!(
                "  {:<18} filled {:>6} with {:.4}{note}\n",
                imp.feature.name(),
                imp.filled,
                imp.fill_value
            ));
        }
    }
    out.push_str(&format!("Output: {}\n", output.display()));
    out
}

/// Summary of a `train` run: per-family accuracy, the winner and its confusion matrix.
pub fn format_training_summary(outcome: &TrainingOutcome, selection: &Selection) -> String {
    let mut out = String::new();
    out.push_str("=== exo - Model comparison ===\n");
    out.push_str(&format!(
        "Experiment: {} ({})\n",
        outcome.experiment.name, outcome.experiment.experiment_id
    ));
    out.push_str(&format!(
        "Split: train={} test={}\n\n",
        outcome.n_train, outcome.n_test
    ));

    for eval in &outcome.evaluations {
        let chosen = if eval.run_id == selection.winner.run_id { "*" } else { " " };
        out.push_str(&format!(
            "{chosen} {:<16} accuracy={:.4} f1_macro={:.4} run={}\n",
            eval.family.display_name(),
            eval.accuracy,
            eval.report.macro_avg.f1,
            eval.run_id
        ));
    }

    out.push_str("\nChosen model:\n");
    out.push_str(&format!(
        "- {} (accuracy {:.4})\n",
        selection.winner.family, selection.winner.accuracy
    ));
    out.push_str(&format!("- artifact: {}\n", selection.model_file.display()));
    out.push_str(&format!("- bundle: {}\n", selection.bundle.bundle_id));
    if let Some(version) = &selection.registered {
        out.push_str(&format!("- registered: version {} ({})\n", version.version, version.source));
    }

    if let Some(eval) = outcome
        .evaluations
        .iter()
        .find(|e| e.run_id == selection.winner.run_id)
    {
        out.push('\n');
        out.push_str(&render_confusion_ascii(eval.family.display_name(), &eval.confusion));
    }
    out
}

/// Run listing for `exo runs`, children indented under their parent.
pub fn format_runs(runs: &[RunRecord]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<34} {:<28} {:<9} {:>9} {:<20}",
            "run_id", "name", "status", "accuracy", "started"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(&format!("{:-<34} {:-<28} {:-<9} {:->9} {:-<20}\n", "", "", "", "", ""));

    let roots = runs.iter().filter(|r| r.parent_run_id.is_none());
    for root in roots {
        out.push_str(&run_line(root, 0));
        for child in runs
            .iter()
            .filter(|r| r.parent_run_id.as_deref() == Some(root.run_id.as_str()))
        {
            out.push_str(&run_line(child, 2));
        }
    }
    // Children whose parent is not in the listing.
    for orphan in runs.iter().filter(|r| {
        r.parent_run_id
            .as_deref()
            .is_some_and(|p| !runs.iter().any(|x| x.run_id == p))
    }) {
        out.push_str(&run_line(orphan, 0));
    }
    out
}

fn run_line(run: &RunRecord, indent: usize) -> String {
    let accuracy = run
        .metrics
        .get("accuracy")
        .map_or_else(|| "-".to_string(), |a| format!("{a:.4}"));
    let name = format!("{}{}", " ".repeat(indent), run.run_name);
    let line = format!(
        "{:<34} {:<28} {:<9} {:>9} {:<20}",
        truncate(&run.run_id, 34),
        truncate(&name, 28),
        format!("{:?}", run.status),
        accuracy,
        run.start_time.format("%Y-%m-%d %H:%M:%S")
    );
    format!("{}\n", line.trim_end())
}

/// One prediction, most probable class first.
pub fn format_prediction(prediction: &Prediction) -> String {
    let mut out = format!("Prediction: {}\n", prediction.disposition.prediction_label());
    let mut classes = Disposition::ALL;
    classes.sort_by(|a, b| {
        prediction.confidence[b.class_id()].total_cmp(&prediction.confidence[a.class_id()])
    });
    for class in classes {
        out.push_str(&format!(
            "  {:<16} {:>7.2}%\n",
            class.confidence_key(),
            prediction.confidence[class.class_id()] * 100.0
        ));
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Utc;

    use crate::fit::metrics::classification_report;
    use crate::tracking::RunStatus;

    #[test]
    fn report_lists_every_class_and_the_averages() {
        let report = classification_report(&[0, 0, 1, 2, 2, 2], &[0, 1, 1, 2, 2, 0]).unwrap();
        let text = format_classification_report(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("precision"));
        assert!(lines[2].trim_start().starts_with("False Positive"));
        assert!(lines[4].trim_start().starts_with("Confirmed"));
        assert!(text.contains("accuracy"));
        assert!(lines.iter().any(|l| l.trim_start().starts_with("weighted avg")));
        assert!(lines[4].trim_end().ends_with('3'));
    }

    #[test]
    fn prediction_lists_classes_by_confidence() {
        let text = format_prediction(&Prediction {
            disposition: Disposition::Candidate,
            confidence: [0.1, 0.7, 0.2],
        });
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Prediction: CANDIDATE");
        assert!(lines[1].contains("CANDIDATE"));
        assert!(lines[2].contains("CONFIRMED"));
        assert!(lines[3].contains("FALSE_POSITIVE"));
    }

    #[test]
    fn runs_nest_children_under_parent() {
        let run = |id: &str, name: &str, parent: Option<&str>| RunRecord {
            run_id: id.to_string(),
            experiment_id: "1".to_string(),
            run_name: name.to_string(),
            parent_run_id: parent.map(str::to_string),
            status: RunStatus::Finished,
            start_time: Utc::now(),
            end_time: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::from([("accuracy".to_string(), 0.875)]),
            tags: BTreeMap::new(),
        };
        let text = format_runs(&[
            run("p", "Model_Comparison_Parent_Run", None),
            run("c", "Train_RandomForest", Some("p")),
        ]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[3].contains("  Train_RandomForest"));
        assert!(lines[3].contains("0.8750"));
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdefgh", 5), "abcd.");
    }
}

//! ASCII/Unicode confusion matrix for terminal output.
//!
//! This is intentionally "dumb" (fixed-width cells), optimized for:
//! - quick visual sanity checks after training
//! - deterministic output (helpful for golden tests)
//!
//! Each cell shows the count followed by a shade glyph scaled to the largest
//! cell: ` ` (0), `░`, `▒`, `▓`, `█` (max).

use crate::domain::Disposition;
use crate::fit::metrics::ConfusionMatrix;

const SHADES: [char; 5] = [' ', '░', '▒', '▓', '█'];
const LABEL_WIDTH: usize = 16;
const CELL_WIDTH: usize = 16;

/// Render `matrix` (rows = true class, columns = predicted class).
pub fn render_confusion_ascii(title: &str, matrix: &ConfusionMatrix) -> String {
    let max = matrix.iter().flatten().copied().max().unwrap_or(0);
    let mut out = String::new();
    out.push_str(&format!("{title} (rows = true, columns = predicted)\n"));

    out.push_str(&format!("{:>LABEL_WIDTH$}", ""));
    for class in Disposition::ALL {
        out.push_str(&format!("{:>CELL_WIDTH$}", class.report_name()));
    }
    out.push('\n');

    for (t, row) in matrix.iter().enumerate() {
        let name = Disposition::from_class_id(t)
            .map(Disposition::report_name)
            .unwrap_or("?");
        out.push_str(&format!("{name:>LABEL_WIDTH$}"));
        for count in row {
            let glyph = shade(*count, max);
            let cell = format!("{count} {glyph}{glyph}");
            out.push_str(&format!("{cell:>CELL_WIDTH$}"));
        }
        out.push('\n');
    }
    out
}

fn shade(count: usize, max: usize) -> char {
    if max == 0 || count == 0 {
        return SHADES[0];
    }
    // Non-zero counts always get at least the lightest glyph.
    let idx = ((count as f64 / max as f64) * (SHADES.len() - 1) as f64).ceil() as usize;
    SHADES[idx.clamp(1, SHADES.len() - 1)]
}

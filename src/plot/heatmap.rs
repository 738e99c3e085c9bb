//! Confusion-matrix heatmaps as PNG files.
//!
//! Rows are true classes (top to bottom: false positive, candidate, confirmed),
//! columns are predicted classes. Cell shade scales with the count, from white
//! (0) to deep blue (the largest cell). A vertical scale bar on the right shows
//! the ramp. Drawing uses filled rectangles only, so no fonts are required.

use std::path::Path;

use plotters::prelude::*;

use crate::domain::N_CLASSES;
use crate::error::AppError;
use crate::fit::metrics::ConfusionMatrix;

const CELL: i32 = 160;
const MARGIN: i32 = 40;
const GAP: i32 = 4;
const BAR_WIDTH: i32 = 30;
const BAR_STEPS: i32 = 48;

/// Pixel size of the rendered image.
pub fn heatmap_size() -> (u32, u32) {
    let grid = CELL * N_CLASSES as i32;
    let width = MARGIN + grid + MARGIN + BAR_WIDTH + MARGIN;
    let height = MARGIN + grid + MARGIN;
    (width as u32, height as u32)
}

/// Write `matrix` as a PNG heatmap to `path`.
pub fn write_confusion_png(path: &Path, matrix: &ConfusionMatrix) -> Result<(), AppError> {
    let err = |e: &dyn std::fmt::Display| {
        AppError::training(format!(
            "Failed to draw confusion matrix '{}': {e}",
            path.display()
        ))
    };

    let root = BitMapBackend::new(path, heatmap_size()).into_drawing_area();
    root.fill(&WHITE).map_err(|e| err(&e))?;

    let max = matrix.iter().flatten().copied().max().unwrap_or(0);
    for (t, row) in matrix.iter().enumerate() {
        for (p, count) in row.iter().enumerate() {
            let x0 = MARGIN + p as i32 * CELL;
            let y0 = MARGIN + t as i32 * CELL;
            let shade = blues(fraction(*count, max));
            root.draw(&Rectangle::new(
                [(x0 + GAP, y0 + GAP), (x0 + CELL - GAP, y0 + CELL - GAP)],
                shade.filled(),
            ))
            .map_err(|e| err(&e))?;
        }
    }

    let grid = CELL * N_CLASSES as i32;
    let bar_x = MARGIN + grid + MARGIN;
    let step_h = grid as f64 / BAR_STEPS as f64;
    for i in 0..BAR_STEPS {
        // Top of the bar is the darkest shade.
        let level = 1.0 - i as f64 / (BAR_STEPS - 1) as f64;
        let y0 = MARGIN + (i as f64 * step_h) as i32;
        let y1 = MARGIN + ((i + 1) as f64 * step_h) as i32;
        root.draw(&Rectangle::new(
            [(bar_x, y0), (bar_x + BAR_WIDTH, y1)],
            blues(level).filled(),
        ))
        .map_err(|e| err(&e))?;
    }
    root.draw(&Rectangle::new(
        [(bar_x, MARGIN), (bar_x + BAR_WIDTH, MARGIN + grid)],
        BLACK.stroke_width(1),
    ))
    .map_err(|e| err(&e))?;

    root.present().map_err(|e| err(&e))?;
    Ok(())
}

fn fraction(count: usize, max: usize) -> f64 {
    if max == 0 {
        0.0
    } else {
        count as f64 / max as f64
    }
}

/// White-to-blue ramp for `level` in `[0, 1]`.
fn blues(level: f64) -> RGBColor {
    let level = level.clamp(0.0, 1.0);
    let lerp = |from: f64, to: f64| (from + (to - from) * level).round() as u8;
    RGBColor(lerp(247.0, 8.0), lerp(251.0, 48.0), lerp(255.0, 107.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_png_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.png");
        write_confusion_png(&path, &[[5, 1, 0], [2, 7, 1], [0, 0, 9]]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn ramp_endpoints() {
        assert_eq!(blues(0.0), RGBColor(247, 251, 255));
        assert_eq!(blues(1.0), RGBColor(8, 48, 107));
        assert_eq!(fraction(3, 0), 0.0);
    }
}

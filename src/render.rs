//! Raster plots of decoded tensors
//!
//! Rank-1 tensors become line plots stacked top to bottom, rank-2 tensors
//! become heatmaps with the first axis running left to right and the second
//! axis bottom to top.

use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use ndarray::{ArrayView1, ArrayView2, Ix1, Ix2};

use crate::config::LimitsConfig;
use crate::error::{WorldBridgeError, Result};
use crate::spool::BoundedSpool;
use crate::tensor::Tensor;

/// Added before taking the log so that zeros stay finite
pub const LOG_FLOOR: f64 = 1e-8;

const WIDTH: u32 = 640;
const MIN_HEIGHT: u32 = 480;
const MIN_PANEL_HEIGHT: u32 = 96;
const MARGIN: u32 = 8;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([160, 160, 160]);
const LINE: Rgb<u8> = Rgb([31, 119, 180]);
const MISSING: Rgb<u8> = Rgb([224, 224, 224]);

/// Viridis control points, evenly spaced over [0, 1]
const COLORMAP: [[f64; 3]; 5] = [
    [68.0, 1.0, 84.0],
    [59.0, 82.0, 139.0],
    [33.0, 145.0, 140.0],
    [94.0, 201.0, 98.0],
    [253.0, 231.0, 37.0],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlotKind {
    Line,
    Heatmap,
}

/// Pixel rectangle of one panel
#[derive(Debug, Clone, Copy)]
struct Panel {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

impl Panel {
    fn bottom(&self) -> u32 {
        self.top + self.height - 1
    }

    fn right(&self) -> u32 {
        self.left + self.width - 1
    }
}

#[derive(Debug, Clone)]
pub struct PlotRenderer {
    limits: LimitsConfig,
}

impl PlotRenderer {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Render `figures` into one PNG, one panel per tensor
    pub fn render(&self, figures: &[Tensor], log_scale: bool) -> Result<Vec<u8>> {
        let kind = plot_kind(figures)?;
        if figures.len() > self.limits.max_plot_panels {
            return Err(WorldBridgeError::invalid_parameter(format!(
                "Plot has {} panels, the limit is {}",
                figures.len(),
                self.limits.max_plot_panels
            )));
        }
        let count = u32::try_from(figures.len())
            .map_err(|_| WorldBridgeError::invalid_parameter("Too many plot panels"))?;
        let height = MIN_HEIGHT.max(count.saturating_mul(MIN_PANEL_HEIGHT));
        let panel_height = height / count;

        let mut image: RgbImage = ImageBuffer::from_pixel(WIDTH, height, BACKGROUND);
        for (index, figure) in figures.iter().enumerate() {
            let panel = Panel {
                left: MARGIN,
                top: index as u32 * panel_height + MARGIN,
                width: WIDTH - 2 * MARGIN,
                height: panel_height.saturating_sub(2 * MARGIN).max(2),
            };
            let values = figure.to_array()?;
            match kind {
                PlotKind::Line => {
                    let series = values
                        .into_dimensionality::<Ix1>()
                        .map_err(|e| WorldBridgeError::invalid_rank(e.to_string()))?;
                    draw_line(&mut image, panel, series.view());
                }
                PlotKind::Heatmap => {
                    let mut grid = values
                        .into_dimensionality::<Ix2>()
                        .map_err(|e| WorldBridgeError::invalid_rank(e.to_string()))?;
                    if log_scale {
                        grid.mapv_inplace(|v| (v + LOG_FLOOR).ln());
                    } else {
                        grid.mapv_inplace(|v| v + LOG_FLOOR);
                    }
                    draw_heatmap(&mut image, panel, grid.view());
                }
            }
            draw_frame(&mut image, panel);
        }

        let mut spool = BoundedSpool::from_limits(&self.limits);
        image.write_to(&mut spool, ImageFormat::Png).map_err(|e| match e {
            image::ImageError::IoError(io) => WorldBridgeError::from(io),
            other => WorldBridgeError::render(other.to_string()),
        })?;
        let png = spool.read_to_vec()?;
        log::debug!("Rendered {} {:?} panel(s) into {} bytes", count, kind, png.len());
        Ok(png)
    }
}

fn plot_kind(figures: &[Tensor]) -> Result<PlotKind> {
    let first = figures
        .first()
        .ok_or_else(|| WorldBridgeError::invalid_rank("Nothing to plot"))?;
    let kind = match first.rank() {
        1 => PlotKind::Line,
        2 => PlotKind::Heatmap,
        rank => {
            return Err(WorldBridgeError::invalid_rank(format!(
                "Only rank 1 and rank 2 tensors can be plotted, got rank {}",
                rank
            )));
        }
    };
    for (index, figure) in figures.iter().enumerate().skip(1) {
        match figure.rank() {
            1 | 2 if figure.rank() == first.rank() => {}
            1 | 2 => {
                return Err(WorldBridgeError::inconsistent_rank(format!(
                    "Figure {} has rank {} but figure 0 has rank {}",
                    index,
                    figure.rank(),
                    first.rank()
                )));
            }
            rank => {
                return Err(WorldBridgeError::invalid_rank(format!(
                    "Figure {} has rank {}",
                    index, rank
                )));
            }
        }
    }
    Ok(kind)
}

/// Lowest and highest finite value, widened when flat
fn finite_range<'a>(values: impl Iterator<Item = &'a f64>) -> Option<(f64, f64)> {
    let (low, high) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if low > high {
        return None;
    }
    if high - low < f64::EPSILON * high.abs().max(1.0) {
        return Some((low - 0.5, high + 0.5));
    }
    Some((low, high))
}

fn draw_frame(image: &mut RgbImage, panel: Panel) {
    for x in panel.left..=panel.right() {
        image.put_pixel(x, panel.top, FRAME);
        image.put_pixel(x, panel.bottom(), FRAME);
    }
    for y in panel.top..=panel.bottom() {
        image.put_pixel(panel.left, y, FRAME);
        image.put_pixel(panel.right(), y, FRAME);
    }
}

/// Min/max envelope per pixel column, joined to the neighbouring columns
fn draw_line(image: &mut RgbImage, panel: Panel, series: ArrayView1<f64>) {
    let Some((low, high)) = finite_range(series.iter()) else {
        return;
    };
    let len = series.len();
    let row_of = |v: f64| {
        let t = (v - low) / (high - low);
        panel.bottom() - (t * (panel.height - 1) as f64).round() as u32
    };

    let mut previous: Option<(u32, u32)> = None;
    for column in 0..panel.width {
        let start = column as usize * len / panel.width as usize;
        let end = ((column as usize + 1) * len / panel.width as usize).max(start + 1).min(len);
        if start >= len {
            previous = None;
            continue;
        }
        let Some((lo, hi)) = series
            .slice(ndarray::s![start..end])
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(f64, f64)>, &v| {
                Some(acc.map_or((v, v), |(a, b)| (a.min(v), b.max(v))))
            })
        else {
            previous = None;
            continue;
        };

        let (mut top, mut bottom) = (row_of(hi), row_of(lo));
        if let Some((prev_top, prev_bottom)) = previous {
            top = top.min(prev_bottom);
            bottom = bottom.max(prev_top);
        }
        for y in top..=bottom {
            image.put_pixel(panel.left + column, y, LINE);
        }
        previous = Some((row_of(hi), row_of(lo)));
    }
}

/// Nearest-cell heatmap, low indices of the second axis at the bottom
fn draw_heatmap(image: &mut RgbImage, panel: Panel, grid: ArrayView2<f64>) {
    let (columns, rows) = grid.dim();
    if columns == 0 || rows == 0 {
        return;
    }
    let Some((low, high)) = finite_range(grid.iter()) else {
        return;
    };

    for py in 0..panel.height {
        let row = ((panel.height - 1 - py) as usize * rows / panel.height as usize).min(rows - 1);
        for px in 0..panel.width {
            let column = (px as usize * columns / panel.width as usize).min(columns - 1);
            let value = grid[[column, row]];
            let color = if value.is_finite() {
                colormap((value - low) / (high - low))
            } else {
                MISSING
            };
            image.put_pixel(panel.left + px, panel.top + py, color);
        }
    }
}

fn colormap(t: f64) -> Rgb<u8> {
    let scaled = t.clamp(0.0, 1.0) * (COLORMAP.len() - 1) as f64;
    let lower = (scaled.floor() as usize).min(COLORMAP.len() - 2);
    let w = scaled - lower as f64;
    let (a, b) = (COLORMAP[lower], COLORMAP[lower + 1]);
    Rgb([0, 1, 2].map(|c| (a[c] * (1.0 - w) + b[c] * w).round() as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> PlotRenderer {
        PlotRenderer::new(LimitsConfig::default())
    }

    fn decode(png: &[u8]) -> RgbImage {
        image::load_from_memory_with_format(png, ImageFormat::Png)
            .unwrap()
            .to_rgb8()
    }

    #[test]
    fn test_line_plots_are_stacked() {
        let ramp: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let a = Tensor::from_values(vec![100], &ramp).unwrap();
        let b = Tensor::from_values(vec![3], &[1.0f32, -1.0, 1.0]).unwrap();
        let png = renderer().render(&[a, b], true).unwrap();

        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let image = decode(&png);
        assert_eq!(image.width(), WIDTH);
        assert_eq!(image.height(), MIN_HEIGHT);
        assert!(image.pixels().any(|p| *p == LINE));
    }

    #[test]
    fn test_heatmap_low_rows_at_bottom() {
        // Second axis grows upward: column 0 is dark, column 1 is bright
        let grid = Tensor::from_values(vec![2, 2], &[0.0f64, 1.0, 0.0, 1.0]).unwrap();
        let image = decode(&renderer().render(&[grid], false).unwrap());

        let bottom = image.get_pixel(WIDTH / 2, MIN_HEIGHT - MARGIN - 2);
        let top = image.get_pixel(WIDTH / 2, MARGIN + 2);
        assert_eq!(*bottom, colormap(0.0));
        assert_eq!(*top, colormap(1.0));
    }

    #[test]
    fn test_log_scale_tolerates_zeros() {
        let grid = Tensor::from_values(vec![4, 3], &[0.0f64; 12]).unwrap();
        assert!(renderer().render(&[grid], true).is_ok());
    }

    #[test]
    fn test_rank_errors() {
        let r = renderer();
        assert_eq!(r.render(&[], true).unwrap_err().kind(), "InvalidRank");

        let cube = Tensor::from_values(vec![1, 1, 1], &[0.0f64]).unwrap();
        assert_eq!(r.render(&[cube.clone()], true).unwrap_err().kind(), "InvalidRank");

        let scalar = Tensor::from_values::<f64>(vec![], &[1.0]).unwrap();
        assert_eq!(r.render(&[scalar], true).unwrap_err().kind(), "InvalidRank");

        let line = Tensor::from_values(vec![2], &[0.0f64, 1.0]).unwrap();
        let grid = Tensor::from_values(vec![1, 2], &[0.0f64, 1.0]).unwrap();
        assert_eq!(
            r.render(&[line.clone(), grid], true).unwrap_err().kind(),
            "InconsistentRank"
        );
        assert_eq!(r.render(&[line, cube], true).unwrap_err().kind(), "InvalidRank");
    }

    #[test]
    fn test_many_panels_grow_the_canvas() {
        let figures: Vec<Tensor> = (0..8)
            .map(|i| Tensor::from_values(vec![2], &[0.0f64, i as f64]).unwrap())
            .collect();
        let image = decode(&renderer().render(&figures, false).unwrap());
        assert_eq!(image.height(), 8 * MIN_PANEL_HEIGHT);
    }

    #[test]
    fn test_panel_count_is_capped() {
        let empty = Tensor::from_values::<f64>(vec![0], &[]).unwrap();
        let figures = vec![empty; 100_000];
        let err = renderer().render(&figures, false).unwrap_err();
        assert_eq!(err.kind(), "InvalidParameter");

        let limits = LimitsConfig { max_plot_panels: 2, ..LimitsConfig::default() };
        let line = Tensor::from_values(vec![2], &[0.0f64, 1.0]).unwrap();
        let capped = PlotRenderer::new(limits);
        assert!(capped.render(&[line.clone(), line.clone()], false).is_ok());
        assert_eq!(
            capped.render(&[line.clone(), line.clone(), line], false).unwrap_err().kind(),
            "InvalidParameter"
        );
    }

    #[test]
    fn test_colormap_ends() {
        assert_eq!(colormap(0.0), Rgb([68, 1, 84]));
        assert_eq!(colormap(1.0), Rgb([253, 231, 37]));
        assert_eq!(colormap(2.0), Rgb([253, 231, 37]));
    }
}

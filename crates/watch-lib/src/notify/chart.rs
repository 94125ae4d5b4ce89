//! Line chart of a series and its expected range
//!
//! The chart is drawn as SVG and rasterized to PNG for chat clients that
//! only preview bitmaps.

use std::fmt::Write;
use std::sync::Arc;

use async_trait::async_trait;
use resvg::tiny_skia;
use resvg::usvg::{self, fontdb};

use super::{ChartRenderer, RenderedChart};
use crate::error::DeliveryError;
use crate::models::{Bounds, TimeSeries};

const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_BOTTOM: f64 = 70.0;

/// Buckets between x-axis ticks (one hour at 15-minute buckets)
const TICK_EVERY: usize = 4;

/// Tried in order for the generic sans-serif family
const SANS_FAMILIES: [&str; 4] = ["DejaVu Sans", "Liberation Sans", "Noto Sans", "Arial"];

const METRIC_COLOR: &str = "#1f77b4";
const UPPER_COLOR: &str = "#ff7f0e";
const LOWER_COLOR: &str = "#2ca02c";

/// Renders alert charts as standalone SVG documents
#[derive(Debug, Clone, Copy)]
pub struct SvgChartRenderer {
    pub width: u32,
    pub height: u32,
}

impl Default for SvgChartRenderer {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 1000,
        }
    }
}

impl SvgChartRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Build the SVG document
    pub fn render_svg(
        &self,
        series: &TimeSeries,
        band: &[Option<Bounds>],
    ) -> Result<String, DeliveryError> {
        let plot_w = self.width as f64 - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_h = self.height as f64 - MARGIN_TOP - MARGIN_BOTTOM;
        if plot_w <= 0.0 || plot_h <= 0.0 {
            return Err(DeliveryError::RenderFailure(format!(
                "canvas {}x{} is too small",
                self.width, self.height
            )));
        }

        let values = series.values();
        // y axis starts at zero
        let y_max = values
            .iter()
            .copied()
            .chain(band.iter().flatten().map(|b| b.upper))
            .fold(0.0_f64, f64::max)
            .max(1.0)
            * 1.05;

        let slots = (values.len().max(2) - 1) as f64;
        let x = |i: usize| MARGIN_LEFT + plot_w * i as f64 / slots;
        let y = |v: f64| MARGIN_TOP + plot_h * (1.0 - v.clamp(0.0, y_max) / y_max);

        let mut svg = String::new();
        self.write_frame(&mut svg, series, y_max, plot_w, plot_h)
            .map_err(render_err)?;

        for (i, point) in series.points().iter().enumerate() {
            if i % TICK_EVERY != 0 {
                continue;
            }
            writeln!(
                svg,
                r##"<line x1="{x:.1}" y1="{top:.1}" x2="{x:.1}" y2="{bottom:.1}" stroke="#eeeeee"/>"##,
                x = x(i),
                top = MARGIN_TOP,
                bottom = MARGIN_TOP + plot_h,
            )
            .map_err(render_err)?;
            // every other tick is labelled to keep labels readable
            if (i / TICK_EVERY) % 2 == 0 {
                writeln!(
                    svg,
                    r#"<text x="{x:.1}" y="{y:.1}" font-size="14" text-anchor="middle">{label}</text>"#,
                    x = x(i),
                    y = MARGIN_TOP + plot_h + 24.0,
                    label = point.bucket.format("%H:%M"),
                )
                .map_err(render_err)?;
            }
        }

        let metric_line: Vec<(f64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (x(i), y(v)))
            .collect();
        write_polyline(&mut svg, &metric_line, METRIC_COLOR).map_err(render_err)?;

        for (upper, color) in [(true, UPPER_COLOR), (false, LOWER_COLOR)] {
            for segment in defined_segments(band) {
                let points: Vec<(f64, f64)> = segment
                    .into_iter()
                    .map(|(i, b)| (x(i), y(if upper { b.upper } else { b.lower })))
                    .collect();
                write_polyline(&mut svg, &points, color).map_err(render_err)?;
            }
        }

        self.write_legend(&mut svg).map_err(render_err)?;
        svg.push_str("</svg>\n");
        Ok(svg)
    }

    fn write_frame(
        &self,
        svg: &mut String,
        series: &TimeSeries,
        y_max: f64,
        plot_w: f64,
        plot_h: f64,
    ) -> std::fmt::Result {
        writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif">"#,
            w = self.width,
            h = self.height,
        )?;
        writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
        writeln!(
            svg,
            r#"<text x="{x:.1}" y="36" font-size="24" text-anchor="middle">{title}</text>"#,
            x = MARGIN_LEFT + plot_w / 2.0,
            title = series.metric(),
        )?;
        writeln!(
            svg,
            r#"<rect x="{x}" y="{y}" width="{w:.1}" height="{h:.1}" fill="none" stroke="black"/>"#,
            x = MARGIN_LEFT,
            y = MARGIN_TOP,
            w = plot_w,
            h = plot_h,
        )?;

        for step in 0..=4 {
            let value = y_max * step as f64 / 4.0;
            let py = MARGIN_TOP + plot_h * (1.0 - step as f64 / 4.0);
            writeln!(
                svg,
                r#"<text x="{x:.1}" y="{y:.1}" font-size="14" text-anchor="end">{value:.2}</text>"#,
                x = MARGIN_LEFT - 8.0,
                y = py + 5.0,
                value = value,
            )?;
        }

        writeln!(
            svg,
            r#"<text x="{x:.1}" y="{y:.1}" font-size="16" text-anchor="middle">time</text>"#,
            x = MARGIN_LEFT + plot_w / 2.0,
            y = self.height as f64 - 20.0,
        )
    }

    fn write_legend(&self, svg: &mut String) -> std::fmt::Result {
        let x = self.width as f64 - MARGIN_RIGHT - 140.0;
        for (row, (label, color)) in [("metric", METRIC_COLOR), ("up", UPPER_COLOR), ("low", LOWER_COLOR)]
            .iter()
            .enumerate()
        {
            let y = MARGIN_TOP + 20.0 + row as f64 * 22.0;
            writeln!(
                svg,
                r#"<line x1="{x1:.1}" y1="{y:.1}" x2="{x2:.1}" y2="{y:.1}" stroke="{color}" stroke-width="3"/>"#,
                x1 = x,
                x2 = x + 30.0,
                y = y,
                color = color,
            )?;
            writeln!(
                svg,
                r#"<text x="{x:.1}" y="{y:.1}" font-size="14">{label}</text>"#,
                x = x + 40.0,
                y = y + 5.0,
                label = label,
            )?;
        }
        Ok(())
    }
}

fn render_err(e: std::fmt::Error) -> DeliveryError {
    DeliveryError::RenderFailure(e.to_string())
}

fn write_polyline(svg: &mut String, points: &[(f64, f64)], color: &str) -> std::fmt::Result {
    if points.is_empty() {
        return Ok(());
    }
    write!(svg, r#"<polyline fill="none" stroke="{}" stroke-width="2" points=""#, color)?;
    for (i, (px, py)) in points.iter().enumerate() {
        if i > 0 {
            svg.push(' ');
        }
        write!(svg, "{:.1},{:.1}", px, py)?;
    }
    writeln!(svg, r#""/>"#)
}

/// Runs of consecutive defined bounds, with their indices
fn defined_segments(band: &[Option<Bounds>]) -> Vec<Vec<(usize, Bounds)>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for (i, entry) in band.iter().enumerate() {
        match entry {
            Some(b) => current.push((i, *b)),
            None if !current.is_empty() => segments.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

#[async_trait]
impl ChartRenderer for SvgChartRenderer {
    async fn render(
        &self,
        series: &TimeSeries,
        band: &[Option<Bounds>],
    ) -> Result<RenderedChart, DeliveryError> {
        let svg = self.render_svg(series, band)?;
        Ok(RenderedChart {
            bytes: svg.into_bytes(),
            file_name: format!("{}.svg", series.metric()),
            mime_type: "image/svg+xml",
        })
    }
}

/// Renders alert charts as PNG images
#[derive(Clone)]
pub struct PngChartRenderer {
    svg: SvgChartRenderer,
    fonts: Arc<fontdb::Database>,
}

impl PngChartRenderer {
    /// Loads the system fonts once; labels are left out when none are found
    pub fn new(svg: SvgChartRenderer) -> Self {
        let mut fonts = fontdb::Database::new();
        fonts.load_system_fonts();
        let sans = SANS_FAMILIES.into_iter().find(|name| {
            fonts
                .faces()
                .any(|face| face.families.iter().any(|(family, _)| family.as_str() == *name))
        });
        if let Some(name) = sans {
            fonts.set_sans_serif_family(name);
        }
        Self::with_fonts(svg, Arc::new(fonts))
    }

    pub fn with_fonts(svg: SvgChartRenderer, fonts: Arc<fontdb::Database>) -> Self {
        Self { svg, fonts }
    }
}

impl Default for PngChartRenderer {
    fn default() -> Self {
        Self::new(SvgChartRenderer::default())
    }
}

impl std::fmt::Debug for PngChartRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PngChartRenderer")
            .field("svg", &self.svg)
            .field("fonts", &self.fonts.len())
            .finish()
    }
}

fn rasterize(svg: &str, fonts: Arc<fontdb::Database>) -> Result<Vec<u8>, DeliveryError> {
    let options = usvg::Options {
        fontdb: fonts,
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(svg, &options)
        .map_err(|e| DeliveryError::RenderFailure(e.to_string()))?;

    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height()).ok_or_else(|| {
        DeliveryError::RenderFailure(format!(
            "cannot allocate {}x{} canvas",
            size.width(),
            size.height()
        ))
    })?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    pixmap
        .encode_png()
        .map_err(|e| DeliveryError::RenderFailure(e.to_string()))
}

#[async_trait]
impl ChartRenderer for PngChartRenderer {
    async fn render(
        &self,
        series: &TimeSeries,
        band: &[Option<Bounds>],
    ) -> Result<RenderedChart, DeliveryError> {
        let svg = self.svg.render_svg(series, band)?;
        let fonts = self.fonts.clone();
        let bytes = tokio::task::spawn_blocking(move || rasterize(&svg, fonts))
            .await
            .map_err(|e| DeliveryError::RenderFailure(e.to_string()))??;

        Ok(RenderedChart {
            bytes,
            file_name: format!("{}.png", series.metric()),
            mime_type: "image/png",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::BoundEstimator;
    use crate::models::{MetricId, DEFAULT_BUCKET_WIDTH};
    use chrono::{TimeZone, Utc};

    fn series(values: &[f64]) -> TimeSeries {
        let start = Utc.with_ymd_and_hms(2024, 3, 23, 0, 0, 0).unwrap();
        TimeSeries::from_values(MetricId::Views, start, DEFAULT_BUCKET_WIDTH, values).unwrap()
    }

    #[tokio::test]
    async fn test_render_draws_metric_and_band() {
        let s = series(&[10.0, 12.0, 11.0, 13.0, 12.0, 14.0, 13.0, 40.0]);
        let band = BoundEstimator::default().band(&s);

        let chart = SvgChartRenderer::default().render(&s, &band).await.unwrap();
        let svg = String::from_utf8(chart.bytes).unwrap();

        assert_eq!(chart.file_name, "views.svg");
        assert_eq!(chart.mime_type, "image/svg+xml");
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        // metric line plus one upper and one lower segment
        assert_eq!(svg.matches("<polyline").count(), 3);
        assert!(svg.contains(">views</text>"));
    }

    #[tokio::test]
    async fn test_render_without_bounds_draws_metric_only() {
        let s = series(&[1.0, 2.0, 3.0]);
        let band = vec![None; 3];

        let chart = SvgChartRenderer::default().render(&s, &band).await.unwrap();
        let svg = String::from_utf8(chart.bytes).unwrap();
        assert_eq!(svg.matches("<polyline").count(), 1);
    }

    #[test]
    fn test_every_other_tick_is_labelled() {
        let s = series(&[5.0; 17]);
        let svg = SvgChartRenderer::default().render_svg(&s, &[]).unwrap();

        // ticks at 0, 4, 8, 12, 16; labels at 0, 8, 16
        assert!(svg.contains(">00:00</text>"));
        assert!(!svg.contains(">01:00</text>"));
        assert!(svg.contains(">02:00</text>"));
        assert!(svg.contains(">04:00</text>"));
    }

    #[test]
    fn test_tiny_canvas_is_render_failure() {
        let s = series(&[1.0, 2.0]);
        let err = SvgChartRenderer::new(50, 50).render_svg(&s, &[]).unwrap_err();
        assert!(matches!(err, DeliveryError::RenderFailure(_)));
    }

    #[tokio::test]
    async fn test_png_render_matches_canvas() {
        let s = series(&[10.0, 12.0, 11.0, 13.0, 12.0, 14.0, 13.0, 40.0]);
        let band = BoundEstimator::default().band(&s);
        let renderer = PngChartRenderer::with_fonts(
            SvgChartRenderer::new(400, 300),
            Arc::new(fontdb::Database::new()),
        );

        let chart = renderer.render(&s, &band).await.unwrap();

        assert_eq!(chart.file_name, "views.png");
        assert_eq!(chart.mime_type, "image/png");
        assert_eq!(&chart.bytes[..8], b"\x89PNG\r\n\x1a\n");
        // IHDR width and height, big-endian
        assert_eq!(&chart.bytes[16..20], &400u32.to_be_bytes());
        assert_eq!(&chart.bytes[20..24], &300u32.to_be_bytes());
    }

    #[tokio::test]
    async fn test_png_render_keeps_canvas_check() {
        let s = series(&[1.0, 2.0]);
        let renderer = PngChartRenderer::with_fonts(
            SvgChartRenderer::new(50, 50),
            Arc::new(fontdb::Database::new()),
        );
        let err = renderer.render(&s, &[]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::RenderFailure(_)));
    }

    #[test]
    fn test_defined_segments_split_on_gaps() {
        let b = Bounds { lower: 0.0, upper: 1.0 };
        let segments = defined_segments(&[None, Some(b), Some(b), None, Some(b)]);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(segments[1][0].0, 4);
    }
}

use std::{ops::Range, path::Path};

use log::{debug, warn};
use plotters::{
    coord::{ranged1d::Ranged, types::RangedCoordf64},
    prelude::*,
};
use thiserror::Error;

use crate::{
    config::Style,
    plot::{Band, EntryKind, LegendPosition, Plot, PlotHist},
};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 800;
const RATIO_HEIGHT: u32 = 220;
const FONT: &str = "sans-serif";
const BAND_ALPHA: f64 = 0.35;
const MARKER_SIZE: i32 = 3;

/// Render a plot as scalable vector graphics
pub fn render_svg(plot: &Plot, path: &Path) -> Result<(), RenderError> {
    debug!("Rendering {path:?}");
    if plot.edges.len() < 2 {
        return Err(RenderError::Empty);
    }
    let root = SVGBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(drawing_err)?;

    let (main, lower) = if plot.ratio.is_some() {
        let (main, lower) = root.split_vertically(HEIGHT - RATIO_HEIGHT);
        (main, Some(lower))
    } else {
        (root.clone(), None)
    };

    let x_range = plot.edges[0]..plot.edges[plot.edges.len() - 1];
    let (ymin, ymax) = plot.y_range;
    let x_desc = if lower.is_some() { "" } else { plot.x_title.as_str() };
    let mut builder = ChartBuilder::on(&main);
    builder
        .margin(15)
        .margin_top(50)
        .x_label_area_size(if lower.is_some() { 10 } else { 50 })
        .y_label_area_size(70);
    if plot.logy {
        let ymin = if ymin > 0. { ymin } else { 1e-2 };
        let mut chart = builder
            .build_cartesian_2d(x_range.clone(), (ymin..ymax).log_scale())
            .map_err(drawing_err)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc(x_desc)
            .y_desc(plot.y_title.as_str())
            .draw()
            .map_err(drawing_err)?;
        draw_main(&mut chart, plot)?;
    } else {
        let mut chart = builder
            .build_cartesian_2d(x_range.clone(), ymin..ymax)
            .map_err(drawing_err)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc(x_desc)
            .y_desc(plot.y_title.as_str())
            .draw()
            .map_err(drawing_err)?;
        draw_main(&mut chart, plot)?;
    }

    if let (Some(lower), Some(ratio)) = (lower, &plot.ratio) {
        let (lo, hi) = ratio.range;
        let mut chart = ChartBuilder::on(&lower)
            .margin(15)
            .margin_top(0)
            .x_label_area_size(50)
            .y_label_area_size(70)
            .build_cartesian_2d(x_range.clone(), lo..hi)
            .map_err(drawing_err)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .y_labels(5)
            .x_desc(plot.x_title.as_str())
            .y_desc(ratio.title.as_str())
            .draw()
            .map_err(drawing_err)?;
        draw_band(&mut chart, &plot.edges, &ratio.band)?;
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(x_range.start, 1.), (x_range.end, 1.)],
                BLACK.stroke_width(1),
            )))
            .map_err(drawing_err)?;
        for point in &ratio.points {
            let x = bin_centre(&plot.edges, point.bin);
            let (lo_err, hi_err) = (point.value - point.error, point.value + point.error);
            chart
                .draw_series([PathElement::new(vec![(x, lo_err), (x, hi_err)], BLACK)])
                .map_err(drawing_err)?;
            if (lo..hi).contains(&point.value) {
                chart
                    .draw_series([Circle::new((x, point.value), MARKER_SIZE, BLACK.filled())])
                    .map_err(drawing_err)?;
            }
        }
    }

    if let Some(decorations) = &plot.decorations {
        let bold = (FONT, 22).into_font().style(FontStyle::Bold);
        root.draw(&Text::new(decorations.label.clone(), (85, 15), bold))
            .map_err(drawing_err)?;
        if let Some(lumi) = &decorations.lumi_label {
            let x = WIDTH as i32 - 15 - 9 * lumi.chars().count() as i32;
            root.draw(&Text::new(lumi.clone(), (x, 18), (FONT, 18).into_font()))
                .map_err(drawing_err)?;
        }
        if let Some(extra) = &decorations.extra_text {
            root.draw(&Text::new(extra.clone(), (100, 60), (FONT, 16).into_font()))
                .map_err(drawing_err)?;
        }
    }

    root.present().map_err(drawing_err)?;
    Ok(())
}

fn draw_main<'a, Y>(
    chart: &mut ChartContext<'a, SVGBackend<'a>, Cartesian2d<RangedCoordf64, Y>>,
    plot: &Plot,
) -> Result<(), RenderError>
where
    Y: Ranged<ValueType = f64>,
{
    // drawn from the top of the stack down so lower bars stay visible
    let draw_order: Box<dyn Iterator<Item = &PlotHist>> = if plot.stacked {
        Box::new(plot.stack.iter().rev())
    } else {
        Box::new(plot.stack.iter())
    };
    for hist in draw_order {
        draw_hist(chart, &plot.edges, hist, plot.stacked)?;
    }
    for band in &plot.bands {
        draw_band(chart, &plot.edges, band)?;
    }
    for hist in &plot.signals {
        draw_hist(chart, &plot.edges, hist, false)?;
    }
    if let Some(data) = &plot.data {
        draw_markers(chart, &plot.edges, data)?;
    }

    for entry in &plot.legend {
        let color = parse_color(&entry.color)?;
        let style = match entry.kind {
            EntryKind::Data => Style::Marker,
            _ => entry.style,
        };
        let series = chart
            .draw_series(std::iter::empty::<Circle<(f64, f64), i32>>())
            .map_err(drawing_err)?;
        series.label(entry.title.as_str());
        match style {
            Style::Fill => series.legend(move |(x, y)| {
                Rectangle::new([(x, y - 6), (x + 18, y + 6)], color.filled())
            }),
            Style::Line => series.legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 18, y)], color.stroke_width(2))
            }),
            Style::Marker => series
                .legend(move |(x, y)| Circle::new((x + 9, y), MARKER_SIZE, color.filled())),
        };
    }
    let position = match plot.legend_position {
        LegendPosition::Left => SeriesLabelPosition::UpperLeft,
        LegendPosition::Right => SeriesLabelPosition::UpperRight,
    };
    chart
        .configure_series_labels()
        .position(position)
        .background_style(WHITE.mix(0.8))
        .label_font((FONT, 16))
        .draw()
        .map_err(drawing_err)?;
    Ok(())
}

fn draw_hist<Y>(
    chart: &mut ChartContext<'_, SVGBackend<'_>, Cartesian2d<RangedCoordf64, Y>>,
    edges: &[f64],
    hist: &PlotHist,
    in_stack: bool,
) -> Result<(), RenderError>
where
    Y: Ranged<ValueType = f64>,
{
    let color = parse_color(&hist.color)?;
    match hist.style {
        Style::Fill if in_stack => {
            let bars = bins(edges).zip(&hist.base).zip(&hist.top).map(|((x, base), top)| {
                Rectangle::new([(x.start, *base), (x.end, *top)], color.filled())
            });
            chart.draw_series(bars).map_err(drawing_err)?;
        }
        Style::Marker => draw_markers(chart, edges, hist)?,
        _ => {
            // outline
            let mut points = Vec::with_capacity(2 * edges.len());
            points.push((edges[0], hist.base[0]));
            for (x, top) in bins(edges).zip(&hist.top) {
                points.push((x.start, *top));
                points.push((x.end, *top));
            }
            if let Some(base) = hist.base.last() {
                points.push((edges[edges.len() - 1], *base));
            }
            chart
                .draw_series(std::iter::once(PathElement::new(points, color.stroke_width(2))))
                .map_err(drawing_err)?;
        }
    }
    Ok(())
}

fn draw_markers<Y>(
    chart: &mut ChartContext<'_, SVGBackend<'_>, Cartesian2d<RangedCoordf64, Y>>,
    edges: &[f64],
    hist: &PlotHist,
) -> Result<(), RenderError>
where
    Y: Ranged<ValueType = f64>,
{
    let color = parse_color(&hist.color)?;
    for (bin, (top, err)) in hist.top.iter().zip(&hist.errors).enumerate() {
        if *top == 0. && *err == 0. {
            continue;
        }
        let x = bin_centre(edges, bin);
        chart
            .draw_series([PathElement::new(vec![(x, top - err), (x, top + err)], color)])
            .map_err(drawing_err)?;
        chart
            .draw_series([Circle::new((x, *top), MARKER_SIZE, color.filled())])
            .map_err(drawing_err)?;
    }
    Ok(())
}

fn draw_band<Y>(
    chart: &mut ChartContext<'_, SVGBackend<'_>, Cartesian2d<RangedCoordf64, Y>>,
    edges: &[f64],
    band: &Band,
) -> Result<(), RenderError>
where
    Y: Ranged<ValueType = f64>,
{
    let color = parse_color(&band.color)?;
    let boxes = bins(edges)
        .zip(band.lo.iter().zip(&band.hi))
        .filter(|(_, (lo, hi))| hi > lo)
        .map(|(x, (lo, hi))| {
            Rectangle::new([(x.start, *lo), (x.end, *hi)], color.mix(BAND_ALPHA).filled())
        });
    chart.draw_series(boxes).map_err(drawing_err)?;
    Ok(())
}

fn bins(edges: &[f64]) -> impl Iterator<Item = Range<f64>> + '_ {
    edges.windows(2).map(|w| w[0]..w[1])
}

fn bin_centre(edges: &[f64], bin: usize) -> f64 {
    (edges[bin] + edges[bin + 1]) / 2.
}

/// Parse a colour of the form `#rrggbb` or a basic colour name
pub fn parse_color(color: &str) -> Result<RGBColor, RenderError> {
    let named = match color.to_ascii_lowercase().as_str() {
        "black" => Some(BLACK),
        "white" => Some(WHITE),
        "red" => Some(RED),
        "green" => Some(GREEN),
        "blue" => Some(BLUE),
        "yellow" => Some(YELLOW),
        "cyan" => Some(CYAN),
        "magenta" => Some(MAGENTA),
        _ => None,
    };
    if let Some(named) = named {
        return Ok(named);
    }
    let hex = color
        .strip_prefix('#')
        .filter(|hex| hex.len() == 6)
        .ok_or_else(|| RenderError::Color(color.to_owned()))?;
    let channel = |range: Range<usize>| {
        u8::from_str_radix(&hex[range], 16).map_err(|_| RenderError::Color(color.to_owned()))
    };
    Ok(RGBColor(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn drawing_err<E: std::error::Error + Send + Sync>(err: DrawingAreaErrorKind<E>) -> RenderError {
    warn!("Drawing failed: {err}");
    RenderError::Drawing(err.to_string())
}

/// Error rendering a plot
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Plot has no bins")]
    Empty,
    #[error("Unsupported colour `{0}`")]
    Color(String),
    #[error("Failed to draw plot: {0}")]
    Drawing(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::GroupHist,
        hist::Hist1D,
        plot::{make_plot, PlotOptions},
    };

    fn group(name: &str, contents: &[f64], style: Style) -> GroupHist {
        let mut hist = Hist1D::uniform(contents.len(), 0., 1.).unwrap();
        let width = 1. / contents.len() as f64;
        for (i, c) in contents.iter().enumerate() {
            hist.fill((i as f64 + 0.5) * width, *c);
        }
        GroupHist {
            name: name.to_owned(),
            title: name.to_uppercase(),
            color: None,
            style,
            hist,
            counts: Vec::new(),
        }
    }

    #[test]
    fn colors() {
        assert_eq!(parse_color("#ff8000").unwrap(), RGBColor(255, 128, 0));
        assert_eq!(parse_color("Red").unwrap(), RED);
        assert!(matches!(parse_color("#ff80"), Err(RenderError::Color(_))));
        assert!(matches!(parse_color("#gg0000"), Err(RenderError::Color(_))));
    }

    #[test]
    fn svg() {
        let stack = [
            group("a", &[3., 2., 1.], Style::Fill),
            group("b", &[1., 2., 3.], Style::Fill),
        ];
        let signal = [group("s", &[0.5, 1., 0.5], Style::Line)];
        let data = group("data", &[4., 5., 3.], Style::Marker);
        let dir = tempfile::tempdir().unwrap();

        for logy in [false, true] {
            let options = PlotOptions::builder()
                .logy(logy)
                .luminosity(36.)
                .x_title("m [GeV]")
                .build();
            let plot = make_plot(&stack, &signal, Some(&data), &options).unwrap();
            let file = dir.path().join(format!("plot_{logy}.svg"));
            render_svg(&plot, &file).unwrap();
            let svg = std::fs::read_to_string(&file).unwrap();
            assert!(svg.starts_with("<svg"));
            assert!(svg.contains("DATA"));
        }

        let options = PlotOptions::builder().stacked(false).ratio(false).build();
        let plot = make_plot(&stack, &[], None, &options).unwrap();
        render_svg(&plot, &dir.path().join("overlay.svg")).unwrap();
    }
}

//! svg diagnostics: residual scatters, dfbeta index plots, case deletion, KM curves

use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use plotters::prelude::*;

use crate::{
    error::{Result, SurvivalError},
    kaplan_meier::KaplanMeier,
    smoothing::{lowess, DEFAULT_FRAC, DEFAULT_ITERATIONS},
};

const SIZE: (u32, u32) = (900, 600);

/// lowercase file stem: runs of anything non-alphanumeric become one `_`
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// `<dir>/<slug>.svg`
pub fn plot_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.svg", slug(stem)))
}

/// min..max with 5% headroom, widened when every value is the same
fn padded_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0..1.0;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { lo.abs().max(1.0) * 0.5 };
    (lo - pad)..(hi + pad)
}

/// horizontal dashed line at `y` across `x`
fn dashed_segments(x: &Range<f64>, y: f64, color: RGBColor) -> Vec<PathElement<(f64, f64)>> {
    let dash = (x.end - x.start) / 80.0;
    (0..40)
        .map(|k| {
            let start = x.start + 2.0 * k as f64 * dash;
            PathElement::new(vec![(start, y), (start + dash, y)], color)
        })
        .collect()
}

/// residuals against one covariate with a LOWESS trend line.
///
/// with `log_x` the x values are ln-transformed before plotting, and points with
/// non-positive x are left out.
pub fn residual_scatter(
    path: &Path,
    title: &str,
    variable: &str,
    y_label: &str,
    xs: &[f64],
    ys: &[f64],
    log_x: bool,
) -> Result<()> {
    if xs.len() != ys.len() {
        return Err(SurvivalError::invalid_dimensions(format!(
            "{} x values but {} residuals",
            xs.len(),
            ys.len()
        )));
    }

    let mut skipped = 0usize;
    let points: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(&x, &y)| {
            let x = if log_x {
                if x > 0.0 { x.ln() } else { f64::NAN }
            } else {
                x
            };
            if x.is_finite() && y.is_finite() {
                Some((x, y))
            } else {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        warn!("{}: left out {} points that can't be drawn", title, skipped);
    }
    if points.is_empty() {
        return Err(SurvivalError::invalid_survival_data(format!(
            "{}: nothing to plot",
            title
        )));
    }

    let x_label = if log_x { format!("log({})", variable) } else { variable.to_string() };
    let (px, py): (Vec<f64>, Vec<f64>) = points.iter().copied().unzip();
    let trend = lowess(&px, &py, DEFAULT_FRAC, DEFAULT_ITERATIONS);
    let trend_color = if log_x { RED } else { BLUE };

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(SurvivalError::plot)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20).into_font())
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(
            padded_range(px.iter().copied()),
            padded_range(py.iter().copied()),
        )
        .map_err(SurvivalError::plot)?;
    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .draw()
        .map_err(SurvivalError::plot)?;

    chart
        .draw_series(points.iter().map(|&p| Circle::new(p, 3, BLACK.mix(0.6).filled())))
        .map_err(SurvivalError::plot)?;
    chart
        .draw_series(LineSeries::new(trend, trend_color.stroke_width(2)))
        .map_err(SurvivalError::plot)?;

    root.present().map_err(SurvivalError::plot)?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// one value per observation against its 1-based index, dashed zero line
pub fn index_plot(path: &Path, coefficient: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(SurvivalError::invalid_survival_data("no values for index plot"));
    }
    let x_range = 0.0..(values.len() + 1) as f64;

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(SurvivalError::plot)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("DFbeta for {}", coefficient), ("sans-serif", 20).into_font())
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range.clone(), padded_range(values.iter().copied().chain([0.0])))
        .map_err(SurvivalError::plot)?;
    chart
        .configure_mesh()
        .x_desc("Observation Index")
        .y_desc(format!("DFbeta: {}", coefficient))
        .draw()
        .map_err(SurvivalError::plot)?;

    chart
        .draw_series(dashed_segments(&x_range, 0.0, RED))
        .map_err(SurvivalError::plot)?;
    chart
        .draw_series(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| Circle::new(((i + 1) as f64, v), 2, BLUE.filled())),
        )
        .map_err(SurvivalError::plot)?;

    root.present().map_err(SurvivalError::plot)?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// vertical bar from 0 to each observation's change in the coefficient
pub fn case_deletion_plot(path: &Path, coefficient: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(SurvivalError::invalid_survival_data("no values for case deletion plot"));
    }
    let x_range = 0.0..(values.len() + 1) as f64;

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(SurvivalError::plot)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Case Deletion Plot for {}", coefficient),
            ("sans-serif", 20).into_font(),
        )
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range.clone(), padded_range(values.iter().copied().chain([0.0])))
        .map_err(SurvivalError::plot)?;
    chart
        .configure_mesh()
        .x_desc("Observation Index")
        .y_desc(format!("Change in {} Coefficient", coefficient))
        .draw()
        .map_err(SurvivalError::plot)?;

    chart
        .draw_series(values.iter().enumerate().map(|(i, &v)| {
            let x = (i + 1) as f64;
            PathElement::new(vec![(x, 0.0), (x, v)], BLACK.mix(0.7))
        }))
        .map_err(SurvivalError::plot)?;
    chart
        .draw_series(LineSeries::new(vec![(x_range.start, 0.0), (x_range.end, 0.0)], &RED))
        .map_err(SurvivalError::plot)?;

    root.present().map_err(SurvivalError::plot)?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// scaled Schoenfeld residuals (plus the coefficient) against transformed event
/// time; a flat trend near the dashed coefficient line means proportional hazards
pub fn schoenfeld_plot(
    path: &Path,
    covariate: &str,
    time_label: &str,
    times: &[f64],
    values: &[f64],
    coefficient: f64,
) -> Result<()> {
    if times.len() != values.len() || times.is_empty() {
        return Err(SurvivalError::invalid_dimensions(format!(
            "{} times for {} residuals",
            times.len(),
            values.len()
        )));
    }

    let beta_t: Vec<f64> = values.iter().map(|v| v + coefficient).collect();
    let trend = lowess(times, &beta_t, DEFAULT_FRAC, DEFAULT_ITERATIONS);
    let x_range = padded_range(times.iter().copied());

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(SurvivalError::plot)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Schoenfeld Residuals for {}", covariate),
            ("sans-serif", 20).into_font(),
        )
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(70)
        .build_cartesian_2d(
            x_range.clone(),
            padded_range(beta_t.iter().copied().chain([coefficient])),
        )
        .map_err(SurvivalError::plot)?;
    chart
        .configure_mesh()
        .x_desc(time_label)
        .y_desc(format!("Beta(t) for {}", covariate))
        .draw()
        .map_err(SurvivalError::plot)?;

    chart
        .draw_series(
            times
                .iter()
                .zip(&beta_t)
                .map(|(&t, &b)| Circle::new((t, b), 3, BLACK.mix(0.6).filled())),
        )
        .map_err(SurvivalError::plot)?;
    chart
        .draw_series(LineSeries::new(trend, BLUE.stroke_width(2)))
        .map_err(SurvivalError::plot)?;
    chart
        .draw_series(dashed_segments(&x_range, coefficient, RED))
        .map_err(SurvivalError::plot)?;

    root.present().map_err(SurvivalError::plot)?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// step curves for several Kaplan-Meier fits on one chart, with a legend
pub fn survival_curves(path: &Path, title: &str, curves: &[KaplanMeier]) -> Result<()> {
    if curves.is_empty() {
        return Err(SurvivalError::invalid_survival_data("no survival curves to plot"));
    }
    let t_max = curves
        .iter()
        .flat_map(|km| km.points().iter().map(|p| p.time))
        .fold(0.0f64, f64::max)
        .max(1.0);

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(SurvivalError::plot)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20).into_font())
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..t_max * 1.02, 0.0..1.05)
        .map_err(SurvivalError::plot)?;
    chart
        .configure_mesh()
        .x_desc("Time")
        .y_desc("Survival Probability")
        .draw()
        .map_err(SurvivalError::plot)?;

    for (i, km) in curves.iter().enumerate() {
        let color = Palette99::pick(i).mix(1.0);
        chart
            .draw_series(LineSeries::new(km.step_points(), color.stroke_width(2)))
            .map_err(SurvivalError::plot)?
            .label(km.label())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(SurvivalError::plot)?;

    root.present().map_err(SurvivalError::plot)?;
    debug!("wrote {}", path.display());
    Ok(())
}

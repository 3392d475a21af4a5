//! LOWESS scatterplot smoothing for residual trend lines

/// neighbourhood fraction used by the residual plots
pub const DEFAULT_FRAC: f64 = 2.0 / 3.0;
pub const DEFAULT_ITERATIONS: usize = 3;

/// Cleveland's robust locally weighted linear regression.
///
/// each point is refit from its `ceil(frac * n)` nearest neighbours with tricube
/// weights, followed by `iterations` bisquare reweighting passes. non-finite pairs
/// are skipped; output is sorted by x.
pub fn lowess(xs: &[f64], ys: &[f64], frac: f64, iterations: usize) -> Vec<(f64, f64)> {
    let mut points: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = points.len();
    if n < 2 {
        return points;
    }

    let x: Vec<f64> = points.iter().map(|p| p.0).collect();
    let y: Vec<f64> = points.iter().map(|p| p.1).collect();
    let span = ((frac.clamp(0.0, 1.0) * n as f64).ceil() as usize).clamp(2, n);

    let mut robustness = vec![1.0; n];
    let mut fitted = y.clone();

    for pass in 0..=iterations {
        for i in 0..n {
            // keep the previous estimate if every neighbour got zero weight
            if let Some(value) = local_fit(&x, &y, &robustness, i, span) {
                fitted[i] = value;
            }
        }
        if pass == iterations {
            break;
        }

        let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(a, b)| a - b).collect();
        let scale = median(residuals.iter().map(|r| r.abs()).collect());
        if scale <= f64::EPSILON {
            break; // already an exact fit
        }
        for (w, r) in robustness.iter_mut().zip(&residuals) {
            let u = r / (6.0 * scale);
            *w = if u.abs() < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }

    x.into_iter().zip(fitted).collect()
}

/// weighted least-squares line through the `span` nearest neighbours of x[i],
/// evaluated at x[i]
fn local_fit(x: &[f64], y: &[f64], robustness: &[f64], i: usize, span: usize) -> Option<f64> {
    let n = x.len();
    let xi = x[i];

    // slide a window of `span` sorted points until it's centred on x[i]
    let mut lo = i.saturating_sub(span - 1).min(n - span);
    while lo + span < n && xi - x[lo] > x[lo + span] - xi {
        lo += 1;
    }
    let hi = lo + span;
    let radius = (xi - x[lo]).max(x[hi - 1] - xi);

    let mut sw = 0.0;
    let mut swx = 0.0;
    let mut swy = 0.0;
    let mut swxx = 0.0;
    let mut swxy = 0.0;
    for j in lo..hi {
        let dist = if radius > 0.0 { (x[j] - xi).abs() / radius } else { 0.0 };
        let tricube = if dist < 1.0 { (1.0 - dist.powi(3)).powi(3) } else { 0.0 };
        let w = tricube * robustness[j];
        sw += w;
        swx += w * x[j];
        swy += w * y[j];
        swxx += w * x[j] * x[j];
        swxy += w * x[j] * y[j];
    }

    if sw <= 0.0 {
        return None;
    }
    let mean_x = swx / sw;
    let mean_y = swy / sw;
    let var_x = swxx / sw - mean_x * mean_x;
    if var_x <= 1e-12 * (1.0 + mean_x * mean_x) {
        return Some(mean_y);
    }
    let slope = (swxy / sw - mean_x * mean_y) / var_x;
    Some(mean_y + slope * (xi - mean_x))
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_straight_line_is_reproduced() {
        let xs: Vec<f64> = (0..30).map(|i| i as f64 * 0.5).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 - 0.7 * x).collect();
        let smooth = lowess(&xs, &ys, DEFAULT_FRAC, DEFAULT_ITERATIONS);

        assert_eq!(smooth.len(), 30);
        for (x, y) in smooth {
            assert_relative_eq!(y, 2.0 - 0.7 * x, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_output_sorted_and_nan_skipped() {
        let xs = vec![3.0, 1.0, f64::NAN, 2.0, 5.0, 4.0];
        let ys = vec![1.0, 0.0, 9.0, 0.5, 2.0, 1.5];
        let smooth = lowess(&xs, &ys, 0.8, 1);
        assert_eq!(smooth.len(), 5);
        assert!(smooth.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_outlier_is_downweighted() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let mut ys: Vec<f64> = xs
            .iter()
            .enumerate()
            .map(|(i, x)| 0.5 * x + ((i * 7) % 5) as f64 * 0.5 - 1.0)
            .collect();
        ys[10] = 100.0;

        let robust = lowess(&xs, &ys, 0.5, 3);
        let plain = lowess(&xs, &ys, 0.5, 0);
        let err = |fit: &[(f64, f64)]| (fit[10].1 - 5.0).abs();
        assert!(err(&robust) < err(&plain));
        assert!(err(&robust) < 1.0);
    }

    #[test]
    fn test_tiny_inputs() {
        assert!(lowess(&[], &[], DEFAULT_FRAC, 3).is_empty());
        assert_eq!(lowess(&[1.0], &[2.0], DEFAULT_FRAC, 3), vec![(1.0, 2.0)]);
        // all x equal: falls back to the weighted mean
        let flat = lowess(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0], 1.0, 0);
        for (_, y) in flat {
            assert_relative_eq!(y, 2.0, epsilon = 1e-12);
        }
    }
}

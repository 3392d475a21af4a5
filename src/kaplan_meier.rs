use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{Result, SurvivalError};

/// one step of the product-limit estimate
#[derive(Debug, Clone, PartialEq)]
pub struct KaplanMeierPoint {
    pub time: f64,
    pub at_risk: usize,  // still under observation just before `time`
    pub events: usize,
    pub censored: usize,
    pub survival: f64,
    pub lower: f64,      // log(-log) greenwood band
    pub upper: f64,
}

/// Kaplan-Meier survival curve for one group
#[derive(Debug, Clone)]
pub struct KaplanMeier {
    label: String,
    alpha: f64,
    n_observations: usize,
    points: Vec<KaplanMeierPoint>,
}

impl KaplanMeier {
    /// fit with a 95% confidence band
    pub fn fit(durations: &[f64], events: &[bool], label: impl Into<String>) -> Result<Self> {
        Self::fit_with_alpha(durations, events, label, 0.05)
    }

    pub fn fit_with_alpha(
        durations: &[f64],
        events: &[bool],
        label: impl Into<String>,
        alpha: f64,
    ) -> Result<Self> {
        if durations.len() != events.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "{} durations but {} event flags",
                durations.len(),
                events.len()
            )));
        }
        if durations.is_empty() {
            return Err(SurvivalError::invalid_survival_data(
                "kaplan-meier needs at least one observation",
            ));
        }
        if durations.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(SurvivalError::invalid_survival_data(
                "durations must be finite & non-negative",
            ));
        }
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(SurvivalError::invalid_parameter("alpha", alpha.to_string()));
        }

        let z = Normal::new(0.0, 1.0)
            .map_err(|e| SurvivalError::numerical_error(e.to_string()))?
            .inverse_cdf(1.0 - alpha / 2.0);

        let mut data: Vec<(f64, bool)> = durations.iter().copied().zip(events.iter().copied()).collect();
        data.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = data.len();
        let mut points = Vec::new();
        let mut survival = 1.0f64;
        let mut greenwood = 0.0f64; // sum d / (n (n - d))

        let mut i = 0;
        while i < n {
            let t = data[i].0;
            let at_risk = n - i;
            let mut deaths = 0usize;
            let mut censored = 0usize;
            while i < n && data[i].0 == t {
                if data[i].1 {
                    deaths += 1;
                } else {
                    censored += 1;
                }
                i += 1;
            }

            if deaths > 0 {
                survival *= 1.0 - deaths as f64 / at_risk as f64;
                if deaths < at_risk {
                    greenwood += deaths as f64 / (at_risk as f64 * (at_risk - deaths) as f64);
                }
            }

            let (lower, upper) = log_log_band(survival, greenwood, z);
            points.push(KaplanMeierPoint {
                time: t,
                at_risk,
                events: deaths,
                censored,
                survival,
                lower,
                upper,
            });
        }

        Ok(Self {
            label: label.into(),
            alpha,
            n_observations: n,
            points,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn n_observations(&self) -> usize {
        self.n_observations
    }

    pub fn points(&self) -> &[KaplanMeierPoint] {
        &self.points
    }

    /// S(t), right-continuous - 1 before the first observed time
    pub fn survival_at(&self, t: f64) -> f64 {
        let idx = self.points.partition_point(|p| p.time <= t);
        if idx == 0 {
            1.0
        } else {
            self.points[idx - 1].survival
        }
    }

    /// first time the curve reaches 0.5 or below, None if it never does
    pub fn median_survival(&self) -> Option<f64> {
        self.points.iter().find(|p| p.survival <= 0.5).map(|p| p.time)
    }

    /// (time, survival) corners of the step function, starting at (0, 1)
    pub fn step_points(&self) -> Vec<(f64, f64)> {
        let mut corners = vec![(0.0, 1.0)];
        let mut previous = 1.0;
        for p in &self.points {
            corners.push((p.time, previous));
            corners.push((p.time, p.survival));
            previous = p.survival;
        }
        corners
    }
}

/// exp(-exp(log(-log S) +- z * se)) with se from greenwood's sum on the log-log scale
fn log_log_band(survival: f64, greenwood: f64, z: f64) -> (f64, f64) {
    if survival >= 1.0 {
        return (1.0, 1.0);
    }
    if survival <= 0.0 {
        return (0.0, 0.0);
    }
    let log_s = survival.ln();
    let se = (greenwood / (log_s * log_s)).sqrt();
    let center = (-log_s).ln();
    let lower = (-(center + z * se).exp()).exp();
    let upper = (-(center - z * se).exp()).exp();
    (lower, upper)
}

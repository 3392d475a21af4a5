use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{Result, SurvivalError};
use crate::formula::Formula;
use crate::table::ObservationTable;

/// survival data - times, events, and the covariate design matrix
#[derive(Debug, Clone)]
pub struct SurvivalData {
    times: Array1<f64>,                 // time to event/censoring
    events: Vec<bool>,                  // true = event, false = censored
    covariates: Array2<f64>,            // design matrix (n_samples x n_features)
    feature_names: Vec<String>,         // one per design column
    risk_set_indices: Vec<Vec<usize>>,  // precomputed per distinct event time
}

impl SurvivalData {
    /// make new survival data from raw vecs/arrays
    pub fn new(
        times: Vec<f64>,         // survival/censoring times
        events: Vec<bool>,       // true = event occurred, false = censored
        covariates: Array2<f64>, // patient features matrix
    ) -> Result<Self> {
        let names = (0..covariates.ncols()).map(|j| format!("x{}", j)).collect();
        Self::with_feature_names(times, events, covariates, names)
    }

    /// same as `new` but with labelled covariate columns
    pub fn with_feature_names(
        times: Vec<f64>,
        events: Vec<bool>,
        covariates: Array2<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        let n_samples = times.len();

        if events.len() != n_samples {
            return Err(SurvivalError::invalid_dimensions(format!(
                "times len ({}) != events len ({})",
                n_samples,
                events.len()
            )));
        }

        if covariates.nrows() != n_samples {
            return Err(SurvivalError::invalid_dimensions(format!(
                "covariates rows ({}) != n_samples ({})",
                covariates.nrows(),
                n_samples
            )));
        }

        if feature_names.len() != covariates.ncols() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "{} feature names for {} covariate columns",
                feature_names.len(),
                covariates.ncols()
            )));
        }

        if times.iter().any(|&t| t <= 0.0 || !t.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "survival times must be positive & finite",
            ));
        }

        if covariates.iter().any(|v| !v.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "covariates must be finite",
            ));
        }

        let mut data = Self {
            times: Array1::from(times),
            events,
            covariates,
            feature_names,
            risk_set_indices: Vec::new(),
        };

        data.compute_risk_sets();
        Ok(data)
    }

    /// pull duration, event flag & design matrix for `formula` out of a table
    pub fn from_table(
        table: &ObservationTable,
        duration_col: &str,
        event_col: &str,
        formula: &Formula,
    ) -> Result<Self> {
        let times = table.numeric(duration_col)?.to_vec();
        let events = table
            .numeric(event_col)?
            .iter()
            .map(|&s| {
                if s == 1.0 {
                    Ok(true)
                } else if s == 0.0 {
                    Ok(false)
                } else {
                    Err(SurvivalError::invalid_survival_data(format!(
                        "event column '{}' must be 0/1, found {}",
                        event_col, s
                    )))
                }
            })
            .collect::<Result<Vec<bool>>>()?;

        let design = formula.design(table)?;
        Self::with_feature_names(times, events, design.matrix, design.column_names)
    }

    /// precompute risk sets for each event time (who's still at risk)
    fn compute_risk_sets(&mut self) {
        let event_times = self.event_times();

        self.risk_set_indices = event_times
            .iter()
            .map(|&event_time| {
                (0..self.n_samples())
                    .filter(|&i| self.times[i] >= event_time)
                    .collect()
            })
            .collect();
    }

    /// how many patients
    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    /// how many design columns per patient
    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    /// how many observed events
    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    /// survival/censoring times
    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    /// event indicators (true = event, false = censored)
    pub fn events(&self) -> &[bool] {
        &self.events
    }

    /// design matrix
    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// precomputed risk sets, aligned with `event_times()`
    pub fn risk_sets(&self) -> &[Vec<usize>] {
        &self.risk_set_indices
    }

    /// unique event times in order
    pub fn event_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .times
            .iter()
            .zip(self.events.iter())
            .filter_map(|(time, event)| if *event { Some(*time) } else { None })
            .collect();

        times.sort_by(f64::total_cmp);
        times.dedup();
        times
    }

    /// grab a subset of patients by indices
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_samples()) {
            return Err(SurvivalError::invalid_dimensions("subset index out of bounds"));
        }

        let times: Vec<f64> = indices.iter().map(|&i| self.times[i]).collect();
        let events: Vec<bool> = indices.iter().map(|&i| self.events[i]).collect();
        let covariates = self.covariates.select(ndarray::Axis(0), indices);

        Self::with_feature_names(times, events, covariates, self.feature_names.clone())
    }

    /// standardize features (mean=0, std=1) - modifies in place
    pub fn standardize_covariates(&mut self) -> Result<(Array1<f64>, Array1<f64>)> {
        let (means, stds) = column_moments(self.covariates.view())?;

        for j in 0..self.n_features() {
            if stds[j] == 0.0 {
                return Err(SurvivalError::numerical_error(format!(
                    "feature '{}' has zero variance - can't standardize",
                    self.feature_names[j]
                )));
            }

            // z-score normalization
            for i in 0..self.n_samples() {
                self.covariates[[i, j]] = (self.covariates[[i, j]] - means[j]) / stds[j];
            }
        }

        Ok((means, stds))
    }
}

/// column means & population std devs
pub(crate) fn column_moments(x: ArrayView2<'_, f64>) -> Result<(Array1<f64>, Array1<f64>)> {
    if x.nrows() == 0 {
        return Err(SurvivalError::invalid_dimensions("no rows to summarize"));
    }
    let means = x
        .mean_axis(ndarray::Axis(0))
        .ok_or_else(|| SurvivalError::invalid_dimensions("no rows to summarize"))?;
    let stds = x.std_axis(ndarray::Axis(0), 0.0);
    Ok((means, stds))
}

use std::fmt;

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
    formula::Formula,
    metrics::{aic, harrell_c_index},
    optimization::{CoxOptimizer, OptimizationConfig},
    table::ObservationTable,
};

/// Breslow estimate of the baseline cumulative hazard, for a subject sitting
/// at the covariate means
#[derive(Debug, Clone)]
pub struct BaselineHazard {
    pub times: Vec<f64>,              // distinct observed times, ascending
    pub cumulative_hazard: Vec<f64>,  // H0 right after each time
}

impl BaselineHazard {
    /// H0(t) - step function, 0 before the first time
    pub fn at(&self, t: f64) -> f64 {
        let idx = self.times.partition_point(|&s| s <= t);
        if idx == 0 {
            0.0
        } else {
            self.cumulative_hazard[idx - 1]
        }
    }

    /// baseline survival exp(-H0(t))
    pub fn survival_at(&self, t: f64) -> f64 {
        (-self.at(t)).exp()
    }
}

#[derive(Debug, Clone)]
struct FittedState {
    coefficients: Array1<f64>,
    variance: Array2<f64>,
    log_likelihood: f64,
    null_log_likelihood: f64,
    means: Array1<f64>,
    baseline: BaselineHazard,
    feature_names: Vec<String>,
    concordance: Option<f64>,
    n_samples: usize,
    n_events: usize,
    iterations: usize,
}

/// cox proportional hazards model, Efron ties, optional ridge penalty
#[derive(Debug, Clone)]
pub struct CoxModel {
    penalizer: f64,                     // ridge penalty on standardized coefs
    max_iterations: usize,              // newton iteration limit
    tolerance: f64,                     // convergence threshold on log-lik
    alpha: f64,                         // 1 - confidence level for intervals
    feature_names: Option<Vec<String>>, // optional feature labels
    formula: Option<Formula>,           // set by fit_formula
    state: Option<FittedState>,         // None until fit
}

impl Default for CoxModel {
    fn default() -> Self {
        Self {
            penalizer: 0.0,
            max_iterations: 50,
            tolerance: 1e-9,
            alpha: 0.05,
            feature_names: None,
            formula: None,
            state: None,
        }
    }
}

impl CoxModel {
    /// new cox model w/ defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// ridge penalty - shrinks coefficients, negative values clamp to 0
    pub fn with_penalizer(mut self, penalty: f64) -> Self {
        self.penalizer = penalty.max(0.0);
        self
    }

    /// max newton iterations before giving up
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// how close is close enough for convergence
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    /// alpha for the (1 - alpha) confidence intervals in the summary
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// give names to your features for nicer output
    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = Some(names);
        self
    }

    /// unfitted copy with the same settings
    pub fn unfitted(&self) -> Self {
        Self {
            state: None,
            formula: None,
            ..self.clone()
        }
    }

    /// fit the model to data - this does the actual work
    pub fn fit(&mut self, data: &SurvivalData) -> Result<&mut Self> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(SurvivalError::invalid_parameter("alpha", self.alpha.to_string()));
        }

        let feature_names = match &self.feature_names {
            Some(names) if names.len() != data.n_features() => {
                return Err(SurvivalError::invalid_dimensions(format!(
                    "{} feature names for {} features",
                    names.len(),
                    data.n_features()
                )));
            }
            Some(names) => names.clone(),
            None => data.feature_names().to_vec(),
        };

        let config = OptimizationConfig {
            penalizer: self.penalizer,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            ..Default::default()
        };

        let result = CoxOptimizer::new(config).optimize(data)?;
        let baseline = breslow_baseline(data, &result.coefficients, &result.means);
        let risk_scores = data.covariates().dot(&result.coefficients);
        let concordance = harrell_c_index(risk_scores.view(), data.times(), data.events()).ok();

        debug!(
            "fit {} features on {} samples in {} iterations, log-lik {:.4}",
            data.n_features(),
            data.n_samples(),
            result.iterations,
            result.log_likelihood
        );

        self.state = Some(FittedState {
            coefficients: result.coefficients,
            variance: result.variance,
            log_likelihood: result.log_likelihood,
            null_log_likelihood: result.null_log_likelihood,
            means: result.means,
            baseline,
            feature_names,
            concordance,
            n_samples: data.n_samples(),
            n_events: data.n_events(),
            iterations: result.iterations,
        });

        Ok(self)
    }

    /// build the design for `formula` from the table and fit it.
    /// returns the survival data the model was fit on (needed for residuals)
    pub fn fit_formula(
        &mut self,
        table: &ObservationTable,
        duration_col: &str,
        event_col: &str,
        formula: &Formula,
    ) -> Result<SurvivalData> {
        let data = SurvivalData::from_table(table, duration_col, event_col, formula)?;
        self.fit(&data)?;
        self.formula = Some(formula.clone());
        Ok(data)
    }

    fn state(&self) -> Result<&FittedState> {
        self.state.as_ref().ok_or(SurvivalError::ModelNotFitted)
    }

    /// get the fitted coefficients (betas)
    pub fn coefficients(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.state()?.coefficients.view())
    }

    /// inverse observed information
    pub fn variance_matrix(&self) -> Result<ArrayView2<'_, f64>> {
        Ok(self.state()?.variance.view())
    }

    pub fn standard_errors(&self) -> Result<Array1<f64>> {
        Ok(self.state()?.variance.diag().mapv(f64::sqrt))
    }

    pub fn log_likelihood(&self) -> Result<f64> {
        Ok(self.state()?.log_likelihood)
    }

    pub fn null_log_likelihood(&self) -> Result<f64> {
        Ok(self.state()?.null_log_likelihood)
    }

    /// partial AIC: -2 ll + 2 k
    pub fn aic(&self) -> Result<f64> {
        let state = self.state()?;
        Ok(aic(state.log_likelihood, state.coefficients.len()))
    }

    pub fn concordance(&self) -> Result<Option<f64>> {
        Ok(self.state()?.concordance)
    }

    pub fn feature_names(&self) -> Result<&[String]> {
        Ok(&self.state()?.feature_names)
    }

    /// newton steps the last fit took
    pub fn iterations(&self) -> Result<usize> {
        Ok(self.state()?.iterations)
    }

    /// covariate means used to center partial hazards
    pub fn means(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.state()?.means.view())
    }

    pub fn baseline_hazard(&self) -> Result<&BaselineHazard> {
        Ok(&self.state()?.baseline)
    }

    pub fn formula(&self) -> Option<&Formula> {
        self.formula.as_ref()
    }

    pub fn n_parameters(&self) -> Result<usize> {
        Ok(self.state()?.coefficients.len())
    }

    /// predict risk scores (linear predictor x'beta) for new patients
    pub fn predict(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let coefs = self.coefficients()?;

        if covariates.ncols() != coefs.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "feature count mismatch: expected {}, got {}",
                coefs.len(),
                covariates.ncols()
            )));
        }

        Ok(covariates.dot(&coefs))
    }

    /// exp((x - mean)'beta) - the multiplier on the baseline hazard
    pub fn predict_partial_hazard(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let linear = self.predict(covariates)?;
        let state = self.state()?;
        let offset = state.means.dot(&state.coefficients);
        Ok(linear.mapv(|lp| (lp - offset).exp()))
    }

    /// predict hazard ratios (exp of risk scores)
    pub fn predict_hazard_ratios(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let linear_predictors = self.predict(covariates)?;
        Ok(linear_predictors.mapv(f64::exp))
    }

    /// survival probs S(t|x) = exp(-H0(t) * partial hazard), one row per patient
    pub fn predict_survival(
        &self,
        covariates: ArrayView2<f64>,
        times: ArrayView1<f64>,
    ) -> Result<Array2<f64>> {
        let partial = self.predict_partial_hazard(covariates)?;
        let baseline = self.baseline_hazard()?;

        let mut survival_probs = Array2::zeros((covariates.nrows(), times.len()));
        for (j, &t) in times.iter().enumerate() {
            let h0 = baseline.at(t);
            for (i, &ph) in partial.iter().enumerate() {
                survival_probs[[i, j]] = (-h0 * ph).exp();
            }
        }

        Ok(survival_probs)
    }

    /// get a nice summary of the fitted model
    pub fn summary(&self) -> Result<CoxModelSummary> {
        let state = self.state()?;
        let standard_normal =
            Normal::new(0.0, 1.0).map_err(|e| SurvivalError::numerical_error(e.to_string()))?;
        let z_crit = standard_normal.inverse_cdf(1.0 - self.alpha / 2.0);

        let rows = state
            .feature_names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let coef = state.coefficients[j];
                let se = state.variance[[j, j]].sqrt();
                let z = coef / se;
                let p = 2.0 * (1.0 - standard_normal.cdf(z.abs()));
                CoefficientRow {
                    name: name.clone(),
                    coef,
                    hazard_ratio: coef.exp(),
                    se,
                    lower: coef - z_crit * se,
                    upper: coef + z_crit * se,
                    z,
                    p,
                }
            })
            .collect();

        let k = state.coefficients.len();
        let lr_statistic = 2.0 * (state.log_likelihood - state.null_log_likelihood);
        let lr_p = if k > 0 {
            let chi2 =
                ChiSquared::new(k as f64).map_err(|e| SurvivalError::numerical_error(e.to_string()))?;
            Some(1.0 - chi2.cdf(lr_statistic.max(0.0)))
        } else {
            None
        };

        Ok(CoxModelSummary {
            formula: self.formula.as_ref().map(|f| f.to_string()),
            n_samples: state.n_samples,
            n_events: state.n_events,
            penalizer: self.penalizer,
            alpha: self.alpha,
            coefficients: rows,
            log_likelihood: state.log_likelihood,
            aic: aic(state.log_likelihood, k),
            concordance: state.concordance,
            lr_statistic,
            lr_df: k,
            lr_p,
            iterations: state.iterations,
        })
    }

    /// has this model been fit to data yet?
    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn penalizer(&self) -> f64 {
        self.penalizer
    }
}

/// Breslow: dH0(t) = d(t) / sum over risk set of exp((x - mean)'beta)
pub(crate) fn breslow_baseline(
    data: &SurvivalData,
    coefficients: &Array1<f64>,
    means: &Array1<f64>,
) -> BaselineHazard {
    let offset = means.dot(coefficients);
    let risk: Vec<f64> = data
        .covariates()
        .dot(coefficients)
        .iter()
        .map(|lp| (lp - offset).exp())
        .collect();

    let times = data.times();
    let events = data.events();
    let mut order: Vec<usize> = (0..data.n_samples()).collect();
    order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));

    // suffix sums give the risk set total at each position
    let mut suffix = vec![0.0; order.len() + 1];
    for pos in (0..order.len()).rev() {
        suffix[pos] = suffix[pos + 1] + risk[order[pos]];
    }

    let mut distinct = Vec::new();
    let mut cumulative = Vec::new();
    let mut total = 0.0;
    let mut pos = 0;
    while pos < order.len() {
        let t = times[order[pos]];
        let risk_sum = suffix[pos];
        let mut deaths = 0usize;
        while pos < order.len() && times[order[pos]] == t {
            if events[order[pos]] {
                deaths += 1;
            }
            pos += 1;
        }
        total += deaths as f64 / risk_sum;
        distinct.push(t);
        cumulative.push(total);
    }

    BaselineHazard {
        times: distinct,
        cumulative_hazard: cumulative,
    }
}

/// one line of the coefficient table
#[derive(Debug, Clone)]
pub struct CoefficientRow {
    pub name: String,
    pub coef: f64,
    pub hazard_ratio: f64, // exp(coef)
    pub se: f64,
    pub lower: f64,        // coef CI bounds
    pub upper: f64,
    pub z: f64,
    pub p: f64,
}

impl CoefficientRow {
    /// -log2(p), the "surprisal" column
    pub fn neg_log2_p(&self) -> f64 {
        -self.p.log2()
    }
}

/// nice summary of what the model learned
#[derive(Debug, Clone)]
pub struct CoxModelSummary {
    pub formula: Option<String>,
    pub n_samples: usize,
    pub n_events: usize,
    pub penalizer: f64,
    pub alpha: f64,
    pub coefficients: Vec<CoefficientRow>,
    pub log_likelihood: f64,
    pub aic: f64,
    pub concordance: Option<f64>,
    pub lr_statistic: f64, // likelihood ratio vs the null model
    pub lr_df: usize,
    pub lr_p: Option<f64>,
    pub iterations: usize,
}

impl CoxModelSummary {
    pub fn coefficient(&self, name: &str) -> Option<&CoefficientRow> {
        self.coefficients.iter().find(|row| row.name == name)
    }

    /// print out what we learned
    pub fn print(&self) {
        println!("{}", self);
    }
}

impl fmt::Display for CoxModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = ((1.0 - self.alpha) * 100.0).round();

        writeln!(f, "cox proportional hazards model")?;
        writeln!(f, "==============================")?;
        if let Some(formula) = &self.formula {
            writeln!(f, "formula:            {}", formula)?;
        }
        writeln!(f, "observations:       {}", self.n_samples)?;
        writeln!(f, "events:             {}", self.n_events)?;
        writeln!(f, "penalizer:          {}", self.penalizer)?;
        writeln!(f, "log-likelihood:     {:.4}", self.log_likelihood)?;
        writeln!(f, "partial AIC:        {:.4}", self.aic)?;
        if let Some(c) = self.concordance {
            writeln!(f, "concordance:        {:.4}", c)?;
        }
        writeln!(f, "newton iterations:  {}", self.iterations)?;
        writeln!(f)?;

        writeln!(
            f,
            "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8} {:>10} {:>9}",
            "covariate",
            "coef",
            "exp(coef)",
            "se(coef)",
            format!("lower {}%", level),
            format!("upper {}%", level),
            "z",
            "p",
            "-log2(p)"
        )?;
        writeln!(f, "{:-<107}", "")?;

        for row in &self.coefficients {
            writeln!(
                f,
                "{:<20} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>8.2} {:>10.3e} {:>9.2}",
                row.name,
                row.coef,
                row.hazard_ratio,
                row.se,
                row.lower,
                row.upper,
                row.z,
                row.p,
                row.neg_log2_p()
            )?;
        }

        if let Some(p) = self.lr_p {
            writeln!(f)?;
            writeln!(
                f,
                "log-likelihood ratio test = {:.2} on {} df, p = {:.3e}",
                self.lr_statistic, self.lr_df, p
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn create_test_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let events = vec![true, false, true, true, false, true, true, false];
        let covariates = Array2::from_shape_vec((8, 3), vec![
            1.0, 0.0, 0.5,
            0.0, 1.0, -0.5,
            1.0, 1.0, 0.0,
            -1.0, 0.0, 1.0,
            0.0, -1.0, -1.0,
            1.0, -1.0, 0.5,
            -1.0, 1.0, -0.5,
            0.0, 0.0, 0.0,
        ]).unwrap();

        SurvivalData::new(times, events, covariates).unwrap()
    }

    #[test]
    fn test_model_creation() {
        let model = CoxModel::new()
            .with_penalizer(0.1)
            .with_max_iterations(500);

        assert_eq!(model.penalizer, 0.1);
        assert_eq!(model.max_iterations, 500);
        assert!(!model.is_fitted());
        assert_eq!(CoxModel::new().with_penalizer(-3.0).penalizer(), 0.0);
    }

    #[test]
    fn test_model_not_fitted_error() {
        let model = CoxModel::new();
        assert!(model.coefficients().is_err());
        assert!(model.summary().is_err());
        assert!(model.aic().is_err());
        assert!(model.iterations().is_err());

        let covariates = Array2::zeros((5, 3));
        assert!(model.predict(covariates.view()).is_err());
    }

    #[test]
    fn test_feature_names() {
        let names = vec!["age".to_string(), "gender".to_string(), "treatment".to_string()];
        let mut model = CoxModel::new().with_feature_names(names.clone());
        model.fit(&create_test_data()).unwrap();
        assert_eq!(model.feature_names().unwrap(), names.as_slice());

        let mut wrong = CoxModel::new().with_feature_names(vec!["age".to_string()]);
        assert!(wrong.fit(&create_test_data()).is_err());
    }

    #[test]
    fn test_prediction_dimension_mismatch() {
        let data = create_test_data();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();

        let wrong_covariates = Array2::zeros((5, 2)); // should be 3 features
        assert!(model.predict(wrong_covariates.view()).is_err());
    }

    #[test]
    fn test_null_model() {
        let data = SurvivalData::new(
            vec![1.0, 2.0, 3.0, 4.0],
            vec![true, true, false, true],
            Array2::zeros((4, 0)),
        )
        .unwrap();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();

        // ll(0) = -(log 4 + log 3 + log 1)
        let expected = -(4.0f64.ln() + 3.0f64.ln());
        assert_relative_eq!(model.log_likelihood().unwrap(), expected, epsilon = 1e-12);
        assert_relative_eq!(model.aic().unwrap(), -2.0 * expected, epsilon = 1e-12);
        assert_eq!(model.n_parameters().unwrap(), 0);
        assert!(model.summary().unwrap().lr_p.is_none());
    }

    #[test]
    fn test_breslow_baseline_null() {
        // no covariates: Nelson-Aalen 1/4, +1/3, +0, +1/1
        let data = SurvivalData::new(
            vec![1.0, 2.0, 3.0, 4.0],
            vec![true, true, false, true],
            Array2::zeros((4, 0)),
        )
        .unwrap();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();
        let baseline = model.baseline_hazard().unwrap();

        assert_relative_eq!(baseline.at(0.5), 0.0);
        assert_relative_eq!(baseline.at(1.0), 0.25, epsilon = 1e-12);
        assert_relative_eq!(baseline.at(2.5), 0.25 + 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(baseline.at(10.0), 0.25 + 1.0 / 3.0 + 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_summary_consistency() {
        let mut model = CoxModel::new();
        model.fit(&create_test_data()).unwrap();
        let summary = model.summary().unwrap();

        assert_eq!(summary.coefficients.len(), 3);
        for row in &summary.coefficients {
            assert_relative_eq!(row.hazard_ratio, row.coef.exp(), epsilon = 1e-12);
            assert_relative_eq!(row.z, row.coef / row.se, epsilon = 1e-12);
            assert!(row.lower < row.coef && row.coef < row.upper);
            assert!(row.p >= 0.0 && row.p <= 1.0);
        }
        assert!(summary.lr_statistic >= 0.0);
        assert!(summary.iterations >= 1);
        assert_eq!(summary.iterations, model.iterations().unwrap());
        assert!(summary.to_string().contains("exp(coef)"));
        assert!(summary.to_string().contains("newton iterations"));
    }

    #[test]
    fn test_survival_predictions_are_monotone() {
        let data = create_test_data();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();

        let times = ndarray::Array1::from(vec![0.5, 2.0, 4.0, 8.0]);
        let probs = model.predict_survival(data.covariates(), times.view()).unwrap();
        for row in probs.rows() {
            assert_relative_eq!(row[0], 1.0);
            for j in 1..row.len() {
                assert!(row[j] <= row[j - 1] + 1e-12);
            }
        }
    }
}

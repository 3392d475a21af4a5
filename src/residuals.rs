//! residual diagnostics for a fitted cox model
//!
//! every function takes the model and the exact `SurvivalData` it was fit on,
//! and hands back fresh vectors/matrices - nothing is cached on the model.

use ndarray::{Array1, Array2};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
    model::CoxModel,
};

/// Schoenfeld-type residuals, one row per observed event
#[derive(Debug, Clone)]
pub struct EventResiduals {
    pub rows: Vec<usize>,      // observation index of each event
    pub times: Vec<f64>,       // event time of each row
    pub values: Array2<f64>,   // n_events x n_coefficients
}

fn check_shapes(model: &CoxModel, data: &SurvivalData) -> Result<()> {
    let k = model.n_parameters()?;
    if k != data.n_features() {
        return Err(SurvivalError::invalid_dimensions(format!(
            "model has {} coefficients, data has {} features",
            k,
            data.n_features()
        )));
    }
    Ok(())
}

/// exp((x - mean)'beta) per observation
fn partial_hazards(model: &CoxModel, data: &SurvivalData) -> Result<Array1<f64>> {
    model.predict_partial_hazard(data.covariates())
}

/// observed minus expected events: delta_i - exp(eta_i) * H0(t_i)
pub fn martingale(model: &CoxModel, data: &SurvivalData) -> Result<Array1<f64>> {
    check_shapes(model, data)?;
    let partial = partial_hazards(model, data)?;
    let baseline = model.baseline_hazard()?;

    Ok(Array1::from_iter((0..data.n_samples()).map(|i| {
        let observed = if data.events()[i] { 1.0 } else { 0.0 };
        observed - partial[i] * baseline.at(data.times()[i])
    })))
}

/// sign(m) * sqrt(-2 (m + delta * ln(delta - m)))
pub fn deviance(model: &CoxModel, data: &SurvivalData) -> Result<Array1<f64>> {
    let martingale = martingale(model, data)?;

    Ok(Array1::from_iter(martingale.iter().zip(data.events()).map(
        |(&m, &event)| {
            let inner = if event { m + (1.0 - m).ln() } else { m };
            m.signum() * (-2.0 * inner).max(0.0).sqrt()
        },
    )))
}

/// Breslow score residuals, n_samples x n_coefficients.
///
/// L_i = delta_i (x_i - xbar(t_i)) - r_i * sum_{t_j <= t_i} (x_i - xbar(t_j)) dLambda(t_j)
pub fn score(model: &CoxModel, data: &SurvivalData) -> Result<Array2<f64>> {
    check_shapes(model, data)?;
    let partial = partial_hazards(model, data)?;
    let x = data.covariates();
    let p = data.n_features();
    let event_times = data.event_times();

    // xbar and hazard increment at each distinct event time
    let mut cum_hazard = Vec::with_capacity(event_times.len());
    let mut cum_weighted_mean: Vec<Array1<f64>> = Vec::with_capacity(event_times.len());
    let mut running_hazard = 0.0;
    let mut running_mean = Array1::<f64>::zeros(p);
    let mut means_at = Vec::with_capacity(event_times.len());

    for (&t, risk_set) in event_times.iter().zip(data.risk_sets()) {
        let mut s0 = 0.0;
        let mut s1 = Array1::<f64>::zeros(p);
        for &i in risk_set {
            s0 += partial[i];
            s1.scaled_add(partial[i], &x.row(i));
        }
        let deaths = (0..data.n_samples())
            .filter(|&i| data.events()[i] && data.times()[i] == t)
            .count();

        let xbar = s1 / s0;
        let d_lambda = deaths as f64 / s0;
        running_hazard += d_lambda;
        running_mean.scaled_add(d_lambda, &xbar);

        cum_hazard.push(running_hazard);
        cum_weighted_mean.push(running_mean.clone());
        means_at.push(xbar);
    }

    let mut residuals = Array2::zeros((data.n_samples(), p));
    for i in 0..data.n_samples() {
        let t_i = data.times()[i];
        let upto = event_times.partition_point(|&s| s <= t_i);
        if upto == 0 {
            continue; // left before the first event, contributes nothing
        }

        let xi = x.row(i);
        let mut row = &(cum_hazard[upto - 1] * &xi) - &cum_weighted_mean[upto - 1];
        row *= -partial[i];
        if data.events()[i] {
            row += &(&xi - &means_at[upto - 1]);
        }
        residuals.row_mut(i).assign(&row);
    }

    Ok(residuals)
}

/// approximate change in each coefficient when dropping each observation:
/// score residuals times the variance matrix
pub fn dfbeta(model: &CoxModel, data: &SurvivalData) -> Result<Array2<f64>> {
    let score = score(model, data)?;
    Ok(score.dot(&model.variance_matrix()?))
}

/// x_i minus the (Efron-averaged) risk-set mean at each event time
pub fn schoenfeld(model: &CoxModel, data: &SurvivalData) -> Result<EventResiduals> {
    check_shapes(model, data)?;
    let partial = partial_hazards(model, data)?;
    let x = data.covariates();
    let p = data.n_features();

    let mut rows = Vec::new();
    let mut times = Vec::new();
    let mut values: Vec<Array1<f64>> = Vec::new();

    for (&t, risk_set) in data.event_times().iter().zip(data.risk_sets()) {
        let deaths: Vec<usize> = risk_set
            .iter()
            .copied()
            .filter(|&i| data.events()[i] && data.times()[i] == t)
            .collect();

        let mut s0 = 0.0;
        let mut s1 = Array1::<f64>::zeros(p);
        for &i in risk_set {
            s0 += partial[i];
            s1.scaled_add(partial[i], &x.row(i));
        }
        let mut t0 = 0.0;
        let mut t1 = Array1::<f64>::zeros(p);
        for &i in &deaths {
            t0 += partial[i];
            t1.scaled_add(partial[i], &x.row(i));
        }

        // average of the d Efron-adjusted means
        let d = deaths.len() as f64;
        let mut expected = Array1::<f64>::zeros(p);
        for l in 0..deaths.len() {
            let frac = l as f64 / d;
            let phi0 = s0 - frac * t0;
            let phi1 = &s1 - &(frac * &t1);
            expected.scaled_add(1.0 / (d * phi0), &phi1);
        }

        for &i in &deaths {
            rows.push(i);
            times.push(t);
            values.push(&x.row(i) - &expected);
        }
    }

    let mut matrix = Array2::zeros((rows.len(), p));
    for (r, v) in values.iter().enumerate() {
        matrix.row_mut(r).assign(v);
    }

    Ok(EventResiduals {
        rows,
        times,
        values: matrix,
    })
}

/// Schoenfeld residuals scaled by n_events * V, used by the PH test
pub fn scaled_schoenfeld(model: &CoxModel, data: &SurvivalData) -> Result<EventResiduals> {
    let mut residuals = schoenfeld(model, data)?;
    let variance = model.variance_matrix()?;
    residuals.values = residuals.values.dot(&variance) * data.n_events() as f64;
    Ok(residuals)
}

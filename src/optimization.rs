use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
};

/// Configuration for Cox model optimization
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    /// ridge penalty, objective is `ll - 0.5 * penalizer * |beta|^2` on standardized covariates
    pub penalizer: f64,
    pub max_iterations: usize,
    /// stop once the objective moves less than this between iterations
    pub tolerance: f64,
    pub max_step_halvings: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            penalizer: 0.0,
            max_iterations: 50,
            tolerance: 1e-9,
            max_step_halvings: 20,
        }
    }
}

/// Output of a converged fit, on the original covariate scale
#[derive(Debug, Clone)]
pub struct CoxFitResult {
    pub coefficients: Array1<f64>,
    /// inverse of the observed information matrix
    pub variance: Array2<f64>,
    /// log partial likelihood at the estimate (unpenalized)
    pub log_likelihood: f64,
    /// log partial likelihood at beta = 0
    pub null_log_likelihood: f64,
    /// covariate means, the centering point for partial hazards
    pub means: Array1<f64>,
    pub iterations: usize,
}

/// Log partial likelihood (Efron ties) with first & second derivatives
#[derive(Debug, Clone)]
pub struct EfronDerivatives {
    pub log_likelihood: f64,
    pub gradient: Array1<f64>,
    pub hessian: Array2<f64>,
}

/// Newton-Raphson fitter for the Cox partial likelihood
pub struct CoxOptimizer {
    config: OptimizationConfig,
}

impl CoxOptimizer {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    /// Fit coefficients, working on standardized covariates and mapping back at the end
    pub fn optimize(&self, data: &SurvivalData) -> Result<CoxFitResult> {
        if self.config.penalizer < 0.0 {
            return Err(SurvivalError::invalid_parameter(
                "penalizer",
                self.config.penalizer.to_string(),
            ));
        }

        let mut standardized = data.clone();
        let (means, stds) = standardized.standardize_covariates()?;
        let x = standardized.covariates();
        let n_features = data.n_features();

        let mut beta = Array1::zeros(n_features);
        let mut current = efron_derivatives(x, data.times(), data.events(), &beta);
        let null_log_likelihood = current.log_likelihood;

        if !null_log_likelihood.is_finite() {
            return Err(SurvivalError::numerical_error(
                "log partial likelihood at zero is not finite",
            ));
        }

        let mut iterations = 0;
        if n_features > 0 {
            let mut converged = false;

            for iteration in 0..self.config.max_iterations {
                iterations = iteration + 1;
                let objective = self.penalized(current.log_likelihood, &beta);

                let (gradient, hessian) = self.penalized_derivatives(&current, &beta);
                let step = solve_linear_system(&hessian, &gradient).map_err(|_| {
                    SurvivalError::numerical_error(
                        "information matrix is singular - check for collinear covariates",
                    )
                })?;

                // Newton step with halving until the objective stops dropping
                let mut scale = 1.0;
                let mut accepted = None;
                for _ in 0..=self.config.max_step_halvings {
                    let candidate = &beta - &(scale * &step);
                    let derivs = efron_derivatives(x, data.times(), data.events(), &candidate);
                    let candidate_objective = self.penalized(derivs.log_likelihood, &candidate);

                    if candidate_objective.is_finite()
                        && candidate_objective >= objective - 1e-10 * objective.abs().max(1.0)
                    {
                        accepted = Some((candidate, derivs, candidate_objective));
                        break;
                    }
                    scale *= 0.5;
                }

                let (candidate, derivs, candidate_objective) = accepted.ok_or_else(|| {
                    SurvivalError::optimization_failed(
                        "step halving couldn't improve the partial likelihood",
                    )
                })?;

                debug!(
                    "newton iteration {}: log-likelihood {:.6} (step scale {})",
                    iterations, derivs.log_likelihood, scale
                );

                beta = candidate;
                current = derivs;

                if (candidate_objective - objective).abs() < self.config.tolerance {
                    converged = true;
                    break;
                }
            }

            if !converged {
                return Err(SurvivalError::optimization_failed(format!(
                    "Newton-Raphson failed to converge in {} iterations",
                    self.config.max_iterations
                )));
            }
        }

        let (_, hessian) = self.penalized_derivatives(&current, &beta);
        let information = -hessian;
        let variance_std = if n_features > 0 {
            invert_matrix(&information)?
        } else {
            Array2::zeros((0, 0))
        };

        // undo the scaling: beta_j / sd_j, V_jk / (sd_j sd_k)
        let coefficients = &beta / &stds;
        let mut variance = variance_std;
        for j in 0..n_features {
            for k in 0..n_features {
                variance[[j, k]] /= stds[j] * stds[k];
            }
        }

        Ok(CoxFitResult {
            coefficients,
            variance,
            log_likelihood: current.log_likelihood,
            null_log_likelihood,
            means,
            iterations,
        })
    }

    fn penalized(&self, log_likelihood: f64, beta: &Array1<f64>) -> f64 {
        log_likelihood - 0.5 * self.config.penalizer * beta.dot(beta)
    }

    fn penalized_derivatives(
        &self,
        derivs: &EfronDerivatives,
        beta: &Array1<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let gradient = &derivs.gradient - &(self.config.penalizer * beta);
        let mut hessian = derivs.hessian.clone();
        for i in 0..beta.len() {
            hessian[[i, i]] -= self.config.penalizer;
        }
        (gradient, hessian)
    }
}

/// indices sorted by time, latest first
pub(crate) fn descending_order(times: ArrayView1<'_, f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..times.len()).collect();
    order.sort_by(|&a, &b| times[b].total_cmp(&times[a]));
    order
}

/// Efron log partial likelihood, gradient and Hessian at `beta`.
///
/// Walks the observations from the latest time backwards so the risk-set sums
/// only ever grow. A non-finite log-likelihood signals overflow in `exp(x'beta)`.
pub fn efron_derivatives(
    x: ArrayView2<'_, f64>,
    times: ArrayView1<'_, f64>,
    events: &[bool],
    beta: &Array1<f64>,
) -> EfronDerivatives {
    let n = times.len();
    let p = beta.len();
    let linear_pred = x.dot(beta);
    let order = descending_order(times);

    let mut loglik = 0.0;
    let mut gradient = Array1::<f64>::zeros(p);
    let mut hessian = Array2::<f64>::zeros((p, p));

    // risk set sums
    let mut s0 = 0.0;
    let mut s1 = Array1::<f64>::zeros(p);
    let mut s2 = Array2::<f64>::zeros((p, p));

    let mut i = 0;
    while i < n {
        let t = times[order[i]];

        // tied deaths at t
        let mut d = 0usize;
        let mut t0 = 0.0;
        let mut t1 = Array1::<f64>::zeros(p);
        let mut t2 = Array2::<f64>::zeros((p, p));

        let mut j = i;
        while j < n && times[order[j]] == t {
            let idx = order[j];
            let xi = x.row(idx);
            let r = linear_pred[idx].exp();

            s0 += r;
            s1.scaled_add(r, &xi);
            add_outer(&mut s2, r, xi);

            if events[idx] {
                d += 1;
                t0 += r;
                t1.scaled_add(r, &xi);
                add_outer(&mut t2, r, xi);
                loglik += linear_pred[idx];
                gradient += &xi;
            }
            j += 1;
        }

        for l in 0..d {
            let frac = l as f64 / d as f64;
            let phi0 = s0 - frac * t0;
            let phi1 = &s1 - &(frac * &t1);
            let phi2 = &s2 - &(frac * &t2);

            loglik -= phi0.ln();
            gradient.scaled_add(-1.0 / phi0, &phi1);
            for a in 0..p {
                for b in 0..p {
                    hessian[[a, b]] -= phi2[[a, b]] / phi0 - phi1[a] * phi1[b] / (phi0 * phi0);
                }
            }
        }

        trace!("time {}: {} deaths, risk sum {}", t, d, s0);
        i = j;
    }

    EfronDerivatives {
        log_likelihood: loglik,
        gradient,
        hessian,
    }
}

fn add_outer(target: &mut Array2<f64>, weight: f64, x: ArrayView1<'_, f64>) {
    let p = x.len();
    for a in 0..p {
        for b in 0..p {
            target[[a, b]] += weight * x[a] * x[b];
        }
    }
}

/// Solve linear system Ax = b (gaussian elimination, partial pivoting)
pub fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(SurvivalError::invalid_dimensions("Matrix dimensions mismatch"));
    }

    let mut a_copy = a.clone();
    let mut b_copy = b.clone();

    // Forward elimination
    for i in 0..n {
        let mut max_row = i;
        for k in i + 1..n {
            if a_copy[[k, i]].abs() > a_copy[[max_row, i]].abs() {
                max_row = k;
            }
        }

        if a_copy[[max_row, i]].abs() < 1e-12 {
            return Err(SurvivalError::numerical_error("Matrix is singular"));
        }

        if max_row != i {
            for j in 0..n {
                a_copy.swap([i, j], [max_row, j]);
            }
            b_copy.swap(i, max_row);
        }

        for k in i + 1..n {
            let factor = a_copy[[k, i]] / a_copy[[i, i]];
            for j in i..n {
                a_copy[[k, j]] -= factor * a_copy[[i, j]];
            }
            b_copy[k] -= factor * b_copy[i];
        }
    }

    // Back substitution
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = b_copy[i];
        for j in i + 1..n {
            x[i] -= a_copy[[i, j]] * x[j];
        }
        x[i] /= a_copy[[i, i]];
    }

    Ok(x)
}

/// Invert a square matrix column by column
pub fn invert_matrix(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(SurvivalError::invalid_dimensions("can't invert a non-square matrix"));
    }

    let mut inverse = Array2::zeros((n, n));
    for j in 0..n {
        let mut unit = Array1::zeros(n);
        unit[j] = 1.0;
        let column = solve_linear_system(a, &unit)?;
        inverse.column_mut(j).assign(&column);
    }
    Ok(inverse)
}

use ndarray::ArrayView1;

use crate::error::{Result, SurvivalError};

/// Harrell's C-index - how often does the higher risk score die first?
///
/// A pair (i, j) is comparable when i has an event and j outlived i (or was
/// censored no earlier than i). Tied risk scores count half.
pub fn harrell_c_index(
    risk_scores: ArrayView1<f64>,
    times: ArrayView1<f64>,
    events: &[bool],
) -> Result<f64> {
    let n = risk_scores.len();
    if n != times.len() || n != events.len() {
        return Err(SurvivalError::invalid_dimensions(
            "risk scores, times, and events must have same length",
        ));
    }

    let mut concordant = 0.0;
    let mut tied_risk = 0.0;
    let mut comparable = 0.0;

    for i in (0..n).filter(|&i| events[i]) {
        for j in 0..n {
            if i == j {
                continue;
            }

            if times[j] > times[i] || (!events[j] && times[j] >= times[i]) {
                comparable += 1.0;
                if risk_scores[i] > risk_scores[j] {
                    concordant += 1.0;
                } else if risk_scores[i] == risk_scores[j] {
                    tied_risk += 1.0;
                }
            }
        }
    }

    if comparable == 0.0 {
        return Err(SurvivalError::numerical_error(
            "no comparable pairs for concordance calc",
        ));
    }

    Ok((concordant + 0.5 * tied_risk) / comparable)
}

/// AIC (Akaike Information Criterion) for Cox model
pub fn aic(log_likelihood: f64, n_parameters: usize) -> f64 {
    2.0 * n_parameters as f64 - 2.0 * log_likelihood
}

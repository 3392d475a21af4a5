//! backward elimination of formula terms by partial AIC

use log::{debug, info};

use crate::{
    data::SurvivalData,
    error::Result,
    formula::Formula,
    model::CoxModel,
    table::ObservationTable,
};

/// AIC has to drop by more than this for a removal to count
pub const DEFAULT_AIC_TOLERANCE: f64 = 1e-6;

/// one accepted model along the elimination path
#[derive(Debug, Clone)]
pub struct StepwiseStep {
    pub formula: Formula,
    pub dropped: Option<String>, // None for the starting model
    pub aic: f64,
}

#[derive(Debug, Clone)]
pub struct StepwiseResult {
    pub model: CoxModel,
    pub formula: Formula,
    pub data: SurvivalData,
    pub trace: Vec<StepwiseStep>,
}

impl StepwiseResult {
    pub fn aic(&self) -> Result<f64> {
        self.model.aic()
    }

    pub fn dropped_terms(&self) -> Vec<&str> {
        self.trace.iter().filter_map(|s| s.dropped.as_deref()).collect()
    }
}

/// backward selection with the default tolerance
pub fn backward_stepwise_aic(
    table: &ObservationTable,
    duration_col: &str,
    event_col: &str,
    start: &Formula,
    template: &CoxModel,
) -> Result<StepwiseResult> {
    backward_stepwise_aic_with_tolerance(
        table,
        duration_col,
        event_col,
        start,
        template,
        DEFAULT_AIC_TOLERANCE,
    )
}

/// repeatedly drop whichever single term lowers AIC the most, until nothing helps.
///
/// every candidate is fit with an unfitted copy of `template`, so penalizer and
/// iteration settings carry over. a candidate is never left with zero terms.
pub fn backward_stepwise_aic_with_tolerance(
    table: &ObservationTable,
    duration_col: &str,
    event_col: &str,
    start: &Formula,
    template: &CoxModel,
    tolerance: f64,
) -> Result<StepwiseResult> {
    let mut model = template.unfitted();
    let mut data = model.fit_formula(table, duration_col, event_col, start)?;
    let mut formula = start.clone();
    let mut current_aic = model.aic()?;

    info!("stepwise start: {} (AIC {:.4})", formula, current_aic);
    let mut trace = vec![StepwiseStep {
        formula: formula.clone(),
        dropped: None,
        aic: current_aic,
    }];

    while formula.terms().len() > 1 {
        let mut candidates: Vec<(String, Formula, CoxModel, SurvivalData, f64)> = Vec::new();

        for term in formula.terms() {
            let reduced = formula.without(term);
            if reduced.is_intercept_only() {
                continue;
            }

            let mut candidate = template.unfitted();
            let candidate_data = candidate.fit_formula(table, duration_col, event_col, &reduced)?;
            let aic = candidate.aic()?;
            debug!("  - {:<12} -> AIC {:.4}", term, aic);
            candidates.push((term.clone(), reduced, candidate, candidate_data, aic));
        }

        let scores: Vec<(&str, f64)> = candidates.iter().map(|c| (c.0.as_str(), c.4)).collect();
        let Some(pick) = pick_removal(&scores, current_aic, tolerance) else {
            break;
        };
        let (term, reduced, candidate, candidate_data, aic) = candidates.swap_remove(pick);

        info!("stepwise drop {} (AIC {:.4} -> {:.4})", term, current_aic, aic);
        trace.push(StepwiseStep {
            formula: reduced.clone(),
            dropped: Some(term),
            aic,
        });
        formula = reduced;
        model = candidate;
        data = candidate_data;
        current_aic = aic;
    }

    info!("stepwise final: {} (AIC {:.4})", formula, current_aic);
    Ok(StepwiseResult {
        model,
        formula,
        data,
        trace,
    })
}

/// index of the removal to take: lowest AIC, first in formula order on ties,
/// and only when it beats `current_aic` by more than `tolerance`
fn pick_removal(candidates: &[(&str, f64)], current_aic: f64, tolerance: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &(_, aic)) in candidates.iter().enumerate() {
        if best.map_or(true, |(_, b)| aic < b) {
            best = Some((idx, aic));
        }
    }
    best.filter(|&(_, aic)| aic + tolerance < current_aic).map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// risk driven by `a`, `noise` unrelated to anything
    fn table() -> ObservationTable {
        let mut csv = String::from("futime,status,a,noise,b\n");
        let a: [f64; 20] = [
            1.4, -0.3, 0.9, -1.2, 0.1, 0.6, -0.8, 1.1, -0.5, 0.3, -1.0, 0.8, -0.1, 0.4, -0.6, 1.3,
            -0.9, 0.2, -0.4, 0.7,
        ];
        for (i, &ai) in a.iter().enumerate() {
            let futime = (10.0 * (-ai).exp() * (1.0 + (i % 5) as f64 * 0.3)).round() + 1.0 + i as f64 * 0.01;
            let status = if i % 6 == 5 { 0 } else { 1 };
            let noise = ((i * 7) % 11) as f64 / 10.0;
            let b = ai * 0.5 + ((i * 3) % 7) as f64 / 7.0;
            csv.push_str(&format!("{},{},{},{},{}\n", futime, status, ai, noise, b));
        }
        ObservationTable::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_trace_is_monotone() {
        let table = table();
        let start = Formula::parse("a + noise + b").unwrap();
        let result =
            backward_stepwise_aic(&table, "futime", "status", &start, &CoxModel::new()).unwrap();

        assert_eq!(result.trace[0].formula, start);
        assert!(result.trace[0].dropped.is_none());
        for pair in result.trace.windows(2) {
            assert!(pair[1].aic < pair[0].aic);
            assert!(pair[1].dropped.is_some());
        }
        assert!(!result.formula.is_intercept_only());
        assert_eq!(result.model.formula(), Some(&result.formula));
        assert_eq!(result.data.n_features(), result.formula.terms().len());
        assert_eq!(result.dropped_terms().len(), result.trace.len() - 1);
    }

    #[test]
    fn test_pick_removal_prefers_first_on_ties() {
        let candidates = [("age", 12.0), ("bili", 10.0), ("albumin", 10.0), ("stage", 11.0)];
        assert_eq!(pick_removal(&candidates, 20.0, DEFAULT_AIC_TOLERANCE), Some(1));
        assert_eq!(pick_removal(&[], 20.0, DEFAULT_AIC_TOLERANCE), None);
    }

    #[test]
    fn test_pick_removal_needs_more_than_tolerance() {
        // 9.5 + 0.5 == 10.0 exactly, not an improvement
        assert_eq!(pick_removal(&[("a", 9.5)], 10.0, 0.5), None);
        assert_eq!(pick_removal(&[("a", 9.25)], 10.0, 0.5), Some(0));
        assert_eq!(pick_removal(&[("a", 10.0)], 10.0, 0.0), None);
        assert_eq!(pick_removal(&[("a", 10.0 - 1e-7)], 10.0, DEFAULT_AIC_TOLERANCE), None);
        assert_eq!(pick_removal(&[("a", 10.0 - 1e-5)], 10.0, DEFAULT_AIC_TOLERANCE), Some(0));
    }

    #[test]
    fn test_single_term_is_kept() {
        let table = table();
        let start = Formula::parse("a").unwrap();
        let result =
            backward_stepwise_aic(&table, "futime", "status", &start, &CoxModel::new()).unwrap();
        assert_eq!(result.formula, start);
        assert_eq!(result.trace.len(), 1);
    }

    #[test]
    fn test_huge_tolerance_keeps_start() {
        let table = table();
        let start = Formula::parse("a + noise").unwrap();
        let result = backward_stepwise_aic_with_tolerance(
            &table,
            "futime",
            "status",
            &start,
            &CoxModel::new(),
            1e9,
        )
        .unwrap();
        assert_eq!(result.formula, start);
    }

    #[test]
    fn test_unknown_term_errors() {
        let table = table();
        let start = Formula::parse("a + missing").unwrap();
        assert!(backward_stepwise_aic(&table, "futime", "status", &start, &CoxModel::new()).is_err());
    }
}

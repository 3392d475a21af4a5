use approx::assert_relative_eq;
use ndarray::{Array1, Array2};
use pbc_survival::{
    kaplan_meier::KaplanMeier,
    metrics::{aic, harrell_c_index},
    ph_test::{proportional_hazard_test, TimeTransform},
    residuals,
    stepwise::backward_stepwise_aic,
    workflow, CoxModel, Formula, ObservationTable, SurvivalData, WorkflowConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn create_synthetic_data(n_samples: usize, n_features: usize, seed: u64) -> SurvivalData {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut covariates_vec = Vec::with_capacity(n_samples * n_features);
    for _ in 0..(n_samples * n_features) {
        covariates_vec.push(rng.gen_range(-2.0..2.0));
    }
    let covariates = Array2::from_shape_vec((n_samples, n_features), covariates_vec).unwrap();

    // first 3 features carry the signal
    let true_coefficients = [0.8, -0.6, 0.4];
    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);

    for i in 0..n_samples {
        let linear_pred: f64 = (0..n_features.min(3))
            .map(|j| covariates[[i, j]] * true_coefficients[j])
            .sum();

        let hazard = 0.1 * linear_pred.exp();
        let time = (-rng.r#gen::<f64>().ln() / hazard).max(0.01);
        let censoring_time = rng.gen_range(5.0..25.0);

        if time < censoring_time {
            times.push(time);
            events.push(true);
        } else {
            times.push(censoring_time);
            events.push(false);
        }
    }

    SurvivalData::new(times, events, covariates).unwrap()
}

/// csv with the pbc column layout, odd header spellings and a couple of NA cells
fn synthetic_cohort_csv(n: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut csv = String::from("ID,FUTIME,Status,Age,Bili,Copper,Albumin,Protime,Stage,Drug,Sex\n");

    for i in 0..n {
        let age: f64 = rng.gen_range(30.0..75.0);
        let bili: f64 = rng.gen_range(-1.0f64..2.5).exp();
        let copper: f64 = rng.gen_range(2.5f64..6.0).exp();
        let albumin: f64 = rng.gen_range(2.5..4.5);
        let protime: f64 = rng.gen_range(9.0..13.0);
        let stage: u32 = rng.gen_range(1..=4);
        let drug: u32 = rng.gen_range(1..=2);
        let sex = if rng.gen_bool(0.85) { "f" } else { "m" };

        let risk = 0.04 * (age - 50.0) + 0.9 * bili.ln() - 1.0 * (albumin - 3.5)
            + 0.3 * (copper.ln() - 4.0);
        let time = (-rng.r#gen::<f64>().ln() / (2e-4 * risk.exp())).max(1.0);
        let censor = rng.gen_range(1000.0..5000.0);
        let (futime, status) = if time < censor { (time, 1) } else { (censor, 0) };

        let copper_cell = if i % 50 == 7 { "NA".to_string() } else { format!("{:.1}", copper) };
        csv.push_str(&format!(
            "{},{:.0},{},{:.2},{:.2},{},{:.2},{:.2},{},{},{}\n",
            i + 1,
            futime.ceil(),
            status,
            age,
            bili,
            copper_cell,
            albumin,
            protime,
            stage,
            drug,
            sex
        ));
    }
    csv
}

#[test]
fn test_cox_model_recovers_signal() {
    let _ = env_logger::builder().is_test(true).try_init();
    let data = create_synthetic_data(400, 4, 42);

    let mut model = CoxModel::new();
    model.fit(&data).unwrap();
    assert!(model.is_fitted());

    let coefficients = model.coefficients().unwrap();
    assert_eq!(coefficients.len(), 4);
    assert!(coefficients[0] > 0.4);
    assert!(coefficients[1] < -0.3);
    assert!(coefficients[2] > 0.1);
    assert!(coefficients[3].abs() < 0.3);

    let summary = model.summary().unwrap();
    assert!(summary.coefficients[0].p < 1e-4);
    assert!(summary.lr_p.unwrap() < 1e-6);
    assert!(summary.concordance.unwrap() > 0.6);
}

#[test]
fn test_ridge_shrinks_coefficients() {
    let data = create_synthetic_data(150, 3, 123);

    let mut plain = CoxModel::new();
    plain.fit(&data).unwrap();
    let mut ridge = CoxModel::new().with_penalizer(5.0);
    ridge.fit(&data).unwrap();

    let norm = |m: &CoxModel| m.coefficients().unwrap().iter().map(|c| c * c).sum::<f64>();
    assert!(norm(&ridge) < norm(&plain));
}

#[test]
fn test_model_evaluation_metrics() {
    let data = create_synthetic_data(100, 3, 321);

    let mut model = CoxModel::new().with_penalizer(0.01);
    model.fit(&data).unwrap();

    let risk_scores = model.predict(data.covariates()).unwrap();
    let c_index = harrell_c_index(risk_scores.view(), data.times(), data.events()).unwrap();
    assert!(c_index > 0.5 && c_index <= 1.0);
    assert_relative_eq!(c_index, model.concordance().unwrap().unwrap(), epsilon = 1e-10);

    let log_likelihood = model.log_likelihood().unwrap();
    assert!(log_likelihood.is_finite() && log_likelihood > model.null_log_likelihood().unwrap());
    assert_relative_eq!(model.aic().unwrap(), aic(log_likelihood, 3), epsilon = 1e-12);
}

#[test]
fn test_hazard_ratio_predictions() {
    let data = create_synthetic_data(50, 4, 654);

    let mut model = CoxModel::new();
    model.fit(&data).unwrap();

    let hazard_ratios = model.predict_hazard_ratios(data.covariates()).unwrap();
    let risk_scores = model.predict(data.covariates()).unwrap();
    for (&risk, &hr) in risk_scores.iter().zip(hazard_ratios.iter()) {
        assert!(hr > 0.0 && hr.is_finite());
        assert_relative_eq!(hr, risk.exp(), epsilon = 1e-10);
    }
}

#[test]
fn test_survival_probability_predictions() {
    let data = create_synthetic_data(30, 3, 987);

    let mut model = CoxModel::new();
    model.fit(&data).unwrap();

    let time_points = Array1::from(vec![1.0, 2.0, 3.0, 5.0]);
    let survival_probs = model.predict_survival(data.covariates(), time_points.view()).unwrap();
    assert_eq!(survival_probs.dim(), (30, 4));

    for row in survival_probs.rows() {
        for j in 0..4 {
            assert!((0.0..=1.0).contains(&row[j]), "invalid survival probability: {}", row[j]);
            if j > 0 {
                assert!(row[j] <= row[j - 1] + 1e-12);
            }
        }
    }
}

#[test]
fn test_residual_identities() {
    let data = create_synthetic_data(120, 3, 777);
    let mut model = CoxModel::new();
    model.fit(&data).unwrap();

    let martingale = residuals::martingale(&model, &data).unwrap();
    assert_relative_eq!(martingale.sum(), 0.0, epsilon = 1e-6);
    assert!(martingale.iter().all(|&m| m <= 1.0));

    let deviance = residuals::deviance(&model, &data).unwrap();
    for (m, d) in martingale.iter().zip(deviance.iter()) {
        assert!(m * d >= 0.0);
    }

    // continuous times: no ties, so score residuals sum to the gradient at the MLE
    let score = residuals::score(&model, &data).unwrap();
    for j in 0..3 {
        assert_relative_eq!(score.column(j).sum(), 0.0, epsilon = 1e-3);
    }

    let dfbeta = residuals::dfbeta(&model, &data).unwrap();
    assert_eq!(dfbeta.dim(), (120, 3));
}

#[test]
fn test_dfbeta_tracks_case_deletion() {
    let data = create_synthetic_data(200, 2, 31);
    let mut model = CoxModel::new();
    model.fit(&data).unwrap();
    let dfbeta = residuals::dfbeta(&model, &data).unwrap();

    // most influential observation on the first coefficient
    let (idx, approx_change) = dfbeta
        .column(0)
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .unwrap();

    let keep: Vec<usize> = (0..data.n_samples()).filter(|&i| i != idx).collect();
    let mut refit = CoxModel::new();
    refit.fit(&data.subset(&keep).unwrap()).unwrap();
    let actual_change = model.coefficients().unwrap()[0] - refit.coefficients().unwrap()[0];

    assert!(actual_change.signum() == approx_change.signum());
    assert_relative_eq!(actual_change, approx_change, max_relative = 0.5);
}

#[test]
fn test_ph_test_on_proportional_data() {
    let data = create_synthetic_data(300, 3, 2024);
    let mut model = CoxModel::new();
    model.fit(&data).unwrap();

    for transform in [TimeTransform::Rank, TimeTransform::Km, TimeTransform::Log] {
        let test = proportional_hazard_test(&model, &data, transform).unwrap();
        assert_eq!(test.rows.len(), 3);
        for row in &test.rows {
            assert!(row.test_statistic.is_finite() && row.test_statistic >= 0.0);
            assert!((0.0..=1.0).contains(&row.p));
        }
    }
}

#[test]
fn test_kaplan_meier_on_synthetic_times() {
    let data = create_synthetic_data(200, 1, 99);
    let km = KaplanMeier::fit(&data.times().to_vec(), data.events(), "all").unwrap();

    let points = km.points();
    assert_eq!(points[0].at_risk, 200);
    for pair in points.windows(2) {
        assert!(pair[1].survival <= pair[0].survival);
        assert!(pair[1].at_risk < pair[0].at_risk);
    }
    let censored: usize = points.iter().map(|p| p.censored).sum();
    let events: usize = points.iter().map(|p| p.events).sum();
    assert_eq!(censored + events, 200);
    assert_eq!(events, data.n_events());
}

#[test]
fn test_stepwise_keeps_signal_terms() {
    let csv = synthetic_cohort_csv(300, 5);
    let mut table = ObservationTable::from_reader(csv.as_bytes()).unwrap();
    table.drop_missing(&["copper"]).unwrap();
    table.cast_categorical("stage").unwrap();
    table.cast_categorical("drug").unwrap();
    table.add_log_column("bili", "log_bili").unwrap();

    let start = Formula::parse("age + log_bili + albumin + protime + stage + drug").unwrap();
    let result = backward_stepwise_aic(&table, "futime", "status", &start, &CoxModel::new()).unwrap();

    for needed in ["age", "log_bili", "albumin"] {
        assert!(result.formula.terms().iter().any(|t| t == needed), "dropped {}", needed);
    }
    assert!(result.aic().unwrap() <= result.trace[0].aic);
    for pair in result.trace.windows(2) {
        assert!(pair[1].aic < pair[0].aic);
    }
}

#[test]
fn test_workflow_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cohort.csv");
    std::fs::write(&input, synthetic_cohort_csv(250, 11)).unwrap();
    let output = dir.path().join("plots");

    let config = WorkflowConfig::default()
        .with_input(&input)
        .with_output_dir(&output);
    let report = workflow::run(&config).unwrap();

    assert_eq!(report.dropped_rows, 5);
    assert_eq!(report.n_rows, 245);
    assert_eq!(report.final_models.len(), 2);
    assert_eq!(report.final_models[1].ph_test.rows.len(), 5);
    assert_eq!(report.dfbeta.dim(), (245, report.dfbeta_names.len()));
    assert!(report.survival_curves.len() <= 4);

    for name in [
        "martingale_age.svg",
        "martingale_log_bili.svg",
        "dfbeta_log_bili.svg",
        "deviance_log_copper.svg",
        "case_deletion_albumin.svg",
        "survival_drug_sex.svg",
    ] {
        let path = output.join(name);
        assert!(path.exists(), "missing plot {}", name);
        assert!(report.plots.contains(&path));
    }
}

#[test]
fn test_workflow_survives_level_lost_to_missing_rows() {
    // stage 1 only on rows whose copper is NA
    let csv: String = synthetic_cohort_csv(250, 11)
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                return format!("{}\n", line);
            }
            let mut cells: Vec<String> = line.split(',').map(String::from).collect();
            if cells[5] == "NA" {
                cells[8] = "1".to_string();
            } else if cells[8] == "1" {
                cells[8] = "2".to_string();
            }
            format!("{}\n", cells.join(","))
        })
        .collect();

    let table = ObservationTable::from_reader(csv.as_bytes()).unwrap();
    let config = WorkflowConfig::default().with_write_plots(false);
    let report = workflow::run_on_table(&config, table).unwrap();

    assert_eq!(report.dropped_rows, 5);
    assert!(report.full_model.coefficients().unwrap().iter().all(|c| c.is_finite()));
}

#[test]
fn test_workflow_reports_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let config = WorkflowConfig::default()
        .with_input(dir.path().join("nope.csv"))
        .with_write_plots(false);
    assert!(workflow::run(&config).is_err());
}

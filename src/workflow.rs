//! the end-to-end pbc analysis: load, screen, select, diagnose, plot

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::{Array1, Array2};

use crate::{
    config::WorkflowConfig,
    data::SurvivalData,
    error::Result,
    formula::Formula,
    kaplan_meier::KaplanMeier,
    model::{CoxModel, CoxModelSummary},
    ph_test::{proportional_hazard_test, ProportionalHazardTest},
    plots,
    residuals,
    stepwise::{backward_stepwise_aic_with_tolerance, StepwiseResult},
    table::ObservationTable,
};

/// a candidate final model with its summary and PH assumption test
#[derive(Debug, Clone)]
pub struct FinalModel {
    pub formula: Formula,
    pub model: CoxModel,
    pub data: SurvivalData,
    pub summary: CoxModelSummary,
    pub ph_test: ProportionalHazardTest,
}

/// everything the workflow computed, in pipeline order
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub n_rows: usize,
    pub dropped_rows: usize,
    pub null_model: CoxModel,
    pub martingale: Array1<f64>,
    pub full_model: CoxModel,
    pub stepwise_raw: StepwiseResult,
    pub stepwise_transformed: StepwiseResult,
    pub final_models: Vec<FinalModel>,
    pub dfbeta: Array2<f64>,          // first final model, n_rows x n_coefficients
    pub dfbeta_names: Vec<String>,
    pub deviance: Array1<f64>,        // first final model
    pub survival_curves: Vec<KaplanMeier>,
    pub plots: Vec<PathBuf>,
}

/// collects plot files; a no-op when plotting is switched off
struct PlotSink<'a> {
    dir: &'a Path,
    enabled: bool,
    written: Vec<PathBuf>,
}

impl<'a> PlotSink<'a> {
    fn emit(&mut self, stem: &str, draw: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = plots::plot_path(self.dir, stem);
        draw(&path)?;
        self.written.push(path);
        Ok(())
    }
}

/// read the csv named in the config and run the analysis
pub fn run(config: &WorkflowConfig) -> Result<WorkflowReport> {
    info!("loading {}", config.input.display());
    let table = ObservationTable::from_csv_path(&config.input)?;
    run_on_table(config, table)
}

/// run the analysis on an already loaded table (column names normalized)
pub fn run_on_table(config: &WorkflowConfig, mut table: ObservationTable) -> Result<WorkflowReport> {
    // step 1: prepare
    for column in &config.categorical {
        table.cast_categorical(column)?;
    }
    let needed = config.analysis_columns();
    let needed: Vec<&str> = needed.iter().map(String::as_str).collect();
    let dropped_rows = table.drop_missing(&needed)?;
    if dropped_rows > 0 {
        warn!("dropped {} rows with missing analysis values", dropped_rows);
    }
    for var in &config.log_vars {
        table.add_log_column(var, &WorkflowConfig::log_column(var))?;
    }
    info!("{} observations ready", table.n_rows());

    if config.write_plots {
        fs::create_dir_all(&config.output_dir)?;
    }
    let mut sink = PlotSink {
        dir: &config.output_dir,
        enabled: config.write_plots,
        written: Vec::new(),
    };
    let template = CoxModel::new().with_penalizer(config.penalizer);
    let duration = config.duration_col.as_str();
    let event = config.event_col.as_str();

    // step 2: null model and martingale residual screening
    info!("fitting null model");
    let mut null_model = template.unfitted();
    let null_data = null_model.fit_formula(&table, duration, event, &Formula::intercept_only())?;
    let martingale = residuals::martingale(&null_model, &null_data)?;
    let martingale_values = martingale.to_vec();

    for var in &config.residual_vars {
        let xs = table.numeric(var)?;
        sink.emit(&format!("martingale {}", var), |path| {
            plots::residual_scatter(
                path,
                &format!("Martingale Residuals vs {}", var),
                var,
                "Martingale Residuals",
                xs,
                &martingale_values,
                false,
            )
        })?;
    }
    for var in &config.residual_vars {
        let xs = table.numeric(var)?;
        sink.emit(&format!("martingale log {}", var), |path| {
            plots::residual_scatter(
                path,
                &format!("Martingale Residuals vs log({})", var),
                var,
                "Martingale Residuals",
                xs,
                &martingale_values,
                true,
            )
        })?;
    }

    // step 3: full model plus backward selection, raw then log-transformed
    info!("fitting full model");
    let full_formula = Formula::parse(&config.full_formula)?;
    let mut full_model = template.unfitted();
    full_model.fit_formula(&table, duration, event, &full_formula)?;
    full_model.summary()?.print();

    info!("stepwise selection on raw covariates");
    let stepwise_raw = backward_stepwise_aic_with_tolerance(
        &table,
        duration,
        event,
        &full_formula,
        &template,
        config.stepwise_tolerance,
    )?;
    print_stepwise("raw covariates", &stepwise_raw)?;

    info!("stepwise selection on log-transformed covariates");
    let transformed_formula = Formula::parse(&config.transformed_formula)?;
    let stepwise_transformed = backward_stepwise_aic_with_tolerance(
        &table,
        duration,
        event,
        &transformed_formula,
        &template,
        config.stepwise_tolerance,
    )?;
    print_stepwise("log-transformed covariates", &stepwise_transformed)?;

    // step 4: final models, summaries and PH tests
    let mut final_models = Vec::with_capacity(config.final_formulas.len());
    for (k, text) in config.final_formulas.iter().enumerate() {
        info!("final model {}: {}", k + 1, text);
        let formula = Formula::parse(text)?;
        let mut model = template.unfitted();
        let data = model.fit_formula(&table, duration, event, &formula)?;
        let summary = model.summary()?;
        summary.print();

        let ph_test = proportional_hazard_test(&model, &data, config.time_transform)?;
        println!("{}", ph_test);

        let scaled = residuals::scaled_schoenfeld(&model, &data)?;
        let g = config.time_transform.transform(&scaled.times, &data)?;
        let coefficients = model.coefficients()?;
        for (j, name) in model.feature_names()?.iter().enumerate() {
            let values = scaled.values.column(j).to_vec();
            sink.emit(&format!("schoenfeld model{} {}", k + 1, name), |path| {
                plots::schoenfeld_plot(
                    path,
                    name,
                    config.time_transform.axis_label(),
                    &g,
                    &values,
                    coefficients[j],
                )
            })?;
        }

        final_models.push(FinalModel {
            formula,
            model,
            data,
            summary,
            ph_test,
        });
    }

    // steps 5 and 6: influence diagnostics on the first final model
    let (dfbeta, dfbeta_names, deviance) = match final_models.first() {
        Some(first) => {
            info!("residual diagnostics for {}", first.formula);
            let dfbeta = residuals::dfbeta(&first.model, &first.data)?;
            let names = first.model.feature_names()?.to_vec();
            for (j, name) in names.iter().enumerate() {
                let values = dfbeta.column(j).to_vec();
                sink.emit(&format!("dfbeta {}", name), |path| {
                    plots::index_plot(path, name, &values)
                })?;
            }

            let deviance = residuals::deviance(&first.model, &first.data)?;
            let deviance_values = deviance.to_vec();
            for var in &config.deviance_vars {
                let xs = table.numeric(var)?;
                sink.emit(&format!("deviance {}", var), |path| {
                    plots::residual_scatter(
                        path,
                        &format!("Deviance Residuals vs {}", var),
                        var,
                        "Deviance Residuals",
                        xs,
                        &deviance_values,
                        false,
                    )
                })?;
            }

            for (j, name) in names.iter().enumerate() {
                let values = dfbeta.column(j).to_vec();
                sink.emit(&format!("case deletion {}", name), |path| {
                    plots::case_deletion_plot(path, name, &values)
                })?;
            }
            (dfbeta, names, deviance)
        }
        None => {
            warn!("no final models configured, skipping residual diagnostics");
            (Array2::zeros((table.n_rows(), 0)), Vec::new(), Array1::zeros(0))
        }
    };

    // step 7: kaplan-meier by group
    let group_columns: Vec<&str> = config.km_group.iter().map(String::as_str).collect();
    let times = null_data.times();
    let events = null_data.events();
    let mut survival_curves = Vec::new();
    for (label, rows) in table.group_indices(&group_columns)? {
        let durations: Vec<f64> = rows.iter().map(|&i| times[i]).collect();
        let flags: Vec<bool> = rows.iter().map(|&i| events[i]).collect();
        let km = KaplanMeier::fit(&durations, &flags, label)?;
        info!(
            "group {}: n = {}, median survival {}",
            km.label(),
            km.n_observations(),
            km.median_survival().map_or("not reached".to_string(), |t| format!("{:.1}", t))
        );
        survival_curves.push(km);
    }
    sink.emit(&format!("survival {}", group_columns.join(" ")), |path| {
        plots::survival_curves(path, "Survival Curves by Treatment and Sex", &survival_curves)
    })?;

    info!("done, {} plots written", sink.written.len());
    Ok(WorkflowReport {
        n_rows: table.n_rows(),
        dropped_rows,
        null_model,
        martingale,
        full_model,
        stepwise_raw,
        stepwise_transformed,
        final_models,
        dfbeta,
        dfbeta_names,
        deviance,
        survival_curves,
        plots: sink.written,
    })
}

fn print_stepwise(label: &str, result: &StepwiseResult) -> Result<()> {
    println!("backward stepwise AIC ({})", label);
    for step in &result.trace {
        match &step.dropped {
            Some(term) => println!("  - {:<12} AIC {:>10.4}  {}", term, step.aic, step.formula),
            None => println!("  start         AIC {:>10.4}  {}", step.aic, step.formula),
        }
    }
    println!("selected: {}", result.formula);
    result.model.summary()?.print();
    Ok(())
}

use std::path::PathBuf;

use crate::{ph_test::TimeTransform, stepwise::DEFAULT_AIC_TOLERANCE};

/// everything the pbc workflow needs to know - defaults reproduce the standard analysis
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub duration_col: String,
    pub event_col: String,
    pub categorical: Vec<String>,           // cast to categorical after loading
    pub residual_vars: Vec<String>,         // martingale plots against the null model
    pub full_formula: String,
    pub log_vars: Vec<String>,              // `x` gets a `log_x` companion column
    pub transformed_formula: String,
    pub final_formulas: Vec<String>,
    pub deviance_vars: Vec<String>,
    pub km_group: Vec<String>,
    pub time_transform: TimeTransform,
    pub stepwise_tolerance: f64,
    pub penalizer: f64,
    pub write_plots: bool,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("PBC276.csv"),
            output_dir: PathBuf::from("plots"),
            duration_col: "futime".to_string(),
            event_col: "status".to_string(),
            categorical: strings(&["stage", "drug", "sex"]),
            residual_vars: strings(&["age", "bili", "copper", "albumin", "protime"]),
            full_formula: "bili + copper + albumin + protime + age + stage + drug".to_string(),
            log_vars: strings(&["bili", "copper"]),
            transformed_formula: "albumin + protime + age + log_bili + log_copper + stage + drug"
                .to_string(),
            final_formulas: vec![
                "albumin + protime + age + log_bili + log_copper + drug".to_string(),
                "albumin + protime + age + log_bili + log_copper".to_string(),
            ],
            deviance_vars: strings(&["age", "protime", "albumin", "log_bili", "log_copper"]),
            km_group: strings(&["drug", "sex"]),
            time_transform: TimeTransform::Rank,
            stepwise_tolerance: DEFAULT_AIC_TOLERANCE,
            penalizer: 0.0,
            write_plots: true,
        }
    }
}

impl WorkflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_time_transform(mut self, transform: TimeTransform) -> Self {
        self.time_transform = transform;
        self
    }

    pub fn with_stepwise_tolerance(mut self, tolerance: f64) -> Self {
        self.stepwise_tolerance = tolerance;
        self
    }

    pub fn with_penalizer(mut self, penalizer: f64) -> Self {
        self.penalizer = penalizer;
        self
    }

    pub fn with_write_plots(mut self, write_plots: bool) -> Self {
        self.write_plots = write_plots;
        self
    }

    /// name of the log companion column for `var`
    pub fn log_column(var: &str) -> String {
        format!("log_{}", var)
    }

    /// every column the analysis reads - rows missing any of them get dropped
    pub fn analysis_columns(&self) -> Vec<String> {
        let mut columns = vec![self.duration_col.clone(), self.event_col.clone()];
        let mut push = |name: &str| {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.to_string());
            }
        };

        for var in self.residual_vars.iter().chain(&self.log_vars).chain(&self.km_group) {
            push(var.as_str());
        }
        let derived: Vec<String> = self.log_vars.iter().map(|v| Self::log_column(v)).collect();
        let formulas = [&self.full_formula, &self.transformed_formula]
            .into_iter()
            .chain(&self.final_formulas);
        for formula in formulas {
            for term in formula.split('+').map(str::trim).filter(|t| !t.is_empty() && *t != "1") {
                if !derived.iter().any(|d| d == term) {
                    push(term);
                }
            }
        }
        columns
    }
}

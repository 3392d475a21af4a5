//! # pbc survival
//!
//! cox proportional hazards workflow for the PBC liver cohort - model selection by AIC,
//! residual diagnostics, and kaplan-meier curves
//!
//! ## what you get
//!
//! - csv loading w/ normalized column names and categorical columns
//! - additive formulas w/ treatment coding (`albumin + log_bili + drug`)
//! - cox regression (Efron ties, optional ridge) w/ summaries & likelihood ratio test
//! - backward stepwise selection by partial AIC
//! - martingale, deviance, score, dfbeta and Schoenfeld residuals
//! - proportional hazards test on scaled Schoenfeld residuals
//! - kaplan-meier curves w/ log-log confidence bands
//! - svg plots for all of the above
//!
//! ## quick start
//!
//! ```rust
//! use pbc_survival::{CoxModel, Formula, ObservationTable};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let csv = "\
//! futime,status,age,drug
//! 400,1,58.8,1
//! 4500,0,56.4,1
//! 1012,1,70.1,2
//! 1925,1,54.7,2
//! 1504,0,38.1,1
//! 2503,1,66.3,2
//! ";
//! let mut table = ObservationTable::from_reader(csv.as_bytes())?;
//! table.cast_categorical("drug")?;
//!
//! let mut model = CoxModel::new();
//! let data = model.fit_formula(&table, "futime", "status", &Formula::parse("age + drug")?)?;
//! println!("{}", model.summary()?);
//!
//! let risk_scores = model.predict(data.covariates())?;
//! assert_eq!(risk_scores.len(), 6);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod formula;
pub mod kaplan_meier;
pub mod metrics;
pub mod model;
pub mod optimization;
pub mod plots;
pub mod residuals;
pub mod smoothing;
pub mod stepwise;
pub mod table;
pub mod workflow;

pub use config::WorkflowConfig;
pub use data::SurvivalData;
pub use error::{Result, SurvivalError};
pub use formula::Formula;
pub use kaplan_meier::KaplanMeier;
pub use model::CoxModel;
pub use table::ObservationTable;

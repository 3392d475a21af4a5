use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use log::{error, LevelFilter};

use pbc_survival::{ph_test::TimeTransform, workflow, WorkflowConfig};

#[derive(Clone, Copy, ValueEnum)]
enum TimeTransformCli {
    Rank,
    Identity,
    Log,
    Km,
}

impl From<TimeTransformCli> for TimeTransform {
    fn from(value: TimeTransformCli) -> Self {
        match value {
            TimeTransformCli::Rank => TimeTransform::Rank,
            TimeTransformCli::Identity => TimeTransform::Identity,
            TimeTransformCli::Log => TimeTransform::Log,
            TimeTransformCli::Km => TimeTransform::Km,
        }
    }
}

/// Cox model selection, residual diagnostics and Kaplan-Meier curves for the PBC cohort
#[derive(Parser)]
#[command(name = "pbc-survival", version, about)]
struct Cli {
    /// CSV file with futime, status and the clinical covariates
    #[arg(long, default_value = "PBC276.csv")]
    input: PathBuf,

    /// Directory the SVG plots are written to
    #[arg(long, default_value = "plots")]
    output_dir: PathBuf,

    /// Time transform for the proportional hazards test
    #[arg(long, value_enum, default_value_t = TimeTransformCli::Rank)]
    time_transform: TimeTransformCli,

    /// Ridge penalty applied to every fit
    #[arg(long, default_value = "0.0")]
    penalizer: f64,

    /// AIC improvement a stepwise removal must beat
    #[arg(long, default_value = "1e-6")]
    stepwise_tolerance: f64,

    /// Skip writing plots
    #[arg(long)]
    no_plots: bool,

    /// More logging (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = WorkflowConfig::default()
        .with_input(cli.input)
        .with_output_dir(cli.output_dir)
        .with_time_transform(cli.time_transform.into())
        .with_penalizer(cli.penalizer)
        .with_stepwise_tolerance(cli.stepwise_tolerance)
        .with_write_plots(!cli.no_plots);

    match workflow::run(&config) {
        Ok(report) => {
            if !report.plots.is_empty() {
                println!(
                    "wrote {} plots to {}",
                    report.plots.len(),
                    config.output_dir.display()
                );
            }
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

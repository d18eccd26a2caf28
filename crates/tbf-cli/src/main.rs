#![doc = include_str!("../README.md")]

mod cli;
mod helpers;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::helpers::{
    generator_from_cli, parse_output_format, run_options_from_cli, test_format_from_cli,
    validation_config_from_cli, OutputFormat,
};

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_format = parse_output_format(&cli.format)?;
    let validation = validation_config_from_cli(&cli);
    let options = run_options_from_cli(&cli)?;
    let test_format = test_format_from_cli(&cli)?;
    let generator = generator_from_cli(&cli, test_format)?;

    let report = tbf_engine::run(&cli.file, generator, &validation, &options)?;

    match output_format {
        OutputFormat::Text => {
            if cli.stats {
                println!("Statistics:");
                println!("{}", report.statistics);
            }
            println!("\nTBF verdict: {}", report.verdict);
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "verdict": report.verdict.summary(),
                "output_dir": report.output_dir,
                "created_files": report.created_files,
                "statistics": report.statistics,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
    }
    Ok(())
}

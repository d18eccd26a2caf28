//! Translation of parsed CLI arguments into engine configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tbf_engine::config::{GenerationMode, RunOptions, ValidationConfig};
use tbf_engine::error::ConfigError;
use tbf_engine::generator::{CommandGenerator, DirectoryGenerator, InputGenerator};
use tbf_engine::machine_model::MachineModel;
use tbf_engine::test_case::TestCaseFormat;

use crate::cli::Cli;

/// Directory below `--output` that a generator command writes its tests to.
pub(crate) const GENERATED_TESTS_DIR: &str = "test-suite";

/// Generators whose values cannot be stated as witness assumptions.
const NO_WITNESS_GENERATORS: &[&str] = &["afl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

pub(crate) fn parse_output_format(raw: &str) -> miette::Result<OutputFormat> {
    match raw {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => miette::bail!("Unknown output format: {other}. Use 'text' or 'json'."),
    }
}

pub(crate) fn machine_model_from_cli(cli: &Cli) -> MachineModel {
    if cli.m64 {
        MachineModel::LINUX_64
    } else {
        if !cli.m32 {
            info!("No machine model specified. Assuming 32 bit");
        }
        MachineModel::LINUX_32
    }
}

pub(crate) fn test_format_from_cli(cli: &Cli) -> Result<TestCaseFormat, ConfigError> {
    match &cli.test_format {
        Some(raw) => raw.parse(),
        None if cli.input_generator.eq_ignore_ascii_case("klee") => Ok(TestCaseFormat::Ktest),
        None => Ok(TestCaseFormat::Lines),
    }
}

pub(crate) fn validation_config_from_cli(cli: &Cli) -> ValidationConfig {
    ValidationConfig {
        machine_model: machine_model_from_cli(cli),
        use_execution: cli.execution,
        use_klee_replay: cli.klee_replay,
        use_witness_validation: cli.witness_validation,
        witness_validators: cli.validators.clone(),
        checker_timeout: Duration::from_secs(cli.validator_timelimit),
        klee_lib_dir: cli.klee_lib_dir.clone(),
        naive_verification: cli.naive_verification,
        measure_coverage: !cli.no_coverage,
        error_method: cli.error_method.clone(),
        ..ValidationConfig::default()
    }
}

pub(crate) fn run_options_from_cli(cli: &Cli) -> Result<RunOptions, ConfigError> {
    let mode = match &cli.existing_tests_dir {
        Some(dir) if !dir.is_dir() => return Err(ConfigError::MissingDirectory(dir.clone())),
        Some(_) => GenerationMode::Existing,
        None if cli.no_parallel => GenerationMode::Sequential,
        None => GenerationMode::Parallel,
    };
    Ok(RunOptions {
        output_dir: cli.output.clone(),
        timelimit: cli.timelimit.map(Duration::from_secs),
        mode,
        keep_files: cli.keep_files,
        svcomp_nondets: cli.svcomp_nondets,
        ..RunOptions::default()
    })
}

/// The generator the run pulls test cases from: the existing test directory
/// if one is given, the generator command otherwise.
pub(crate) fn generator_from_cli(
    cli: &Cli,
    format: TestCaseFormat,
) -> Result<Arc<dyn InputGenerator>, ConfigError> {
    let name = cli.input_generator.to_ascii_lowercase();
    let supports_witnesses = !NO_WITNESS_GENERATORS.contains(&name.as_str());
    let extension = cli.test_extension.clone().or_else(|| match format {
        TestCaseFormat::Ktest => Some(".ktest".to_string()),
        TestCaseFormat::Lines => None,
    });

    if let Some(dir) = &cli.existing_tests_dir {
        let dir = dir
            .canonicalize()
            .map_err(|_| ConfigError::MissingDirectory(dir.clone()))?;
        let mut generator =
            DirectoryGenerator::new(name, dir, format).with_witness_support(supports_witnesses);
        if let Some(extension) = extension {
            generator = generator.with_extension(extension);
        }
        return Ok(Arc::new(generator));
    }

    let command: Vec<String> = cli
        .generator_cmd
        .as_deref()
        .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    if command.is_empty() {
        return Err(ConfigError::MissingGeneratorCommand(name));
    }
    let output_dir: PathBuf = cli.output.join(GENERATED_TESTS_DIR);
    let mut generator = CommandGenerator::new(name, command, output_dir, format)
        .with_timeout(cli.ig_timelimit.map(Duration::from_secs))
        .with_witness_support(supports_witnesses);
    if let Some(extension) = extension {
        generator = generator.with_extension(extension);
    }
    Ok(Arc::new(generator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["tbf"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn output_format_accepts_text_and_json() {
        assert_eq!(parse_output_format("text").unwrap(), OutputFormat::Text);
        assert_eq!(parse_output_format("json").unwrap(), OutputFormat::Json);
        assert!(parse_output_format("xml").is_err());
    }

    #[test]
    fn machine_model_defaults_to_32_bit() {
        let cli = parse(&["-i", "random", "p.c"]);
        assert_eq!(machine_model_from_cli(&cli), MachineModel::LINUX_32);
        let cli = parse(&["-i", "random", "--64", "p.c"]);
        assert_eq!(machine_model_from_cli(&cli), MachineModel::LINUX_64);
    }

    #[test]
    fn validator_runs_are_bounded_by_default() {
        let cli = parse(&["-i", "random", "--witness-validation", "p.c"]);
        let config = validation_config_from_cli(&cli);
        assert_eq!(config.checker_timeout, Duration::from_secs(900));
    }

    #[test]
    fn klee_defaults_to_ktest_input() {
        let cli = parse(&["-i", "klee", "p.c"]);
        assert_eq!(test_format_from_cli(&cli).unwrap(), TestCaseFormat::Ktest);
        let cli = parse(&["-i", "klee", "--test-format", "lines", "p.c"]);
        assert_eq!(test_format_from_cli(&cli).unwrap(), TestCaseFormat::Lines);
        let cli = parse(&["-i", "afl", "p.c"]);
        assert_eq!(test_format_from_cli(&cli).unwrap(), TestCaseFormat::Lines);
    }

    #[test]
    fn validation_flags_reach_the_config() {
        let cli = parse(&[
            "-i",
            "fshell",
            "--execution",
            "--witness-validation",
            "--validators",
            "cpachecker",
            "uautomizer",
            "--no-coverage",
            "--naive-verification",
            "--validator-timelimit",
            "60",
            "p.c",
        ]);
        let config = validation_config_from_cli(&cli);
        assert!(config.use_execution);
        assert!(config.use_witness_validation);
        assert_eq!(config.witness_validators, ["cpachecker", "uautomizer"]);
        assert_eq!(config.checker_timeout, Duration::from_secs(60));
        assert!(!config.measure_coverage);
        assert!(config.naive_verification);
        assert!(!config.use_klee_replay);
    }

    #[test]
    fn scheduling_follows_the_flags() {
        let cli = parse(&["-i", "random", "p.c"]);
        assert_eq!(run_options_from_cli(&cli).unwrap().mode, GenerationMode::Parallel);
        let cli = parse(&["-i", "random", "--no-parallel", "--timelimit", "900", "p.c"]);
        let options = run_options_from_cli(&cli).unwrap();
        assert_eq!(options.mode, GenerationMode::Sequential);
        assert_eq!(options.timelimit, Some(Duration::from_secs(900)));

        let dir = tempfile::tempdir().unwrap();
        let dir_arg = dir.path().to_str().unwrap();
        let cli = parse(&["-i", "random", "--use-existing-test-dir", dir_arg, "p.c"]);
        assert_eq!(run_options_from_cli(&cli).unwrap().mode, GenerationMode::Existing);
    }

    #[test]
    fn missing_test_directory_is_rejected() {
        let cli = parse(&["-i", "random", "--use-existing-test-dir", "/nonexistent/tests", "p.c"]);
        assert!(matches!(
            run_options_from_cli(&cli),
            Err(ConfigError::MissingDirectory(_))
        ));
    }

    #[test]
    fn generator_command_is_required_without_test_directory() {
        let cli = parse(&["-i", "random", "p.c"]);
        assert!(matches!(
            generator_from_cli(&cli, TestCaseFormat::Lines),
            Err(ConfigError::MissingGeneratorCommand(_))
        ));
    }

    #[test]
    fn afl_tests_get_no_witnesses() {
        let dir = tempfile::tempdir().unwrap();
        let dir_arg = dir.path().to_str().unwrap();
        let cli = parse(&["-i", "AFL", "--use-existing-test-dir", dir_arg, "p.c"]);
        let generator = generator_from_cli(&cli, TestCaseFormat::Lines).unwrap();
        assert_eq!(generator.name(), "afl");
        assert!(!generator.supports_witnesses());

        let cli = parse(&["-i", "crest", "--generator-cmd", "run-crest {program} {output}", "p.c"]);
        let generator = generator_from_cli(&cli, TestCaseFormat::Lines).unwrap();
        assert!(generator.supports_witnesses());
    }

    #[test]
    fn machine_model_flags_conflict() {
        assert!(Cli::try_parse_from(["tbf", "-i", "random", "--32", "--64", "p.c"]).is_err());
    }
}

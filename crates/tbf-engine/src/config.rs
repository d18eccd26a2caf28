//! Run and validation configuration.
//!
//! Both structs are plain data with `Default` impls; the CLI fills them from
//! its flags and the orchestrator checks them with [`ValidationConfig::validate`]
//! before any work starts.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::ConfigError;
use crate::machine_model::MachineModel;
use crate::nondet::DEFAULT_ERROR_METHOD;
use crate::strategy::checkers::{parse_checker_list, DEFAULT_CHECKER_TIMEOUT};
use crate::strategy::{
    Checker, CheckerKind, ExecutionStrategy, KleeReplayStrategy, ValidationStrategy,
    WitnessStrategy,
};
use crate::test_case::TestCaseFormat;
use crate::test_vector::Framing;
use crate::validator::ValidatorOptions;

/// Which validation techniques run, and how.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub machine_model: MachineModel,
    /// Compile a stdin harness and execute every test vector.
    pub use_execution: bool,
    /// Replay `.ktest` files with `libkleeRuntest`.
    pub use_klee_replay: bool,
    /// Write a violation witness per test vector and run the checkers on it.
    pub use_witness_validation: bool,
    /// Checker names given by the user, validated against the known list.
    pub witness_validators: Vec<String>,
    /// Time limit of a single checker run.
    pub checker_timeout: Duration,
    /// Directory containing `libkleeRuntest`, required for klee-replay.
    pub klee_lib_dir: Option<PathBuf>,
    /// Claim `TRUE` when validation ends without finding a violation.
    pub naive_verification: bool,
    /// Report `gcov` coverage of the executed harness.
    pub measure_coverage: bool,
    pub framing: Framing,
    pub error_method: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            machine_model: MachineModel::LINUX_32,
            use_execution: false,
            use_klee_replay: false,
            use_witness_validation: false,
            witness_validators: Vec::new(),
            checker_timeout: DEFAULT_CHECKER_TIMEOUT,
            klee_lib_dir: None,
            naive_verification: false,
            measure_coverage: true,
            framing: Framing::default(),
            error_method: DEFAULT_ERROR_METHOD.to_string(),
        }
    }
}

impl ValidationConfig {
    /// Check the option combination against the generator that will feed
    /// the validator. Returns the parsed witness checkers.
    pub fn validate(
        &self,
        generator: &str,
        format: TestCaseFormat,
    ) -> Result<Vec<CheckerKind>, ConfigError> {
        if self.use_klee_replay {
            if format != TestCaseFormat::Ktest {
                return Err(ConfigError::KleeReplayNeedsKtest {
                    generator: generator.to_string(),
                    format: format.to_string(),
                });
            }
            if self.klee_lib_dir.is_none() {
                return Err(ConfigError::MissingKleeLibrary);
            }
            warn!("Klee-replay only supports the machine architecture, machine model is not respected");
        }

        if !self.witness_validators.is_empty() && !self.use_witness_validation {
            return Err(ConfigError::ValidatorsWithoutWitnessValidation);
        }
        let checkers = parse_checker_list(&self.witness_validators)?;
        if self.use_witness_validation && checkers.is_empty() {
            warn!("Witness validation used and no validator specified, only generating witnesses");
        }
        if !self.use_witness_validation && !self.use_execution && !self.use_klee_replay {
            info!(
                "No validation technique specified. To check whether generated tests uncover a \
                 violation, use --execution, --witness-validation or --klee-replay"
            );
        }
        Ok(checkers)
    }

    /// Strategy chain in evaluation order: klee-replay, execution, witness.
    pub fn build_strategies(
        &self,
        generator: &str,
        format: TestCaseFormat,
    ) -> Result<Vec<Box<dyn ValidationStrategy>>, ConfigError> {
        let checkers = self.validate(generator, format)?;
        let mut strategies: Vec<Box<dyn ValidationStrategy>> = Vec::new();

        if self.use_klee_replay {
            let lib_dir = self
                .klee_lib_dir
                .clone()
                .ok_or(ConfigError::MissingKleeLibrary)?;
            strategies.push(Box::new(KleeReplayStrategy::new(lib_dir)));
        }
        if self.use_execution {
            strategies.push(Box::new(
                ExecutionStrategy::new(self.measure_coverage).with_framing(self.framing.clone()),
            ));
        }
        if self.use_witness_validation {
            let checkers = checkers
                .into_iter()
                .map(|kind| Checker::new(kind).with_timeout(self.checker_timeout))
                .collect();
            strategies.push(Box::new(WitnessStrategy::new(checkers)));
        }
        Ok(strategies)
    }

    pub fn validator_options(&self) -> ValidatorOptions {
        ValidatorOptions {
            naive_verification: self.naive_verification,
            ..ValidatorOptions::default()
        }
    }
}

/// How generation and validation are scheduled against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationMode {
    /// Generator on its own thread, validated while it runs.
    #[default]
    Parallel,
    /// Generator runs to completion before validation starts.
    Sequential,
    /// No generation; the generator only serves existing test cases.
    Existing,
}

/// Options of one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory receiving `Statistics.txt` and the artifacts of a violation.
    pub output_dir: PathBuf,
    /// Global time limit; `None` for no limit.
    pub timelimit: Option<Duration>,
    pub mode: GenerationMode,
    /// Keep the work directory as `<output>/created_files`.
    pub keep_files: bool,
    /// Only treat `__VERIFIER_nondet_*` functions as input points.
    pub svcomp_nondets: bool,
    /// How long to wait for the generator after validation ended.
    pub generation_wait: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            timelimit: None,
            mode: GenerationMode::Parallel,
            keep_files: false,
            svcomp_nondets: false,
            generation_wait: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn witness_config(validators: &[&str]) -> ValidationConfig {
        ValidationConfig {
            use_witness_validation: true,
            witness_validators: validators.iter().map(|v| v.to_string()).collect(),
            ..ValidationConfig::default()
        }
    }

    #[test]
    fn defaults_match_the_command_line_defaults() {
        let config = ValidationConfig::default();
        assert_eq!(config.machine_model, MachineModel::LINUX_32);
        assert!(config.measure_coverage);
        assert!(!config.naive_verification);
        assert_eq!(config.error_method, "__VERIFIER_error");
        assert_eq!(config.checker_timeout, Duration::from_secs(900));

        let run = RunOptions::default();
        assert_eq!(run.mode, GenerationMode::Parallel);
        assert_eq!(run.generation_wait, Duration::from_secs(3));
        assert!(run.timelimit.is_none());
    }

    #[test]
    fn validators_require_witness_validation() {
        let config = ValidationConfig {
            witness_validators: vec!["cpachecker".into()],
            ..ValidationConfig::default()
        };
        let err = config.validate("afl", TestCaseFormat::Lines).unwrap_err();
        assert!(matches!(err, ConfigError::ValidatorsWithoutWitnessValidation));
    }

    #[test]
    fn unknown_validator_is_rejected() {
        let err = witness_config(&["cbmc"])
            .validate("afl", TestCaseFormat::Lines)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownValidator { ref name, .. } if name == "cbmc"));
    }

    #[test]
    fn klee_replay_needs_ktest_input() {
        let config = ValidationConfig {
            use_klee_replay: true,
            klee_lib_dir: Some(PathBuf::from("/opt/klee/lib")),
            ..ValidationConfig::default()
        };
        let err = config.validate("afl", TestCaseFormat::Lines).unwrap_err();
        assert!(matches!(err, ConfigError::KleeReplayNeedsKtest { .. }));
        assert!(config.validate("klee", TestCaseFormat::Ktest).is_ok());
    }

    #[test]
    fn klee_replay_needs_the_runtest_library() {
        let config = ValidationConfig {
            use_klee_replay: true,
            ..ValidationConfig::default()
        };
        let err = config.validate("klee", TestCaseFormat::Ktest).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKleeLibrary));
    }

    #[test]
    fn strategies_are_chained_replay_execution_witness() {
        let config = ValidationConfig {
            use_execution: true,
            use_klee_replay: true,
            klee_lib_dir: Some(PathBuf::from("/opt/klee/lib")),
            ..witness_config(&["cpachecker", "uautomizer"])
        };
        let names: Vec<_> = config
            .build_strategies("klee", TestCaseFormat::Ktest)
            .unwrap()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(names, ["klee-replay", "execution", "witness"]);
    }

    #[test]
    fn no_technique_gives_an_empty_chain() {
        let strategies = ValidationConfig::default()
            .build_strategies("random", TestCaseFormat::Lines)
            .unwrap();
        assert!(strategies.is_empty());
    }

    #[test]
    fn naive_verification_reaches_the_validator() {
        let config = ValidationConfig {
            naive_verification: true,
            ..ValidationConfig::default()
        };
        assert!(config.validator_options().naive_verification);
    }
}

//! Error taxonomy of a TBF run.
//!
//! Configuration errors abort before any work starts. Everything raised
//! while generating or validating is caught at the orchestrator boundary
//! and turned into an `UNKNOWN` verdict with a single logged diagnostic.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Invalid combination of run or validation options.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("klee-replay only works with a generator producing .ktest files (generator `{generator}` produces {format})")]
    #[diagnostic(
        code(tbf::config::klee_replay),
        help("use --input-generator klee or --test-format ktest")
    )]
    KleeReplayNeedsKtest { generator: String, format: String },

    #[error("witness validators specified but witness validation is not enabled")]
    #[diagnostic(code(tbf::config::validators), help("add --witness-validation"))]
    ValidatorsWithoutWitnessValidation,

    #[error("validator not in list of known validators: {name} not in {known:?}")]
    #[diagnostic(code(tbf::config::unknown_validator))]
    UnknownValidator {
        name: String,
        known: &'static [&'static str],
    },

    #[error("validator `{0}` given more than once")]
    #[diagnostic(code(tbf::config::duplicate_validator))]
    DuplicateValidator(String),

    #[error("unknown machine model `{0}` (expected 32 or 64)")]
    #[diagnostic(code(tbf::config::machine_model))]
    UnknownMachineModel(String),

    #[error("unknown test case format `{0}` (expected lines or ktest)")]
    #[diagnostic(code(tbf::config::test_format))]
    UnknownTestFormat(String),

    #[error("input generator `{0}` needs a generator command (--generator-cmd)")]
    #[diagnostic(code(tbf::config::generator_cmd))]
    MissingGeneratorCommand(String),

    #[error("directory doesn't exist: {}", .0.display())]
    #[diagnostic(code(tbf::config::missing_dir))]
    MissingDirectory(PathBuf),

    #[error("program file doesn't exist: {}", .0.display())]
    #[diagnostic(code(tbf::config::missing_program))]
    MissingProgram(PathBuf),

    #[error("klee-replay needs the directory of the KLEE runtest library (--klee-lib-dir)")]
    #[diagnostic(code(tbf::config::klee_lib))]
    MissingKleeLibrary,
}

/// Failure of the input generator. Transient while polling for test cases,
/// fatal when raised by the generator's own top-level run.
#[derive(Debug, Error, Diagnostic)]
pub enum GenerationError {
    #[error("input generator `{generator}` failed: {message}")]
    #[diagnostic(code(tbf::generation::failed))]
    Failed { generator: String, message: String },

    #[error("cannot read test directory {}: {source}", path.display())]
    #[diagnostic(code(tbf::generation::test_dir))]
    TestDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(tbf::generation::tool))]
    Tool(#[from] ToolError),
}

/// Malformed program source.
#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("cannot read program {}: {source}", path.display())]
    #[diagnostic(code(tbf::parse::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no call to `{method}` found in {}", path.display())]
    #[diagnostic(
        code(tbf::parse::no_error_call),
        help("witnesses need at least one reachable call of the error method")
    )]
    NoErrorCall { method: String, path: PathBuf },
}

/// Malformed test data.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum DecodeError {
    #[error("didn't find `{method}` in list of non-deterministic methods")]
    #[diagnostic(code(tbf::decode::unknown_method))]
    UnknownMethod { method: String },

    #[error("ktest file is malformed: {0}")]
    #[diagnostic(code(tbf::decode::ktest))]
    MalformedKtest(String),

    #[error("input stream is malformed at byte {offset}: {message}")]
    #[diagnostic(code(tbf::decode::stream))]
    MalformedStream { offset: usize, message: String },
}

/// A harness or instrumented binary failed to build.
#[derive(Debug, Error, Diagnostic)]
#[error("compilation failed for {}: {message}", source_file.display())]
#[diagnostic(code(tbf::compile))]
pub struct CompileError {
    pub source_file: PathBuf,
    pub message: String,
}

/// Process-level failure of an external tool.
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    #[error("cannot start `{program}`: {source}")]
    #[diagnostic(code(tbf::tool::spawn), help("is the tool installed and on PATH?"))]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running `{program}`: {source}")]
    #[diagnostic(code(tbf::tool::io))]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error raised by a validation strategy. Inside a strategy these only skip
/// the affected case; a batch fails when its harness cannot be built, which
/// is retried while polling and ends the run in the final pass.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tool(#[from] ToolError),

    #[error("cannot write {}: {source}", path.display())]
    #[diagnostic(code(tbf::validation::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error of one orchestrated run.
#[derive(Debug, Error, Diagnostic)]
pub enum RunError {
    #[error("Config error: {0}")]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("Input generation error: {0}")]
    #[diagnostic(transparent)]
    Generation(#[from] GenerationError),

    #[error("Parse error: {0}")]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error("I/O error on {}: {source}", path.display())]
    #[diagnostic(code(tbf::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RunError::Io {
            path: path.into(),
            source,
        }
    }
}

impl ValidationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ValidationError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_names_the_method() {
        let err = DecodeError::UnknownMethod {
            method: "__VERIFIER_nondet_foo".into(),
        };
        assert!(format!("{err}").contains("__VERIFIER_nondet_foo"));
    }

    #[test]
    fn run_error_prefixes_category() {
        let err = RunError::from(ConfigError::ValidatorsWithoutWitnessValidation);
        assert!(format!("{err}").starts_with("Config error:"));
    }

    #[test]
    fn compile_error_mentions_source_file() {
        let err = CompileError {
            source_file: PathBuf::from("harness.c"),
            message: "exit status 1".into(),
        };
        assert_eq!(
            format!("{err}"),
            "compilation failed for harness.c: exit status 1"
        );
    }
}

//! CLI argument definitions.

use clap::Parser;
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "An automatic test-case generation and execution framework.\n\n\
    TBF runs an input generator on a C program and concurrently checks the\n\
    generated tests for a call of the error function. The first test that\n\
    reaches it yields verdict FALSE together with a compilable harness and a\n\
    violation witness.\n\n\
    Typical use:\n  \
    tbf -i afl --generator-cmd 'afl-run {program} {output}' --execution program.c\n  \
    tbf -i random --use-existing-test-dir tests/ --execution program.c";

#[derive(Parser, Debug)]
#[command(name = "tbf")]
#[command(about = "An automatic test-case generation and execution framework")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    /// Input generator to use (afl, fshell, klee, crest, cpatiger, random, ...)
    #[arg(long, short = 'i')]
    pub(crate) input_generator: String,

    /// Command line running the input generator; `{program}` and `{output}`
    /// are replaced by the program and the test directory
    #[arg(long)]
    pub(crate) generator_cmd: Option<String>,

    /// Only files with this suffix in the test directory are test cases
    #[arg(long)]
    pub(crate) test_extension: Option<String>,

    /// Layout of generated test cases: lines | ktest (default: ktest for klee)
    #[arg(long)]
    pub(crate) test_format: Option<String>,

    /// Don't create new test cases, but use test cases from the provided directory
    #[arg(long = "use-existing-test-dir")]
    pub(crate) existing_tests_dir: Option<PathBuf>,

    /// Time limit (in s) for input generation. After this limit, input
    /// generation stops and analysis continues with the inputs generated so far
    #[arg(long)]
    pub(crate) ig_timelimit: Option<u64>,

    /// Only expect methods to be non-deterministic according to SV-COMP guidelines
    #[arg(long)]
    pub(crate) svcomp_nondets: bool,

    /// Use witness validation to find a successful test vector
    #[arg(long)]
    pub(crate) witness_validation: bool,

    /// Witness validators to use (cpachecker, uautomizer, cpa-w2t, fshell-w2t).
    /// Requires --witness-validation
    #[arg(long, num_args = 1..)]
    pub(crate) validators: Vec<String>,

    /// Time limit (in s) of a single witness validator run
    #[arg(long, default_value_t = 900)]
    pub(crate) validator_timelimit: u64,

    /// Use test execution to find a successful test vector
    #[arg(long)]
    pub(crate) execution: bool,

    /// Use klee-replay to execute test cases (ktest input only)
    #[arg(long)]
    pub(crate) klee_replay: bool,

    /// Directory containing libkleeRuntest, required by --klee-replay
    #[arg(long)]
    pub(crate) klee_lib_dir: Option<PathBuf>,

    /// If no error was found and all test cases were handled, assume that the
    /// program under test is safe
    #[arg(long)]
    pub(crate) naive_verification: bool,

    /// Name of the function whose call is the error
    #[arg(long, default_value = "__VERIFIER_error")]
    pub(crate) error_method: String,

    /// Use 32 bit machine model (default)
    #[arg(long = "32", conflicts_with = "m64")]
    pub(crate) m32: bool,

    /// Use 64 bit machine model
    #[arg(long = "64")]
    pub(crate) m64: bool,

    /// Time limit (in s) of the whole run
    #[arg(long)]
    pub(crate) timelimit: Option<u64>,

    /// Print verbose information
    #[arg(long, short = 'v')]
    pub(crate) verbose: bool,

    /// Do not run input generation and tests in parallel
    #[arg(long)]
    pub(crate) no_parallel: bool,

    /// Keep all created intermediate files (harnesses, witnesses, etc.)
    #[arg(long)]
    pub(crate) keep_files: bool,

    /// Do not report coverage of the executed test cases
    #[arg(long)]
    pub(crate) no_coverage: bool,

    /// Print statistics on stdout
    #[arg(long)]
    pub(crate) stats: bool,

    /// Directory for Statistics.txt and the artifacts of a found violation
    #[arg(long, default_value = "output")]
    pub(crate) output: PathBuf,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub(crate) format: String,

    /// File to verify
    pub(crate) file: PathBuf,
}

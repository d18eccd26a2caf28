//! External witness checkers.
//!
//! Each checker is run as `<tool> ... <witness> ... <program>` and its
//! output is reduced to a result string. A result containing `false`
//! (in any case) confirms the violation described by the witness.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::context::Context;
use crate::error::{ConfigError, ToolError};
use crate::process::ToolCommand;

pub const CHECKER_CPACHECKER: &str = "cpachecker";
pub const CHECKER_UAUTOMIZER: &str = "uautomizer";
pub const CHECKER_CPA_W2T: &str = "cpa-w2t";
pub const CHECKER_FSHELL_W2T: &str = "fshell-w2t";
pub const CHECKER_NAMES: &[&str] = &[
    CHECKER_CPACHECKER,
    CHECKER_UAUTOMIZER,
    CHECKER_CPA_W2T,
    CHECKER_FSHELL_W2T,
];

pub const RESULT_FALSE: &str = "false(unreach-call)";
pub const RESULT_TRUE: &str = "true";
pub const RESULT_UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckerKind {
    CpaChecker,
    UAutomizer,
    CpaW2t,
    FShellW2t,
}

impl CheckerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckerKind::CpaChecker => CHECKER_CPACHECKER,
            CheckerKind::UAutomizer => CHECKER_UAUTOMIZER,
            CheckerKind::CpaW2t => CHECKER_CPA_W2T,
            CheckerKind::FShellW2t => CHECKER_FSHELL_W2T,
        }
    }

    /// Executable looked up on `PATH` unless configured otherwise.
    pub fn default_executable(&self) -> &'static str {
        match self {
            CheckerKind::CpaChecker => "cpa.sh",
            CheckerKind::UAutomizer => "Ultimate.py",
            CheckerKind::CpaW2t => "cpa_witness2test.py",
            CheckerKind::FShellW2t => "test-gen.sh",
        }
    }
}

impl fmt::Display for CheckerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckerKind {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            CHECKER_CPACHECKER => Ok(CheckerKind::CpaChecker),
            CHECKER_UAUTOMIZER => Ok(CheckerKind::UAutomizer),
            CHECKER_CPA_W2T => Ok(CheckerKind::CpaW2t),
            CHECKER_FSHELL_W2T => Ok(CheckerKind::FShellW2t),
            other => Err(ConfigError::UnknownValidator {
                name: other.into(),
                known: CHECKER_NAMES,
            }),
        }
    }
}

/// Parse a list of checker names; each checker may appear once.
pub fn parse_checker_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<CheckerKind>, ConfigError> {
    let mut kinds = Vec::with_capacity(names.len());
    for name in names {
        let kind: CheckerKind = name.as_ref().parse()?;
        if kinds.contains(&kind) {
            return Err(ConfigError::DuplicateValidator(kind.as_str().into()));
        }
        kinds.push(kind);
    }
    Ok(kinds)
}

fn cpachecker_options(witness: &Path, ctx: &Context) -> Vec<String> {
    let mut options: Vec<String> = [
        "-setprop",
        "witness.checkProgramHash=false",
        "-disable-java-assertions",
        "-heap",
        "4000M",
        "-setprop",
        "cfa.simplifyCfa=false",
        "-setprop",
        "cfa.allowBranchSwapping=false",
        "-setprop",
        "cpa.predicate.ignoreIrrelevantVariables=false",
        "-setprop",
        "cpa.predicate.refinement.performInitialStaticRefinement=false",
        "-setprop",
        "counterexample.export.compressWitness=false",
        "-setprop",
        "counterexample.export.assumptions.includeConstantsForPointers=false",
        "-setprop",
        "analysis.summaryEdge=true",
        "-setprop",
        "cpa.callstack.skipVoidRecursion=true",
        "-setprop",
        "cpa.callstack.skipFunctionPointerRecursion=true",
        "-setprop",
        "cpa.predicate.memoryAllocationsAlwaysSucceed=true",
        "-witness",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    options.push(witness.display().to_string());
    options.push(if ctx.machine_model().is_64() { "-64" } else { "-32" }.to_string());
    options.push("-spec".into());
    options.push(ctx.property_file().display().to_string());
    options
}

/// Time limit of one checker run unless configured otherwise.
pub const DEFAULT_CHECKER_TIMEOUT: Duration = Duration::from_secs(900);

/// One configured witness checker.
#[derive(Debug, Clone)]
pub struct Checker {
    kind: CheckerKind,
    executable: PathBuf,
    timeout: Duration,
}

impl Checker {
    pub fn new(kind: CheckerKind) -> Self {
        Self {
            kind,
            executable: PathBuf::from(kind.default_executable()),
            timeout: DEFAULT_CHECKER_TIMEOUT,
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn kind(&self) -> CheckerKind {
        self.kind
    }

    pub(crate) fn command(&self, witness: &Path, ctx: &Context) -> ToolCommand {
        let program = ctx.program();
        let mut cmd = ToolCommand::new(&self.executable);
        cmd = match self.kind {
            CheckerKind::CpaChecker => cmd
                .args(cpachecker_options(witness, ctx))
                .arg("-witnessValidation")
                .arg(program)
                .current_dir(ctx.work_dir()),
            CheckerKind::CpaW2t => cmd
                .args(cpachecker_options(witness, ctx))
                .arg("-witness2test")
                .arg(program)
                .current_dir(ctx.work_dir()),
            CheckerKind::UAutomizer => cmd
                .arg("--validate")
                .arg(witness)
                .arg(ctx.property_file())
                .arg(ctx.machine_model().witness_key())
                .arg(program),
            CheckerKind::FShellW2t => {
                let cmd = cmd
                    .arg("--propertyfile")
                    .arg(ctx.property_file())
                    .arg("--graphml-witness")
                    .arg(witness)
                    .arg(ctx.machine_model().compile_parameter)
                    .arg(program);
                // Only works when started from its own checkout.
                match self.executable.parent().filter(|p| !p.as_os_str().is_empty()) {
                    Some(repo) => cmd.current_dir(repo),
                    None => cmd,
                }
            }
        };
        cmd.timeout(self.timeout)
    }

    /// CPAchecker reads its configuration relative to the working directory.
    fn prepare(&self, ctx: &Context) {
        if !matches!(self.kind, CheckerKind::CpaChecker | CheckerKind::CpaW2t) {
            return;
        }
        let target = ctx.work_file("config");
        if target.exists() {
            return;
        }
        let Some(source) = self
            .executable
            .parent()
            .and_then(Path::parent)
            .map(|dir| dir.join("config"))
            .filter(|dir| dir.is_dir())
        else {
            return;
        };
        if let Err(err) = copy_dir(&source, &target) {
            debug!("Cannot copy {} to work dir: {err}", source.display());
        }
    }

    /// Run the checker on `witness` and return its result string.
    pub fn validate(&self, witness: &Path, ctx: &Context) -> Result<String, ToolError> {
        self.prepare(ctx);
        let result = self.command(witness, ctx).run(Some(ctx.cancel()))?;
        let output = result.output_lines();
        let signal = result.signal().unwrap_or(0);
        let verdict = determine_result(self.kind, result.returncode, signal, &output);
        debug!("{} says {verdict} for {}", self.kind, witness.display());
        Ok(verdict)
    }
}

fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

fn classify(word: &str) -> Option<&'static str> {
    let word = word.trim().to_ascii_uppercase();
    if word.starts_with("FALSE") {
        Some(RESULT_FALSE)
    } else if word.starts_with("TRUE") {
        Some(RESULT_TRUE)
    } else if word.starts_with("UNKNOWN") {
        Some(RESULT_UNKNOWN)
    } else {
        None
    }
}

/// Reduce checker output to a result string.
pub fn determine_result(
    kind: CheckerKind,
    returncode: i32,
    returnsignal: i32,
    output: &[String],
) -> String {
    let found = match kind {
        CheckerKind::CpaChecker | CheckerKind::CpaW2t => output.iter().find_map(|line| {
            line.strip_prefix("Verification result:")
                .and_then(classify)
        }),
        CheckerKind::UAutomizer => output.iter().rev().find_map(|line| {
            let line = line.trim();
            (!line.is_empty() && !line.contains(' ')).then(|| classify(line)).flatten()
        }),
        CheckerKind::FShellW2t => output.iter().find_map(|line| {
            let line = line.trim();
            if line.contains(crate::harness::VIOLATION_MARKER) {
                Some(RESULT_FALSE)
            } else {
                line.strip_prefix("Result:").and_then(classify)
            }
        }),
    };
    match found {
        Some(result) => result.to_string(),
        None if returnsignal != 0 => format!("killed by signal {returnsignal}"),
        None if returncode != 0 => format!("error ({returncode})"),
        None => RESULT_UNKNOWN.to_string(),
    }
}

pub fn is_violation(result: &str) -> bool {
    result.to_ascii_lowercase().contains("false")
}

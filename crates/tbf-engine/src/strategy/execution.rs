use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{compile_with_fallback, ValidationStrategy, ValidationTimers, RUN_TIMEOUT};
use crate::context::Context;
use crate::error::ValidationError;
use crate::harness::{create_harness, VIOLATION_MARKER};
use crate::process::ToolCommand;
use crate::statistics::Statistics;
use crate::test_case::TestCase;
use crate::test_vector::{encode, Framing};
use crate::verdict::{CaseOutcome, Evidence};

const HARNESS_FILE: &str = "harness.c";
const EXECUTABLE_FILE: &str = "a.out";
const GCOV_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether `stderr` of a harness run shows the error method was reached.
pub(crate) fn found_error(stderr: &[u8]) -> bool {
    let marker = VIOLATION_MARKER.as_bytes();
    stderr.windows(marker.len()).any(|w| w == marker)
}

/// `gcc` invocation compiling `harness` against `program`, run in the
/// directory of both output files.
pub(crate) fn harness_compile_command(
    program: &Path,
    harness: &Path,
    output: &Path,
    compile_parameter: &str,
    std: &str,
) -> ToolCommand {
    ToolCommand::new("gcc")
        .arg(format!("-std={std}"))
        .args([compile_parameter, "-D__alias__(x)=", "-o"])
        .arg(output)
        .arg("-include")
        .arg(program)
        .arg(harness)
        .arg("-lm")
}

/// Direct execution of a stdin-reading harness compiled with the program.
#[derive(Debug)]
pub struct ExecutionStrategy {
    measure_coverage: bool,
    framing: Framing,
    executable: Option<PathBuf>,
}

impl ExecutionStrategy {
    pub fn new(measure_coverage: bool) -> Self {
        Self {
            measure_coverage,
            framing: Framing::default(),
            executable: None,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    fn executable(
        &mut self,
        ctx: &Context,
        timers: &mut ValidationTimers,
    ) -> Result<PathBuf, ValidationError> {
        if let Some(executable) = &self.executable {
            return Ok(executable.clone());
        }
        let harness = create_harness(ctx.nondet_methods(), ctx.error_method(), None);
        let harness_file = ctx.work_file(HARNESS_FILE);
        std::fs::write(&harness_file, &harness)
            .map_err(|source| ValidationError::io(&harness_file, source))?;
        timers.harness_size.add(harness.len() as u64);

        let output = ctx.work_file(EXECUTABLE_FILE);
        let coverage = self.measure_coverage;
        compile_with_fallback(Some(ctx.cancel()), &harness_file, |std| {
            let cmd = harness_compile_command(
                ctx.program(),
                Path::new(HARNESS_FILE),
                Path::new(EXECUTABLE_FILE),
                ctx.machine_model().compile_parameter,
                std,
            )
            .current_dir(ctx.work_dir());
            if coverage {
                cmd.args(["-fprofile-arcs", "-ftest-coverage"])
            } else {
                cmd
            }
        })?;
        self.executable = Some(output.clone());
        Ok(output)
    }

    fn run_case(
        &self,
        executable: &Path,
        case: &TestCase,
        ctx: &Context,
        timers: &mut ValidationTimers,
    ) -> (CaseOutcome, Option<Evidence>) {
        let vector = match timers.decode(case, ctx) {
            Ok(vector) => vector,
            Err(err) => return (CaseOutcome::Error(err.to_string()), None),
        };
        let input = encode(&vector, &self.framing);
        let command = ToolCommand::new(executable)
            .current_dir(ctx.work_dir())
            .stdin(input)
            .timeout(RUN_TIMEOUT);

        timers.execution_validation.start();
        timers.validation.start();
        let result = command.run(Some(ctx.cancel()));
        timers.execution_validation.stop();
        timers.validation.stop();
        timers.looked_at.inc();

        let outcome = match result {
            Ok(result) if found_error(&result.stderr) => CaseOutcome::Violation,
            Ok(_) => CaseOutcome::NotConfirmed,
            Err(err) => CaseOutcome::Error(err.to_string()),
        };
        debug!("Results for {vector}: {outcome:?}");
        let evidence = outcome
            .is_violation()
            .then(|| Evidence::new(case.clone(), vector));
        (outcome, evidence)
    }

    fn coverage(&self, ctx: &Context) -> Option<(String, String, String)> {
        let gcov_base = std::fs::read_dir(ctx.work_dir())
            .ok()?
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .find(|name| name.ends_with("harness.gcno"))
            .unwrap_or_else(|| HARNESS_FILE.to_string());
        let result = ToolCommand::new("gcov")
            .args(["-bc", gcov_base.as_str()])
            .current_dir(ctx.work_dir())
            .timeout(GCOV_TIMEOUT)
            .run(None)
            .map_err(|err| warn!("Cannot measure coverage: {err}"))
            .ok()?;
        let program_name = ctx.program().file_name()?.to_string_lossy().into_owned();
        parse_gcov_summary(&result.stdout_text(), &program_name)
    }
}

/// `"85.71% of 7"` becomes `"85.71% (of 7)"`.
fn gcov_value(line: &str) -> Option<String> {
    let (_, stat) = line.split_once(':')?;
    Some(match stat.find("of ") {
        Some(idx) => format!("{}({})", &stat[..idx], &stat[idx..]),
        None => stat.to_string(),
    })
}

/// Line, branch and taken-branch coverage of `program_name` from the output
/// of `gcov -bc`.
pub(crate) fn parse_gcov_summary(
    output: &str,
    program_name: &str,
) -> Option<(String, String, String)> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines
        .iter()
        .position(|l| l.starts_with("File") && l.contains(program_name))?;
    let value = |offset: usize| {
        lines
            .get(start + offset)
            .and_then(|l| gcov_value(l))
            .unwrap_or_else(|| "None".to_string())
    };
    Some((value(1), value(2), value(3)))
}

impl ValidationStrategy for ExecutionStrategy {
    fn name(&self) -> &'static str {
        "execution"
    }

    fn check(
        &mut self,
        cases: &[TestCase],
        ctx: &Context,
        timers: &mut ValidationTimers,
    ) -> Result<Option<Evidence>, ValidationError> {
        if cases.is_empty() {
            return Ok(None);
        }
        info!("Looking at {} new test files.", cases.len());
        let executable = self.executable(ctx, timers)?;
        for case in cases {
            if ctx.cancel().is_raised() {
                break;
            }
            let (outcome, evidence) = self.run_case(&executable, case, ctx, timers);
            if let CaseOutcome::Error(reason) = &outcome {
                warn!("Execution of {case} failed: {reason}");
            }
            if evidence.is_some() {
                return Ok(evidence);
            }
        }
        Ok(None)
    }

    fn record_statistics(&mut self, ctx: &Context, statistics: &mut Statistics) {
        if !self.measure_coverage || self.executable.is_none() {
            return;
        }
        let (lines, branches, taken) = self.coverage(ctx).unwrap_or_else(|| {
            (
                "None".to_string(),
                "None".to_string(),
                "None".to_string(),
            )
        });
        statistics.add_value("Statements covered", lines);
        statistics.add_value("Branch conditions executed", branches);
        statistics.add_value("Branches covered", taken);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GCOV_OUTPUT: &str = "File 'harness.c'\n\
        Lines executed:40.00% of 20\n\
        Branches executed:50.00% of 4\n\
        Taken at least once:25.00% of 4\n\
        Calls executed:10.00% of 10\n\
        \n\
        File '/tmp/programs/loop.c'\n\
        Lines executed:85.71% of 7\n\
        Branches executed:100.00% of 2\n\
        Taken at least once:50.00% of 2\n\
        Calls executed:100.00% of 1\n";

    #[test]
    fn gcov_summary_of_the_program_file() {
        let (lines, branches, taken) = parse_gcov_summary(GCOV_OUTPUT, "loop.c").unwrap();
        assert_eq!(lines, "85.71% (of 7)");
        assert_eq!(branches, "100.00% (of 2)");
        assert_eq!(taken, "50.00% (of 2)");
    }

    #[test]
    fn gcov_without_program_block_yields_nothing() {
        assert!(parse_gcov_summary(GCOV_OUTPUT, "other.c").is_none());
    }

    #[test]
    fn gcov_lines_without_branches_stay_unknown() {
        let output = "File 'p.c'\nLines executed:100.00% of 3\nNo branches\n";
        let (lines, branches, taken) = parse_gcov_summary(output, "p.c").unwrap();
        assert_eq!(lines, "100.00% (of 3)");
        assert_eq!(branches, "None");
        assert_eq!(taken, "None");
    }

    #[test]
    fn marker_is_found_anywhere_in_stderr() {
        assert!(found_error(b"warning\nError found.\n"));
        assert!(!found_error(b"Error\n"));
        assert!(!found_error(b""));
    }

    #[test]
    fn compile_command_includes_the_program() {
        let cmd = harness_compile_command(
            Path::new("/src/p.c"),
            Path::new("harness.c"),
            Path::new("a.out"),
            "-m64",
            "gnu11",
        );
        assert_eq!(
            cmd.to_string(),
            "gcc -std=gnu11 -m64 -D__alias__(x)= -o a.out -include /src/p.c harness.c -lm"
        );
    }
}

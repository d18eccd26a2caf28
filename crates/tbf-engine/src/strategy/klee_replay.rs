use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::execution::found_error;
use super::{compile_with_fallback, ValidationStrategy, ValidationTimers, RUN_TIMEOUT};
use crate::context::Context;
use crate::error::ValidationError;
use crate::harness::create_replay_shim;
use crate::process::ToolCommand;
use crate::test_case::TestCase;
use crate::verdict::{CaseOutcome, Evidence};

const SHIM_FILE: &str = "replay.c";
const EXECUTABLE_FILE: &str = "replay.out";

/// Replays KLEE `.ktest` files through `libkleeRuntest`.
#[derive(Debug)]
pub struct KleeReplayStrategy {
    lib_dir: PathBuf,
    executable: Option<PathBuf>,
}

impl KleeReplayStrategy {
    /// `lib_dir` is the directory containing `libkleeRuntest`.
    pub fn new(lib_dir: impl Into<PathBuf>) -> Self {
        Self {
            lib_dir: lib_dir.into(),
            executable: None,
        }
    }

    fn compile_command(&self, program: &Path, std: &str) -> ToolCommand {
        ToolCommand::new("gcc")
            .arg(format!("-std={std}"))
            .arg("-L")
            .arg(&self.lib_dir)
            .args(["-D__alias__(x)=", "-o", EXECUTABLE_FILE, "-include"])
            .arg(program)
            .args([SHIM_FILE, "-lkleeRuntest", "-lm"])
    }

    fn executable(
        &mut self,
        ctx: &Context,
        timers: &mut ValidationTimers,
    ) -> Result<PathBuf, ValidationError> {
        if let Some(executable) = &self.executable {
            return Ok(executable.clone());
        }
        let shim = create_replay_shim(ctx.nondet_methods(), ctx.error_method());
        let shim_file = ctx.work_file(SHIM_FILE);
        std::fs::write(&shim_file, &shim)
            .map_err(|source| ValidationError::io(&shim_file, source))?;
        timers.harness_size.add(shim.len() as u64);

        compile_with_fallback(Some(ctx.cancel()), &shim_file, |std| {
            self.compile_command(ctx.program(), std)
                .current_dir(ctx.work_dir())
        })?;
        let executable = ctx.work_file(EXECUTABLE_FILE);
        self.executable = Some(executable.clone());
        Ok(executable)
    }
}

impl ValidationStrategy for KleeReplayStrategy {
    fn name(&self) -> &'static str {
        "klee-replay"
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
        let executable = self.executable(ctx, timers)?;
        for case in cases {
            if ctx.cancel().is_raised() {
                break;
            }
            let command = ToolCommand::new(&executable)
                .current_dir(ctx.work_dir())
                .env("KTEST_FILE", case.origin())
                .env("LD_LIBRARY_PATH", &self.lib_dir)
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
            debug!("Results for {case}: {outcome:?}");
            match outcome {
                CaseOutcome::Violation => {
                    info!("Replay of {case} reached the error method");
                    match timers.decode(case, ctx) {
                        Ok(vector) => return Ok(Some(Evidence::new(case.clone(), vector))),
                        Err(err) => warn!("Cannot decode {case} after its replay: {err}"),
                    }
                }
                CaseOutcome::Error(reason) => warn!("Replay of {case} failed: {reason}"),
                CaseOutcome::NotConfirmed => {}
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_command_links_the_runtest_library() {
        let strategy = KleeReplayStrategy::new("/opt/klee/lib");
        let cmd = strategy.compile_command(Path::new("/src/p.c"), "gnu90");
        assert_eq!(
            cmd.to_string(),
            "gcc -std=gnu90 -L /opt/klee/lib -D__alias__(x)= -o replay.out -include /src/p.c replay.c -lkleeRuntest -lm"
        );
    }
}

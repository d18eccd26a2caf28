//! Validation strategies.
//!
//! A strategy turns a batch of new test cases into evidence of a violation,
//! or reports that none of them confirmed one. Strategies are tried in a
//! fixed order per batch: KLEE replay, then execution, then witness
//! validation.

pub mod checkers;
mod execution;
mod klee_replay;
mod witness;

pub use checkers::{Checker, CheckerKind};
pub use execution::ExecutionStrategy;
pub use klee_replay::KleeReplayStrategy;
pub use witness::WitnessStrategy;

pub(crate) use execution::harness_compile_command;

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::cancel::Latch;
use crate::context::Context;
use crate::error::{CompileError, DecodeError, ValidationError};
use crate::process::ToolCommand;
use crate::statistics::{Counter, Statistics, Stopwatch};
use crate::test_case::TestCase;
use crate::test_vector::{decode, TestVector};
use crate::verdict::Evidence;

/// Time limit of a single harness or replay run.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(5);
/// Time limit of one compiler invocation that sets no limit of its own.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timers and counters shared by all strategies of one validator.
#[derive(Debug, Clone, Default)]
pub struct ValidationTimers {
    pub validation: Stopwatch,
    pub witness_validation: Stopwatch,
    pub execution_validation: Stopwatch,
    pub vector_generation: Stopwatch,
    pub witness_size: Counter,
    pub harness_size: Counter,
    pub looked_at: Counter,
}

impl ValidationTimers {
    /// Decode `case`, accounting the time as test vector generation.
    pub fn decode(&mut self, case: &TestCase, ctx: &Context) -> Result<TestVector, DecodeError> {
        self.vector_generation
            .time(|| decode(case, ctx.nondet_methods(), ctx.machine_model()))
    }

    /// Write the validator section in its fixed order.
    pub fn record(&self, statistics: &mut Statistics) {
        statistics.add_value("Time for validation", &self.validation);
        statistics.add_value("Time for witness validation", &self.witness_validation);
        statistics.add_value("Total size of witnesses", self.witness_size);
        statistics.add_value("Time for execution validation", &self.execution_validation);
        statistics.add_value("Total size of harnesses", self.harness_size);
        statistics.add_value("Time for test vector generation", &self.vector_generation);
        statistics.add_value("Number of looked-at test cases", self.looked_at);
    }
}

pub trait ValidationStrategy: Send {
    fn name(&self) -> &'static str;

    /// Validate `cases` in order. Returns the evidence of the first case
    /// that confirms a violation; later cases of the batch are not looked at.
    fn check(
        &mut self,
        cases: &[TestCase],
        ctx: &Context,
        timers: &mut ValidationTimers,
    ) -> Result<Option<Evidence>, ValidationError>;

    /// Add strategy-specific lines once validation has ended.
    fn record_statistics(&mut self, _ctx: &Context, _statistics: &mut Statistics) {}
}

/// Build `source_file` with the command `build` returns for a C standard,
/// first as GNU C11 and again as GNU C90 if that fails. A compiler that
/// times out or is cancelled is not retried.
pub(crate) fn compile_with_fallback(
    cancel: Option<&Latch>,
    source_file: &Path,
    build: impl Fn(&str) -> ToolCommand,
) -> Result<(), ValidationError> {
    let mut last_error = String::new();
    for std in ["gnu11", "gnu90"] {
        let result = build(std).default_timeout(COMPILE_TIMEOUT).run(cancel)?;
        if result.success() {
            return Ok(());
        }
        debug!(
            "Compiling {} as {std} failed: {}",
            source_file.display(),
            result.stderr_text().trim()
        );
        last_error = result
            .stderr_text()
            .lines()
            .find(|l| l.contains("error"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("exit code {}", result.returncode));
        if result.timed_out || result.cancelled {
            break;
        }
    }
    Err(CompileError {
        source_file: source_file.to_path_buf(),
        message: last_error,
    }
    .into())
}

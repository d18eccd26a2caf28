use tracing::{debug, info, warn};

use super::checkers::{is_violation, Checker};
use super::{ValidationStrategy, ValidationTimers};
use crate::context::Context;
use crate::error::ValidationError;
use crate::test_case::TestCase;
use crate::verdict::{CaseOutcome, Evidence};
use crate::witness::{witness_for, WITNESS_SUFFIX};

/// Turns each test vector into a violation witness and hands it to the
/// configured checkers. Without checkers, witnesses are only written.
#[derive(Debug, Default)]
pub struct WitnessStrategy {
    checkers: Vec<Checker>,
    empty_case_handled: bool,
}

impl WitnessStrategy {
    pub fn new(checkers: Vec<Checker>) -> Self {
        Self {
            checkers,
            empty_case_handled: false,
        }
    }

    fn run_checkers(&self, witness: &std::path::Path, ctx: &Context) -> CaseOutcome {
        let mut errors = Vec::new();
        for checker in &self.checkers {
            match checker.validate(witness, ctx) {
                Ok(result) if is_violation(&result) => return CaseOutcome::Violation,
                Ok(_) => {}
                Err(err) => errors.push(format!("{}: {err}", checker.kind())),
            }
        }
        if errors.is_empty() {
            CaseOutcome::NotConfirmed
        } else {
            CaseOutcome::Error(errors.join("; "))
        }
    }

    /// Witness validation of a single case. Errors only concern this case.
    fn validate_case(
        &mut self,
        case: &TestCase,
        ctx: &Context,
        timers: &mut ValidationTimers,
    ) -> Result<Option<Evidence>, ValidationError> {
        debug!("Looking at test case {case}");
        let vector = timers.decode(case, ctx)?;
        if vector.is_empty() {
            if self.empty_case_handled {
                info!("Test vector was not generated for {case}");
                return Ok(None);
            }
            self.empty_case_handled = true;
        }

        let content = witness_for(ctx, &vector)?;
        let witness_file = ctx.work_file(format!("{}{WITNESS_SUFFIX}", case.name()));
        std::fs::write(&witness_file, &content)
            .map_err(|source| ValidationError::io(&witness_file, source))?;
        timers.witness_size.add(content.len() as u64);

        timers.witness_validation.start();
        timers.validation.start();
        let outcome = self.run_checkers(&witness_file, ctx);
        timers.witness_validation.stop();
        timers.validation.stop();
        timers.looked_at.inc();

        debug!("Results for {}: {outcome:?}", witness_file.display());
        match outcome {
            CaseOutcome::Violation => Ok(Some(
                Evidence::new(case.clone(), vector).with_witness(witness_file),
            )),
            CaseOutcome::Error(reason) => {
                warn!("Witness validation failed: {reason}");
                Ok(None)
            }
            CaseOutcome::NotConfirmed => Ok(None),
        }
    }
}

impl ValidationStrategy for WitnessStrategy {
    fn name(&self) -> &'static str {
        "witness"
    }

    fn check(
        &mut self,
        cases: &[TestCase],
        ctx: &Context,
        timers: &mut ValidationTimers,
    ) -> Result<Option<Evidence>, ValidationError> {
        if !cases.is_empty() {
            info!("Looking at {} new test files.", cases.len());
        }
        for case in cases {
            if ctx.cancel().is_raised() {
                break;
            }
            match self.validate_case(case, ctx, timers) {
                Ok(Some(evidence)) => return Ok(Some(evidence)),
                Ok(None) => {}
                Err(err) => warn!("Skipping {case}: {err}"),
            }
        }
        Ok(None)
    }
}


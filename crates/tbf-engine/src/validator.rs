//! Test validator: the polling engine between generation and validation.
//!
//! While the generator runs, the validator repeatedly fetches the test
//! cases it has not seen yet and passes each new batch through the strategy
//! chain. The first confirmed violation ends validation immediately. Once
//! generation has finished, one final pass picks up the remaining cases
//! unless the run was cancelled.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{RunError, ValidationError};
use crate::generator::InputGenerator;
use crate::harness::create_harness;
use crate::statistics::Statistics;
use crate::strategy::{ValidationStrategy, ValidationTimers};
use crate::test_case::TestCase;
use crate::verdict::{decide_final_verdict, Evidence, Verdict};
use crate::witness::{witness_for, WITNESS_SUFFIX};

#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    /// Pause between two polls that found nothing new.
    pub poll_interval: Duration,
    /// Pause before retrying a batch whose validation failed.
    pub error_backoff: Duration,
    /// Claim `TRUE` when validation ends without a violation.
    pub naive_verification: bool,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            error_backoff: Duration::from_millis(100),
            naive_verification: false,
        }
    }
}

pub struct TestValidator {
    strategies: Vec<Box<dyn ValidationStrategy>>,
    options: ValidatorOptions,
    timers: ValidationTimers,
    visited: HashSet<String>,
    /// Cases each strategy has finished, by strategy position.
    checked: Vec<HashSet<String>>,
    final_vector_size: Option<usize>,
}

impl TestValidator {
    pub fn new(strategies: Vec<Box<dyn ValidationStrategy>>, options: ValidatorOptions) -> Self {
        let checked = strategies.iter().map(|_| HashSet::new()).collect();
        Self {
            strategies,
            options,
            timers: ValidationTimers::default(),
            visited: HashSet::new(),
            checked,
            final_vector_size: None,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Names of the test cases every strategy has finished.
    pub fn visited(&self) -> &HashSet<String> {
        &self.visited
    }

    /// Validate test cases of `generator` until a violation is confirmed,
    /// generation finishes, or the run is cancelled.
    pub fn run(
        &mut self,
        generator: &dyn InputGenerator,
        ctx: &Context,
    ) -> Result<Verdict, RunError> {
        if self.strategies.is_empty() {
            info!("No validation strategy configured, nothing to validate");
            return Ok(Verdict::Unknown);
        }
        debug!(
            "Checking inputs for {} with {:?}",
            ctx.program().display(),
            self.strategy_names()
        );
        let signals = ctx.signals();

        while !signals.generation_finished.is_raised() && !signals.cancel.is_raised() {
            let cases = match generator.test_cases(&self.visited) {
                Ok(cases) => cases,
                Err(err) => {
                    debug!("Fetching test cases failed, retrying: {err}");
                    signals
                        .generation_finished
                        .wait_timeout(self.options.poll_interval);
                    continue;
                }
            };
            if cases.is_empty() {
                signals
                    .generation_finished
                    .wait_timeout(self.options.poll_interval);
                continue;
            }
            match self.check_batch(&cases, ctx) {
                Ok(Some(evidence)) => return Ok(self.found(evidence, generator, ctx)),
                Ok(None) => {}
                Err(err) => {
                    warn!("Validation failed, retrying batch: {err}");
                    signals.cancel.wait_timeout(self.options.error_backoff);
                }
            }
        }

        if signals.cancel.is_raised() {
            info!("Validation cancelled");
        } else {
            let cases = generator.test_cases(&self.visited)?;
            if let Some(evidence) = self.check_batch(&cases, ctx)? {
                return Ok(self.found(evidence, generator, ctx));
            }
        }
        Ok(decide_final_verdict(Verdict::Unknown, self.options.naive_verification))
    }

    /// Pass `cases` through the chain. A strategy only sees the cases it has
    /// not finished, so a batch retried after an error resumes at the
    /// failing strategy. Cases are visited once every strategy finished
    /// them; a cancelled batch stays unvisited.
    fn check_batch(
        &mut self,
        cases: &[TestCase],
        ctx: &Context,
    ) -> Result<Option<Evidence>, ValidationError> {
        for (strategy, checked) in self.strategies.iter_mut().zip(&mut self.checked) {
            let pending: Vec<TestCase> = cases
                .iter()
                .filter(|c| !checked.contains(c.name()))
                .cloned()
                .collect();
            if pending.is_empty() {
                continue;
            }
            let result = strategy.check(&pending, ctx, &mut self.timers)?;
            let verdict = if result.is_some() { "FALSE" } else { "UNKNOWN" };
            info!("{} validation says: {verdict}", strategy.name());
            if result.is_some() {
                return Ok(result);
            }
            if ctx.cancel().is_raised() {
                debug!("Batch cancelled during {} validation", strategy.name());
                return Ok(None);
            }
            checked.extend(pending.iter().map(|c| c.name().to_string()));
        }
        self.visited.extend(cases.iter().map(|c| c.name().to_string()));
        Ok(None)
    }

    /// Stop the run and attach the artifacts the strategy did not produce.
    fn found(
        &mut self,
        mut evidence: Evidence,
        generator: &dyn InputGenerator,
        ctx: &Context,
    ) -> Verdict {
        ctx.cancel().raise();
        self.visited.insert(evidence.test_case.name().to_string());
        self.final_vector_size = Some(evidence.vector.len());
        info!("Found violating test case {}", evidence.test_case);

        if evidence.witness.is_none()
            && generator.supports_witnesses()
            && !evidence.vector.is_empty()
        {
            match self.write_witness(&evidence, ctx) {
                Ok(path) => evidence.witness = Some(path),
                Err(err) => warn!("Cannot create witness for {}: {err}", evidence.test_case),
            }
        }
        if evidence.harness.is_none() {
            let harness = create_harness(
                ctx.nondet_methods(),
                ctx.error_method(),
                Some(&evidence.vector),
            );
            let path = ctx.work_file(format!("{}.harness.c", evidence.test_case.name()));
            match std::fs::write(&path, &harness) {
                Ok(()) => {
                    self.timers.harness_size.add(harness.len() as u64);
                    evidence.harness = Some(path);
                }
                Err(err) => warn!("Cannot write harness {}: {err}", path.display()),
            }
        }
        Verdict::violation(evidence)
    }

    fn write_witness(
        &mut self,
        evidence: &Evidence,
        ctx: &Context,
    ) -> Result<PathBuf, ValidationError> {
        let content = witness_for(ctx, &evidence.vector)?;
        let path = ctx.work_file(format!("{}{WITNESS_SUFFIX}", evidence.test_case.name()));
        std::fs::write(&path, &content).map_err(|source| ValidationError::io(&path, source))?;
        self.timers.witness_size.add(content.len() as u64);
        Ok(path)
    }

    /// Validator section of the run statistics.
    pub fn statistics(&mut self, producer: &str, ctx: &Context) -> Statistics {
        let mut statistics = Statistics::new(format!("Test Validator {producer}"));
        self.timers.record(&mut statistics);
        match self.final_vector_size {
            Some(size) => statistics.add_value("Size of successful test vector", size),
            None => statistics.add_value("Size of successful test vector", "None"),
        }
        for strategy in &mut self.strategies {
            strategy.record_statistics(ctx, &mut statistics);
        }
        statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::Latch;
    use crate::error::{CompileError, GenerationError};
    use crate::generator::GenerationOutcome;
    use crate::machine_model::MachineModel;
    use crate::test_case::TestCaseFormat;
    use crate::test_vector::TestVector;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct FixedGenerator {
        cases: Vec<TestCase>,
    }

    impl InputGenerator for FixedGenerator {
        fn name(&self) -> &str {
            "fixed"
        }

        fn format(&self) -> TestCaseFormat {
            TestCaseFormat::Lines
        }

        fn generate(&self, _: &Path, _: &Latch) -> Result<GenerationOutcome, GenerationError> {
            unreachable!("validator never drives generation")
        }

        fn test_cases(&self, visited: &HashSet<String>) -> Result<Vec<TestCase>, GenerationError> {
            Ok(self
                .cases
                .iter()
                .filter(|c| !visited.contains(c.name()))
                .cloned()
                .collect())
        }
    }

    /// Records every case it sees; reports a violation for `bad`.
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        bad: Option<&'static str>,
        failures: Arc<AtomicUsize>,
    }

    impl ValidationStrategy for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn check(
            &mut self,
            cases: &[TestCase],
            _ctx: &Context,
            timers: &mut ValidationTimers,
        ) -> Result<Option<Evidence>, ValidationError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(CompileError {
                    source_file: "harness.c".into(),
                    message: "transient".into(),
                }
                .into());
            }
            for case in cases {
                timers.looked_at.inc();
                self.seen.lock().unwrap().push(case.name().to_string());
                if Some(case.name()) == self.bad {
                    let vector = TestVector::new(case.name(), case.origin());
                    return Ok(Some(Evidence::new(case.clone(), vector)));
                }
            }
            Ok(None)
        }
    }

    fn case(name: &str) -> TestCase {
        TestCase::new(name, format!("/tmp/{name}"), b"1\n".to_vec(), TestCaseFormat::Lines)
    }

    fn context(dir: &Path) -> Context {
        Context::new(dir.join("p.c"), MachineModel::LINUX_32, Vec::new(), dir, dir)
    }

    fn recorder(
        bad: Option<&'static str>,
    ) -> (Box<dyn ValidationStrategy>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let strategy = Recorder {
            seen: Arc::clone(&seen),
            bad,
            failures: Arc::new(AtomicUsize::new(0)),
        };
        (Box::new(strategy), seen)
    }

    #[test]
    fn empty_chain_is_unknown_without_polling() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut validator = TestValidator::new(Vec::new(), ValidatorOptions::default());
        let generator = FixedGenerator { cases: vec![case("t1")] };
        let verdict = validator.run(&generator, &ctx).unwrap();
        assert_eq!(verdict, Verdict::Unknown);
        assert!(validator.visited().is_empty());
    }

    #[test]
    fn finished_generation_gets_one_final_pass() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.signals().generation_finished.raise();
        let (strategy, seen) = recorder(None);
        let mut validator = TestValidator::new(vec![strategy], ValidatorOptions::default());
        let generator = FixedGenerator {
            cases: vec![case("t1"), case("t2")],
        };
        assert_eq!(validator.run(&generator, &ctx).unwrap(), Verdict::Unknown);
        assert_eq!(*seen.lock().unwrap(), vec!["t1", "t2"]);
    }

    #[test]
    fn naive_verification_claims_true() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.signals().generation_finished.raise();
        let (strategy, _) = recorder(None);
        let options = ValidatorOptions {
            naive_verification: true,
            ..ValidatorOptions::default()
        };
        let mut validator = TestValidator::new(vec![strategy], options);
        let generator = FixedGenerator { cases: Vec::new() };
        assert_eq!(validator.run(&generator, &ctx).unwrap(), Verdict::True);
    }

    #[test]
    fn violation_short_circuits_and_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.signals().generation_finished.raise();
        let (strategy, seen) = recorder(Some("t2"));
        let mut validator = TestValidator::new(vec![strategy], ValidatorOptions::default());
        let generator = FixedGenerator {
            cases: vec![case("t1"), case("t2"), case("t3")],
        };
        let verdict = validator.run(&generator, &ctx).unwrap();
        let evidence = verdict.evidence().expect("violation");
        assert_eq!(evidence.test_case.name(), "t2");
        assert!(evidence.harness.as_ref().unwrap().exists());
        assert!(evidence.witness.is_none(), "empty vectors get no witness");
        assert_eq!(*seen.lock().unwrap(), vec!["t1", "t2"]);
        assert!(ctx.cancel().is_raised());

        let stats = validator.statistics("fixed", &ctx).to_string();
        assert!(stats.starts_with("---- Test Validator fixed ----"));
        assert!(stats.contains("Size of successful test vector: 0"));
        assert!(stats.contains("Number of looked-at test cases: 2"));
    }

    #[test]
    fn cancelled_run_skips_the_final_pass() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.cancel().raise();
        let (strategy, seen) = recorder(Some("t1"));
        let mut validator = TestValidator::new(vec![strategy], ValidatorOptions::default());
        let generator = FixedGenerator { cases: vec![case("t1")] };
        assert_eq!(validator.run(&generator, &ctx).unwrap(), Verdict::Unknown);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_batch_is_retried_while_polling() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let strategy = Recorder {
            seen: Arc::clone(&seen),
            bad: Some("t1"),
            failures: Arc::new(AtomicUsize::new(2)),
        };
        let options = ValidatorOptions {
            error_backoff: Duration::from_millis(1),
            ..ValidatorOptions::default()
        };
        let mut validator = TestValidator::new(vec![Box::new(strategy)], options);
        let generator = FixedGenerator { cases: vec![case("t1")] };
        let verdict = validator.run(&generator, &ctx).unwrap();
        assert!(verdict.is_positive());
        assert_eq!(*seen.lock().unwrap(), vec!["t1"]);
    }

    #[test]
    fn retried_batch_resumes_at_the_failing_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let (first, first_seen) = recorder(None);
        let second_seen = Arc::new(Mutex::new(Vec::new()));
        let second = Recorder {
            seen: Arc::clone(&second_seen),
            bad: Some("t2"),
            failures: Arc::new(AtomicUsize::new(1)),
        };
        let options = ValidatorOptions {
            error_backoff: Duration::from_millis(1),
            ..ValidatorOptions::default()
        };
        let mut validator = TestValidator::new(vec![first, Box::new(second)], options);
        let generator = FixedGenerator {
            cases: vec![case("t1"), case("t2")],
        };
        let verdict = validator.run(&generator, &ctx).unwrap();
        assert_eq!(verdict.evidence().unwrap().test_case.name(), "t2");
        assert_eq!(*first_seen.lock().unwrap(), vec!["t1", "t2"]);
        assert_eq!(*second_seen.lock().unwrap(), vec!["t1", "t2"]);
    }

    /// Raises the cancellation latch after the first case of a batch.
    struct Cancelling {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ValidationStrategy for Cancelling {
        fn name(&self) -> &'static str {
            "cancelling"
        }

        fn check(
            &mut self,
            cases: &[TestCase],
            ctx: &Context,
            _timers: &mut ValidationTimers,
        ) -> Result<Option<Evidence>, ValidationError> {
            if let Some(case) = cases.first() {
                self.seen.lock().unwrap().push(case.name().to_string());
                ctx.cancel().raise();
            }
            Ok(None)
        }
    }

    #[test]
    fn cancelled_batch_stays_unvisited() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let strategy = Cancelling {
            seen: Arc::clone(&seen),
        };
        let (later, later_seen) = recorder(None);
        let mut validator =
            TestValidator::new(vec![Box::new(strategy), later], ValidatorOptions::default());
        let generator = FixedGenerator {
            cases: vec![case("t1"), case("t2"), case("t3")],
        };
        assert_eq!(validator.run(&generator, &ctx).unwrap(), Verdict::Unknown);
        assert_eq!(*seen.lock().unwrap(), vec!["t1"]);
        assert!(later_seen.lock().unwrap().is_empty());
        assert!(validator.visited().is_empty());
    }

    #[test]
    fn final_pass_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.signals().generation_finished.raise();
        let strategy = Recorder {
            seen: Arc::new(Mutex::new(Vec::new())),
            bad: None,
            failures: Arc::new(AtomicUsize::new(1)),
        };
        let mut validator =
            TestValidator::new(vec![Box::new(strategy)], ValidatorOptions::default());
        let generator = FixedGenerator { cases: vec![case("t1")] };
        assert!(matches!(
            validator.run(&generator, &ctx),
            Err(RunError::Validation(ValidationError::Compile(_)))
        ));
    }
}

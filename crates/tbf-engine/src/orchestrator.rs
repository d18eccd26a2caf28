//! One complete TBF run: generation and validation side by side, then
//! persisting the verdict, its artifacts and the statistics.
//!
//! Configuration errors are returned before anything is created. Every
//! later failure is logged once and turns the verdict into `UNKNOWN`;
//! `Statistics.txt` is written in either case.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::cancel::{Latch, RunSignals};
use crate::config::{GenerationMode, RunOptions, ValidationConfig};
use crate::context::Context;
use crate::error::{ConfigError, GenerationError, RunError};
use crate::generator::{GenerationOutcome, InputGenerator};
use crate::nondet::find_nondet_methods;
use crate::statistics::{merge_statistics, Statistics};
use crate::strategy::{compile_with_fallback, harness_compile_command, ValidationStrategy};
use crate::timeout::{deadline_after, deadline_exceeded};
use crate::validator::TestValidator;
use crate::verdict::{Evidence, Verdict};

pub const STATISTICS_FILE: &str = "Statistics.txt";
pub const CREATED_FILES_DIR: &str = "created_files";
const WORK_DIR_PREFIX: &str = ".tbf-work-";

/// Result of [`run`].
#[derive(Debug)]
pub struct RunReport {
    pub verdict: Verdict,
    /// Merged generator and validator statistics.
    pub statistics: String,
    pub output_dir: PathBuf,
    /// Where the work directory was kept, if it was.
    pub created_files: Option<PathBuf>,
}

impl RunReport {
    /// Content of `Statistics.txt`.
    pub fn summary(&self) -> String {
        format!(
            "{}\n\nTBF verdict: {}\n",
            self.statistics,
            self.verdict.as_str()
        )
    }
}

/// Raises the cancellation latch once the global time limit expires.
/// Stopped and joined on drop when the run ends first.
struct GlobalTimer {
    deadline: Option<Instant>,
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl GlobalTimer {
    fn start(limit: Option<Duration>, cancel: Latch) -> Self {
        let Some(limit) = limit else {
            return Self {
                deadline: None,
                stop: None,
                handle: None,
            };
        };
        let (stop, expiry) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = expiry.recv_timeout(limit) {
                error!("Timeout error.");
                cancel.raise();
            }
        });
        Self {
            deadline: deadline_after(Some(limit)),
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    fn expired(&self) -> bool {
        deadline_exceeded(self.deadline)
    }
}

impl Drop for GlobalTimer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

enum Generation {
    None,
    Done(Result<GenerationOutcome, GenerationError>),
    Running(JoinHandle<Result<GenerationOutcome, GenerationError>>),
}

/// Mutable state of a run that outlives a failing step.
struct Session<'a> {
    program: PathBuf,
    generator: Arc<dyn InputGenerator>,
    validation: &'a ValidationConfig,
    options: &'a RunOptions,
    work_dir: PathBuf,
    signals: RunSignals,
    generator_stats: Option<Statistics>,
    validator_stats: Option<Statistics>,
}

/// Generate tests for `program` with `generator` and validate them as
/// configured.
pub fn run(
    program: &Path,
    generator: Arc<dyn InputGenerator>,
    validation: &ValidationConfig,
    options: &RunOptions,
) -> Result<RunReport, RunError> {
    let started = Instant::now();
    let strategies = validation.build_strategies(generator.name(), generator.format())?;
    if !program.is_file() {
        return Err(ConfigError::MissingProgram(program.to_path_buf()).into());
    }
    let program = program
        .canonicalize()
        .map_err(|source| RunError::io(program, source))?;

    let output_dir = &options.output_dir;
    std::fs::create_dir_all(output_dir).map_err(|source| RunError::io(output_dir, source))?;
    let work_dir = tempfile::Builder::new()
        .prefix(WORK_DIR_PREFIX)
        .tempdir_in(output_dir)
        .map_err(|source| RunError::io(output_dir, source))?;
    debug!("Working in {}", work_dir.path().display());

    let signals = RunSignals::new();
    let timer = GlobalTimer::start(options.timelimit, signals.cancel.clone());
    let mut session = Session {
        program,
        generator,
        validation,
        options,
        work_dir: work_dir.path().to_path_buf(),
        signals,
        generator_stats: None,
        validator_stats: None,
    };

    let verdict = match session.execute(strategies) {
        Ok(verdict) => verdict,
        Err(err) => {
            error!("{err}");
            Verdict::Unknown
        }
    };
    session.signals.cancel.raise();
    if !timer.expired() {
        info!("Time taken: {:.3} s", started.elapsed().as_secs_f64());
    }
    drop(timer);

    let statistics = merge_statistics([
        session.generator_stats.as_ref(),
        session.validator_stats.as_ref(),
    ]);
    let mut report = RunReport {
        verdict,
        statistics,
        output_dir: output_dir.clone(),
        created_files: None,
    };
    let statistics_file = output_dir.join(STATISTICS_FILE);
    std::fs::write(&statistics_file, report.summary())
        .map_err(|source| RunError::io(&statistics_file, source))?;

    if options.keep_files {
        let created = output_dir.join(CREATED_FILES_DIR);
        info!("Moving created files to {}", created.display());
        if created.exists() {
            let _ = std::fs::remove_dir_all(&created);
        }
        match std::fs::rename(work_dir.path(), &created) {
            Ok(()) => report.created_files = Some(created),
            Err(err) => warn!("Cannot keep created files: {err}"),
        }
    }
    Ok(report)
}

impl Session<'_> {
    fn execute(
        &mut self,
        strategies: Vec<Box<dyn ValidationStrategy>>,
    ) -> Result<Verdict, RunError> {
        let nondet_methods = find_nondet_methods(&self.program, self.options.svcomp_nondets)?;
        let ctx = Context::new(
            &self.program,
            self.validation.machine_model.clone(),
            nondet_methods,
            &self.work_dir,
            &self.options.output_dir,
        )
        .with_error_method(self.validation.error_method.clone())
        .with_producer(self.generator.name())
        .with_signals(self.signals.clone());
        ctx.write_property_file()
            .map_err(|source| RunError::io(ctx.property_file(), source))?;

        let mut validator = TestValidator::new(strategies, self.validation.validator_options());

        let generation = match self.start_generation() {
            Generation::Done(Err(err)) => return Err(err.into()),
            generation => generation,
        };

        let result = validator.run(self.generator.as_ref(), &ctx);
        self.validator_stats = Some(validator.statistics(self.generator.name(), &ctx));
        let mut verdict = match result {
            Ok(verdict) => verdict,
            Err(err) => {
                // Stop the generator and collect its statistics before failing.
                self.signals.cancel.raise();
                match self.finish_generation(generation) {
                    Ok(true) => {}
                    Ok(false) => warn!("Couldn't get result of input generation due to timeout"),
                    Err(gen_err) => warn!("{}", RunError::from(gen_err)),
                }
                return Err(err);
            }
        };

        let generation_done = match self.finish_generation(generation) {
            Ok(done) => done,
            Err(err) if verdict.is_positive() => {
                warn!("{}", RunError::from(err));
                true
            }
            Err(err) => return Err(err.into()),
        };
        if !generation_done && !verdict.is_positive() {
            warn!("Couldn't get result of input generation due to timeout");
            verdict = Verdict::Unknown;
        }

        if let Some(evidence) = verdict.evidence() {
            self.signals.cancel.raise();
            self.persist(evidence, &ctx);
        }
        Ok(verdict)
    }

    fn start_generation(&self) -> Generation {
        let finished = self.signals.generation_finished.clone();
        match self.options.mode {
            GenerationMode::Existing => {
                finished.raise();
                Generation::None
            }
            GenerationMode::Sequential => {
                let outcome = self.generator.generate(&self.program, &self.signals.cancel);
                finished.raise();
                Generation::Done(outcome)
            }
            GenerationMode::Parallel => {
                let generator = Arc::clone(&self.generator);
                let program = self.program.clone();
                let cancel = self.signals.cancel.clone();
                Generation::Running(thread::spawn(move || {
                    let outcome = generator.generate(&program, &cancel);
                    finished.raise();
                    outcome
                }))
            }
        }
    }

    /// Collect the generator's outcome. `Ok(false)` if it did not finish
    /// within the configured wait.
    fn finish_generation(&mut self, generation: Generation) -> Result<bool, GenerationError> {
        let outcome = match generation {
            Generation::None => return Ok(true),
            Generation::Done(outcome) => outcome,
            Generation::Running(handle) => {
                if !self
                    .signals
                    .generation_finished
                    .wait_timeout(self.options.generation_wait)
                {
                    return Ok(false);
                }
                match handle.join() {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return Err(GenerationError::Failed {
                            generator: self.generator.name().to_string(),
                            message: "generator thread panicked".into(),
                        })
                    }
                }
            }
        };
        let outcome = outcome?;
        if outcome.cancelled {
            debug!("Input generation was cancelled");
        }
        self.generator_stats = Some(outcome.statistics);
        Ok(true)
    }

    /// Copy the evidence of a violation into the output directory. Failures
    /// here are logged and do not change the verdict.
    fn persist(&self, evidence: &Evidence, ctx: &Context) {
        let output_dir = &self.options.output_dir;
        let test_copy = output_dir.join(evidence.test_case.name());
        if let Err(err) = std::fs::copy(evidence.test_case.origin(), &test_copy) {
            warn!("Cannot copy test case to {}: {err}", test_copy.display());
        }

        if let Some(harness) = &evidence.harness {
            let harness_copy = output_dir.join("harness.c");
            match std::fs::copy(harness, &harness_copy) {
                Ok(_) => {
                    let executable = output_dir.join("a.out");
                    let compiled = compile_with_fallback(None, &harness_copy, |std| {
                        harness_compile_command(
                            ctx.program(),
                            &harness_copy,
                            &executable,
                            ctx.machine_model().compile_parameter,
                            std,
                        )
                    });
                    if let Err(err) = compiled {
                        warn!("Cannot compile {}: {err}", harness_copy.display());
                    }
                }
                Err(err) => warn!("Cannot copy harness to {}: {err}", harness_copy.display()),
            }
        }

        if let Some(witness) = &evidence.witness {
            let witness_copy = output_dir.join("witness.graphml");
            if let Err(err) = std::fs::copy(witness, &witness_copy) {
                warn!("Cannot copy witness to {}: {err}", witness_copy.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_ends_with_the_verdict_line() {
        let mut statistics = Statistics::new("Input generator random");
        statistics.add_value("Number of generated test cases", 0);
        let report = RunReport {
            verdict: Verdict::Unknown,
            statistics: merge_statistics([Some(&statistics)]),
            output_dir: PathBuf::from("output"),
            created_files: None,
        };
        assert_eq!(
            report.summary(),
            "---- Input generator random ----\nNumber of generated test cases: 0\n\nTBF verdict: UNKNOWN\n"
        );
    }

    #[test]
    fn timer_raises_cancel_after_the_limit() {
        let cancel = Latch::new();
        let timer = GlobalTimer::start(Some(Duration::from_millis(20)), cancel.clone());
        assert!(cancel.wait_timeout(Duration::from_secs(5)));
        assert!(timer.expired());
    }

    #[test]
    fn stopped_timer_never_fires() {
        let cancel = Latch::new();
        let timer = GlobalTimer::start(Some(Duration::from_secs(60)), cancel.clone());
        drop(timer);
        assert!(!cancel.is_raised());
    }

    #[test]
    fn missing_program_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(crate::generator::DirectoryGenerator::new(
            "existing",
            dir.path(),
            crate::test_case::TestCaseFormat::Lines,
        ));
        let options = RunOptions {
            output_dir: dir.path().join("output"),
            ..RunOptions::default()
        };
        let err = run(
            &dir.path().join("missing.c"),
            generator,
            &ValidationConfig::default(),
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::MissingProgram(_))));
        assert!(!options.output_dir.exists());
    }
}

//! Per-run context shared by the validator and its strategies.
//!
//! Holds everything that is computed once per program: the nondet registry,
//! the error lines, the property file, and the work and output directories.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::cancel::{Latch, RunSignals};
use crate::error::ParseError;
use crate::machine_model::MachineModel;
use crate::nondet::{find_error_lines, NondetMethod, DEFAULT_ERROR_METHOD};

pub const PROPERTY_FILE_NAME: &str = "unreach-call.prp";

/// Reachability property of `error_method`, in SV-COMP property syntax.
pub fn reach_property(error_method: &str) -> String {
    format!("CHECK( init(main()), LTL(G ! call({error_method}())) )")
}

#[derive(Debug)]
pub struct Context {
    program: PathBuf,
    machine_model: MachineModel,
    nondet_methods: Vec<NondetMethod>,
    error_method: String,
    error_lines: OnceLock<Vec<usize>>,
    producer: String,
    work_dir: PathBuf,
    output_dir: PathBuf,
    signals: RunSignals,
}

impl Context {
    pub fn new(
        program: impl Into<PathBuf>,
        machine_model: MachineModel,
        nondet_methods: Vec<NondetMethod>,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            machine_model,
            nondet_methods,
            error_method: DEFAULT_ERROR_METHOD.to_string(),
            error_lines: OnceLock::new(),
            producer: "tbf".to_string(),
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
            signals: RunSignals::new(),
        }
    }

    pub fn with_error_method(mut self, error_method: impl Into<String>) -> Self {
        self.error_method = error_method.into();
        self
    }

    /// Name recorded as producer of synthesized witnesses.
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    pub fn with_signals(mut self, signals: RunSignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn machine_model(&self) -> &MachineModel {
        &self.machine_model
    }

    pub fn nondet_methods(&self) -> &[NondetMethod] {
        &self.nondet_methods
    }

    pub fn error_method(&self) -> &str {
        &self.error_method
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn signals(&self) -> &RunSignals {
        &self.signals
    }

    pub fn cancel(&self) -> &Latch {
        &self.signals.cancel
    }

    /// Path of `name` inside the work directory.
    pub fn work_file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.work_dir.join(name)
    }

    pub fn property_file(&self) -> PathBuf {
        self.work_file(PROPERTY_FILE_NAME)
    }

    pub fn property(&self) -> String {
        reach_property(&self.error_method)
    }

    /// Write the property file checkers are pointed at.
    pub fn write_property_file(&self) -> std::io::Result<PathBuf> {
        let path = self.property_file();
        std::fs::write(&path, format!("{}\n", self.property()))?;
        Ok(path)
    }

    /// Lines calling the error method, computed on first use.
    pub fn error_lines(&self) -> Result<&[usize], ParseError> {
        if let Some(lines) = self.error_lines.get() {
            return Ok(lines);
        }
        let lines = find_error_lines(&self.program, &self.error_method)?;
        Ok(self.error_lines.get_or_init(|| lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_names_the_error_method() {
        assert_eq!(
            reach_property("reach_error"),
            "CHECK( init(main()), LTL(G ! call(reach_error())) )"
        );
    }

    #[test]
    fn error_lines_are_cached_after_first_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("p.c");
        std::fs::write(
            &program,
            "extern void __VERIFIER_error(void);\nint main() {\n  __VERIFIER_error();\n}\n",
        )
        .unwrap();
        let ctx = Context::new(
            &program,
            MachineModel::LINUX_32,
            Vec::new(),
            dir.path(),
            dir.path(),
        );
        assert_eq!(ctx.error_lines().unwrap(), &[3]);
        std::fs::remove_file(&program).unwrap();
        assert_eq!(ctx.error_lines().unwrap(), &[3]);
    }

    #[test]
    fn property_file_lands_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(
            dir.path().join("p.c"),
            MachineModel::LINUX_64,
            Vec::new(),
            dir.path(),
            dir.path(),
        );
        let path = ctx.write_property_file().unwrap();
        assert_eq!(path, dir.path().join(PROPERTY_FILE_NAME));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("__VERIFIER_error()"));
    }
}

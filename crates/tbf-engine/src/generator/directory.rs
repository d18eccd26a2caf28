use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{collect_test_cases, GenerationOutcome, InputGenerator};
use crate::cancel::Latch;
use crate::error::GenerationError;
use crate::statistics::Statistics;
use crate::test_case::{TestCase, TestCaseFormat};

/// Serves test cases that already exist on disk; generating is a no-op.
#[derive(Debug, Clone)]
pub struct DirectoryGenerator {
    name: String,
    dir: PathBuf,
    extension: Option<String>,
    format: TestCaseFormat,
    supports_witnesses: bool,
}

impl DirectoryGenerator {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, format: TestCaseFormat) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            extension: None,
            format,
            supports_witnesses: true,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_witness_support(mut self, supports_witnesses: bool) -> Self {
        self.supports_witnesses = supports_witnesses;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl InputGenerator for DirectoryGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> TestCaseFormat {
        self.format
    }

    fn supports_witnesses(&self) -> bool {
        self.supports_witnesses
    }

    fn generate(&self, _program: &Path, _cancel: &Latch) -> Result<GenerationOutcome, GenerationError> {
        info!("Using existing test cases in {}", self.dir.display());
        let mut statistics = Statistics::new(format!("Input generator {}", self.name));
        statistics.add_value("Test directory", self.dir.display());
        Ok(GenerationOutcome {
            cancelled: false,
            statistics,
        })
    }

    fn test_cases(&self, visited: &HashSet<String>) -> Result<Vec<TestCase>, GenerationError> {
        collect_test_cases(&self.dir, self.extension.as_deref(), self.format, visited)
    }
}

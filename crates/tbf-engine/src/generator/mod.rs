//! Input generation backends.
//!
//! A generator runs on its own thread while the validator concurrently asks
//! it for the test cases produced so far, so implementations are shared
//! behind an `Arc` and must be `Send + Sync`.

mod command;
mod directory;

pub use command::CommandGenerator;
pub use directory::DirectoryGenerator;

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::cancel::Latch;
use crate::error::GenerationError;
use crate::statistics::Statistics;
use crate::test_case::{TestCase, TestCaseFormat};

/// How a generator's own run ended.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// The run was cut short by the cancellation latch.
    pub cancelled: bool,
    pub statistics: Statistics,
}

pub trait InputGenerator: Send + Sync {
    fn name(&self) -> &str;

    fn format(&self) -> TestCaseFormat;

    /// Whether the values of this generator's tests can be stated as witness
    /// assumptions. Generators with string-style inputs opt out.
    fn supports_witnesses(&self) -> bool {
        true
    }

    /// Produce test cases for `program` until done or `cancel` is raised.
    fn generate(&self, program: &Path, cancel: &Latch) -> Result<GenerationOutcome, GenerationError>;

    /// Test cases produced so far whose names are not in `visited`, in name
    /// order.
    fn test_cases(&self, visited: &HashSet<String>) -> Result<Vec<TestCase>, GenerationError>;
}

/// Files of `dir` ending in `extension` that are not yet `visited`, sorted
/// by name. A directory that does not exist yet holds no test cases.
pub(crate) fn collect_test_cases(
    dir: &Path,
    extension: Option<&str>,
    format: TestCaseFormat,
    visited: &HashSet<String>,
) -> Result<Vec<TestCase>, GenerationError> {
    let io_err = |source: std::io::Error| GenerationError::TestDirectory {
        path: dir.to_path_buf(),
        source,
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if extension.is_some_and(|ext| !name.ends_with(ext)) || visited.contains(&name) {
            continue;
        }
        paths.push((name, path));
    }
    paths.sort();

    let mut cases = Vec::with_capacity(paths.len());
    for (name, path) in paths {
        let content = std::fs::read(&path).map_err(io_err)?;
        cases.push(TestCase::new(name, path, content, format));
    }
    if !cases.is_empty() {
        debug!("Found {} new test cases in {}", cases.len(), dir.display());
    }
    Ok(cases)
}

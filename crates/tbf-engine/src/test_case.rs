use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::ConfigError;

/// Layout of the raw test data a generator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestCaseFormat {
    /// One textual value per line, in call order.
    #[default]
    Lines,
    /// KLEE `.ktest` container with named binary objects.
    Ktest,
}

impl TestCaseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestCaseFormat::Lines => "lines",
            TestCaseFormat::Ktest => "ktest",
        }
    }
}

impl fmt::Display for TestCaseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestCaseFormat {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lines" | "text" => Ok(TestCaseFormat::Lines),
            "ktest" => Ok(TestCaseFormat::Ktest),
            other => Err(ConfigError::UnknownTestFormat(other.into())),
        }
    }
}

/// One unit of raw input produced by a generator. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    name: String,
    origin: PathBuf,
    content: Vec<u8>,
    format: TestCaseFormat,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        origin: impl Into<PathBuf>,
        content: Vec<u8>,
        format: TestCaseFormat,
    ) -> Self {
        Self {
            name: name.into(),
            origin: origin.into(),
            content,
            format,
        }
    }

    /// Identifier, unique per generation run.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the raw generator output.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn format(&self) -> TestCaseFormat {
        self.format
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.origin.display())
    }
}

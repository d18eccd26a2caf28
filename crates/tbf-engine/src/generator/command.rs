use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use super::{collect_test_cases, GenerationOutcome, InputGenerator};
use crate::cancel::Latch;
use crate::error::GenerationError;
use crate::process::ToolCommand;
use crate::statistics::{Statistics, Stopwatch};
use crate::test_case::{TestCase, TestCaseFormat};

pub const PROGRAM_PLACEHOLDER: &str = "{program}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Runs an external test generator that writes one file per test case into
/// an output directory.
///
/// The command line may reference the program as `{program}` and the
/// output directory as `{output}`.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    name: String,
    command: Vec<String>,
    output_dir: PathBuf,
    extension: Option<String>,
    format: TestCaseFormat,
    timeout: Option<Duration>,
    supports_witnesses: bool,
}

impl CommandGenerator {
    pub fn new(
        name: impl Into<String>,
        command: Vec<String>,
        output_dir: impl Into<PathBuf>,
        format: TestCaseFormat,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            output_dir: output_dir.into(),
            extension: None,
            format,
            timeout: None,
            supports_witnesses: true,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Time limit of the generator itself; reaching it ends generation
    /// normally.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_witness_support(mut self, supports_witnesses: bool) -> Self {
        self.supports_witnesses = supports_witnesses;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn command_line(&self, program: &Path) -> Vec<String> {
        let program = program.display().to_string();
        let output = self.output_dir.display().to_string();
        self.command
            .iter()
            .map(|arg| {
                arg.replace(PROGRAM_PLACEHOLDER, &program)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

impl InputGenerator for CommandGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> TestCaseFormat {
        self.format
    }

    fn supports_witnesses(&self) -> bool {
        self.supports_witnesses
    }

    fn generate(&self, program: &Path, cancel: &Latch) -> Result<GenerationOutcome, GenerationError> {
        let mut cmd_line = self.command_line(program).into_iter();
        let Some(executable) = cmd_line.next() else {
            return Err(GenerationError::Failed {
                generator: self.name.clone(),
                message: "empty generator command".into(),
            });
        };
        std::fs::create_dir_all(&self.output_dir).map_err(|source| {
            GenerationError::TestDirectory {
                path: self.output_dir.clone(),
                source,
            }
        })?;

        let mut command = ToolCommand::new(executable).args(cmd_line);
        if let Some(timeout) = self.timeout {
            command = command.timeout(timeout);
        }

        let mut statistics = Statistics::new(format!("Input generator {}", self.name));
        let mut timer = Stopwatch::new();
        info!("Running input generator {}", self.name);
        let result = timer.time(|| command.run(Some(cancel)))?;
        statistics.add_value("Time for input generation", &timer);
        statistics.add_value("Generator return code", result.returncode);

        let produced = collect_test_cases(
            &self.output_dir,
            self.extension.as_deref(),
            self.format,
            &HashSet::new(),
        )
        .map(|cases| cases.len())
        .unwrap_or(0);
        statistics.add_value("Number of generated test cases", produced);

        if result.cancelled {
            info!("Input generator {} cancelled", self.name);
        } else if result.timed_out {
            info!("Input generator {} reached its time limit", self.name);
        } else if result.returncode != 0 {
            warn!(
                "Input generator {} exited with {}",
                self.name, result.returncode
            );
            let stderr = result.stderr_text();
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("exit code {}", result.returncode));
            return Err(GenerationError::Failed {
                generator: self.name.clone(),
                message,
            });
        }
        Ok(GenerationOutcome {
            cancelled: result.cancelled,
            statistics,
        })
    }

    fn test_cases(&self, visited: &HashSet<String>) -> Result<Vec<TestCase>, GenerationError> {
        collect_test_cases(
            &self.output_dir,
            self.extension.as_deref(),
            self.format,
            visited,
        )
    }
}

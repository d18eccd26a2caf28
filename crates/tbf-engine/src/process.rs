//! Bounded execution of external tools.
//!
//! Every compiler, harness and checker invocation goes through
//! [`ToolCommand::run`]. The child is polled every millisecond and killed
//! when its timeout elapses or the run's cancellation latch is raised.

use std::ffi::OsString;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::Latch;
use crate::error::ToolError;
use crate::timeout::{deadline_after, deadline_exceeded};

const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// How long output pipes may stay open after the tool itself ended.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Captured result of one tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code, or the negated signal number when killed by a signal.
    pub returncode: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        self.returncode == 0 && !self.timed_out && !self.cancelled
    }

    /// Signal number if the process was terminated by one.
    pub fn signal(&self) -> Option<i32> {
        (self.returncode < 0).then_some(-self.returncode)
    }

    /// Stderr lines followed by stdout lines, without a trailing empty line.
    pub fn output_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .stderr_text()
            .split('\n')
            .chain(self.stdout_text().split('\n'))
            .map(str::to_string)
            .collect();
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines
    }
}

/// Builder for one external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Apply `timeout` unless a limit was already set.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.timeout.get_or_insert(timeout);
        self
    }

    pub fn timeout_limit(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run to completion, timeout or cancellation.
    ///
    /// The tool runs in its own process group. On timeout or cancellation
    /// the whole group is killed, so wrapper scripts cannot leave children
    /// behind that keep the output pipes open.
    pub fn run(&self, cancel: Option<&Latch>) -> Result<ExecutionResult, ToolError> {
        debug!("Executing {self}");
        let program = self.program_name();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;
        let group = child.id();

        if let (Some(mut pipe), Some(input)) = (child.stdin.take(), self.stdin.clone()) {
            thread::spawn(move || {
                // A child that exits without reading its input closes the pipe.
                let _ = pipe.write_all(&input);
            });
        }
        let mut stdout_reader = OutputReader::spawn(child.stdout.take());
        let mut stderr_reader = OutputReader::spawn(child.stderr.take());

        let (status, timed_out, cancelled) = self
            .wait_bounded(&mut child, cancel)
            .map_err(|source| ToolError::Io {
                program: program.clone(),
                source,
            })?;

        let grace = Instant::now() + OUTPUT_GRACE;
        let mut stdout = stdout_reader.collect(grace);
        let mut stderr = stderr_reader.collect(grace);
        if stdout.is_none() || stderr.is_none() {
            debug!("Processes started by {program} still hold its output, killing them");
            kill_process_group(group);
            let grace = Instant::now() + OUTPUT_GRACE;
            stdout = stdout.or_else(|| stdout_reader.collect(grace));
            stderr = stderr.or_else(|| stderr_reader.collect(grace));
        }

        let result = ExecutionResult {
            returncode: exit_code(status),
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
            timed_out,
            cancelled,
        };
        debug!("{program} returned {}", result.returncode);
        Ok(result)
    }

    fn wait_bounded(
        &self,
        child: &mut Child,
        cancel: Option<&Latch>,
    ) -> std::io::Result<(ExitStatus, bool, bool)> {
        let deadline = deadline_after(self.timeout);
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok((status, false, false));
            }
            let timed_out = deadline_exceeded(deadline);
            let cancelled = cancel.is_some_and(Latch::is_raised);
            if timed_out || cancelled {
                if timed_out {
                    warn!("Timeout of {} exceeded, killing it", self.program_name());
                } else {
                    debug!("Run cancelled, killing {}", self.program_name());
                }
                kill_process_group(child.id());
                // The child may have exited between the poll and the kill.
                let _ = child.kill();
                let status = child.wait()?;
                return Ok((status, timed_out, cancelled && !timed_out));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Drains one output pipe on its own thread.
struct OutputReader(Option<Receiver<Vec<u8>>>);

impl OutputReader {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        OutputReader(pipe.map(|mut pipe| {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                let _ = tx.send(buf);
            });
            rx
        }))
    }

    /// Everything read once the pipe is closed, or `None` if it is still
    /// open at `deadline`.
    fn collect(&mut self, deadline: Instant) -> Option<Vec<u8>> {
        let Some(rx) = &self.0 else {
            return Some(Vec::new());
        };
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(buf) => {
                self.0 = None;
                Some(buf)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.0 = None;
                Some(Vec::new())
            }
        }
    }
}

#[cfg(unix)]
extern "C" {
    fn kill(pid: i32, sig: i32) -> i32;
}

/// Send SIGKILL to every process of the group led by `leader`.
#[cfg(unix)]
fn kill_process_group(leader: u32) {
    const SIGKILL: i32 = 9;
    let Ok(group) = i32::try_from(leader) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group
    // created for the tool by `process_group(0)`.
    unsafe {
        kill(-group, SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: u32) {}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_exit_code() {
        let result = ToolCommand::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 3"])
            .run(None)
            .unwrap();
        assert_eq!(result.returncode, 3);
        assert_eq!(result.stdout_text(), "out\n");
        assert_eq!(result.stderr_text(), "err\n");
        assert_eq!(result.output_lines(), vec!["err", "", "out"]);
        assert!(!result.success());
    }

    #[test]
    fn feeds_stdin() {
        let result = ToolCommand::new("cat")
            .stdin(b"5\n-3\n".to_vec())
            .run(None)
            .unwrap();
        assert_eq!(result.stdout, b"5\n-3\n");
        assert!(result.success());
    }

    #[test]
    fn kills_on_timeout() {
        let start = Instant::now();
        let result = ToolCommand::new("sleep")
            .arg("10")
            .timeout(Duration::from_millis(50))
            .run(None)
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.signal(), Some(9));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn raised_cancel_kills_the_child() {
        let cancel = Latch::new();
        cancel.raise();
        let result = ToolCommand::new("sleep").arg("10").run(Some(&cancel)).unwrap();
        assert!(result.cancelled);
        assert!(!result.timed_out);
    }

    #[test]
    fn timeout_kills_children_holding_the_output() {
        let start = Instant::now();
        let result = ToolCommand::new("sh")
            .args(["-c", "sleep 30; echo done"])
            .timeout(Duration::from_millis(100))
            .run(None)
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.stdout_text(), "");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancel_kills_children_holding_the_output() {
        let cancel = Latch::new();
        cancel.raise();
        let start = Instant::now();
        let result = ToolCommand::new("sh")
            .args(["-c", "sleep 30; echo done"])
            .run(Some(&cancel))
            .unwrap();
        assert!(result.cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn background_children_do_not_block_completion() {
        let start = Instant::now();
        let result = ToolCommand::new("sh")
            .args(["-c", "sleep 30 & echo started"])
            .run(None)
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_text(), "started\n");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn default_timeout_keeps_an_explicit_limit() {
        let explicit = ToolCommand::new("gcc")
            .timeout(Duration::from_secs(2))
            .default_timeout(Duration::from_secs(60));
        assert_eq!(explicit.timeout_limit(), Some(Duration::from_secs(2)));
        let defaulted = ToolCommand::new("gcc").default_timeout(Duration::from_secs(60));
        assert_eq!(defaulted.timeout_limit(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = ToolCommand::new("/nonexistent/tbf-tool").run(None).unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn environment_and_directory_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let result = ToolCommand::new("sh")
            .args(["-c", "echo $KTEST_FILE; pwd"])
            .env("KTEST_FILE", "/tmp/t.ktest")
            .current_dir(dir.path())
            .run(None)
            .unwrap();
        let text = result.stdout_text();
        assert!(text.starts_with("/tmp/t.ktest\n"));
        let pwd = std::fs::canonicalize(dir.path()).unwrap();
        assert!(text.contains(pwd.to_str().unwrap()));
    }
}

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{LineSink, NullSink};

const STREAM_TAIL_LINES: usize = 20;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {}: {message}", describe_code(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        message: String,
    },
    #[error("{program} did not finish within {}s and was stopped", .limit.as_secs_f64())]
    Timeout { program: String, limit: Duration },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Collect stdout and stderr separately and return them in [`ExitResult`].
    Capture,
    /// Deliver stdout and stderr lines to the caller's sink as they arrive.
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub deadline: Option<Duration>,
    pub output: OutputMode,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            deadline: None,
            output: OutputMode::Capture,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.output = OutputMode::Stream;
        self
    }

    pub fn display_program(&self) -> String {
        self.program.display().to_string()
    }

    /// Args rendered lossily, used for logging and test assertions.
    pub fn display_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitResult {
    pub program: String,
    pub code: Option<i32>,
    pub success: bool,
    /// Empty in streaming mode.
    pub stdout: String,
    /// Empty in streaming mode.
    pub stderr: String,
    /// Last lines seen in streaming mode, kept for error reporting.
    pub tail: Vec<String>,
}

impl ExitResult {
    /// Converts a non-zero exit into [`ProcessError::Exit`] carrying the
    /// process's own diagnostic text.
    pub fn check(self) -> Result<Self, ProcessError> {
        if self.success {
            return Ok(self);
        }
        Err(ProcessError::Exit {
            program: self.program.clone(),
            code: self.code,
            message: self.diagnostic_text(),
        })
    }

    pub fn diagnostic_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        if !self.tail.is_empty() {
            return self.tail.join("\n");
        }
        self.stdout.trim().to_string()
    }
}

/// Seam between the package operations and real subprocesses.
pub trait CommandRunner {
    /// Runs `invocation` to completion. A non-zero exit is reported inside
    /// the returned [`ExitResult`]; use [`ExitResult::check`] to make it fatal.
    fn run(
        &self,
        invocation: &Invocation,
        sink: &mut dyn LineSink,
    ) -> Result<ExitResult, ProcessError>;

    fn run_captured(&self, invocation: &Invocation) -> Result<ExitResult, ProcessError> {
        self.run(invocation, &mut NullSink)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(
        &self,
        invocation: &Invocation,
        sink: &mut dyn LineSink,
    ) -> Result<ExitResult, ProcessError> {
        (**self).run(invocation, sink)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        invocation: &Invocation,
        sink: &mut dyn LineSink,
    ) -> Result<ExitResult, ProcessError> {
        run_process(invocation, sink)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Stdout,
    Stderr,
}

pub fn run_process(
    invocation: &Invocation,
    sink: &mut dyn LineSink,
) -> Result<ExitResult, ProcessError> {
    let program = invocation.display_program();
    let mut command = build_command(invocation);
    debug!(
        program = %program,
        args = ?invocation.display_args(),
        mode = ?invocation.output,
        "spawning process"
    );

    let mut child = command.spawn().map_err(|source| ProcessError::Launch {
        program: program.clone(),
        source,
    })?;

    let (tx, rx) = mpsc::channel::<(Channel, String)>();
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, Channel::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, Channel::Stderr, tx.clone());
    }
    drop(tx);

    let started = Instant::now();
    let mut result = ExitResult {
        program: program.clone(),
        ..ExitResult::default()
    };
    let mut tail = VecDeque::with_capacity(STREAM_TAIL_LINES);
    let mut seq = 0_u64;

    loop {
        let received = match invocation.deadline {
            Some(limit) => match limit.checked_sub(started.elapsed()) {
                Some(remaining) => rx.recv_timeout(remaining),
                None => Err(RecvTimeoutError::Timeout),
            },
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok((channel, line)) => match invocation.output {
                OutputMode::Capture => {
                    let buffer = match channel {
                        Channel::Stdout => &mut result.stdout,
                        Channel::Stderr => &mut result.stderr,
                    };
                    buffer.push_str(&line);
                    buffer.push('\n');
                }
                OutputMode::Stream => {
                    seq += 1;
                    sink.line(seq, &line);
                    if tail.len() == STREAM_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                return Err(stop_for_timeout(&mut child, &program, invocation.deadline));
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = wait_for_exit(&mut child, &program, started, invocation.deadline)?;
    result.code = status.code();
    result.success = status.success();
    result.tail = tail.into_iter().collect();
    debug!(program = %program, code = ?result.code, "process finished");
    Ok(result)
}

fn build_command(invocation: &Invocation) -> Command {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &invocation.working_dir {
        command.current_dir(dir);
    }
    command
}

fn spawn_line_reader<R>(pipe: R, channel: Channel, tx: mpsc::Sender<(Channel, String)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.send((channel, line)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(?channel, error = %err, "stopped reading process output");
                    break;
                }
            }
        }
    });
}

fn wait_for_exit(
    child: &mut Child,
    program: &str,
    started: Instant,
    deadline: Option<Duration>,
) -> Result<ExitStatus, ProcessError> {
    let Some(limit) = deadline else {
        return child.wait().map_err(|source| ProcessError::Wait {
            program: program.to_string(),
            source,
        });
    };

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if started.elapsed() >= limit {
                    return Err(stop_for_timeout(child, program, deadline));
                }
                thread::sleep(EXIT_POLL_INTERVAL);
            }
            Err(source) => {
                return Err(ProcessError::Wait {
                    program: program.to_string(),
                    source,
                });
            }
        }
    }
}

fn stop_for_timeout(child: &mut Child, program: &str, deadline: Option<Duration>) -> ProcessError {
    if let Err(err) = child.kill() {
        warn!(program, error = %err, "failed to stop timed out process");
    }
    let _ = child.wait();
    ProcessError::Timeout {
        program: program.to_string(),
        limit: deadline.unwrap_or_default(),
    }
}

/// Resolves an executable inside `root`, trying each relative candidate in order.
pub fn first_existing(root: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|candidate| root.join(candidate))
        .find(|path| path.is_file())
}

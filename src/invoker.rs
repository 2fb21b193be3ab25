use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

const REJECTION_MARKERS: &[&str] = &[
    "unrecognized arguments",
    "unrecognized option",
    "unknown option",
    "invalid choice",
    "expected one argument",
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandLine {
    verb: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Splits a configured command string with shell quoting rules.
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let words = shlex::split(line)
            .ok_or_else(|| anyhow::anyhow!("malformed quoting in command: {line}"))?;
        let mut words = words.into_iter();
        let verb = words.next().ok_or_else(|| anyhow::anyhow!("empty command"))?;
        Ok(Self {
            verb,
            args: words.collect(),
        })
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.verb.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.verb.as_str()).chain(self.args.iter().map(String::as_str));
        match shlex::try_join(words.clone()) {
            Ok(joined) => f.write_str(&joined),
            // only reachable with NUL bytes in an argument
            Err(_) => f.write_str(&words.collect::<Vec<_>>().join(" ")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlagSpelling {
    /// `--format json`
    Spaced,
    /// `--format=json`
    Joined,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StructuredFlag {
    pub name: String,
    pub value: String,
}

impl Default for StructuredFlag {
    fn default() -> Self {
        Self {
            name: "--format".to_string(),
            value: "json".to_string(),
        }
    }
}

impl StructuredFlag {
    pub fn is_present(&self, command: &CommandLine) -> bool {
        let joined_prefix = format!("{}=", self.name);
        command
            .args
            .iter()
            .any(|arg| *arg == self.name || arg.starts_with(&joined_prefix))
    }

    /// Adds the flag right after the verb so the tool cannot take it for an
    /// identifier.
    pub fn apply(&self, command: &CommandLine, spelling: FlagSpelling) -> CommandLine {
        if self.is_present(command) {
            return command.clone();
        }
        let mut args = match spelling {
            FlagSpelling::Spaced => vec![self.name.clone(), self.value.clone()],
            FlagSpelling::Joined => vec![format!("{}={}", self.name, self.value)],
        };
        args.extend(command.args.iter().cloned());
        CommandLine {
            verb: command.verb.clone(),
            args,
        }
    }

    /// Recognises the tool complaining about the flag's form rather than the command.
    pub fn is_rejection(&self, message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        lower.contains(&self.name.to_ascii_lowercase())
            && REJECTION_MARKERS.iter().any(|marker| lower.contains(marker))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawRun {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl RawRun {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.exit_code == Some(0)
    }
}

/// Executes one tool invocation. `argv` starts with the verb.
pub trait ProcessRunner {
    fn run(&self, argv: &[String]) -> io::Result<RawRun>;
}

pub struct SystemRunner {
    program: PathBuf,
    base_args: Vec<String>,
    timeout: Option<Duration>,
    cancel: Option<CancelFlag>,
}

impl SystemRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            timeout: None,
            cancel: None,
        }
    }

    pub fn with_base_args(mut self, base_args: Vec<String>) -> Self {
        self.base_args = base_args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> io::Result<RawRun> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own process group, so a kill also reaches helpers a wrapper script started
            command.process_group(0);
        }
        let mut child = command.spawn()?;
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let started = Instant::now();
        let mut timed_out = false;
        let mut cancelled = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                cancelled = true;
                break None;
            }
            if self
                .timeout
                .is_some_and(|limit| started.elapsed() >= limit)
            {
                timed_out = true;
                break None;
            }
            thread::sleep(POLL_INTERVAL);
        };
        if status.is_none() {
            warn!(
                program = %self.program.display(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                timed_out,
                "terminating admin tool"
            );
            terminate(&mut child);
        }

        Ok(RawRun {
            exit_code: status.and_then(|status| status.code()),
            stdout: collect(stdout_reader),
            stderr: collect(stderr_reader),
            timed_out,
            cancelled,
        })
    }
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: killpg has no memory effects; the group was created at spawn
            // and is led by a child we have not reaped yet.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> Option<JoinHandle<String>> {
    source.map(|mut source| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = source.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Tool output decoded once at the invocation boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    StructuredList(Vec<Value>),
    StructuredSingle(Map<String, Value>),
    TextLines(Vec<String>),
}

impl ToolOutput {
    /// Decodes `stdout`; when structured output was expected but does not
    /// parse, the error is returned alongside the text fallback.
    pub fn decode(stdout: &str, structured: bool) -> (Self, Option<String>) {
        let lines = split_lines(stdout);
        if !structured || stdout.trim().is_empty() {
            return (ToolOutput::TextLines(lines), None);
        }
        match serde_json::from_str::<Value>(stdout.trim()) {
            Ok(Value::Array(items)) => (ToolOutput::StructuredList(items), None),
            Ok(Value::Object(map)) => (ToolOutput::StructuredSingle(map), None),
            Ok(other) => (
                ToolOutput::TextLines(lines),
                Some(format!("expected a JSON array or object, got {other}")),
            ),
            Err(err) => (ToolOutput::TextLines(lines), Some(err.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ToolOutput::StructuredList(items) => items.is_empty(),
            ToolOutput::StructuredSingle(map) => map.is_empty(),
            ToolOutput::TextLines(lines) => lines.iter().all(|line| line.trim().is_empty()),
        }
    }
}

fn split_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

#[derive(Clone, Debug)]
pub struct Invocation {
    pub output: ToolOutput,
    pub raw_lines: Vec<String>,
    pub exit_code: i32,
    pub stderr: String,
    pub attempts: usize,
}

#[derive(Debug)]
pub enum InvokeError {
    Launch(io::Error),
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    TimedOut,
    Cancelled,
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Launch(err) => write!(f, "failed to launch admin tool: {err}"),
            InvokeError::Failed { exit_code, stderr } => {
                match exit_code {
                    Some(code) => write!(f, "admin tool exited with status {code}")?,
                    None => write!(f, "admin tool was terminated by a signal")?,
                }
                let detail = stderr.trim();
                if !detail.is_empty() {
                    write!(f, ": {}", first_line(detail))?;
                }
                Ok(())
            }
            InvokeError::TimedOut => write!(f, "admin tool timed out"),
            InvokeError::Cancelled => write!(f, "admin tool call cancelled"),
        }
    }
}

impl std::error::Error for InvokeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvokeError::Launch(err) => Some(err),
            _ => None,
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

pub struct Invoker {
    runner: Box<dyn ProcessRunner>,
    flag: StructuredFlag,
}

impl Invoker {
    pub fn new(runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            flag: StructuredFlag::default(),
        }
    }

    pub fn with_flag(mut self, flag: StructuredFlag) -> Self {
        self.flag = flag;
        self
    }

    pub fn flag(&self) -> &StructuredFlag {
        &self.flag
    }

    pub fn invoke(
        &self,
        command: &CommandLine,
        want_structured: bool,
    ) -> Result<Invocation, InvokeError> {
        let inserted = want_structured && !self.flag.is_present(command);
        let structured = want_structured || self.flag.is_present(command);
        let first = if inserted {
            self.flag.apply(command, FlagSpelling::Spaced)
        } else {
            command.clone()
        };

        let mut attempts = 1;
        let mut raw = self.execute(&first)?;
        if inserted
            && !raw.success()
            && !raw.timed_out
            && !raw.cancelled
            && (self.flag.is_rejection(&raw.stderr) || self.flag.is_rejection(&raw.stdout))
        {
            let retry = self.flag.apply(command, FlagSpelling::Joined);
            info!(command = %retry, "admin tool rejected the format flag; retrying with joined spelling");
            attempts += 1;
            raw = self.execute(&retry)?;
        }

        if raw.cancelled {
            return Err(InvokeError::Cancelled);
        }
        if raw.timed_out {
            warn!(command = %command, "admin tool timed out");
            return Err(InvokeError::TimedOut);
        }
        if raw.exit_code != Some(0) {
            warn!(
                command = %command,
                exit_code = ?raw.exit_code,
                stderr = %raw.stderr.trim(),
                "admin tool command failed"
            );
            return Err(InvokeError::Failed {
                exit_code: raw.exit_code,
                stderr: raw.stderr,
            });
        }
        if !raw.stderr.trim().is_empty() {
            debug!(command = %command, stderr = %raw.stderr.trim(), "admin tool stderr");
        }

        let (output, parse_error) = ToolOutput::decode(&raw.stdout, structured);
        if let Some(err) = parse_error {
            warn!(command = %command, error = %err, "structured output did not parse; using raw lines");
        }
        Ok(Invocation {
            output,
            raw_lines: split_lines(&raw.stdout),
            exit_code: 0,
            stderr: raw.stderr,
            attempts,
        })
    }

    fn execute(&self, command: &CommandLine) -> Result<RawRun, InvokeError> {
        debug!(command = %command, "invoking admin tool");
        self.runner
            .run(&command.to_argv())
            .map_err(InvokeError::Launch)
    }
}

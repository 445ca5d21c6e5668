//! Purpose: Run one request against a child process and return its aggregate outcome.
//! Exports: `Caller`, `CallOptions`.
//! Role: Caller-side bridge; resolve, spawn, write request, wait, decode, aggregate.
//! Invariants: `call` never returns an error; every failure lands in the result.
//! Invariants: The child is always reaped before `call` returns.
//! Invariants: A non-zero exit fails the call even if valid lines were printed.
//! Invariants: With a timeout the child leads its own process group, killed as a whole.
//! Notes: Without a timeout the wait is unbounded, matching a plain blocking call.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::aggregate::{AggregateResult, aggregate};
use crate::core::error::{Error, ErrorKind};
use crate::core::launch::{LaunchSpec, resolve};
use crate::core::wire::{Request, decode_response_lines, encode_line, generate_key};

const RESOLVE_WARNING: &str = "Warning: targeted file not found or can't be executed, consider checking file informations and language dependencies.";
const TARGET_WARNING: &str =
    "Warning: these kind of errors result from an error in the targeted script.";
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CallOptions {
    /// Exactly one output expected.
    pub is_unique: bool,
    /// Zero outputs is not an error.
    pub optional_output: bool,
    /// Kill the child once this elapses; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            is_unique: true,
            optional_output: true,
            timeout: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Caller {
    options: CallOptions,
}

struct Captured {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Caller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_unique(mut self, is_unique: bool) -> Self {
        self.options.is_unique = is_unique;
        self
    }

    pub fn with_optional_output(mut self, optional_output: bool) -> Self {
        self.options.optional_output = optional_output;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn options(&self) -> CallOptions {
        self.options
    }

    /// Run `file` under `language` with `data` as the request payload.
    pub fn call<T: Serialize + ?Sized>(
        &self,
        language: &str,
        file: &str,
        data: &T,
    ) -> AggregateResult {
        let CallOptions {
            is_unique,
            optional_output,
            ..
        } = self.options;

        match self.try_call(language, file, data) {
            Ok(result) => result,
            Err(err) if err.kind().is_resolve() => AggregateResult::failure(
                is_unique,
                optional_output,
                format!("Error: {err}"),
                Some(RESOLVE_WARNING),
            ),
            Err(err) if err.kind() == ErrorKind::Timeout => {
                tracing::warn!(error = %err, "child timed out and was killed");
                AggregateResult::failure(
                    is_unique,
                    optional_output,
                    format!("Error: {err}"),
                    Some(TARGET_WARNING),
                )
            }
            Err(err) => {
                tracing::warn!(error = %err, "call failed before the child produced a result");
                AggregateResult::failure(
                    is_unique,
                    optional_output,
                    format!("Unexpected error: {}", error_detail(&err)),
                    None,
                )
            }
        }
    }

    fn try_call<T: Serialize + ?Sized>(
        &self,
        language: &str,
        file: &str,
        data: &T,
    ) -> Result<AggregateResult, Error> {
        let key = generate_key()?;
        let spec = resolve(language, file)?;
        let data = serde_json::to_value(data).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("request data is not serializable")
                .with_source(err)
        })?;
        let request = Request {
            key: key.clone(),
            optional_output: self.options.optional_output,
            is_unique: self.options.is_unique,
            data,
        };
        let payload = encode_line(&request)?;

        let captured = run_child(&spec, payload, self.options.timeout)?;
        Ok(self.interpret(&key, captured))
    }

    fn interpret(&self, key: &str, captured: Captured) -> AggregateResult {
        let CallOptions {
            is_unique,
            optional_output,
            ..
        } = self.options;
        let status = captured.status;

        if !status.success() {
            let mut result = AggregateResult::failure(
                is_unique,
                optional_output,
                exit_message(status),
                Some(TARGET_WARNING),
            );
            let stderr = String::from_utf8_lossy(&captured.stderr);
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                result.errors.push(format!("stderr: {stderr}"));
            }
            return result;
        }

        let accepted = decode_response_lines(&captured.stdout, key);
        tracing::debug!(lines = accepted.len(), "decoded response lines");
        aggregate(accepted, is_unique, optional_output)
    }
}

fn run_child(
    spec: &LaunchSpec,
    payload: Vec<u8>,
    timeout: Option<Duration>,
) -> Result<Captured, Error> {
    tracing::debug!(argv = ?spec.argv, "spawning child");
    let mut command = spec.command();
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if timeout.is_some() {
        // Grandchildren (`go run`, shell wrappers) hold the pipes too.
        own_process_group(&mut command);
    }
    let mut child = command.spawn().map_err(|err| {
        Error::new(ErrorKind::ChildProcess)
            .with_message(format!("failed to start process `{}`", spec.program()))
            .with_source(err)
    })?;

    // Writer and readers run concurrently so a chatty child cannot stall on a full pipe.
    let writer = child.stdin.take().map(|mut stdin| {
        thread::spawn(move || {
            // Dropping `stdin` at the end of this closure signals end-of-input.
            if let Err(err) = stdin.write_all(&payload) {
                tracing::debug!(error = %err, "child closed stdin before reading the request");
            }
        })
    });
    let stdout = child.stdout.take().map(spawn_drain);
    let stderr = child.stderr.take().map(spawn_drain);

    let status = match timeout {
        None => child.wait().map_err(wait_error),
        Some(limit) => wait_with_deadline(&mut child, limit),
    };

    if let Some(writer) = writer
        && writer.join().is_err()
    {
        tracing::warn!("request writer panicked");
    }
    let status = status?;
    Ok(Captured {
        status,
        stdout: join_drain(stdout)?,
        stderr: join_drain(stderr)?,
    })
}

/// Poll until exit; past `limit`, kill the child's group and fail with `Timeout`.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<ExitStatus, Error> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().map_err(wait_error)? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            if let Err(err) = kill_group(child) {
                tracing::debug!(error = %err, "kill after timeout failed");
            }
            child.wait().map_err(wait_error)?;
            return Err(Error::new(ErrorKind::Timeout)
                .with_message(format!("Process timed out after {} ms", limit.as_millis())));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn kill_group(child: &mut Child) -> io::Result<()> {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return child.kill();
    };
    // SAFETY: the child is unreaped, so its pid still names the group it leads.
    if unsafe { libc::kill(-pid, libc::SIGKILL) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn spawn_drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_drain(handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<Vec<u8>, Error> {
    let Some(handle) = handle else {
        return Ok(Vec::new());
    };
    let bytes = handle
        .join()
        .map_err(|_| Error::new(ErrorKind::Internal).with_message("output reader panicked"))?;
    bytes.map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read child output")
            .with_source(err)
    })
}

fn wait_error(err: io::Error) -> Error {
    Error::new(ErrorKind::ChildProcess)
        .with_message("failed to wait for child process")
        .with_source(err)
}

fn exit_message(status: ExitStatus) -> String {
    match exit_code(status) {
        Some(code) => format!("Process exited with code {code}"),
        None => format!("Process exited abnormally ({status})"),
    }
}

/// Signal deaths map to the negated signal number.
#[cfg(unix)]
fn exit_code(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;

    status.code().or_else(|| status.signal().map(|signal| -signal))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code()
}

fn error_detail(err: &Error) -> String {
    match std::error::Error::source(err) {
        Some(source) => format!("{err}: {source}"),
        None => err.to_string(),
    }
}

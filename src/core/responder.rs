//! Purpose: Callee-side bridge; read the one request and emit response lines.
//! Exports: `Responder`, `ResponderState`, `ProtocolChannel`, `StdoutChannel`.
//! Role: Owned per-process responder with an explicit emission state machine.
//! Invariants: The protocol channel carries nothing but encoded response lines.
//! Invariants: At most one stdin-backed responder is constructed per process.
//! Invariants: A fault (uninitialized emit or malformed request) is reported exactly once.
//! Invariants: Excess emissions under `isUnique=true` are still written, flagged as failures.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::wire::{Request, ResponseLine, decode_request, encode_line};

static STDIN_RESPONDER_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Destination for encoded response lines.
pub trait ProtocolChannel {
    /// Write one complete line (terminator included) and flush it.
    fn write_line(&mut self, line: &[u8]) -> io::Result<()>;
}

impl ProtocolChannel for Vec<u8> {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.extend_from_slice(line);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponderState {
    Uninitialized,
    Initialized,
    EmittedOnce,
    EmittedMany,
    FaultReported,
}

pub struct Responder<C: ProtocolChannel> {
    channel: C,
    state: ResponderState,
    request: Option<Request>,
    fault: Option<ErrorKind>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Responder<StdoutChannel> {
    /// Claim this process's responder, hide stdout, and read the request from stdin.
    pub fn init_from_stdin() -> Result<Self, Error> {
        if STDIN_RESPONDER_CLAIMED.swap(true, Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::AlreadyInitialized)
                .with_message("responder was already initialized in this process")
                .with_hint("Construct the responder once at program entry and pass it around."));
        }
        let channel = StdoutChannel::install()?;
        let mut responder = Responder::new(channel);
        responder.init(io::stdin().lock())?;
        Ok(responder)
    }

    /// Clear accumulators and hand stdout back to the program.
    pub fn finish(mut self) -> Result<(), Error> {
        self.errors.clear();
        self.warnings.clear();
        self.channel.restore().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to restore stdout")
                .with_source(err)
        })
    }
}

impl<C: ProtocolChannel> Responder<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            state: ResponderState::Uninitialized,
            request: None,
            fault: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Kind of the fault reported on the channel, if any.
    pub fn fault(&self) -> Option<ErrorKind> {
        self.fault
    }

    /// Request payload; `Null` until initialized.
    pub fn data(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.request.as_ref().map(|r| &r.data).unwrap_or(&NULL)
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        T::deserialize(self.data()).map_err(|err| {
            Error::new(ErrorKind::MalformedRequest)
                .with_message(format!("request data has an unexpected shape: {err}"))
                .with_source(err)
        })
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Carried on every later response line.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Read the whole request from `reader` and expose its payload.
    pub fn init<R: Read>(&mut self, mut reader: R) -> Result<&Value, Error> {
        if self.state != ResponderState::Uninitialized {
            return Err(Error::new(ErrorKind::AlreadyInitialized)
                .with_message("responder was already initialized"));
        }

        let mut input = Vec::new();
        let decoded = match reader.read_to_end(&mut input) {
            Ok(_) => decode_request(&input),
            Err(err) => Err(Error::new(ErrorKind::MalformedRequest)
                .with_message("failed to read request from stdin")
                .with_source(err)),
        };

        let request = match decoded {
            Ok(request) => request,
            Err(err) => {
                self.report_fault(&err)?;
                return Err(err);
            }
        };

        tracing::debug!(
            key = %request.key,
            is_unique = request.is_unique,
            optional_output = request.optional_output,
            "responder initialized"
        );
        self.errors.clear();
        self.warnings.clear();
        self.state = ResponderState::Initialized;
        Ok(&self.request.insert(request).data)
    }

    /// Write one response line carrying `value`.
    ///
    /// Protocol faults are reported on the channel rather than returned; the
    /// error path is reserved for encoding and I/O failures.
    pub fn emit<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let data = serde_json::to_value(value).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("emitted value is not serializable")
                .with_source(err)
        })?;
        self.respond(data, None)
    }

    /// Write one failed response line with no data; `message` joins the errors.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), Error> {
        self.respond(Value::Null, Some(message.into()))
    }

    fn respond(&mut self, data: Value, failure: Option<String>) -> Result<(), Error> {
        if self.state == ResponderState::FaultReported {
            return Ok(());
        }
        let Some(request) = self.request.as_ref() else {
            let err = Error::new(ErrorKind::NotInitialized)
                .with_message("responder isn't initialized.");
            return self.report_fault(&err);
        };
        let key = request.key.clone();
        let is_unique = request.is_unique;
        let optional_output = request.optional_output;

        let permitted = self.state == ResponderState::Initialized || !is_unique;
        if !permitted {
            tracing::warn!(state = ?self.state, "emission exceeds isUnique contract");
            self.errors
                .push(format!("Error: outputs out of bound (isUnique: {is_unique})."));
        }
        let succeeded = permitted && failure.is_none();
        self.errors.extend(failure);

        let line = ResponseLine {
            key: Some(key),
            request_status: succeeded,
            data,
            optional_output: Some(optional_output),
            is_unique: Some(is_unique),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
        };
        self.write(&line)?;

        self.state = match self.state {
            ResponderState::Initialized => ResponderState::EmittedOnce,
            _ => ResponderState::EmittedMany,
        };
        Ok(())
    }

    fn report_fault(&mut self, err: &Error) -> Result<(), Error> {
        tracing::warn!(error = %err, "responder fault");
        self.errors.push(format!("Error: {err}"));
        let line = ResponseLine {
            key: None,
            request_status: false,
            data: Value::Null,
            optional_output: self.request.as_ref().map(|r| r.optional_output),
            is_unique: None,
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
        };
        self.state = ResponderState::FaultReported;
        self.fault = Some(err.kind());
        self.write(&line)
    }

    fn write(&mut self, line: &ResponseLine) -> Result<(), Error> {
        let encoded = encode_line(line)?;
        self.channel.write_line(&encoded).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write response line")
                .with_source(err)
        })
    }
}

/// The process's real stdout, hidden behind a capture sink between protocol writes.
///
/// While installed, file descriptor 1 points at an anonymous temp file, so
/// `println!` from the program (or from C code it links) lands in the sink.
/// Each protocol write swaps the real descriptor back in for one line.
#[cfg(unix)]
pub struct StdoutChannel {
    real: std::os::fd::OwnedFd,
    sink: std::fs::File,
    redirected: bool,
}

#[cfg(unix)]
impl StdoutChannel {
    pub fn install() -> Result<Self, Error> {
        use std::os::fd::FromRawFd;

        io::stdout().flush().map_err(install_error)?;
        // SAFETY: dup on a descriptor the process owns; the result is checked below.
        let fd = unsafe { libc::dup(libc::STDOUT_FILENO) };
        if fd < 0 {
            return Err(install_error(io::Error::last_os_error()));
        }
        // SAFETY: `fd` is a freshly duplicated descriptor that nothing else owns.
        let real = unsafe { std::os::fd::OwnedFd::from_raw_fd(fd) };
        let sink = tempfile::tempfile().map_err(install_error)?;
        let mut channel = Self {
            real,
            sink,
            redirected: false,
        };
        channel.redirect().map_err(install_error)?;
        Ok(channel)
    }

    /// Bytes the program printed to stdout since install.
    pub fn discarded(&self) -> io::Result<Vec<u8>> {
        use std::io::Seek;

        io::stdout().flush()?;
        let mut sink = self.sink.try_clone()?;
        sink.rewind()?;
        let mut out = Vec::new();
        sink.read_to_end(&mut out)?;
        Ok(out)
    }

    fn redirect(&mut self) -> io::Result<()> {
        use std::os::fd::AsRawFd;

        io::stdout().flush()?;
        dup2(self.sink.as_raw_fd(), libc::STDOUT_FILENO)?;
        self.redirected = true;
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        use std::os::fd::AsRawFd;

        if !self.redirected {
            return Ok(());
        }
        io::stdout().flush()?;
        dup2(self.real.as_raw_fd(), libc::STDOUT_FILENO)?;
        self.redirected = false;
        Ok(())
    }
}

#[cfg(unix)]
fn dup2(from: libc::c_int, to: libc::c_int) -> io::Result<()> {
    // SAFETY: both descriptors stay open for the lifetime of the channel.
    if unsafe { libc::dup2(from, to) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
impl ProtocolChannel for StdoutChannel {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        // Locked before the swap so other threads' prints stay in the sink.
        let mut out = io::stdout().lock();
        let scope = RealStdout::acquire(self)?;
        out.write_all(line)?;
        out.flush()?;
        scope.release()
    }
}

#[cfg(unix)]
impl Drop for StdoutChannel {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            tracing::warn!(error = %err, "failed to restore stdout");
        }
    }
}

/// Real stdout is live only while this guard exists.
#[cfg(unix)]
struct RealStdout<'a> {
    channel: &'a mut StdoutChannel,
    released: bool,
}

#[cfg(unix)]
impl<'a> RealStdout<'a> {
    fn acquire(channel: &'a mut StdoutChannel) -> io::Result<Self> {
        channel.restore()?;
        Ok(Self {
            channel,
            released: false,
        })
    }

    fn release(mut self) -> io::Result<()> {
        self.released = true;
        self.channel.redirect()
    }
}

#[cfg(unix)]
impl Drop for RealStdout<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.channel.redirect() {
            tracing::warn!(error = %err, "failed to re-hide stdout");
        }
    }
}

#[cfg(not(unix))]
pub struct StdoutChannel;

#[cfg(not(unix))]
impl StdoutChannel {
    pub fn install() -> Result<Self, Error> {
        tracing::debug!("stdout capture is unavailable on this platform");
        Ok(Self)
    }

    pub fn discarded(&self) -> io::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn restore(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(not(unix))]
impl ProtocolChannel for StdoutChannel {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(line)?;
        out.flush()
    }
}

fn install_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to redirect stdout")
        .with_source(err)
}

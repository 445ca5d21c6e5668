//! Purpose: Define the single error type shared by resolver, bridges, and CLI.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Builder-style error carrying kind, human message, and optional context.
//! Invariants: `Display` renders the human message alone so callers can prefix it.
//! Invariants: Exit code mapping is stable once published; kinds are additive-only.
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    InvalidExtension,
    FileNotFound,
    NotAFile,
    PermissionDenied,
    UnsupportedLanguage,
    ChildProcess,
    Timeout,
    MalformedResponse,
    ProtocolViolation,
    NotInitialized,
    MalformedRequest,
    AlreadyInitialized,
    Io,
}

impl ErrorKind {
    /// True for the failures the launch resolver can raise.
    pub fn is_resolve(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidExtension
                | ErrorKind::FileNotFound
                | ErrorKind::NotAFile
                | ErrorKind::PermissionDenied
                | ErrorKind::UnsupportedLanguage
        )
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::InvalidExtension => 3,
        ErrorKind::FileNotFound => 4,
        ErrorKind::NotAFile => 5,
        ErrorKind::PermissionDenied => 6,
        ErrorKind::UnsupportedLanguage => 7,
        ErrorKind::ChildProcess => 8,
        ErrorKind::Timeout => 9,
        ErrorKind::MalformedResponse => 10,
        ErrorKind::ProtocolViolation => 11,
        ErrorKind::NotInitialized => 12,
        ErrorKind::MalformedRequest => 13,
        ErrorKind::AlreadyInitialized => 14,
        ErrorKind::Io => 15,
    }
}

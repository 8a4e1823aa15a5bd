use std::fmt;

use failure::Backtrace;
use failure::Context;
use failure::Fail;
use slog::Key;
use slog::Record;
use slog::Serializer;
use slog::KV;

use super::backend::ClientError;

/// Error information returned by the crate API in case of errors.
#[derive(Debug)]
pub struct Error(Context<ErrorKind>);

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.0.get_context().clone()
    }

    /// Build an error for a failed coordination store operation.
    ///
    /// Connection loss and session expiry map to `ErrorKind::BackendTransient`,
    /// everything else to `ErrorKind::Backend`.
    pub(crate) fn backend(operation: &'static str, error: ClientError) -> Error {
        let kind = if error.is_transient() {
            ErrorKind::BackendTransient(operation)
        } else {
            ErrorKind::Backend(operation)
        };
        Error(error.context(kind))
    }

    /// Check if the error reports missing services, instances or paths.
    pub fn is_not_found(&self) -> bool {
        matches!(self.0.get_context(), ErrorKind::NotFound(_))
    }

    /// Check if the error was caused by a temporary loss of the coordinator.
    pub fn is_transient(&self) -> bool {
        matches!(self.0.get_context(), ErrorKind::BackendTransient(_))
    }

    /// Check if the error was caused by an operation running out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self.0.get_context(), ErrorKind::Timeout(_))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error(inner)
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.0.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.0.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Exhaustive list of possible errors emitted by this crate.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "connection to coordinator failed")]
    BackendConnect,

    #[fail(display = "{} failed due to coordinator error", _0)]
    Backend(&'static str),

    #[fail(display = "{} failed because the coordinator is unreachable", _0)]
    BackendTransient(&'static str),

    #[fail(display = "failed to decode {}", _0)]
    Decode(&'static str),

    #[fail(display = "failed to encode {}", _0)]
    Encode(&'static str),

    #[fail(display = "election '{}' lost its connection to the coordinator", _0)]
    ElectionDisconnected(String),

    #[fail(display = "all nodes have gone from election '{}'", _0)]
    ElectionEmpty(String),

    #[fail(display = "own node not found in election '{}'", _0)]
    ElectionNodeMissing(String),

    #[fail(display = "already part of election '{}'", _0)]
    ElectionRunning(String),

    #[fail(display = "{}", _0)]
    NotFound(String),

    #[fail(display = "unable to spawn new thread for '{}'", _0)]
    SpawnThread(&'static str),

    #[fail(display = "timeout while {}", _0)]
    Timeout(String),
}

/// Short form alias for functions returning `Error`s.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Structured logging details about a `Fail` and its causes.
pub struct FailureInfo<'a>(&'a dyn Fail);

impl<'a> KV for FailureInfo<'a> {
    fn serialize(&self, _: &Record, serializer: &mut dyn Serializer) -> slog::Result {
        let mut causes = Vec::new();
        let mut cause = self.0.cause();
        while let Some(fail) = cause {
            causes.push(fail.to_string());
            cause = fail.cause();
        }
        let key: Key = "error";
        serializer.emit_str(key, &self.0.to_string())?;
        if !causes.is_empty() {
            serializer.emit_str("error_causes", &causes.join(": "))?;
        }
        Ok(())
    }
}

/// Collect error information for structured log events.
pub fn failure_info(error: &dyn Fail) -> FailureInfo {
    FailureInfo(error)
}

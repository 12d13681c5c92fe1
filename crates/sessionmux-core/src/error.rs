//! Error taxonomy
//!
//! Two layers:
//! - [`RemoteFailure`]: what a backend reports, with its cause chain. Only
//!   backend implementations and the classifier see these.
//! - [`GatewayError`]: what public gateway operations return. Every variant
//!   keeps the originating failure as its `source()`.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Category of a failure reported by the remote object service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    SecurityViolation,
    SessionInvalid,
    AuthenticationFailed,
    ResourceError,
    MissingPyramid { backoff_ms: u64 },
    LockTimeout { backoff_ms: u64 },
    TryAgain { backoff_ms: u64 },
    Timeout,
    ConnectionRefused,
    ConnectionLost,
    ObjectNotExist,
    CommunicatorDestroyed,
    ServerError,
    ApiUsage,
}

impl FailureKind {
    /// Failures meaning the session's transport can no longer be used.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectionRefused
                | Self::ConnectionLost
                | Self::ObjectNotExist
                | Self::CommunicatorDestroyed
        )
    }

    /// Server-suggested wait before retrying, for storage-not-ready kinds.
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            Self::MissingPyramid { backoff_ms }
            | Self::LockTimeout { backoff_ms }
            | Self::TryAgain { backoff_ms } => Some(Duration::from_millis(*backoff_ms)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecurityViolation => "security_violation",
            Self::SessionInvalid => "session_invalid",
            Self::AuthenticationFailed => "authentication_failed",
            Self::ResourceError => "resource_error",
            Self::MissingPyramid { .. } => "missing_pyramid",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::TryAgain { .. } => "try_again",
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionLost => "connection_lost",
            Self::ObjectNotExist => "object_not_exist",
            Self::CommunicatorDestroyed => "communicator_destroyed",
            Self::ServerError => "server_error",
            Self::ApiUsage => "api_usage",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a backend call, possibly wrapping an inner failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub message: String,
    #[source]
    pub cause: Option<Box<RemoteFailure>>,
}

impl RemoteFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap an inner failure (builder pattern).
    pub fn caused_by(mut self, cause: RemoteFailure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// This failure followed by every nested cause, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &RemoteFailure> {
        std::iter::successors(Some(self), |f| f.cause.as_deref())
    }

    /// First failure in the chain matching a predicate.
    pub fn find(&self, pred: impl Fn(&FailureKind) -> bool) -> Option<&RemoteFailure> {
        self.chain().find(|f| pred(&f.kind))
    }
}

/// Origin of a [`GatewayError`].
#[derive(Debug, Clone, Error)]
pub enum ErrorCause {
    #[error(transparent)]
    Remote(#[from] RemoteFailure),
    #[error(transparent)]
    Io(Arc<io::Error>),
}

impl From<io::Error> for ErrorCause {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Error returned by public gateway operations.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Session could not be created or is no longer usable
    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },

    /// The server refused or failed the requested access
    #[error("{message}")]
    Access {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },

    /// Storage is busy or not yet generated; retry after `backoff`
    #[error("{message} (retry in {}ms)", .backoff.as_millis())]
    StorageNotReady {
        message: String,
        backoff: Duration,
        pyramid: bool,
        #[source]
        cause: Option<ErrorCause>,
    },

    /// A server-side job could not be started
    #[error("{job}: {message}")]
    Process {
        job: String,
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },
}

impl GatewayError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            cause: None,
        }
    }

    pub fn access(message: impl Into<String>) -> Self {
        Self::Access {
            message: message.into(),
            cause: None,
        }
    }

    pub fn storage_not_ready(message: impl Into<String>, backoff: Duration, pyramid: bool) -> Self {
        Self::StorageNotReady {
            message: message.into(),
            backoff,
            pyramid,
            cause: None,
        }
    }

    pub fn process(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Process {
            job: job.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the originating failure (builder pattern).
    pub fn with_cause(mut self, cause: impl Into<ErrorCause>) -> Self {
        let slot = match &mut self {
            Self::Connection { cause, .. }
            | Self::Access { cause, .. }
            | Self::StorageNotReady { cause, .. }
            | Self::Process { cause, .. } => cause,
        };
        *slot = Some(cause.into());
        self
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Connection { message, .. }
            | Self::Access { message, .. }
            | Self::StorageNotReady { message, .. }
            | Self::Process { message, .. } => message,
        }
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        match self {
            Self::Connection { cause, .. }
            | Self::Access { cause, .. }
            | Self::StorageNotReady { cause, .. }
            | Self::Process { cause, .. } => cause.as_ref(),
        }
    }

    /// Remote failure behind this error, if it came from the backend.
    pub fn remote_cause(&self) -> Option<&RemoteFailure> {
        match self.cause() {
            Some(ErrorCause::Remote(failure)) => Some(failure),
            _ => None,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn is_access(&self) -> bool {
        matches!(self, Self::Access { .. })
    }

    pub fn backoff(&self) -> Option<Duration> {
        match self {
            Self::StorageNotReady { backoff, .. } => Some(*backoff),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Access { .. } => "access",
            Self::StorageNotReady { .. } => "storage_not_ready",
            Self::Process { .. } => "process",
        }
    }
}

/// Result alias for public gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result alias for backend calls
pub type RemoteResult<T> = Result<T, RemoteFailure>;

//! Exception classifier
//!
//! Maps a backend failure to what the gateway should do about it. Rules are
//! checked in order, each against the whole cause chain:
//!
//! 1. security violation -> access error
//! 2. invalid session / failed authentication -> connection error
//! 3. backend resource error -> connection error (fatal)
//! 4. storage not ready -> storage-not-ready with the server's back-off
//! 5. unusable transport -> connection broken (rebuild and retry)
//! 6. anything else -> access error
//!
//! While the pool is reconnecting every failure is suppressed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sessionmux_core::{FailureKind, GatewayError, RemoteFailure};
use tracing::debug;

pub const SECURITY_MESSAGE: &str = "For security reasons, cannot access data.";
pub const SESSION_INVALID_MESSAGE: &str = "Session is not valid.";
pub const SESSION_INIT_MESSAGE: &str = "Cannot initialize the session.";
pub const FATAL_MESSAGE: &str = "Fatal error. Please contact the administrator.";
pub const PYRAMID_MESSAGE: &str = "Pyramid is being generated.";
pub const STORAGE_BUSY_MESSAGE: &str = "Storage is busy. Try again later.";
pub const CONNECTION_LOST_MESSAGE: &str = "Connection to the server was lost.";
pub const ACCESS_MESSAGE: &str = "Cannot access data.";

/// What to do with a failure.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Return this error to the caller
    Surface(GatewayError),
    /// The session's transport is gone; drop the connector
    ConnectionBroken(GatewayError),
    /// Ignore; a reconnect is in progress
    Suppressed,
}

impl Outcome {
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::ConnectionBroken(_))
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed)
    }

    /// The error carried by this outcome, if any.
    pub fn into_error(self) -> Option<GatewayError> {
        match self {
            Self::Surface(err) | Self::ConnectionBroken(err) => Some(err),
            Self::Suppressed => None,
        }
    }
}

#[derive(Clone)]
pub struct ExceptionClassifier {
    reconnecting: Arc<AtomicBool>,
}

impl ExceptionClassifier {
    /// Create a classifier observing the pool's reconnecting flag.
    pub fn new(reconnecting: Arc<AtomicBool>) -> Self {
        Self { reconnecting }
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Classify a failure raised while doing `operation`.
    pub fn classify(&self, failure: &RemoteFailure, operation: &str) -> Outcome {
        if self.is_reconnecting() {
            debug!(
                operation = operation,
                kind = %failure.kind,
                "[Classifier] Suppressed failure during reconnect"
            );
            return Outcome::Suppressed;
        }
        classify_failure(failure, operation)
    }
}

/// The rule table, independent of reconnect state.
pub fn classify_failure(failure: &RemoteFailure, operation: &str) -> Outcome {
    let outcome = rule_table(failure);
    debug!(
        operation = operation,
        kind = %failure.kind,
        outcome = outcome_name(&outcome),
        "[Classifier] Classified failure"
    );
    outcome
}

fn rule_table(failure: &RemoteFailure) -> Outcome {
    let cause = || failure.clone();

    if failure.find(|k| *k == FailureKind::SecurityViolation).is_some() {
        return Outcome::Surface(GatewayError::access(SECURITY_MESSAGE).with_cause(cause()));
    }

    if let Some(found) = failure.find(|k| {
        matches!(k, FailureKind::SessionInvalid | FailureKind::AuthenticationFailed)
    }) {
        let message = match found.kind {
            FailureKind::SessionInvalid => SESSION_INVALID_MESSAGE,
            _ => SESSION_INIT_MESSAGE,
        };
        return Outcome::Surface(GatewayError::connection(message).with_cause(cause()));
    }

    if failure.find(|k| *k == FailureKind::ResourceError).is_some() {
        return Outcome::Surface(GatewayError::connection(FATAL_MESSAGE).with_cause(cause()));
    }

    if let Some(found) = failure.find(|k| k.backoff().is_some()) {
        let pyramid = matches!(found.kind, FailureKind::MissingPyramid { .. });
        let message = if pyramid { PYRAMID_MESSAGE } else { STORAGE_BUSY_MESSAGE };
        let backoff = found.kind.backoff().unwrap_or_default();
        return Outcome::Surface(
            GatewayError::storage_not_ready(message, backoff, pyramid).with_cause(cause()),
        );
    }

    if failure.find(FailureKind::is_transport).is_some() {
        return Outcome::ConnectionBroken(
            GatewayError::connection(CONNECTION_LOST_MESSAGE).with_cause(cause()),
        );
    }

    Outcome::Surface(GatewayError::access(ACCESS_MESSAGE).with_cause(cause()))
}

fn outcome_name(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Surface(err) => err.kind_name(),
        Outcome::ConnectionBroken(_) => "connection_broken",
        Outcome::Suppressed => "suppressed",
    }
}

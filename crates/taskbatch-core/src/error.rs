use thiserror::Error;

use crate::sync::FlushReport;

/// Failures surfaced by the model, the remote client and the
/// synchronizer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// A field failed validation; nothing was recorded.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// No bearer token is available for this session.
    #[error("no session token; set TASKBATCH_TOKEN, auth.token or pass --token")]
    Unauthenticated,

    /// A single CRUD call failed on the network or with a non-2xx status.
    #[error("{op} failed{}: {message}", .status.map(|code| format!(" (HTTP {code})")).unwrap_or_default())]
    RemoteRequest {
        op: String,
        status: Option<u16>,
        message: String,
    },

    /// A queued operation references an identifier that cannot be resolved.
    #[error("cannot reconcile {entity}: {reason}")]
    Reconciliation { entity: String, reason: String },
}

impl SyncError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn remote(op: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::RemoteRequest {
            op: op.into(),
            status,
            message: message.into(),
        }
    }

    pub fn reconciliation(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reconciliation {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

/// A flush that did not complete. The report records which operations
/// reached the server before the abort and how many were put back into
/// the change tracker.
#[derive(Debug, Error)]
#[error("flush aborted after {} of {} operations: {source}", .report.delivered.len(), .report.total)]
pub struct FlushError {
    pub report: FlushReport,
    #[source]
    pub source: SyncError,
}

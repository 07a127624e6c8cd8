//! # Error Types
//!
//! One error enum for the whole protocol crate. The variants map onto the
//! failure kinds a membership service actually produces: bad arguments,
//! bad configuration, transport trouble, absent subjects, and operations a
//! given backend refuses to perform.
//!
//! Inside the SWIM tick, transport errors never surface through this type:
//! a failed probe *is* the signal, so it downgrades into suspicion logic
//! instead of propagating. Handlers that fail to decode a request respond
//! with a defaulted payload and log; only user-facing APIs return
//! `GroupError`.

use crate::transport::TransportError;

/// Errors returned by user-facing Roster APIs.
///
/// None of these abort the process; they are all recoverable statuses.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    /// An argument was structurally invalid (empty view, unknown bootstrap
    /// method, bad provider id, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The JSON configuration failed to parse or violated a constraint
    /// (e.g. `ping_interval_ms` min above max).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The RPC runtime reported a failure (timeout, unreachable peer,
    /// malformed frame).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A view or RPC payload failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The named member is not part of the view.
    #[error("no such member: ({address}, {provider_id})")]
    NoSuchMember { address: String, provider_id: u16 },

    /// The named metadata key is not part of the view.
    #[error("no such metadata key: {0}")]
    NoSuchMetadata(String),

    /// The operation is not supported here (e.g. external metadata
    /// mutation on SWIM, or an `mpi` bootstrap without an MPI binding).
    #[error("operation not supported ({0})")]
    Unsupported(&'static str),

    /// Residual failures that fit no other kind.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for GroupError {
    fn from(e: serde_json::Error) -> Self {
        GroupError::Serialization(e.to_string())
    }
}

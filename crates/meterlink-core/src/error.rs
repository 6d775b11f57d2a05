use thiserror::Error;

/// A contract row that cannot be turned into a [`Contract`](crate::Contract).
///
/// Fatal for that contract only; the run carries on with the others.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("contract id is empty")]
    MissingId,

    #[error("contract [{contract}] starts at {start} but ends at {end}")]
    InvertedValidity {
        contract: String,
        start: String,
        end: String,
    },

    #[error("contract [{contract}] history change #{number} ends before it starts")]
    InvertedChange { contract: String, number: usize },

    #[error("contract [{contract}] has no metering point")]
    MissingMeteringPoint { contract: String },

    #[error("contract [{contract}]: {detail}")]
    Malformed { contract: String, detail: String },
}

impl ValidationError {
    /// Identifier of the offending contract (empty when the id itself is missing).
    pub fn contract(&self) -> &str {
        match self {
            ValidationError::MissingId => "",
            ValidationError::InvertedValidity { contract, .. }
            | ValidationError::InvertedChange { contract, .. }
            | ValidationError::MissingMeteringPoint { contract }
            | ValidationError::Malformed { contract, .. } => contract,
        }
    }
}

/// Opaque failure reported by a remote collaborator.
///
/// The engine never inspects the body; it only records it in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{0}")]
    Transport(String),
}

impl RemoteError {
    /// HTTP-like status code, when the remote answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Rejected { status, .. } => Some(*status),
            RemoteError::Transport(_) => None,
        }
    }
}

/// Failure of the local watermark store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("watermark store: {0}")]
pub struct PersistenceError(pub String);

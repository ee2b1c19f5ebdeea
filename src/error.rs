//! Error taxonomy for the watcher.
//!
//! Four classes of failure flow through the crate: transient infrastructure
//! errors (retried on the next poll cycle), retryable attestation delays,
//! on-chain reverts (some of which are benign races), and replica-divergence
//! errors that indicate the local state and the ledger can no longer agree.

use thiserror::Error;

/// Errors produced by watcher components and the external client traits.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatcherError {
    /// RPC / indexer transport failure. Recoverable; re-poll next cycle.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Operation timed out. Recoverable.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Attestation proof is not yet available. Recoverable; the condition
    /// re-detects on the next scan.
    #[error("attestation not ready: {0}")]
    AttestationNotReady(String),

    /// Contract call reverted with the given reason string. Whether this is
    /// benign depends on the caller's expected-error allow-list.
    #[error("contract reverted: {0}")]
    ContractRevert(String),

    /// A client returned data the core cannot interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The local replica and the ledger have diverged (e.g. an unrecognized
    /// setting name in a setting-changed event). Not recoverable.
    #[error("state divergence: {0}")]
    StateDivergence(String),

    /// Distinguished signal a scoped task throws to leave its scope without
    /// being treated as a failure. `scope` is the target scope id; `None`
    /// exits the innermost scope.
    #[error("scope exit")]
    ScopeExit { scope: Option<u64> },

    /// Uncategorized error.
    #[error("{0}")]
    Other(String),
}

/// Discriminant of [`WatcherError`], used by [`ErrorMatcher::Kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Rpc,
    Timeout,
    AttestationNotReady,
    ContractRevert,
    InvalidResponse,
    StateDivergence,
    ScopeExit,
    Other,
}

impl WatcherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WatcherError::Rpc(_) => ErrorKind::Rpc,
            WatcherError::Timeout(_) => ErrorKind::Timeout,
            WatcherError::AttestationNotReady(_) => ErrorKind::AttestationNotReady,
            WatcherError::ContractRevert(_) => ErrorKind::ContractRevert,
            WatcherError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            WatcherError::StateDivergence(_) => ErrorKind::StateDivergence,
            WatcherError::ScopeExit { .. } => ErrorKind::ScopeExit,
            WatcherError::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether this error should be retried on the next poll cycle rather
    /// than aborting the actor loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WatcherError::Rpc(_) | WatcherError::Timeout(_) | WatcherError::AttestationNotReady(_)
        )
    }

    /// Returns a short string identifying the error type for metrics labels.
    pub fn error_type(&self) -> &'static str {
        match self {
            WatcherError::Rpc(_) => "rpc_error",
            WatcherError::Timeout(_) => "timeout",
            WatcherError::AttestationNotReady(_) => "attestation_not_ready",
            WatcherError::ContractRevert(_) => "contract_revert",
            WatcherError::InvalidResponse(_) => "invalid_response",
            WatcherError::StateDivergence(_) => "state_divergence",
            WatcherError::ScopeExit { .. } => "scope_exit",
            WatcherError::Other(_) => "other",
        }
    }
}

/// Predicate over errors, kept as data so that benign-race allow-lists are
/// declarative: either a substring of the error message or an error kind.
#[derive(Debug, Clone, Copy)]
pub enum ErrorMatcher {
    Contains(&'static str),
    Kind(ErrorKind),
}

impl ErrorMatcher {
    pub fn matches(&self, err: &WatcherError) -> bool {
        match self {
            ErrorMatcher::Contains(s) => err.to_string().contains(s),
            ErrorMatcher::Kind(k) => err.kind() == *k,
        }
    }
}

pub type WatcherResult<T> = Result<T, WatcherError>;

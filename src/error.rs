//! Error taxonomy for the parallel manager.
//!
//! Four kinds, matching the failure surface of the manager: bad
//! configuration caught at construction time, invariant breaks in the
//! cell/gid bookkeeping, MPI transport failures, and the count/receive
//! mismatch that the load-balance and halo exchange protocols can hit.
//! All of these are fatal to the calling rank; the manager never retries
//! across ranks. Callers are expected to log the message and exit with
//! non-zero status, matching spec §7's single-line-diagnostic-and-abort
//! contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("MPI transport error: {0}")]
    Transport(String),

    #[error("size mismatch in exchange: expected {expected} rows, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ManagerError>;

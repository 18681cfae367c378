use thiserror::Error;

/// Errors surfaced by the BMC driver, distinguishing the kinds named in
/// the error handling design so callers can decide fatal-vs-skip.
#[derive(Debug, Error)]
pub enum BmcError {
    #[error("BMC authentication failed: {0}")]
    Auth(String),

    #[error("BMC transport error: {0}")]
    Transport(String),

    #[error("could not parse BMC output: {0}")]
    Parse(String),

    #[error("BMC operation not supported: {0}")]
    Unsupported(String),

    #[error("invalid BMC configuration: {0}")]
    Validation(String),
}

impl BmcError {
    /// Whether this error should abort the run (§7 propagation table).
    /// `Unsupported` is a non-fatal success and never reaches this check
    /// in practice, since callers treat it as `Ok`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BmcError::Unsupported(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O or constraint error: {0}")]
    Sql(#[from] sqlx::Error),
}

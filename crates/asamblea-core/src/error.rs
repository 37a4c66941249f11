use thiserror::Error;

/// Failure taxonomy for calls against the remote backend.
///
/// The backend reports structured errors (`codigo` + `mensaje`); callers
/// branch on the variant and never parse free text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The household already has a vote for this proposal. Treated as an
    /// already-done state by callers, not as a failure.
    #[error("household already voted on this proposal")]
    AlreadyVoted,
    /// The backend refused the input (missing fields, name mismatch against
    /// the registered owner). Surfaced to the user, no retry.
    #[error("validation rejected: {0}")]
    Validation(String),
    /// The backend refused the call for any other reason.
    #[error("backend rejected the call: {0}")]
    Rejected(String),
    /// Network or transport failure. The caller keeps its last known state
    /// and retries on the next tick or subscription event.
    #[error("transient backend failure: {0}")]
    Transient(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    /// Maps a structured wire error onto the taxonomy. Unknown codes fall
    /// back to `Rejected` with the backend message attached.
    pub fn from_wire(codigo: Option<&str>, mensaje: &str) -> Self {
        match codigo {
            Some("voto_duplicado") => BackendError::AlreadyVoted,
            Some("validacion") => BackendError::Validation(mensaje.to_string()),
            _ => BackendError::Rejected(mensaje.to_string()),
        }
    }

    pub fn is_already_voted(&self) -> bool {
        matches!(self, BackendError::AlreadyVoted)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

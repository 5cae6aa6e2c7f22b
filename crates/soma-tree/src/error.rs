use soma_domain::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    /// A lookup returned the fault sentinel; the operation that received
    /// it degrades to a no-op reporting this error.
    #[error("lookup returned the fault sentinel")]
    Fault,

    #[error("element not found: {0}")]
    NotFound(String),

    #[error("Readonly bucket")]
    ReadonlyBucket,

    #[error("illegal edge: {parent} cannot parent {child}")]
    IllegalEdge {
        parent: &'static str,
        child: &'static str,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot delete inherited copy {0}, delete the source instead")]
    InheritedCopy(String),

    #[error("tree corrupt: {0}")]
    Corrupt(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("domain error: {0}")]
    Domain(#[from] soma_domain::DomainError),
}

impl TreeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::Fault | TreeError::Corrupt(_) => ErrorKind::ServerError,
            TreeError::NotFound(_) => ErrorKind::NotFound,
            TreeError::ReadonlyBucket => ErrorKind::ReadOnly,
            TreeError::Conflict(_) => ErrorKind::Conflict,
            TreeError::IllegalEdge { .. }
            | TreeError::InheritedCopy(_)
            | TreeError::InvalidOperation(_)
            | TreeError::Domain(_) => ErrorKind::BadRequest,
        }
    }
}

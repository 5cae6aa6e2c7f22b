use soma_domain::ErrorKind;
use thiserror::Error;

/// Supervisor failures. Encrypted endpoints collapse every variant to an
/// opaque Forbidden on the wire; the precise cause goes to the audit log
/// only.
#[derive(Debug, Error)]
pub enum SuperError {
    #[error("forbidden")]
    Forbidden,

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("kex session not found or expired")]
    KexGone,

    #[error("crypto failure")]
    Crypto,

    #[error("store error: {0}")]
    Store(#[from] soma_store::StoreError),

    #[error("internal: {0}")]
    Internal(String),
}

impl SuperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SuperError::Forbidden | SuperError::KexGone | SuperError::Crypto => {
                ErrorKind::Forbidden
            }
            SuperError::Unauthorized => ErrorKind::Unauthorized,
            SuperError::BadRequest(_) => ErrorKind::BadRequest,
            SuperError::NotImplemented(_) => ErrorKind::NotImplemented,
            SuperError::Store(e) => e.kind(),
            SuperError::Internal(_) => ErrorKind::ServerError,
        }
    }
}

use soma_domain::ErrorKind;
use thiserror::Error;

/// The error shape carried on reply channels: a kind for the HTTP
/// mapping plus a client-safe message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServiceError { kind, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Gone, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<soma_tree::TreeError> for ServiceError {
    fn from(e: soma_tree::TreeError) -> Self {
        ServiceError::new(e.kind(), e.to_string())
    }
}

impl From<soma_store::StoreError> for ServiceError {
    fn from(e: soma_store::StoreError) -> Self {
        ServiceError::new(e.kind(), e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("store error: {0}")]
    Store(#[from] soma_store::StoreError),

    #[error("tree error: {0}")]
    Tree(#[from] soma_tree::TreeError),

    #[error("invalid transition: instance {instance} cannot go {from} -> {to}")]
    InvalidTransition {
        instance: soma_domain::CheckInstanceId,
        from: soma_domain::InstanceState,
        to: soma_domain::InstanceState,
    },

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("boot failed: {0}")]
    Boot(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl KeeperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeeperError::Store(e) => e.kind(),
            KeeperError::Tree(e) => e.kind(),
            KeeperError::InvalidTransition { .. } => ErrorKind::Conflict,
            KeeperError::Notification(_) => ErrorKind::ServerError,
            KeeperError::Boot(_) => ErrorKind::Gone,
            KeeperError::Internal(_) => ErrorKind::ServerError,
        }
    }
}

impl From<KeeperError> for ServiceError {
    fn from(e: KeeperError) -> Self {
        ServiceError::new(e.kind(), e.to_string())
    }
}

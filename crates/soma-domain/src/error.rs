use thiserror::Error;

/// Classification of every failure the service reports to a client.
/// The HTTP layer maps kinds to status codes through [`ErrorKind::status_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ReadOnly,
    Unavailable,
    Gone,
    ServerError,
    NotImplemented,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            // readonly replica and state conflicts share a code
            ErrorKind::Conflict | ErrorKind::ReadOnly => 406,
            ErrorKind::Gone => 410,
            ErrorKind::ServerError => 500,
            ErrorKind::NotImplemented => 501,
            ErrorKind::Unavailable => 503,
        }
    }

    pub fn status_text(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "Bad Request",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::Conflict | ErrorKind::ReadOnly => "Conflict",
            ErrorKind::Gone => "Gone",
            ErrorKind::ServerError => "Internal Server Error",
            ErrorKind::NotImplemented => "Not Implemented",
            ErrorKind::Unavailable => "Service Unavailable",
        }
    }
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid entity name: {0}")]
    InvalidName(String),

    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("invalid view: {0}")]
    InvalidView(String),

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BadRequest
    }
}

mod entities;
mod error;
mod ids;
mod types;
mod validate;

pub use entities::*;
pub use error::{DomainError, ErrorKind};
pub use ids::*;
pub use types::*;
pub use validate::validate_entity_name;

mod checks;
mod element;
mod error;
mod events;
mod tree;
mod verify;

pub use checks::{canonical_hash, ComputedInstance};
pub use element::{Element, ElementKind, Handle, PlacedCheck, PropertyInstance, PropertyMaps};
pub use error::TreeError;
pub use events::TreeEvent;
pub use tree::{AttachRequest, FindRequest, Tree};
pub use verify::verify;

pub mod catalog;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod rows;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use rows::*;
pub use store::Store;

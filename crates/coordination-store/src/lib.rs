pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryCoordinationStore;
pub use postgres::PostgresCoordinationStore;
pub use store::{CoordinationStore, DecrementOutcome};

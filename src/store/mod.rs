//! Data store boundary
//!
//! - `MongoConnector` / `MongoStore`: the live MongoDB client
//! - `MemoryConnector` / `MemoryStore`: in-memory store for tests

pub mod memory;
pub mod mongo;
pub mod traits;

pub use memory::{MemoryConnector, MemoryStore};
pub use mongo::{MongoConnector, MongoStore};
pub use traits::{Connector, DataStore, WriteRecord};

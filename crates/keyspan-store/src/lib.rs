pub mod connection;
pub mod error;
pub mod identifiable;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod persistence;
pub mod row_helpers;
pub mod schema;
#[cfg(feature = "scylla")]
pub mod scylla;
pub mod statement;

pub use connection::{ConfigResolver, ConnectionManager, ConnectionResolver};
pub use error::StoreError;
pub use identifiable::{Identifiable, IdentifiablePersistence};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryCluster, MemorySession};
pub use persistence::{ComponentState, ConnectionHandle, Persistence, Record};
pub use schema::{IndexOptions, SchemaManager};
#[cfg(feature = "scylla")]
pub use scylla::{ScyllaConnector, ScyllaSession};
pub use statement::RowBinding;

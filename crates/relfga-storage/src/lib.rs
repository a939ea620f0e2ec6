//! relfga-storage: store registry and tuple changelog storage
//!
//! This crate provides the storage abstraction for relfga, including:
//! - DataStore trait for store, tuple and changelog operations
//! - In-memory implementation for testing and single-node use
//! - PostgreSQL implementation (feature `postgres`)
//! - MySQL/MariaDB implementation (feature `mysql`)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                relfga-storage                │
//! ├──────────────────────────────────────────────┤
//! │  traits.rs    - DataStore trait, positions   │
//! │  memory.rs    - In-memory implementation     │
//! │  postgres.rs  - PostgreSQL implementation    │
//! │  mysql.rs     - MySQL implementation         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every paginated read takes an explicit resume position
//! ([`StorePosition`], [`ChangelogPosition`]) and returns rows strictly after
//! it. Turning positions into opaque tokens is left to the caller.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(any(feature = "postgres", feature = "mysql"))]
mod sqlcommon;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryDataStore;
pub use traits::{
    ChangelogPosition, DataStore, ReadChangesFilter, Store, StorePosition, TupleChange, TupleKey,
    TupleOperation,
};

#[cfg(feature = "mysql")]
pub use mysql::{MySQLConfig, MySQLDataStore};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresDataStore};

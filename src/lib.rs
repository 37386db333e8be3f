// ============================================================================
// memoorm Library
// ============================================================================
//
// Transactional entity tracking: an identity map (`EntityRegistry`) that
// snapshots loaded entities for dirty checking, and a `UnitOfWork` that
// writes scheduled inserts, updates and deletes through per-type data
// mappers inside one connection transaction.
//
// ============================================================================

//! # Examples
//!
//! ```
//! use memoorm::prelude::*;
//!
//! #[derive(Debug, Clone, Entity)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! # fn main() -> memoorm::Result<()> {
//! let db = MemoryDatabase::shared();
//! let mut uow = UnitOfWork::new().with_connection(MemoryConnection::new(db.clone()));
//! uow.register_data_mapper(MemoryDataMapper::<User>::new(db));
//!
//! let user = uow.persist(User { id: 0, name: "foo".into() });
//! uow.commit()?;
//! assert_eq!(uow.get(&user)?.id, 1);
//!
//! uow.get_mut(&user)?.name = "bar".into();
//! let report = uow.commit()?;
//! assert_eq!(report.swept, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod core;
pub mod entity;
pub mod mapper;
pub mod prelude;
pub mod registry;
pub mod storage;
pub mod unit_of_work;

pub use config::UnitOfWorkConfig;
pub use connection::{Connection, ConnectionState, MemoryConnection};
pub use core::{EntityId, EntityKey, FieldMap, ObjectIdentity, OrmError, Result, ToValue, Value};
pub use entity::{AnyEntity, Diffable, Entity, EntityRef, IdValue};
pub use mapper::{
    CachedDataMapper, DataMapper, IdGenerator, LastInsertIdGenerator, MemoryDataMapper,
    WriteThroughCache,
};
pub use registry::{EntityRegistry, EntityState};
pub use storage::{Change, MemoryDatabase, SharedDatabase};
pub use unit_of_work::{CommitListener, CommitReport, UnitOfWork};

/// `#[derive(Entity)]` generates `Diffable` and `Entity` for a named struct.
pub use memoorm_derive::Entity;

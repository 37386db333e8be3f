//! Common imports for application code.
//!
//! ```
//! use memoorm::prelude::*;
//! ```

pub use crate::{
    CachedDataMapper, CommitListener, CommitReport, Connection, DataMapper, Diffable, Entity,
    EntityId, EntityRef, EntityRegistry, EntityState, IdGenerator, MemoryConnection,
    MemoryDataMapper, MemoryDatabase, OrmError, Result, UnitOfWork, UnitOfWorkConfig, Value,
};

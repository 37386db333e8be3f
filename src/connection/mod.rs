use crate::core::{OrmError, Result};
use crate::storage::SharedDatabase;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Level, event};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Transactional connection used by a unit of work during commit.
///
/// Nested transactions are not supported: `begin_transaction` while a
/// transaction is active is an error.
pub trait Connection: Send {
    fn begin_transaction(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    InTransaction,
    Closed,
}

/// Connection to a [`MemoryDatabase`](crate::storage::MemoryDatabase).
pub struct MemoryConnection {
    /// Unique connection ID
    id: u64,
    /// Shared database instance
    db: SharedDatabase,
    /// Connection state
    state: ConnectionState,
}

impl MemoryConnection {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst),
            db,
            state: ConnectionState::Active,
        }
    }

    /// Get connection ID
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn database(&self) -> SharedDatabase {
        self.db.clone()
    }

    /// Close the connection, rolling back an open transaction
    pub fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::InTransaction {
            self.rollback()?;
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(OrmError::ConnectionError("Connection is closed".into()));
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn begin_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == ConnectionState::InTransaction {
            return Err(OrmError::TransactionState("Transaction already active".into()));
        }

        self.db.write()?.begin()?;
        self.state = ConnectionState::InTransaction;
        event!(Level::TRACE, connection = self.id, "begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.state != ConnectionState::InTransaction {
            return Err(OrmError::TransactionState("No active transaction".into()));
        }

        self.db.write()?.commit()?;
        self.state = ConnectionState::Active;
        event!(Level::TRACE, connection = self.id, "commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.state != ConnectionState::InTransaction {
            return Err(OrmError::TransactionState("No active transaction".into()));
        }

        self.db.write()?.rollback()?;
        self.state = ConnectionState::Active;
        event!(Level::TRACE, connection = self.id, "rollback");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state == ConnectionState::InTransaction
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if self.state == ConnectionState::InTransaction {
            let _ = self.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDatabase;

    #[test]
    fn test_connection_lifecycle() {
        let db = MemoryDatabase::shared();
        let mut conn = MemoryConnection::new(db.clone());
        assert_eq!(conn.state(), ConnectionState::Active);

        conn.begin_transaction().unwrap();
        assert!(conn.in_transaction());
        assert!(db.read().unwrap().in_transaction());
        assert!(conn.begin_transaction().is_err());

        conn.commit().unwrap();
        assert!(!db.read().unwrap().in_transaction());
        assert!(conn.rollback().is_err());
    }

    #[test]
    fn test_closed_connection_rejects_begin() {
        let mut conn = MemoryConnection::new(MemoryDatabase::shared());
        conn.begin_transaction().unwrap();
        conn.close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(
            conn.begin_transaction(),
            Err(OrmError::ConnectionError(_))
        ));
    }

    #[test]
    fn test_drop_rolls_back() {
        let db = MemoryDatabase::shared();
        {
            let mut conn = MemoryConnection::new(db.clone());
            conn.begin_transaction().unwrap();
        }
        assert!(!db.read().unwrap().in_transaction());
    }

    #[test]
    fn test_connection_ids_unique() {
        let db = MemoryDatabase::shared();
        let a = MemoryConnection::new(db.clone());
        let b = MemoryConnection::new(db);
        assert_ne!(a.id(), b.id());
    }
}

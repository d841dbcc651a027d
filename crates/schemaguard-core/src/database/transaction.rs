//! Scoped migration transaction.

use tracing::warn;

use super::Database;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Open,
    Committed,
    RolledBack,
}

/// A transaction that rolls back when dropped unless committed.
///
/// Holding the handle by `&mut` for the whole scope guarantees no other code
/// can commit or roll back behind the guard's back.
pub struct MigrationTransaction<'a> {
    db: &'a mut dyn Database,
    state: TxState,
}

impl<'a> MigrationTransaction<'a> {
    /// Open a transaction on the handle.
    pub fn begin(db: &'a mut dyn Database) -> Result<Self, Error> {
        db.begin()?;
        Ok(Self {
            db,
            state: TxState::Open,
        })
    }

    /// Database handle scoped to this transaction.
    pub fn db(&mut self) -> &mut dyn Database {
        &mut *self.db
    }

    /// Check if the transaction is still open.
    pub fn is_open(&self) -> bool {
        self.state == TxState::Open
    }

    /// Commit the transaction.
    pub fn commit(mut self) -> Result<(), Error> {
        self.ensure_open()?;
        // On failure the state stays Open so drop still attempts a rollback.
        self.db.commit()?;
        self.state = TxState::Committed;
        Ok(())
    }

    /// Roll the transaction back.
    pub fn rollback(mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.state = TxState::RolledBack;
        self.db.rollback()
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            TxState::Open => Ok(()),
            TxState::Committed => Err(Error::Transaction("transaction already committed".into())),
            TxState::RolledBack => Err(Error::Transaction("transaction already rolled back".into())),
        }
    }
}

impl Drop for MigrationTransaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Open {
            self.state = TxState::RolledBack;
            if let Err(e) = self.db.rollback() {
                warn!(error = %e, "rollback on drop failed");
            } else {
                warn!("transaction dropped while open, rolled back");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;

    #[test]
    fn test_commit_persists() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        {
            let mut tx = MigrationTransaction::begin(&mut db).unwrap();
            tx.db().execute_batch("CREATE TABLE kept (id INTEGER)").unwrap();
            tx.commit().unwrap();
        }
        assert!(db.table_exists("kept").unwrap());
    }

    #[test]
    fn test_explicit_rollback() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let mut tx = MigrationTransaction::begin(&mut db).unwrap();
        tx.db().execute_batch("CREATE TABLE discarded (id INTEGER)").unwrap();
        tx.rollback().unwrap();
        assert!(!db.table_exists("discarded").unwrap());
    }

    #[test]
    fn test_drop_rolls_back() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        {
            let mut tx = MigrationTransaction::begin(&mut db).unwrap();
            tx.db().execute_batch("CREATE TABLE abandoned (id INTEGER)").unwrap();
            assert!(tx.is_open());
        }
        assert!(!db.table_exists("abandoned").unwrap());
    }

    #[test]
    fn test_rollback_on_error_path() {
        fn failing(db: &mut dyn Database) -> Result<(), Error> {
            let mut tx = MigrationTransaction::begin(db)?;
            tx.db().execute_batch("CREATE TABLE partial (id INTEGER)")?;
            tx.db().execute_batch("THIS IS NOT SQL")?;
            tx.commit()
        }

        let mut db = SqliteDatabase::open_in_memory().unwrap();
        assert!(failing(&mut db).is_err());
        assert!(!db.table_exists("partial").unwrap());
    }
}

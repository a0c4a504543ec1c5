//! Unit-of-work contract.
//!
//! Repositories record [`Change`]s on the unit of work; `save_changes` flushes
//! them either into the open transaction or, without one, straight to the
//! store. Nothing is visible to other units of work before `commit`.
//!
//! Calling `begin_transaction` while a transaction is already open fails fast
//! with [`StoreError::TransactionAlreadyActive`]. There is no implicit reuse of
//! an outer scope.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Serialized row as stored in a table.
pub type Row = serde_json::Value;

/// A tracked mutation, applied in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert {
        table: &'static str,
        id: String,
        row: Row,
    },
    Update {
        table: &'static str,
        id: String,
        row: Row,
    },
    Delete {
        table: &'static str,
        id: String,
    },
}

impl Change {
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Insert { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

/// Errors raised by the unit-of-work protocol itself.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a transaction is already active on this unit of work")]
    TransactionAlreadyActive,
    #[error("no transaction is active on this unit of work")]
    NoActiveTransaction,
    #[error("operation cancelled")]
    Cancelled,
    #[error("{table} '{id}' already exists")]
    DuplicateKey { table: &'static str, id: String },
    #[error("{table} '{id}' does not exist")]
    MissingRow { table: &'static str, id: String },
}

/// Transaction boundary over the store, scoped to a single request.
///
/// All methods are suspension points and observe the request's cancellation
/// signal, returning [`StoreError::Cancelled`] once it fires.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Opens a transaction.
    ///
    /// Fails with [`StoreError::TransactionAlreadyActive`] if one is open.
    async fn begin_transaction(&self) -> anyhow::Result<()>;

    /// Publishes every change saved inside the transaction atomically.
    async fn commit(&self) -> anyhow::Result<()>;

    /// Discards the transaction and any tracked, unsaved changes.
    async fn rollback(&self) -> anyhow::Result<()>;

    /// Flushes tracked changes. Returns the number of affected rows.
    async fn save_changes(&self) -> anyhow::Result<usize>;

    /// Whether a transaction is currently open.
    fn in_transaction(&self) -> bool;

    /// Records a change to be flushed by the next `save_changes`.
    fn track(&self, change: Change);

    /// Loads one row, seeing this unit of work's own uncommitted changes.
    async fn find(&self, table: &'static str, id: &str) -> anyhow::Result<Option<Row>>;

    /// Loads every row of a table, seeing this unit of work's own uncommitted changes.
    async fn scan(&self, table: &'static str) -> anyhow::Result<Vec<Row>>;
}

/// Creates one [`UnitOfWork`] per request.
pub trait UnitOfWorkFactory: Send + Sync {
    fn create(&self, cancellation: CancellationToken) -> Arc<dyn UnitOfWork>;
}

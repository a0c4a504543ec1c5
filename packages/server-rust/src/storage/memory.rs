//! In-memory [`UnitOfWork`] implementation.
//!
//! [`MemoryStore`] holds committed rows behind a single `RwLock`; every commit
//! validates and applies its change set under one write guard, so readers
//! observe either none or all of a transaction (read-committed). Each
//! [`MemoryUnitOfWork`] buffers its own changes until commit and reads through
//! them, giving read-your-writes inside a transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::unit_of_work::{Change, Row, StoreError, UnitOfWork, UnitOfWorkFactory};

type Table = BTreeMap<String, Row>;

#[derive(Default)]
struct StoreInner {
    tables: RwLock<HashMap<&'static str, Table>>,
    /// Row loads that reached committed storage.
    reads: AtomicU64,
    /// Successfully applied change sets.
    commits: AtomicU64,
}

/// Shared committed state. Cloning shares the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a unit of work bound to `cancellation`.
    #[must_use]
    pub fn unit_of_work(&self, cancellation: CancellationToken) -> MemoryUnitOfWork {
        MemoryUnitOfWork {
            store: self.clone(),
            cancellation,
            state: Mutex::new(UowState::default()),
        }
    }

    /// Number of store reads served so far.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.inner.reads.load(Ordering::Acquire)
    }

    /// Number of change sets applied so far.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::Acquire)
    }

    /// Committed row count of `table`.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.inner.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    /// Reads a committed row without counting it as a store read.
    #[must_use]
    pub fn peek(&self, table: &str, id: &str) -> Option<Row> {
        self.inner
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(id).cloned())
    }

    fn load(&self, table: &str, id: &str) -> Option<Row> {
        self.inner.reads.fetch_add(1, Ordering::AcqRel);
        self.peek(table, id)
    }

    fn load_all(&self, table: &str) -> Table {
        self.inner.reads.fetch_add(1, Ordering::AcqRel);
        self.inner.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Validates then applies `changes` under a single write guard.
    fn apply(&self, changes: &[Change]) -> Result<usize, StoreError> {
        let mut tables = self.inner.tables.write();

        let mut present: HashMap<(&str, &str), bool> = HashMap::new();
        for change in changes {
            let key = (change.table(), change.id());
            let exists = *present
                .entry(key)
                .or_insert_with(|| tables.get(key.0).is_some_and(|rows| rows.contains_key(key.1)));
            match change {
                Change::Insert { table, id, .. } if exists => {
                    return Err(StoreError::DuplicateKey {
                        table: *table,
                        id: id.clone(),
                    });
                }
                Change::Update { table, id, .. } | Change::Delete { table, id } if !exists => {
                    return Err(StoreError::MissingRow {
                        table: *table,
                        id: id.clone(),
                    });
                }
                Change::Insert { .. } | Change::Update { .. } => {
                    present.insert(key, true);
                }
                Change::Delete { .. } => {
                    present.insert(key, false);
                }
            }
        }

        for change in changes {
            match change {
                Change::Insert { table, id, row } | Change::Update { table, id, row } => {
                    tables.entry(*table).or_default().insert(id.clone(), row.clone());
                }
                Change::Delete { table, id } => {
                    if let Some(rows) = tables.get_mut(table) {
                        rows.remove(id);
                    }
                }
            }
        }

        self.inner.commits.fetch_add(1, Ordering::AcqRel);
        Ok(changes.len())
    }
}

impl UnitOfWorkFactory for MemoryStore {
    fn create(&self, cancellation: CancellationToken) -> Arc<dyn UnitOfWork> {
        Arc::new(self.unit_of_work(cancellation))
    }
}

// ---------------------------------------------------------------------------
// MemoryUnitOfWork
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UowState {
    /// Tracked, not yet saved.
    pending: Vec<Change>,
    /// Saved into the open transaction, not yet committed.
    transaction: Option<Vec<Change>>,
}

impl UowState {
    fn overlay(&self) -> impl Iterator<Item = &Change> {
        self.transaction.iter().flatten().chain(self.pending.iter())
    }
}

/// Per-request unit of work over a [`MemoryStore`].
pub struct MemoryUnitOfWork {
    store: MemoryStore,
    cancellation: CancellationToken,
    state: Mutex<UowState>,
}

impl MemoryUnitOfWork {
    fn ensure_live(&self) -> Result<(), StoreError> {
        if self.cancellation.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn begin_transaction(&self) -> anyhow::Result<()> {
        self.ensure_live()?;
        let mut state = self.state.lock();
        if state.transaction.is_some() {
            return Err(StoreError::TransactionAlreadyActive.into());
        }
        state.transaction = Some(Vec::new());
        debug!("transaction begun");
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<()> {
        self.ensure_live()?;
        let changes = {
            let mut state = self.state.lock();
            let changes = state
                .transaction
                .take()
                .ok_or(StoreError::NoActiveTransaction)?;
            if !state.pending.is_empty() {
                warn!(
                    discarded = state.pending.len(),
                    "committing with unsaved tracked changes; they are discarded"
                );
                state.pending.clear();
            }
            changes
        };
        let applied = self.store.apply(&changes)?;
        debug!(changes = applied, "transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> anyhow::Result<()> {
        // Rollback must work after cancellation, so it does not check the token.
        let mut state = self.state.lock();
        state.pending.clear();
        let discarded = state
            .transaction
            .take()
            .ok_or(StoreError::NoActiveTransaction)?;
        debug!(changes = discarded.len(), "transaction rolled back");
        Ok(())
    }

    async fn save_changes(&self) -> anyhow::Result<usize> {
        self.ensure_live()?;
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);
        let count = pending.len();
        if count == 0 {
            return Ok(0);
        }
        if let Some(transaction) = state.transaction.as_mut() {
            transaction.extend(pending);
            return Ok(count);
        }
        drop(state);
        Ok(self.store.apply(&pending)?)
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().transaction.is_some()
    }

    fn track(&self, change: Change) {
        self.state.lock().pending.push(change);
    }

    async fn find(&self, table: &'static str, id: &str) -> anyhow::Result<Option<Row>> {
        self.ensure_live()?;
        let local = {
            let state = self.state.lock();
            state
                .overlay()
                .filter(|change| change.table() == table && change.id() == id)
                .last()
                .map(|change| match change {
                    Change::Insert { row, .. } | Change::Update { row, .. } => Some(row.clone()),
                    Change::Delete { .. } => None,
                })
        };
        Ok(match local {
            Some(row) => row,
            None => self.store.load(table, id),
        })
    }

    async fn scan(&self, table: &'static str) -> anyhow::Result<Vec<Row>> {
        self.ensure_live()?;
        let mut rows = self.store.load_all(table);
        let state = self.state.lock();
        for change in state.overlay().filter(|change| change.table() == table) {
            match change {
                Change::Insert { id, row, .. } | Change::Update { id, row, .. } => {
                    rows.insert(id.clone(), row.clone());
                }
                Change::Delete { id, .. } => {
                    rows.remove(id);
                }
            }
        }
        Ok(rows.into_values().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

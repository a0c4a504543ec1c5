//! Typed aggregate access on top of a [`UnitOfWork`].
//!
//! Rows are stored as JSON values; [`EntityRepository`] converts them to and
//! from the entity type. Writes are only tracked here and become durable
//! through `save_changes` and `commit` on the unit of work.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use projectdesk_core::Entity;
use serde::{Deserialize, Serialize};

use super::unit_of_work::{Change, UnitOfWork};

/// Aggregate repository, one per entity type.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Loads an aggregate by primary key.
    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<T>>;

    /// Tracks the insertion of a new aggregate.
    fn add(&self, entity: &T) -> anyhow::Result<()>;

    /// Tracks the replacement of an existing aggregate.
    fn update(&self, entity: &T) -> anyhow::Result<()>;

    /// Tracks the deletion of an aggregate.
    fn remove(&self, id: &str);

    /// Starts a filter/sort/paginate composition over every aggregate.
    async fn query(&self) -> anyhow::Result<EntityQuery<T>>;
}

/// [`Repository`] backed by any [`UnitOfWork`].
pub struct EntityRepository<T> {
    uow: Arc<dyn UnitOfWork>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityRepository<T> {
    #[must_use]
    pub fn new(uow: Arc<dyn UnitOfWork>) -> Self {
        Self {
            uow,
            _entity: PhantomData,
        }
    }

    fn encode(entity: &T) -> anyhow::Result<serde_json::Value> {
        serde_json::to_value(entity).with_context(|| format!("encoding {} row", T::TABLE))
    }

    fn decode(row: serde_json::Value) -> anyhow::Result<T> {
        serde_json::from_value(row).with_context(|| format!("decoding {} row", T::TABLE))
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for EntityRepository<T> {
    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<T>> {
        self.uow
            .find(T::TABLE, id)
            .await?
            .map(Self::decode)
            .transpose()
    }

    fn add(&self, entity: &T) -> anyhow::Result<()> {
        self.uow.track(Change::Insert {
            table: T::TABLE,
            id: entity.id(),
            row: Self::encode(entity)?,
        });
        Ok(())
    }

    fn update(&self, entity: &T) -> anyhow::Result<()> {
        self.uow.track(Change::Update {
            table: T::TABLE,
            id: entity.id(),
            row: Self::encode(entity)?,
        });
        Ok(())
    }

    fn remove(&self, id: &str) {
        self.uow.track(Change::Delete {
            table: T::TABLE,
            id: id.to_string(),
        });
    }

    async fn query(&self) -> anyhow::Result<EntityQuery<T>> {
        let items = self
            .uow
            .scan(T::TABLE)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect::<anyhow::Result<Vec<T>>>()?;
        Ok(EntityQuery { items })
    }
}

// ---------------------------------------------------------------------------
// EntityQuery
// ---------------------------------------------------------------------------

/// Materialized result set that can be filtered, sorted and paginated.
#[derive(Debug, Clone)]
pub struct EntityQuery<T> {
    items: Vec<T>,
}

impl<T> EntityQuery<T> {
    #[must_use]
    pub fn filter(mut self, predicate: impl Fn(&T) -> bool) -> Self {
        self.items.retain(|item| predicate(item));
        self
    }

    #[must_use]
    pub fn sort_by_key<K: Ord>(mut self, key: impl FnMut(&T) -> K) -> Self {
        self.items.sort_by_key(key);
        self
    }

    #[must_use]
    pub fn sort_by(mut self, compare: impl FnMut(&T, &T) -> Ordering) -> Self {
        self.items.sort_by(compare);
        self
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    /// Cuts one page out of the result set. `page` is 1-based; 0 is read as 1.
    #[must_use]
    pub fn paginate(self, page: u32, size: u32) -> Page<T> {
        let page = page.max(1);
        let total = self.items.len();
        let skip = (page as usize - 1).saturating_mul(size as usize);
        let items = self
            .items
            .into_iter()
            .skip(skip)
            .take(size as usize)
            .collect();
        Page {
            items,
            page,
            size,
            total,
        }
    }
}

/// One page of a paginated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: usize,
}

impl<T> Page<T> {
    #[must_use]
    pub fn total_pages(&self) -> usize {
        if self.size == 0 {
            0
        } else {
            self.total.div_ceil(self.size as usize)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

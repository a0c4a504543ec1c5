//! Relational store abstraction consumed by the request pipeline.
//!
//! - [`UnitOfWork`]: per-request transaction boundary plus row-level access
//! - [`UnitOfWorkFactory`]: hands out a fresh unit of work for every request
//! - [`Repository`]: typed aggregate access built on a unit of work
//! - [`MemoryStore`]: read-committed in-memory implementation

pub mod memory;
pub mod repository;
pub mod unit_of_work;

pub use memory::{MemoryStore, MemoryUnitOfWork};
pub use repository::{EntityQuery, EntityRepository, Page, Repository};
pub use unit_of_work::{Change, Row, StoreError, UnitOfWork, UnitOfWorkFactory};

//! Row stores behind the data-access layer.
//!
//! A store executes already-validated requests: conditions reference
//! catalog columns only and values are coerced to the column type. Each
//! call is one round-trip with no retry.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::registry::Entity;
use crate::rows::filter::{Condition, Sort};

pub type Row = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub entity: Entity,
    pub conditions: Vec<Condition>,
    pub columns: Option<Vec<String>>,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn new(entity: Entity) -> Self {
        Self { entity, conditions: Vec::new(), columns: None, sort: None, limit: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no {table} row matched")]
    NotFound { table: &'static str },

    #[error("expected one {table} row, found {count}")]
    NotUnique { table: &'static str, count: usize },

    /// The store refused the write (unique, foreign key, not-null...).
    #[error("{0}")]
    Constraint(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Insert rows and return them with server-generated columns filled in.
    async fn insert(&self, entity: Entity, rows: Vec<Row>) -> Result<Vec<Row>, StoreError>;

    async fn select(&self, query: SelectQuery) -> Result<Vec<Row>, StoreError>;

    /// Apply `changes` to every matching row and return the updated rows.
    async fn update(
        &self,
        entity: Entity,
        conditions: Vec<Condition>,
        changes: Row,
    ) -> Result<Vec<Row>, StoreError>;

    /// Delete matching rows and return them. Callers must never pass an
    /// empty condition list; stores refuse it too.
    async fn delete(&self, entity: Entity, conditions: Vec<Condition>) -> Result<Vec<Row>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

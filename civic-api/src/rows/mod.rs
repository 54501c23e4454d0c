//! Generic row data-access layer.
//!
//! Every operation validates against the schema registry before touching
//! the store and reports failures as a [`RowError`] value rather than
//! panicking, so controllers can pick the HTTP status.

pub mod filter;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::registry::{Entity, SchemaMode};
use crate::store::{Row, RowStore, SelectQuery, StoreError};
use filter::{Condition, FilterOp, Sort};

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unsupported filter operator: {0}")]
    UnsupportedOperator(String),
}

pub type RowResult<T> = Result<T, RowError>;

/// Single-column key map, e.g. `key("id", issue_id)`.
pub fn key(column: &str, value: impl Into<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(column.to_string(), value.into());
    map
}

/// Decode store rows into a typed model.
pub fn decode<T: DeserializeOwned>(row: Row) -> RowResult<T> {
    serde_json::from_value(Value::Object(row))
        .map_err(|e| RowError::Store(StoreError::Database(format!("malformed row: {e}"))))
}

pub fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> RowResult<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

#[derive(Clone)]
pub struct RowService {
    store: Arc<dyn RowStore>,
}

impl RowService {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// Validate and insert one object or an array of objects.
    pub async fn insert_row(&self, entity: Entity, values: &Value) -> RowResult<Vec<Row>> {
        let items: Vec<&Value> = match values {
            Value::Array(items) if items.is_empty() => {
                return Err(RowError::Validation(format!("nothing to insert into {entity}")));
            }
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };

        let rows = items
            .into_iter()
            .map(|item| entity.validate(item, SchemaMode::Full).map_err(RowError::Validation))
            .collect::<RowResult<Vec<Row>>>()
            .inspect_err(|e| tracing::debug!(table = %entity, error = %e, "insert rejected"))?;

        let written = self.store.insert(entity, rows).await?;
        tracing::debug!(table = %entity, count = written.len(), "rows inserted");
        Ok(written)
    }

    /// Fetch the one row matching a single key/value pair.
    pub async fn select_by_id(
        &self,
        entity: Entity,
        key: &Map<String, Value>,
        columns: Option<Vec<String>>,
    ) -> RowResult<Row> {
        let condition = key_condition(entity, key)?;
        let mut query = SelectQuery::new(entity);
        query.conditions = vec![condition];
        query.columns = check_columns(entity, columns)?;
        query.limit = Some(2);

        let mut rows = self.store.select(query).await?;
        match rows.len() {
            0 => Err(StoreError::NotFound { table: entity.table() }.into()),
            1 => Ok(rows.remove(0)),
            count => Err(StoreError::NotUnique { table: entity.table(), count }.into()),
        }
    }

    /// Fetch zero or more rows. An empty result is not an error.
    pub async fn select_rows(
        &self,
        entity: Entity,
        filters: Vec<Condition>,
        columns: Option<Vec<String>>,
        sort: Option<Sort>,
    ) -> RowResult<Vec<Row>> {
        let mut query = SelectQuery::new(entity);
        query.conditions = normalize(entity, filters)?;
        query.columns = check_columns(entity, columns)?;
        query.sort = match sort {
            Some(sort) => {
                check_column(entity, &sort.column)?;
                Some(sort)
            }
            None => None,
        };

        Ok(self.store.select(query).await?)
    }

    /// Partially update the row addressed by `key`. Updates are checked
    /// against the all-optional schema, so unknown fields are refused.
    pub async fn update_row_by_id(
        &self,
        entity: Entity,
        key: &Map<String, Value>,
        updates: &Value,
    ) -> RowResult<Row> {
        let condition = key_condition(entity, key)?;
        let changes = entity
            .validate(updates, SchemaMode::Partial)
            .map_err(RowError::Validation)?;
        if changes.is_empty() {
            return Err(RowError::Validation(format!("no {entity} fields to update")));
        }

        let mut rows = self.store.update(entity, vec![condition], changes).await?;
        if rows.len() > 1 {
            tracing::warn!(table = %entity, count = rows.len(), "update by key touched several rows");
        }
        if rows.is_empty() {
            return Err(StoreError::NotFound { table: entity.table() }.into());
        }
        tracing::debug!(table = %entity, "row updated");
        Ok(rows.remove(0))
    }

    /// Delete every row matching `filters`. At least one filter is required;
    /// a table is never emptied unconditionally.
    pub async fn drop_rows(&self, entity: Entity, filters: Vec<Condition>) -> RowResult<Vec<Row>> {
        if filters.is_empty() {
            tracing::warn!(table = %entity, "refused delete without filters");
            return Err(RowError::Validation(format!(
                "at least one filter is required to delete from {entity}"
            )));
        }
        let conditions = normalize(entity, filters)?;

        let deleted = self.store.delete(entity, conditions).await?;
        tracing::info!(table = %entity, count = deleted.len(), "rows deleted");
        Ok(deleted)
    }

    pub async fn drop_row_by_id(&self, entity: Entity, key: &Map<String, Value>) -> RowResult<Row> {
        let condition = key_condition(entity, key)?;
        let mut deleted = self.store.delete(entity, vec![condition]).await?;
        if deleted.is_empty() {
            return Err(StoreError::NotFound { table: entity.table() }.into());
        }
        tracing::info!(table = %entity, "row deleted");
        Ok(deleted.remove(0))
    }

    pub async fn ping(&self) -> RowResult<()> {
        Ok(self.store.ping().await?)
    }
}

fn check_column(entity: Entity, column: &str) -> RowResult<()> {
    entity
        .column(column)
        .map(|_| ())
        .ok_or_else(|| RowError::Validation(format!("unknown column \"{column}\" on {entity}")))
}

fn check_columns(entity: Entity, columns: Option<Vec<String>>) -> RowResult<Option<Vec<String>>> {
    match columns {
        Some(columns) if !columns.is_empty() => {
            for column in &columns {
                check_column(entity, column)?;
            }
            Ok(Some(columns))
        }
        _ => Ok(None),
    }
}

fn key_condition(entity: Entity, key: &Map<String, Value>) -> RowResult<Condition> {
    let mut pairs = key.iter();
    match (pairs.next(), pairs.next()) {
        (None, _) => Err(RowError::Validation(format!("primary key is required for {entity}"))),
        (Some((column, value)), None) => {
            let mut conditions = normalize(entity, vec![Condition::eq(column.clone(), value.clone())])?;
            Ok(conditions.remove(0))
        }
        (Some(_), Some(_)) => Err(RowError::Validation(format!(
            "primary key for {entity} must name exactly one column"
        ))),
    }
}

/// Resolve columns against the catalog and coerce values to column types.
fn normalize(entity: Entity, conditions: Vec<Condition>) -> RowResult<Vec<Condition>> {
    conditions
        .into_iter()
        .map(|mut condition| {
            let column = entity.column(&condition.column).ok_or_else(|| {
                RowError::Validation(format!("unknown column \"{}\" on {entity}", condition.column))
            })?;
            condition.check_shape()?;

            condition.value = match (condition.op, condition.value) {
                (FilterOp::Is | FilterOp::Like | FilterOp::Ilike, value) => value,
                (FilterOp::In, Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .map(|item| column.ty.coerce(column.name, item))
                        .collect::<Result<_, _>>()
                        .map_err(RowError::Validation)?,
                ),
                (_, value) => column.ty.coerce(column.name, &value).map_err(RowError::Validation)?,
            };
            Ok(condition)
        })
        .collect()
}

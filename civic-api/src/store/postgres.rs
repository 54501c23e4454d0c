use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{Array, Jsonb, Nullable, Text};
use serde_json::Value;

use civic_shared::clients::db::DbPool;

use super::{Row, RowStore, SelectQuery, StoreError};
use crate::registry::{ColumnType, Entity};
use crate::rows::filter::{Condition, FilterOp, SortOrder};

/// Postgres store. Statements are compiled from the catalog into
/// parameterised SQL returning each row as `jsonb`, then run on the
/// blocking pool since diesel connections are synchronous.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run(&self, statement: Statement) -> Result<Vec<Row>, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || execute(&pool, statement))
            .await
            .map_err(|e| StoreError::Unavailable(format!("query task failed: {e}")))?
    }
}

#[async_trait]
impl RowStore for PgStore {
    async fn insert(&self, entity: Entity, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        self.run(compile_insert(entity, &rows)?).await
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Row>, StoreError> {
        self.run(compile_select(&query)).await
    }

    async fn update(
        &self,
        entity: Entity,
        conditions: Vec<Condition>,
        changes: Row,
    ) -> Result<Vec<Row>, StoreError> {
        self.run(compile_update(entity, &conditions, &changes)?).await
    }

    async fn delete(&self, entity: Entity, conditions: Vec<Condition>) -> Result<Vec<Row>, StoreError> {
        self.run(compile_delete(entity, &conditions)?).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let statement = Statement { sql: "SELECT '{}'::jsonb AS row".to_string(), binds: Vec::new() };
        self.run(statement).await.map(|_| ())
    }
}

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Jsonb)]
    row: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bind {
    Text(Option<String>),
    TextArray(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub binds: Vec<Bind>,
}

fn execute(pool: &DbPool, statement: Statement) -> Result<Vec<Row>, StoreError> {
    let mut conn = pool
        .get()
        .map_err(|e| StoreError::Unavailable(format!("db pool error: {e}")))?;

    let mut query = diesel::sql_query(statement.sql).into_boxed::<Pg>();
    for bind in statement.binds {
        query = match bind {
            Bind::Text(value) => query.bind::<Nullable<Text>, _>(value),
            Bind::TextArray(values) => query.bind::<Array<Text>, _>(values),
        };
    }

    let rows: Vec<JsonRow> = query.load(&mut conn)?;
    rows.into_iter()
        .map(|r| match r.row {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::Database(format!("expected a row object, got {other}"))),
        })
        .collect()
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation => StoreError::Constraint(info.message().to_string()),
                DatabaseErrorKind::ClosedConnection => StoreError::Unavailable(info.message().to_string()),
                _ => StoreError::Database(info.message().to_string()),
            },
            other => StoreError::Database(other.to_string()),
        }
    }
}

struct SqlBuilder {
    sql: String,
    binds: Vec<Bind>,
}

impl SqlBuilder {
    fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), binds: Vec::new() }
    }

    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn placeholder(&mut self, bind: Bind) -> String {
        self.binds.push(bind);
        format!("${}", self.binds.len())
    }

    fn typed_placeholder(&mut self, value: &Value, ty: ColumnType) -> String {
        let p = self.placeholder(Bind::Text(bind_text(value)));
        format!("{p}::{}", ty.sql_type())
    }

    fn push_where(&mut self, entity: Entity, conditions: &[Condition]) {
        if conditions.is_empty() {
            return;
        }
        let clauses: Vec<String> = conditions.iter().map(|c| self.clause(entity, c)).collect();
        self.push(" WHERE ");
        self.push(&clauses.join(" AND "));
    }

    fn clause(&mut self, entity: Entity, condition: &Condition) -> String {
        let column = quote(&condition.column);
        let ty = entity
            .column(&condition.column)
            .map(|c| c.ty)
            .unwrap_or(ColumnType::Text);

        let comparison = |op: &str, b: &mut Self| format!("{column} {op} {}", b.typed_placeholder(&condition.value, ty));

        match condition.op {
            FilterOp::Eq => comparison("=", self),
            FilterOp::Neq => comparison("<>", self),
            FilterOp::Gt => comparison(">", self),
            FilterOp::Lt => comparison("<", self),
            FilterOp::Gte => comparison(">=", self),
            FilterOp::Lte => comparison("<=", self),
            FilterOp::Like => format!("{column}::text LIKE {}", self.placeholder(Bind::Text(bind_text(&condition.value)))),
            FilterOp::Ilike => format!("{column}::text ILIKE {}", self.placeholder(Bind::Text(bind_text(&condition.value)))),
            FilterOp::In => {
                let values = condition
                    .value
                    .as_array()
                    .map(|items| items.iter().filter_map(bind_text).collect())
                    .unwrap_or_default();
                let p = self.placeholder(Bind::TextArray(values));
                format!("{column} = ANY({p}::{}[])", ty.sql_type())
            }
            FilterOp::Is => match condition.value {
                Value::Bool(true) => format!("{column} IS TRUE"),
                Value::Bool(false) => format!("{column} IS FALSE"),
                _ => format!("{column} IS NULL"),
            },
        }
    }

    fn finish(self) -> Statement {
        Statement { sql: self.sql, binds: self.binds }
    }
}

/// Identifiers only ever come from the catalog; quoting keeps reserved
/// words such as `user` usable.
fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn bind_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn compile_select(query: &SelectQuery) -> Statement {
    let table = query.entity.table();
    let projection = match &query.columns {
        Some(columns) if !columns.is_empty() => {
            let pairs: Vec<String> = columns.iter().map(|c| format!("'{c}', t.{}", quote(c))).collect();
            format!("jsonb_build_object({})", pairs.join(", "))
        }
        _ => "to_jsonb(t)".to_string(),
    };

    let mut builder = SqlBuilder::new(format!("SELECT {projection} AS row FROM {} AS t", quote(table)));
    builder.push_where(query.entity, &query.conditions);

    if let Some(sort) = &query.sort {
        let order = match sort.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        builder.push(&format!(" ORDER BY t.{} {order} NULLS LAST", quote(&sort.column)));
    }
    if let Some(limit) = query.limit {
        builder.push(&format!(" LIMIT {limit}"));
    }
    builder.finish()
}

pub(crate) fn compile_insert(entity: Entity, rows: &[Row]) -> Result<Statement, StoreError> {
    // Union of supplied columns, in catalog order; gaps become DEFAULT.
    let columns: Vec<_> = entity
        .columns()
        .iter()
        .filter(|c| rows.iter().any(|r| r.contains_key(c.name)))
        .collect();
    if rows.is_empty() || columns.is_empty() {
        return Err(StoreError::Database(format!("empty insert into {entity}")));
    }

    let names: Vec<String> = columns.iter().map(|c| quote(c.name)).collect();
    let mut builder = SqlBuilder::new(format!(
        "INSERT INTO {} AS t ({}) VALUES ",
        quote(entity.table()),
        names.join(", ")
    ));

    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let values: Vec<String> = columns
            .iter()
            .map(|c| match row.get(c.name) {
                Some(value) => builder.typed_placeholder(value, c.ty),
                None => "DEFAULT".to_string(),
            })
            .collect();
        tuples.push(format!("({})", values.join(", ")));
    }
    builder.push(&tuples.join(", "));
    builder.push(" RETURNING to_jsonb(t) AS row");
    Ok(builder.finish())
}

pub(crate) fn compile_update(
    entity: Entity,
    conditions: &[Condition],
    changes: &Row,
) -> Result<Statement, StoreError> {
    if conditions.is_empty() {
        return Err(StoreError::Database(format!("refusing unconditional update of {entity}")));
    }

    let mut builder = SqlBuilder::new(format!("UPDATE {} AS t SET ", quote(entity.table())));
    let mut assignments = Vec::with_capacity(changes.len() + 1);
    for (name, value) in changes {
        let ty = entity.column(name).map(|c| c.ty).unwrap_or(ColumnType::Text);
        assignments.push(format!("{} = {}", quote(name), builder.typed_placeholder(value, ty)));
    }
    if entity.tracks_updates() {
        assignments.push(format!("{} = now()", quote("updated_at")));
    }
    builder.push(&assignments.join(", "));
    builder.push_where(entity, conditions);
    builder.push(" RETURNING to_jsonb(t) AS row");
    Ok(builder.finish())
}

pub(crate) fn compile_delete(entity: Entity, conditions: &[Condition]) -> Result<Statement, StoreError> {
    if conditions.is_empty() {
        return Err(StoreError::Database(format!("refusing unconditional delete from {entity}")));
    }

    let mut builder = SqlBuilder::new(format!("DELETE FROM {} AS t", quote(entity.table())));
    builder.push_where(entity, conditions);
    builder.push(" RETURNING to_jsonb(t) AS row");
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::filter::Sort;
    use serde_json::json;

    fn text(s: &str) -> Bind {
        Bind::Text(Some(s.to_string()))
    }

    #[test]
    fn select_with_filters_sort_and_projection() {
        let mut query = SelectQuery::new(Entity::Issues);
        query.conditions = vec![
            Condition::eq("status", "resolved"),
            Condition::new("latitude", FilterOp::Gte, json!(10.5)),
        ];
        query.columns = Some(vec!["id".into(), "title".into()]);
        query.sort = Some(Sort::desc("created_at"));

        let stmt = compile_select(&query);
        assert_eq!(
            stmt.sql,
            "SELECT jsonb_build_object('id', t.\"id\", 'title', t.\"title\") AS row FROM \"issues\" AS t \
             WHERE \"status\" = $1::text AND \"latitude\" >= $2::double precision ORDER BY t.\"created_at\" DESC NULLS LAST"
        );
        assert_eq!(stmt.binds, vec![text("resolved"), text("10.5")]);
    }

    #[test]
    fn in_and_is_operators() {
        let mut query = SelectQuery::new(Entity::Assigned);
        query.conditions = vec![
            Condition::is_in("technician_id", vec![json!("6f1c2a1e-4a4b-4a57-9d33-4f0cf3f8e2a1")]),
            Condition::new("department", FilterOp::Is, Value::Null),
        ];

        let stmt = compile_select(&query);
        assert_eq!(
            stmt.sql,
            "SELECT to_jsonb(t) AS row FROM \"assigned\" AS t \
             WHERE \"technician_id\" = ANY($1::uuid[]) AND \"department\" IS NULL"
        );
        assert_eq!(
            stmt.binds,
            vec![Bind::TextArray(vec!["6f1c2a1e-4a4b-4a57-9d33-4f0cf3f8e2a1".to_string()])]
        );
    }

    #[test]
    fn insert_fills_gaps_with_default() {
        let rows: Vec<Row> = vec![
            json!({ "user_id": "6f1c2a1e-4a4b-4a57-9d33-4f0cf3f8e2a1", "title": "Pothole", "latitude": 45.0 }),
            json!({ "user_id": "6f1c2a1e-4a4b-4a57-9d33-4f0cf3f8e2a1", "title": "Garbage" }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

        let stmt = compile_insert(Entity::Issues, &rows).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"issues\" AS t (\"user_id\", \"title\", \"latitude\") VALUES \
             ($1::uuid, $2::text, $3::double precision), ($4::uuid, $5::text, DEFAULT) \
             RETURNING to_jsonb(t) AS row"
        );
        assert_eq!(stmt.binds.len(), 5);
        assert_eq!(stmt.binds[2], text("45.0"));
    }

    #[test]
    fn update_touches_updated_at_when_tracked() {
        let changes = json!({ "status": "resolved" }).as_object().cloned().unwrap();
        let stmt = compile_update(
            Entity::Issues,
            &[Condition::eq("id", "6f1c2a1e-4a4b-4a57-9d33-4f0cf3f8e2a1")],
            &changes,
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"issues\" AS t SET \"status\" = $1::text, \"updated_at\" = now() \
             WHERE \"id\" = $2::uuid RETURNING to_jsonb(t) AS row"
        );

        let changes = json!({ "name": "Ana" }).as_object().cloned().unwrap();
        let stmt = compile_update(Entity::Users, &[Condition::eq("email", "a@b.co")], &changes).unwrap();
        assert!(!stmt.sql.contains("updated_at"));
    }

    #[test]
    fn unconditional_writes_do_not_compile() {
        assert!(compile_delete(Entity::Assigned, &[]).is_err());
        assert!(compile_update(Entity::Issues, &[], &Row::new()).is_err());
    }

    #[test]
    fn like_casts_column_to_text() {
        let mut query = SelectQuery::new(Entity::Issues);
        query.conditions = vec![Condition::new("title", FilterOp::Ilike, "%pothole%")];
        query.limit = Some(2);
        let stmt = compile_select(&query);
        assert!(stmt.sql.ends_with("WHERE \"title\"::text ILIKE $1 LIMIT 2"));
    }
}

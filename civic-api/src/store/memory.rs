use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{Row, RowStore, SelectQuery, StoreError};
use crate::registry::{ColumnDefault, Entity};
use crate::rows::filter::{Condition, FilterOp, SortOrder};

/// In-process store that mirrors Postgres for column defaults, unique and
/// not-null columns, operator semantics (NULL never equals anything) and
/// `NULLS LAST` ordering.
///
/// Foreign keys are not enforced and deletes do not cascade. Handlers check
/// that referenced citizens, issues and technicians exist before writing.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Entity, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<R>(&self, f: impl FnOnce(&mut HashMap<Entity, Vec<Row>>) -> R) -> Result<R, StoreError> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(f(&mut tables))
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn with_defaults(entity: Entity, mut row: Row) -> Row {
    for column in entity.columns() {
        if row.contains_key(column.name) {
            continue;
        }
        let value = match column.default {
            Some(ColumnDefault::GeneratedId) => Value::String(Uuid::new_v4().to_string()),
            Some(ColumnDefault::Now) => now(),
            Some(ColumnDefault::Text(text)) => Value::String(text.to_string()),
            None => Value::Null,
        };
        row.insert(column.name.to_string(), value);
    }
    row
}

/// Check `candidate` against `existing` rows for unique and not-null
/// violations, skipping the row at `skip` (the row being updated).
fn check_constraints(entity: Entity, existing: &[Row], candidate: &Row, skip: Option<usize>) -> Result<(), StoreError> {
    for column in entity.columns() {
        let value = candidate.get(column.name).unwrap_or(&Value::Null);
        if column.required && value.is_null() {
            return Err(StoreError::Constraint(format!(
                "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                column.name,
                entity.table()
            )));
        }
        if column.unique && !value.is_null() {
            let clash = existing
                .iter()
                .enumerate()
                .any(|(i, row)| Some(i) != skip && row.get(column.name) == Some(value));
            if clash {
                return Err(StoreError::Constraint(format!(
                    "duplicate key value violates unique constraint \"{}_{}_key\"",
                    entity.table(),
                    column.name
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn insert(&self, entity: Entity, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        self.with_tables(|tables| {
            let table = tables.entry(entity).or_default();
            let mut staged: Vec<Row> = Vec::with_capacity(rows.len());
            for row in rows {
                let row = with_defaults(entity, row);
                let mut seen = table.clone();
                seen.extend(staged.iter().cloned());
                check_constraints(entity, &seen, &row, None)?;
                staged.push(row);
            }
            table.extend(staged.iter().cloned());
            Ok(staged)
        })?
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Row>, StoreError> {
        self.with_tables(|tables| {
            let mut rows: Vec<Row> = tables
                .get(&query.entity)
                .map(|table| {
                    table
                        .iter()
                        .filter(|row| query.conditions.iter().all(|c| matches(row, c)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            if let Some(sort) = &query.sort {
                rows.sort_by(|a, b| sort_key_cmp(a.get(&sort.column), b.get(&sort.column), sort.order));
            }
            if let Some(limit) = query.limit {
                rows.truncate(limit);
            }
            if let Some(columns) = query.columns.as_ref().filter(|c| !c.is_empty()) {
                rows = rows
                    .into_iter()
                    .map(|row| {
                        columns
                            .iter()
                            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                            .collect()
                    })
                    .collect();
            }
            rows
        })
    }

    async fn update(
        &self,
        entity: Entity,
        conditions: Vec<Condition>,
        changes: Row,
    ) -> Result<Vec<Row>, StoreError> {
        if conditions.is_empty() {
            return Err(StoreError::Database(format!("refusing unconditional update of {entity}")));
        }
        self.with_tables(|tables| {
            let table = tables.entry(entity).or_default();
            let targets: Vec<usize> = table
                .iter()
                .enumerate()
                .filter(|(_, row)| conditions.iter().all(|c| matches(row, c)))
                .map(|(i, _)| i)
                .collect();

            let mut updated = Vec::with_capacity(targets.len());
            for &i in &targets {
                let mut row = table[i].clone();
                for (name, value) in &changes {
                    row.insert(name.clone(), value.clone());
                }
                if entity.tracks_updates() {
                    row.insert("updated_at".to_string(), now());
                }
                check_constraints(entity, table, &row, Some(i))?;
                updated.push((i, row));
            }
            for (i, row) in &updated {
                table[*i] = row.clone();
            }
            Ok(updated.into_iter().map(|(_, row)| row).collect())
        })?
    }

    async fn delete(&self, entity: Entity, conditions: Vec<Condition>) -> Result<Vec<Row>, StoreError> {
        if conditions.is_empty() {
            return Err(StoreError::Database(format!("refusing unconditional delete from {entity}")));
        }
        self.with_tables(|tables| {
            let table = tables.entry(entity).or_default();
            let (removed, kept): (Vec<Row>, Vec<Row>) = table
                .drain(..)
                .partition(|row| conditions.iter().all(|c| matches(row, c)));
            *table = kept;
            removed
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_tables(|_| ())
    }
}

fn matches(row: &Row, condition: &Condition) -> bool {
    let field = row.get(&condition.column).unwrap_or(&Value::Null);
    let target = &condition.value;

    match condition.op {
        FilterOp::Is => match target {
            Value::Bool(b) => field == &Value::Bool(*b),
            _ => field.is_null(),
        },
        _ if field.is_null() => false,
        FilterOp::Eq => equal(field, target),
        FilterOp::Neq => !target.is_null() && !equal(field, target),
        FilterOp::Gt => compare(field, target) == Some(Ordering::Greater),
        FilterOp::Lt => compare(field, target) == Some(Ordering::Less),
        FilterOp::Gte => matches!(compare(field, target), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lte => matches!(compare(field, target), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Like => like(&as_text(field), target.as_str().unwrap_or_default(), false),
        FilterOp::Ilike => like(&as_text(field), target.as_str().unwrap_or_default(), true),
        FilterOp::In => target
            .as_array()
            .map(|items| items.iter().any(|item| equal(field, item)))
            .unwrap_or(false),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    !b.is_null() && (a == b || compare(a, b) == Some(Ordering::Equal))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// NULLs sort last in either direction.
fn sort_key_cmp(a: Option<&Value>, b: Option<&Value>, order: SortOrder) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = compare(a, b).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
    }
}

/// SQL `LIKE`: `%` any run, `_` one character, `\` escapes.
fn like(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let fold = |s: &str| if case_insensitive { s.to_lowercase() } else { s.to_string() };
    let text: Vec<char> = fold(text).chars().collect();
    let tokens = like_tokens(&fold(pattern));

    // reach[j]: the tokens seen so far match the first j characters.
    let mut reach = vec![false; text.len() + 1];
    reach[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::AnyRun => {
                let mut seen = false;
                for (j, slot) in next.iter_mut().enumerate() {
                    seen |= reach[j];
                    *slot = seen;
                }
            }
            LikeToken::One => {
                for j in 1..=text.len() {
                    next[j] = reach[j - 1];
                }
            }
            LikeToken::Char(c) => {
                for j in 1..=text.len() {
                    next[j] = reach[j - 1] && text[j - 1] == *c;
                }
            }
        }
        reach = next;
    }
    reach[text.len()]
}

#[derive(Debug, PartialEq)]
enum LikeToken {
    AnyRun,
    One,
    Char(char),
}

/// Consecutive `%` collapse into one token.
fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => {
                if tokens.last() != Some(&LikeToken::AnyRun) {
                    tokens.push(LikeToken::AnyRun);
                }
            }
            '_' => tokens.push(LikeToken::One),
            '\\' => tokens.push(LikeToken::Char(chars.next().unwrap_or('\\'))),
            c => tokens.push(LikeToken::Char(c)),
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::filter::Sort;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn technician(name: &str, email: &str) -> Row {
        row(json!({ "name": name, "email": email, "phone": "5550100", "department": "Roads" }))
    }

    #[tokio::test]
    async fn insert_fills_server_defaults() {
        let store = MemoryStore::new();
        let rows = store
            .insert(
                Entity::Issues,
                vec![row(json!({ "user_id": "6f1c2a1e-4a4b-4a57-9d33-4f0cf3f8e2a1", "title": "Pothole" }))],
            )
            .await
            .unwrap();

        let issue = &rows[0];
        assert!(Uuid::parse_str(issue["id"].as_str().unwrap()).is_ok());
        assert_eq!(issue["status"], "pending");
        assert_eq!(issue["priority"], "medium");
        assert_eq!(issue["department"], Value::Null);
        assert!(issue["created_at"].is_string());
    }

    #[tokio::test]
    async fn unique_columns_are_enforced_within_a_batch() {
        let store = MemoryStore::new();
        let err = store
            .insert(
                Entity::Technicians,
                vec![technician("A", "same@city.gov"), technician("B", "same@city.gov")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(msg) if msg.contains("technicians_email_key")));

        let all = store.select(SelectQuery::new(Entity::Technicians)).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn select_sorts_with_nulls_last_and_projects() {
        let store = MemoryStore::new();
        for (title, lat) in [("a", json!(10.0)), ("b", Value::Null), ("c", json!(-5.0))] {
            store
                .insert(
                    Entity::Issues,
                    vec![row(json!({ "user_id": "6f1c2a1e-4a4b-4a57-9d33-4f0cf3f8e2a1", "title": title, "latitude": lat }))],
                )
                .await
                .unwrap();
        }

        let mut query = SelectQuery::new(Entity::Issues);
        query.sort = Some(Sort::asc("latitude"));
        query.columns = Some(vec!["title".to_string()]);
        let titles: Vec<Value> = store.select(query).await.unwrap().into_iter().map(|r| r["title"].clone()).collect();
        assert_eq!(titles, vec![json!("c"), json!("a"), json!("b")]);

        let mut query = SelectQuery::new(Entity::Issues);
        query.sort = Some(Sort::desc("latitude"));
        let titles: Vec<Value> = store.select(query).await.unwrap().into_iter().map(|r| r["title"].clone()).collect();
        assert_eq!(titles, vec![json!("a"), json!("c"), json!("b")]);
    }

    #[test]
    fn operator_semantics() {
        let r = row(json!({ "title": "Deep Pothole", "latitude": 45.0, "department": null }));
        assert!(matches(&r, &Condition::new("title", FilterOp::Ilike, "%pothole%")));
        assert!(!matches(&r, &Condition::new("title", FilterOp::Like, "%pothole%")));
        assert!(matches(&r, &Condition::new("latitude", FilterOp::Gt, 44.5)));
        assert!(matches(&r, &Condition::new("latitude", FilterOp::Lte, 45)));
        assert!(matches(&r, &Condition::new("department", FilterOp::Is, Value::Null)));
        assert!(!matches(&r, &Condition::new("department", FilterOp::Neq, "Roads")));
        assert!(matches(&r, &Condition::is_in("latitude", vec![json!(1), json!(45)])));
    }

    #[test]
    fn like_patterns() {
        assert!(like("pothole", "p_thole", false));
        assert!(like("50% off", "50\\%%", false));
        assert!(!like("500 off", "50\\%%", false));
        assert!(like("", "%", false));
        assert!(!like("", "_", false));
        assert!(like("trailing\\", "trailing\\", false));
    }

    #[test]
    fn repeated_wildcards_stay_linear() {
        assert_eq!(like_tokens("%%%a%%"), vec![LikeToken::AnyRun, LikeToken::Char('a'), LikeToken::AnyRun]);

        let title = "a".repeat(5_000);
        let pattern = format!("{}x", "%".repeat(40));
        assert!(!like(&title, &pattern, false));
        assert!(like(&format!("{title}x"), &pattern, true));
    }
}

//! Schema registry: the column catalog and field rules for every table the
//! row layer is allowed to touch.
//!
//! Two contracts per entity. [`SchemaMode::Full`] is the insert contract
//! (required fields present, every field typed and formatted).
//! [`SchemaMode::Partial`] is the same rule set with every field optional,
//! used for partial updates. Both reject fields the entity does not declare.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    AdminChanges, AssignmentChanges, IssueChanges, NewAdmin, NewAssignment, NewIssue,
    NewTechnician, NewUser, TechnicianChanges, UserChanges,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Users,
    Admins,
    Technicians,
    Issues,
    Assigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    Integer,
    Double,
    Timestamp,
}

/// Value the store fills in when an insert omits the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    GeneratedId,
    Now,
    Text(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub required: bool,
    pub unique: bool,
    pub default: Option<ColumnDefault>,
}

impl Column {
    const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty, required: false, unique: false, default: None }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    const fn default_to(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// Written only by the store, never by a client payload.
    pub fn is_server_managed(&self) -> bool {
        matches!(self.default, Some(ColumnDefault::GeneratedId | ColumnDefault::Now))
    }
}

use ColumnType as T;

const ID: Column = Column::new("id", T::Uuid).default_to(ColumnDefault::GeneratedId);
const CREATED_AT: Column = Column::new("created_at", T::Timestamp).default_to(ColumnDefault::Now);
const UPDATED_AT: Column = Column::new("updated_at", T::Timestamp).default_to(ColumnDefault::Now);

const USERS: &[Column] = &[
    ID,
    Column::new("name", T::Text).required(),
    Column::new("email", T::Text).required().unique(),
    Column::new("phone", T::Text).required(),
    Column::new("age", T::Integer),
    CREATED_AT,
];

const ADMINS: &[Column] = &[
    ID,
    Column::new("email", T::Text).required().unique(),
    Column::new("password", T::Text).required(),
    Column::new("department", T::Text).required(),
    CREATED_AT,
    UPDATED_AT,
];

const TECHNICIANS: &[Column] = &[
    ID,
    Column::new("name", T::Text).required(),
    Column::new("email", T::Text).required().unique(),
    Column::new("phone", T::Text).required(),
    Column::new("department", T::Text).required(),
    CREATED_AT,
];

const ISSUES: &[Column] = &[
    ID,
    Column::new("user_id", T::Uuid).required(),
    Column::new("title", T::Text).required(),
    Column::new("description", T::Text),
    Column::new("image_url", T::Text),
    Column::new("latitude", T::Double),
    Column::new("longitude", T::Double),
    Column::new("status", T::Text).default_to(ColumnDefault::Text("pending")),
    Column::new("priority", T::Text).default_to(ColumnDefault::Text("medium")),
    Column::new("department", T::Text),
    Column::new("resolution_image", T::Text),
    CREATED_AT,
    UPDATED_AT,
];

const ASSIGNED: &[Column] = &[
    ID,
    Column::new("issue_id", T::Uuid).required(),
    Column::new("technician_id", T::Uuid).required(),
    Column::new("department", T::Text),
    Column::new("status", T::Text).default_to(ColumnDefault::Text("assigned")),
    CREATED_AT,
    UPDATED_AT,
];

/// Insert contract or its all-optional variant for partial updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    Full,
    Partial,
}

impl Entity {
    pub const ALL: [Entity; 5] = [
        Entity::Users,
        Entity::Admins,
        Entity::Technicians,
        Entity::Issues,
        Entity::Assigned,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Entity::Users => "users",
            Entity::Admins => "admins",
            Entity::Technicians => "technicians",
            Entity::Issues => "issues",
            Entity::Assigned => "assigned",
        }
    }

    pub fn from_table(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.table() == name)
    }

    pub fn columns(&self) -> &'static [Column] {
        match self {
            Entity::Users => USERS,
            Entity::Admins => ADMINS,
            Entity::Technicians => TECHNICIANS,
            Entity::Issues => ISSUES,
            Entity::Assigned => ASSIGNED,
        }
    }

    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }

    /// Tables whose `updated_at` is refreshed on every update.
    pub fn tracks_updates(&self) -> bool {
        self.column("updated_at").is_some()
    }

    /// Check a payload against this entity's contract and return it
    /// normalized (typed values, absent optionals dropped). The error is
    /// the first violated rule, in catalog order.
    pub fn validate(&self, payload: &Value, mode: SchemaMode) -> Result<Map<String, Value>, String> {
        let object = payload
            .as_object()
            .ok_or_else(|| format!("{} payload must be an object", self.table()))?;

        for key in object.keys() {
            match self.column(key) {
                Some(column) if !column.is_server_managed() => {}
                _ => return Err(format!("\"{key}\" is not allowed")),
            }
        }

        if mode == SchemaMode::Full {
            if let Some(missing) = self
                .columns()
                .iter()
                .filter(|c| c.required)
                .find(|c| object.get(c.name).map_or(true, Value::is_null))
            {
                return Err(format!("\"{}\" is required", missing.name));
            }
        }

        match (self, mode) {
            (Entity::Users, SchemaMode::Full) => self.check::<NewUser>(payload),
            (Entity::Users, SchemaMode::Partial) => self.check::<UserChanges>(payload),
            (Entity::Admins, SchemaMode::Full) => self.check::<NewAdmin>(payload),
            (Entity::Admins, SchemaMode::Partial) => self.check::<AdminChanges>(payload),
            (Entity::Technicians, SchemaMode::Full) => self.check::<NewTechnician>(payload),
            (Entity::Technicians, SchemaMode::Partial) => self.check::<TechnicianChanges>(payload),
            (Entity::Issues, SchemaMode::Full) => self.check::<NewIssue>(payload),
            (Entity::Issues, SchemaMode::Partial) => self.check::<IssueChanges>(payload),
            (Entity::Assigned, SchemaMode::Full) => self.check::<NewAssignment>(payload),
            (Entity::Assigned, SchemaMode::Partial) => self.check::<AssignmentChanges>(payload),
        }
    }

    fn check<R>(&self, payload: &Value) -> Result<Map<String, Value>, String>
    where
        R: DeserializeOwned + Serialize + Validate,
    {
        let typed: R = serde_json::from_value(payload.clone()).map_err(|e| e.to_string())?;

        if let Err(errors) = typed.validate() {
            let field_errors = errors.field_errors();
            let first = self
                .columns()
                .iter()
                .find_map(|c| field_errors.get(c.name).and_then(|errs| errs.first()).map(|e| (c.name, e)));
            return Err(match first {
                Some((field, err)) => err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("\"{field}\" is invalid ({})", err.code)),
                None => errors.to_string(),
            });
        }

        match serde_json::to_value(&typed).map_err(|e| e.to_string())? {
            Value::Object(map) => Ok(map),
            _ => Err(format!("{} payload must be an object", self.table())),
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

impl ColumnType {
    /// Postgres type a text bind is cast to.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Uuid => "uuid",
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Double => "double precision",
            ColumnType::Timestamp => "timestamptz",
        }
    }

    /// Coerce a filter or key value to this column's JSON shape, so `"45"`
    /// compares as a number against a double column.
    pub fn coerce(&self, column: &str, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let invalid = || format!("\"{column}\" expects a {} value, got {value}", self.sql_type());
        match self {
            ColumnType::Text => Ok(match value {
                Value::String(_) => value.clone(),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Bool(b) => Value::String(b.to_string()),
                _ => return Err(invalid()),
            }),
            ColumnType::Uuid => value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(|id| Value::String(id.to_string()))
                .ok_or_else(invalid),
            ColumnType::Integer => match value {
                Value::Number(n) if n.is_i64() => Ok(value.clone()),
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            ColumnType::Double => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                    .ok_or_else(invalid),
                _ => Err(invalid()),
            },
            ColumnType::Timestamp => value
                .as_str()
                .filter(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .map(|_| value.clone())
                .ok_or_else(invalid),
        }
    }
}

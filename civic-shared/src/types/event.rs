use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RabbitMQ Event envelope wrapping all domain events.
///
/// Routing key format: `civic.{domain}.{entity}.{action}`
/// Example: `civic.issues.issue.created`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            data,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// RabbitMQ routing keys
pub mod routing_keys {
    pub const ISSUE_CREATED: &str = "civic.issues.issue.created";
    pub const ISSUE_ASSIGNED: &str = "civic.issues.issue.assigned";
    pub const ISSUE_RESOLVED: &str = "civic.issues.issue.resolved";
}

pub mod payloads {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct IssueCreated {
        pub issue_id: Uuid,
        pub user_id: Uuid,
        pub title: String,
        pub department: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct IssueAssigned {
        pub assignment_id: Uuid,
        pub issue_id: Uuid,
        pub technician_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct IssueResolved {
        pub assignment_id: Uuid,
        pub issue_id: Uuid,
        pub technician_id: Uuid,
    }
}

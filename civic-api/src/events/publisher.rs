use uuid::Uuid;

use civic_shared::clients::rabbitmq::RabbitMQClient;
use civic_shared::types::event::{payloads, routing_keys, Event};

use crate::models::{Assignment, Issue};

const SOURCE: &str = "civic-api";

pub async fn publish_issue_created(rabbitmq: Option<&RabbitMQClient>, issue: &Issue) {
    let Some(rabbitmq) = rabbitmq else {
        tracing::debug!(issue_id = %issue.id, "no broker configured, issue.created not published");
        return;
    };

    let event = Event::new(
        SOURCE,
        routing_keys::ISSUE_CREATED,
        payloads::IssueCreated {
            issue_id: issue.id,
            user_id: issue.user_id,
            title: issue.title.clone(),
            department: issue.department.clone(),
        },
    )
    .with_user(issue.user_id);

    if let Err(e) = rabbitmq.publish(routing_keys::ISSUE_CREATED, &event).await {
        tracing::error!(error = %e, issue_id = %issue.id, "failed to publish issue.created event");
    }
}

pub async fn publish_issue_assigned(rabbitmq: Option<&RabbitMQClient>, assignment: &Assignment) {
    let Some(rabbitmq) = rabbitmq else { return };

    let event = Event::new(
        SOURCE,
        routing_keys::ISSUE_ASSIGNED,
        payloads::IssueAssigned {
            assignment_id: assignment.id,
            issue_id: assignment.issue_id,
            technician_id: assignment.technician_id,
        },
    );

    if let Err(e) = rabbitmq.publish(routing_keys::ISSUE_ASSIGNED, &event).await {
        tracing::error!(error = %e, assignment_id = %assignment.id, "failed to publish issue.assigned event");
    }
}

pub async fn publish_issue_resolved(rabbitmq: Option<&RabbitMQClient>, assignment: &Assignment, resolved_by: Option<Uuid>) {
    let Some(rabbitmq) = rabbitmq else { return };

    let mut event = Event::new(
        SOURCE,
        routing_keys::ISSUE_RESOLVED,
        payloads::IssueResolved {
            assignment_id: assignment.id,
            issue_id: assignment.issue_id,
            technician_id: assignment.technician_id,
        },
    );
    if let Some(admin_id) = resolved_by {
        event = event.with_user(admin_id);
    }

    if let Err(e) = rabbitmq.publish(routing_keys::ISSUE_RESOLVED, &event).await {
        tracing::error!(error = %e, assignment_id = %assignment.id, "failed to publish issue.resolved event");
    }
}

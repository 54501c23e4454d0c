use std::sync::Arc;

use async_trait::async_trait;
use futures_lite::StreamExt;
use lapin::options::BasicAckOptions;
use uuid::Uuid;

use civic_shared::clients::classifier::{Classification, ClassifierClient, ClassifierError};
use civic_shared::clients::rabbitmq::RabbitMQClient;
use civic_shared::types::event::{payloads, routing_keys, Event};

const QUEUE: &str = "civic-api.issue.created";

/// Anything that can assign a department to an issue by id.
#[async_trait]
pub trait IssueClassifier: Send + Sync {
    async fn classify(&self, issue_id: Uuid) -> Result<Classification, ClassifierError>;
}

#[async_trait]
impl IssueClassifier for ClassifierClient {
    async fn classify(&self, issue_id: Uuid) -> Result<Classification, ClassifierError> {
        ClassifierClient::classify(self, issue_id).await
    }
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Issue already carried a department.
    Skipped,
    Classified(Option<String>),
    Failed(String),
}

/// React to one `issue.created` event. Never retries; errors are logged
/// and reported as [`Outcome::Failed`].
pub async fn handle_issue_created(classifier: &dyn IssueClassifier, event: &payloads::IssueCreated) -> Outcome {
    if event.department.as_deref().is_some_and(|d| !d.trim().is_empty()) {
        tracing::debug!(issue_id = %event.issue_id, "issue already has a department");
        return Outcome::Skipped;
    }

    match classifier.classify(event.issue_id).await {
        Ok(classification) => {
            tracing::info!(
                issue_id = %event.issue_id,
                department = ?classification.department,
                confidence = ?classification.confidence,
                "issue classified"
            );
            Outcome::Classified(classification.department)
        }
        Err(e) => {
            tracing::error!(error = %e, issue_id = %event.issue_id, "issue classification failed");
            Outcome::Failed(e.to_string())
        }
    }
}

/// Consume `issue.created` events until the consumer closes. Every
/// delivery is acked, whatever the outcome.
pub async fn listen_issue_created(
    rabbitmq: &RabbitMQClient,
    classifier: Arc<dyn IssueClassifier>,
) -> anyhow::Result<()> {
    let mut consumer = rabbitmq.subscribe(QUEUE, &[routing_keys::ISSUE_CREATED]).await?;

    tracing::info!("listening for issue.created events");

    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => {
                match serde_json::from_slice::<Event<payloads::IssueCreated>>(&delivery.data) {
                    Ok(event) => {
                        handle_issue_created(classifier.as_ref(), &event.data).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to deserialize issue.created event");
                    }
                }
                let _ = delivery.ack(BasicAckOptions::default()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "consumer error");
            }
        }
    }

    Ok(())
}

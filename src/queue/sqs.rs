//! Amazon SQS queue backend.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::aws::sdk_config;
use crate::config::{AwsConfig, ProcessorConfig};
use crate::error::PipelineError;
use crate::queue::{MAX_MESSAGES_PER_POLL, QueueBackend, QueueMessage, long_poll_wait_seconds};

/// Fixed delay between queue creation attempts during startup.
const CREATE_QUEUE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Consumer bound to one SQS queue.
#[derive(Debug, Clone)]
pub struct SqsQueueBackend {
    client: Client,
    queue_url: String,
    wait_time_seconds: u64,
}

impl SqsQueueBackend {
    /// Build the client and make sure the queue exists.
    ///
    /// Queue creation is idempotent and retried forever, which blocks the
    /// processor until the queue service is reachable.
    pub async fn connect(
        aws: &AwsConfig,
        processor: &ProcessorConfig,
    ) -> Result<Self, PipelineError> {
        let config = sdk_config(aws, processor.sqs_endpoint_url.as_deref()).await?;
        let client = Client::new(&config);
        let queue_url = ensure_queue(&client, &processor.queue_name).await;

        info!(queue_url = %queue_url, "Connected to SQS queue");
        Ok(Self::from_parts(client, queue_url, aws.read_timeout_seconds))
    }

    pub fn from_parts(client: Client, queue_url: String, read_timeout_seconds: u64) -> Self {
        Self {
            client,
            queue_url,
            wait_time_seconds: long_poll_wait_seconds(read_timeout_seconds),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

async fn ensure_queue(client: &Client, queue_name: &str) -> String {
    loop {
        match client.create_queue().queue_name(queue_name).send().await {
            Ok(output) => match output.queue_url() {
                Some(url) => return url.to_string(),
                None => error!(queue_name, "Queue creation returned no queue URL"),
            },
            Err(err) => {
                error!(queue_name, error = %DisplayErrorContext(&err), "Error creating queue");
            }
        }
        sleep(CREATE_QUEUE_RETRY_DELAY).await;
    }
}

#[async_trait]
impl QueueBackend for SqsQueueBackend {
    async fn receive(&self) -> Result<Vec<QueueMessage>, PipelineError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(MAX_MESSAGES_PER_POLL)
            .visibility_timeout(0)
            .wait_time_seconds(self.wait_time_seconds as i32)
            .send()
            .await
            .map_err(|err| PipelineError::queue("receiving messages", DisplayErrorContext(&err)))?;

        let mut batch = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            let Some(receipt_handle) = message.receipt_handle() else {
                warn!(
                    message_id = message.message_id().unwrap_or("unknown"),
                    "Skipping message without receipt handle"
                );
                continue;
            };
            batch.push(QueueMessage {
                message_id: message.message_id().unwrap_or("unknown").to_string(),
                receipt_handle: receipt_handle.to_string(),
                body: message.body().unwrap_or_default().to_string(),
            });
        }

        debug!(count = batch.len(), "Received message batch");
        Ok(batch)
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), PipelineError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map_err(|err| PipelineError::queue("deleting message", DisplayErrorContext(&err)))?;
        Ok(())
    }
}

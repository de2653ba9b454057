//! Amazon SES mail sender.

use async_trait::async_trait;
use aws_sdk_ses::Client;
use aws_sdk_ses::error::DisplayErrorContext;
use aws_sdk_ses::types::{Body, Content, Destination, Message};
use tracing::debug;

use crate::alerts::email::{MailSender, OutboundMail};
use crate::aws::sdk_config;
use crate::config::AwsConfig;
use crate::error::PipelineError;

const CHARSET: &str = "UTF-8";

#[derive(Debug, Clone)]
pub struct SesMailSender {
    client: Client,
}

impl SesMailSender {
    pub async fn connect(aws: &AwsConfig, endpoint_url: Option<&str>) -> Result<Self, PipelineError> {
        let config = sdk_config(aws, endpoint_url).await?;
        Ok(Self::from_client(Client::new(&config)))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn utf8_content(data: &str) -> Result<Content, PipelineError> {
    Content::builder()
        .data(data)
        .charset(CHARSET)
        .build()
        .map_err(|err| PipelineError::mail("building email", err))
}

#[async_trait]
impl MailSender for SesMailSender {
    async fn send(&self, mail: &OutboundMail) -> Result<(), PipelineError> {
        let destination = Destination::builder()
            .set_to_addresses(Some(mail.to.clone()))
            .build();
        let message = Message::builder()
            .subject(utf8_content(&mail.subject)?)
            .body(Body::builder().text(utf8_content(&mail.body)?).build())
            .build();

        let output = self
            .client
            .send_email()
            .source(&mail.source)
            .destination(destination)
            .message(message)
            .send()
            .await
            .map_err(|err| PipelineError::mail("sending email", DisplayErrorContext(&err)))?;

        debug!(message_id = output.message_id(), "Email accepted by SES");
        Ok(())
    }

    async fn verify_sender(&self, address: &str) -> Result<(), PipelineError> {
        self.client
            .verify_email_identity()
            .email_address(address)
            .send()
            .await
            .map_err(|err| PipelineError::mail("verifying sender", DisplayErrorContext(&err)))?;
        Ok(())
    }
}

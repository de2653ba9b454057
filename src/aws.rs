//! AWS SDK configuration shared by the SQS consumer and the SES mail sender.

use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;

use crate::config::{AwsConfig, ConfigError};

const CREDENTIALS_PROVIDER: &str = "bec-alerts";

/// Build an SDK config from explicit static credentials. `endpoint_url`
/// points the client at a non-AWS endpoint such as localstack.
pub async fn sdk_config(
    aws: &AwsConfig,
    endpoint_url: Option<&str>,
) -> Result<SdkConfig, ConfigError> {
    aws.validate()?;
    let access_key_id = aws
        .access_key_id
        .clone()
        .ok_or(ConfigError::MissingAwsAccessKeyId)?;
    let secret_access_key = aws
        .secret_access_key
        .clone()
        .ok_or(ConfigError::MissingAwsSecretAccessKey)?;
    let region = aws.region.clone().ok_or(ConfigError::MissingAwsRegion)?;

    let credentials = Credentials::new(
        access_key_id,
        secret_access_key,
        None,
        None,
        CREDENTIALS_PROVIDER,
    );
    let timeouts = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(aws.connect_timeout_seconds))
        .read_timeout(Duration::from_secs(aws.read_timeout_seconds))
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region))
        .credentials_provider(credentials)
        .timeout_config(timeouts);
    if let Some(url) = endpoint_url {
        loader = loader.endpoint_url(url);
    }

    Ok(loader.load().await)
}

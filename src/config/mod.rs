//! Configuration loading for the alerting pipeline.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `BEC_ALERTS_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "BEC_ALERTS_";

/// Application configuration derived from `BEC_ALERTS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
}

/// Credentials and client tuning shared by the queue and mail clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AwsConfig {
    /// Environment variable: `BEC_ALERTS_AWS_ACCESS_KEY_ID` (falls back to `AWS_ACCESS_KEY_ID`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    /// Environment variable: `BEC_ALERTS_AWS_SECRET_ACCESS_KEY` (falls back to `AWS_SECRET_ACCESS_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    /// Environment variable: `BEC_ALERTS_AWS_REGION` (falls back to `AWS_DEFAULT_REGION`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default = "default_aws_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_aws_read_timeout_seconds")]
    pub read_timeout_seconds: u64,
}

/// Ingestion loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ProcessorConfig {
    /// Delay after a failed poll before the loop resumes (default: 20)
    #[serde(default = "default_processor_sleep_delay_seconds")]
    pub sleep_delay_seconds: u64,
    #[serde(default = "default_processor_queue_name")]
    pub queue_name: String,
    /// Overrides the SQS endpoint, e.g. for a localstack container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqs_endpoint_url: Option<String>,
}

/// Evaluation loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WatcherConfig {
    /// Delay between evaluation passes (default: 300)
    #[serde(default = "default_watcher_sleep_delay_seconds")]
    pub sleep_delay_seconds: u64,
    /// Run a single pass and exit
    #[serde(default)]
    pub once: bool,
    /// Print would-be alerts instead of sending email
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_watcher_from_email")]
    pub from_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ses_endpoint_url: Option<String>,
    /// Ask SES to verify `from_email` when the email backend starts
    #[serde(default)]
    pub verify_email: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            aws: AwsConfig::default(),
            processor: ProcessorConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            access_key_id: None,
            secret_access_key: None,
            region: None,
            connect_timeout_seconds: default_aws_connect_timeout_seconds(),
            read_timeout_seconds: default_aws_read_timeout_seconds(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sleep_delay_seconds: default_processor_sleep_delay_seconds(),
            queue_name: default_processor_queue_name(),
            sqs_endpoint_url: None,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            sleep_delay_seconds: default_watcher_sleep_delay_seconds(),
            once: false,
            dry_run: false,
            from_email: default_watcher_from_email(),
            ses_endpoint_url: None,
            verify_email: false,
        }
    }
}

impl AwsConfig {
    /// Validate that credentials and client timeouts are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key_id.is_none() {
            return Err(ConfigError::MissingAwsAccessKeyId);
        }
        if self.secret_access_key.is_none() {
            return Err(ConfigError::MissingAwsSecretAccessKey);
        }
        if self.region.is_none() {
            return Err(ConfigError::MissingAwsRegion);
        }
        if self.read_timeout_seconds == 0 {
            return Err(ConfigError::InvalidReadTimeout {
                value: self.read_timeout_seconds,
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.aws.access_key_id.is_some() {
            config.aws.access_key_id = Some("[REDACTED]".to_string());
        }
        if config.aws.secret_access_key.is_some() {
            config.aws.secret_access_key = Some("[REDACTED]".to_string());
        }
        if config.database_url.contains('@') {
            config.database_url = "[REDACTED]".to_string();
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the settings shared by every command.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }
        if self.database_url.is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        Ok(())
    }

    /// Validates the settings required by the ingestion loop.
    pub fn validate_for_processor(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.processor.queue_name.trim().is_empty() {
            return Err(ConfigError::MissingQueueName);
        }
        self.aws.validate()
    }

    /// Validates the settings required by the evaluation loop. Credentials
    /// are only needed when alerts are actually emailed.
    pub fn validate_for_watcher(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.watcher.dry_run {
            return Ok(());
        }
        if self.watcher.from_email.trim().is_empty() {
            return Err(ConfigError::MissingFromEmail);
        }
        self.aws.validate()
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://bec-alerts.sqlite?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_aws_connect_timeout_seconds() -> u64 {
    30
}

fn default_aws_read_timeout_seconds() -> u64 {
    30
}

fn default_processor_sleep_delay_seconds() -> u64 {
    20
}

fn default_processor_queue_name() -> String {
    "sentry_errors".to_string()
}

fn default_watcher_sleep_delay_seconds() -> u64 {
    300 // 5 minutes
}

fn default_watcher_from_email() -> String {
    "notifications@sentry.prod.mozaws.net".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database URL is missing; set BEC_ALERTS_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("queue name is missing; set BEC_ALERTS_PROCESSOR_QUEUE_NAME")]
    MissingQueueName,
    #[error("sender address is missing; set BEC_ALERTS_WATCHER_FROM_EMAIL")]
    MissingFromEmail,
    #[error("AWS access key id is missing; set BEC_ALERTS_AWS_ACCESS_KEY_ID or AWS_ACCESS_KEY_ID")]
    MissingAwsAccessKeyId,
    #[error(
        "AWS secret access key is missing; set BEC_ALERTS_AWS_SECRET_ACCESS_KEY or AWS_SECRET_ACCESS_KEY"
    )]
    MissingAwsSecretAccessKey,
    #[error("AWS region is missing; set BEC_ALERTS_AWS_REGION or AWS_DEFAULT_REGION")]
    MissingAwsRegion,
    #[error("AWS read timeout must be positive, got {value}")]
    InvalidReadTimeout { value: u64 },
}

/// Loads configuration using layered `.env` files and `BEC_ALERTS_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration. Command-specific validation is left to the
    /// caller since the processor and watcher need different settings.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Standard AWS variables are honoured when no prefixed value is set
        let aws = AwsConfig {
            access_key_id: take_string(&mut layered, "AWS_ACCESS_KEY_ID")
                .or_else(|| non_empty_env("AWS_ACCESS_KEY_ID")),
            secret_access_key: take_string(&mut layered, "AWS_SECRET_ACCESS_KEY")
                .or_else(|| non_empty_env("AWS_SECRET_ACCESS_KEY")),
            region: take_string(&mut layered, "AWS_REGION")
                .or_else(|| non_empty_env("AWS_DEFAULT_REGION")),
            connect_timeout_seconds: take_parsed(&mut layered, "AWS_CONNECT_TIMEOUT_SECONDS")?
                .unwrap_or_else(default_aws_connect_timeout_seconds),
            read_timeout_seconds: take_parsed(&mut layered, "AWS_READ_TIMEOUT_SECONDS")?
                .unwrap_or_else(default_aws_read_timeout_seconds),
        };

        let processor = ProcessorConfig {
            sleep_delay_seconds: take_parsed(&mut layered, "PROCESSOR_SLEEP_DELAY_SECONDS")?
                .unwrap_or_else(default_processor_sleep_delay_seconds),
            queue_name: take_string(&mut layered, "PROCESSOR_QUEUE_NAME")
                .unwrap_or_else(default_processor_queue_name),
            sqs_endpoint_url: take_string(&mut layered, "PROCESSOR_SQS_ENDPOINT_URL"),
        };

        let watcher = WatcherConfig {
            sleep_delay_seconds: take_parsed(&mut layered, "WATCHER_SLEEP_DELAY_SECONDS")?
                .unwrap_or_else(default_watcher_sleep_delay_seconds),
            once: take_parsed(&mut layered, "WATCHER_ONCE")?.unwrap_or(false),
            dry_run: take_parsed(&mut layered, "WATCHER_DRY_RUN")?.unwrap_or(false),
            from_email: take_string(&mut layered, "WATCHER_FROM_EMAIL")
                .unwrap_or_else(default_watcher_from_email),
            ses_endpoint_url: take_string(&mut layered, "WATCHER_SES_ENDPOINT_URL"),
            verify_email: take_parsed(&mut layered, "WATCHER_VERIFY_EMAIL")?.unwrap_or(false),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            aws,
            processor,
            watcher,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(
    values: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(values, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
        None => Ok(None),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentialed() -> AppConfig {
        let mut config = AppConfig::default();
        config.aws.access_key_id = Some("AKIDEXAMPLE".to_string());
        config.aws.secret_access_key = Some("secret".to_string());
        config.aws.region = Some("us-west-2".to_string());
        config
    }

    #[test]
    fn dry_run_watcher_needs_no_credentials() {
        let mut config = AppConfig::default();
        config.watcher.dry_run = true;
        assert!(config.validate_for_watcher().is_ok());

        config.watcher.dry_run = false;
        assert!(matches!(
            config.validate_for_watcher(),
            Err(ConfigError::MissingAwsAccessKeyId)
        ));
    }

    #[test]
    fn processor_always_needs_credentials() {
        let mut config = AppConfig::default();
        config.watcher.dry_run = true;
        assert!(config.validate_for_processor().is_err());
        assert!(credentialed().validate_for_processor().is_ok());
    }

    #[test]
    fn zero_read_timeout_is_rejected() {
        let mut config = credentialed();
        config.aws.read_timeout_seconds = 0;
        assert!(matches!(
            config.validate_for_processor(),
            Err(ConfigError::InvalidReadTimeout { value: 0 })
        ));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let mut config = AppConfig::default();
        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn redaction_hides_credentials() {
        let json = credentialed().redacted_json().unwrap();
        assert!(!json.contains("AKIDEXAMPLE"));
        assert!(!json.contains("\"secret\""));
        assert!(json.contains("[REDACTED]"));
        assert!(json.contains("us-west-2"));
    }
}

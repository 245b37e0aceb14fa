use serde::{Deserialize, Serialize};
use std::fmt;

use aq_common::env;

/// S3 client settings
///
/// Static keys are optional; without them the default AWS credential chain
/// (environment, profile, instance role) is used.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl StorageConfig {
    pub fn from_env() -> aq_common::Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT"),
            region: env::var("S3_REGION")
                .or_else(|| env::var("AWS_REGION"))
                .unwrap_or_else(|| "us-east-1".to_string()),
            access_key: env::var("S3_ACCESS_KEY").or_else(|| env::var("AWS_ACCESS_KEY_ID")),
            secret_key: env::var("S3_SECRET_KEY").or_else(|| env::var("AWS_SECRET_ACCESS_KEY")),
            path_style: env::bool_or("S3_PATH_STYLE", false)?,
        })
    }

    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("path_style", &self.path_style)
            .finish()
    }
}

//! Object storage access
//!
//! The ingest core needs three things from a bucket: a metadata lookup for
//! ingress, a download for the loaders and a prefix listing for the crawl.
//! [`ObjectStore`] is that seam; [`S3ObjectStore`] is the production
//! implementation.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    Client,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::error::{IngestError, Result};

pub mod config;

pub use config::StorageConfig;

/// Listing/lookup result for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: i64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Metadata for `key`, or `None` when the object does not exist.
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>>;

    /// Full object body.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Every object under `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectHead>>;
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        debug!(region = %config.region, endpoint = ?config.endpoint, "Initializing S3 client");

        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base).force_path_style(config.path_style);

        if let Some((access, secret)) = config.static_credentials() {
            builder = builder.credentials_provider(Credentials::new(
                access,
                secret,
                None,
                None,
                "aq-ingest-storage",
            ));
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(region = %config.region, endpoint = ?config.endpoint, "S3 client initialized");

        Ok(Self::from_client(Client::from_conf(builder.build())))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn storage_error<E>(action: &str, bucket: &str, key: &str, err: E) -> IngestError
where
    E: std::error::Error,
{
    IngestError::Storage(format!(
        "{action} s3://{bucket}/{key}: {}",
        DisplayErrorContext(&err)
    ))
}

fn to_chrono(value: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
    value.and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    /// Looks the key up with a one-item listing rather than `HeadObject`, so
    /// only `s3:ListBucket` is required.
    #[instrument(skip(self))]
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(key)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| storage_error("list", bucket, key, e))?;

        let head = response
            .contents()
            .iter()
            .find(|object| object.key() == Some(key))
            .map(|object| ObjectHead {
                key: key.to_string(),
                last_modified: to_chrono(object.last_modified()),
                size: object.size().unwrap_or(0),
            });

        Ok(head)
    }

    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|service| service.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    IngestError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    storage_error("get", bucket, key, e)
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| storage_error("read", bucket, key, e))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), bucket, key);
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectHead>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| storage_error("list", bucket, prefix, e))?;
            objects.extend(page.contents().iter().filter_map(|object| {
                object.key().map(|key| ObjectHead {
                    key: key.to_string(),
                    last_modified: to_chrono(object.last_modified()),
                    size: object.size().unwrap_or(0),
                })
            }));
        }

        debug!(objects = objects.len(), "Listed s3://{}/{}", bucket, prefix);
        Ok(objects)
    }
}

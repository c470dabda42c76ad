use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{ByteStream, ListEntry, ObjectClient, ObjectStat};
use crate::error::ClientError;

/// Connection settings for an S3 compatible endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Custom endpoint, e.g. `http://localhost:9000` for MinIO. `None` uses AWS.
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials. Without them the default AWS provider chain is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// MinIO and most self-hosted stores need path style addressing.
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            force_path_style: true,
        }
    }
}

/// [`ObjectClient`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct S3Client {
    client: Client,
}

impl S3Client {
    pub async fn new(config: &S3Config) -> Self {
        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "static",
                )),
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };
        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            debug!(endpoint = %endpoint, "using custom S3 endpoint");
            builder = builder.endpoint_url(endpoint.clone());
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_utc(ts: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    ts.and_then(|ts| DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()))
        .unwrap_or_default()
}

fn other<E>(err: E) -> ClientError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ClientError::Other(anyhow::Error::new(err))
}

#[async_trait::async_trait]
impl ObjectClient for S3Client {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClientError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Ok(false)
                } else {
                    Err(other(err))
                }
            }
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you())
                {
                    Ok(())
                } else {
                    Err(other(err))
                }
            }
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), ClientError> {
        let len = data.len() as i64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(len)
            .body(S3ByteStream::from(data))
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.meta().code() == Some("NoSuchBucket")) {
                    ClientError::NoSuchBucket(bucket.to_string())
                } else {
                    other(err)
                }
            })?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, ClientError> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    return Err(ClientError::NoSuchKey(key.to_string()));
                }
                return Err(other(err));
            }
        };

        let stream = futures::stream::unfold(output.body, |mut body| async move {
            body.try_next()
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
                .transpose()
                .map(|chunk| (chunk, body))
        });
        Ok(Box::pin(stream))
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat, ClientError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(ObjectStat {
                size: output.content_length().unwrap_or_default().max(0) as u64,
                last_modified: to_utc(output.last_modified()),
            }),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Err(ClientError::NoSuchKey(key.to_string()))
                } else {
                    Err(other(err))
                }
            }
        }
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ListEntry>, ClientError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .delimiter("/")
            .into_paginator()
            .send();

        let mut entries = Vec::new();
        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    if err.as_service_error().is_some_and(|e| e.is_no_such_bucket()) {
                        return Err(ClientError::NoSuchBucket(bucket.to_string()));
                    }
                    return Err(other(err));
                }
            };
            for object in page.contents() {
                if let Some(key) = object.key() {
                    entries.push(ListEntry::Object {
                        key: key.to_string(),
                        stat: ObjectStat {
                            size: object.size().unwrap_or_default().max(0) as u64,
                            last_modified: to_utc(object.last_modified()),
                        },
                    });
                }
            }
            for common in page.common_prefixes() {
                if let Some(prefix) = common.prefix() {
                    entries.push(ListEntry::Prefix(prefix.to_string()));
                }
            }
        }
        Ok(entries)
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(other)?;
        Ok(())
    }
}

//! S3 client wrapper for fixtures and out-of-band verification
//!
//! Everything here talks to the object store directly, bypassing the mount
//! under test. Scenarios use it to create buckets, seed objects, check what
//! the driver actually wrote, and delete objects behind the driver's back.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use aws_sdk_s3::Client;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{S3Config, DEFAULT_REGION, MAX_BUCKET_NAME_LEN};
use crate::error::{E2eError, Result};

const MAX_RETRY_ATTEMPTS: u32 = 5;
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(120);

/// DeleteObjects accepts at most this many keys per request
const DELETE_BATCH_SIZE: usize = 1000;

/// A pair of S3 keys, optionally with the canonical id of the account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,

    /// Canonical user id reported as object owner for this account
    pub canonical_id: Option<String>,
}

impl S3Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            canonical_id: None,
        }
    }

    pub fn with_canonical_id(mut self, canonical_id: impl Into<String>) -> Self {
        self.canonical_id = Some(canonical_id.into());
        self
    }

    /// Default credentials of the configured endpoint
    pub fn from_config(config: &S3Config) -> Self {
        Self::new(&config.access_key_id, &config.secret_access_key)
    }
}

/// Generate a bucket name under `prefix` that fits S3 naming limits
pub fn random_bucket_name(prefix: &str) -> String {
    let mut name = format!("{}{}", prefix, Uuid::new_v4().simple());
    name.truncate(MAX_BUCKET_NAME_LEN);
    name
}

/// `Ok(false)` for a typed not-found, the error otherwise
fn missing_from_head_error(err: HeadObjectError) -> Result<bool> {
    if err.is_not_found() {
        Ok(false)
    } else {
        Err(E2eError::s3("HeadObject", err))
    }
}

/// S3 client bound to one endpoint and one set of credentials
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    region: String,
    bucket_prefix: String,
}

impl S3Client {
    /// Client using the configured default credentials
    pub fn new(config: &S3Config) -> Self {
        Self::with_credentials(config, &S3Credentials::from_config(config))
    }

    /// Client for the same endpoint acting as a different account
    pub fn with_credentials(config: &S3Config, credentials: &S3Credentials) -> Self {
        let provider = Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            None,
            None,
            "s3-csi-e2e",
        );

        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint_url)
            .credentials_provider(provider)
            .force_path_style(config.force_path_style)
            .retry_config(
                RetryConfig::standard()
                    .with_max_attempts(MAX_RETRY_ATTEMPTS)
                    .with_max_backoff(MAX_RETRY_BACKOFF),
            )
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            region: config.region.clone(),
            bucket_prefix: config.bucket_prefix.clone(),
        }
    }

    /// Underlying SDK client for operations not wrapped here
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Check the endpoint is reachable and the credentials are accepted
    pub async fn ping(&self) -> Result<()> {
        self.client
            .list_buckets()
            .send()
            .await
            .map_err(|e| E2eError::s3("ListBuckets", e))?;
        Ok(())
    }

    /// Create a bucket with a random name under the configured prefix
    pub async fn create_bucket(&self) -> Result<TestBucket> {
        self.create_bucket_named(&random_bucket_name(&self.bucket_prefix))
            .await
    }

    /// Create a bucket with an exact name
    pub async fn create_bucket_named(&self, name: &str) -> Result<TestBucket> {
        let mut request = self.client.create_bucket().bucket(name);

        // us-east-1 rejects an explicit location constraint
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| E2eError::s3("CreateBucket", e))?;

        info!("Created bucket {}", name);
        Ok(self.bucket(name))
    }

    /// Handle to an existing bucket
    pub fn bucket(&self, name: &str) -> TestBucket {
        TestBucket {
            name: name.to_string(),
            client: self.client.clone(),
        }
    }
}

/// A bucket plus the client used to reach it
#[derive(Clone)]
pub struct TestBucket {
    pub name: String,
    client: Client,
}

impl TestBucket {
    /// List every key in the bucket, optionally under a prefix
    pub async fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.name);
            if let Some(prefix) = prefix {
                request = request.prefix(prefix);
            }
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| E2eError::s3("ListObjectsV2", e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    /// Fetch an object's content
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .map_err(|e| E2eError::s3("GetObject", e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| E2eError::s3("GetObject", e))?;
        Ok(data.into_bytes().to_vec())
    }

    /// Check whether an object exists
    pub async fn object_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => missing_from_head_error(e.into_service_error()),
        }
    }

    /// Upload an object
    pub async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.name)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| E2eError::s3("PutObject", e))?;
        debug!("Put s3://{}/{} ({} bytes)", self.name, key, data.len());
        Ok(())
    }

    /// Delete one object
    pub async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .map_err(|e| E2eError::s3("DeleteObject", e))?;
        debug!("Deleted s3://{}/{}", self.name, key);
        Ok(())
    }

    /// Canonical id of the account that owns `key`.
    ///
    /// HeadObject does not report ownership, so after confirming the object
    /// exists the owner is read from a single-entry listing.
    pub async fn get_object_owner_id(&self, key: &str) -> Result<String> {
        self.client
            .head_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .map_err(|e| E2eError::s3("HeadObject", e))?;

        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.name)
            .prefix(key)
            .max_keys(1)
            .fetch_owner(true)
            .send()
            .await
            .map_err(|e| E2eError::s3("ListObjectsV2", e))?;

        response
            .contents()
            .iter()
            .find(|obj| obj.key() == Some(key))
            .and_then(|obj| obj.owner())
            .and_then(|owner| owner.id())
            .map(str::to_string)
            .ok_or_else(|| E2eError::MissingField(format!("owner of s3://{}/{}", self.name, key)))
    }

    /// Create `count` small objects named `<prefix>file<N>.txt`, returning their keys
    pub async fn create_objects(&self, prefix: &str, count: usize) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(count);
        for i in 1..=count {
            let key = format!("{prefix}file{i}.txt");
            let body = format!("Content for file {i} created directly");
            self.put_object(&key, body.as_bytes()).await?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// Fail unless every key is present
    pub async fn verify_objects_exist(&self, keys: &[String]) -> Result<()> {
        let mut missing = Vec::new();
        for key in keys {
            if !self.object_exists(key).await? {
                missing.push(E2eError::MissingField(format!("s3://{}/{}", self.name, key)));
            }
        }
        E2eError::aggregate(format!("objects missing from {}", self.name), missing)
    }

    /// Delete every object in the bucket, batched
    pub async fn wipe(&self) -> Result<()> {
        let keys = self.list_objects(None).await?;

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| E2eError::s3("DeleteObjects", e))
                })
                .collect::<Result<Vec<_>>>()?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| E2eError::s3("DeleteObjects", e))?;

            self.client
                .delete_objects()
                .bucket(&self.name)
                .delete(delete)
                .send()
                .await
                .map_err(|e| E2eError::s3("DeleteObjects", e))?;
        }

        debug!("Wiped {} object(s) from {}", keys.len(), self.name);
        Ok(())
    }

    /// Delete all objects and then the bucket itself
    pub async fn delete(&self) -> Result<()> {
        info!("Deleting bucket {}", self.name);
        self.wipe().await?;
        self.client
            .delete_bucket()
            .bucket(&self.name)
            .send()
            .await
            .map_err(|e| E2eError::s3("DeleteBucket", e))?;
        Ok(())
    }
}

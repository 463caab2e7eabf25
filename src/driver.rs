//! Bucket-backed test volumes for the CSI driver under test

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{CSIPersistentVolumeSource, SecretReference};
use tracing::info;

use crate::error::Result;
use crate::s3::{S3Client, TestBucket};

/// Volume attribute naming the bucket to mount
pub const ATTR_BUCKET_NAME: &str = "bucketName";

/// Volume attribute selecting where mount credentials come from
pub const ATTR_AUTHENTICATION_SOURCE: &str = "authenticationSource";

/// How the driver authenticates when mounting a volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationSource {
    /// The driver's own credentials
    Driver,
    /// A Secret referenced from the volume
    Secret { namespace: String, name: String },
}

/// One bucket exposed to Kubernetes as a CSI volume
#[derive(Clone)]
pub struct TestVolume {
    pub bucket: TestBucket,
    pub authentication: AuthenticationSource,
}

impl TestVolume {
    pub fn new(bucket: TestBucket) -> Self {
        Self {
            bucket,
            authentication: AuthenticationSource::Driver,
        }
    }

    /// Authenticate with the credentials stored in `namespace/name`
    pub fn with_secret(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.authentication = AuthenticationSource::Secret {
            namespace: namespace.into(),
            name: name.into(),
        };
        self
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket.name
    }
}

/// Creates buckets and renders CSI sources for the configured driver
#[derive(Clone)]
pub struct S3Driver {
    driver_name: String,
    s3: S3Client,
}

impl S3Driver {
    pub fn new(driver_name: impl Into<String>, s3: S3Client) -> Self {
        Self {
            driver_name: driver_name.into(),
            s3,
        }
    }

    pub fn name(&self) -> &str {
        &self.driver_name
    }

    pub fn s3(&self) -> &S3Client {
        &self.s3
    }

    /// Create a fresh bucket owned by this driver's S3 account
    pub async fn create_volume(&self) -> Result<TestVolume> {
        let bucket = self.s3.create_bucket().await?;
        info!("Created test volume backed by {}", bucket.name);
        Ok(TestVolume::new(bucket))
    }

    /// CSI source pointing at `volume`'s bucket
    pub fn csi_source(&self, volume: &TestVolume) -> CSIPersistentVolumeSource {
        let mut attributes = BTreeMap::from([(
            ATTR_BUCKET_NAME.to_string(),
            volume.bucket_name().to_string(),
        )]);

        let secret_ref = match &volume.authentication {
            AuthenticationSource::Driver => None,
            AuthenticationSource::Secret { namespace, name } => {
                attributes.insert(ATTR_AUTHENTICATION_SOURCE.to_string(), "secret".to_string());
                Some(SecretReference {
                    name: Some(name.clone()),
                    namespace: Some(namespace.clone()),
                })
            }
        };

        CSIPersistentVolumeSource {
            driver: self.driver_name.clone(),
            volume_handle: volume.bucket_name().to_string(),
            volume_attributes: Some(attributes),
            node_publish_secret_ref: secret_ref,
            ..Default::default()
        }
    }
}

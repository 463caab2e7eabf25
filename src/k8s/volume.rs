//! PersistentVolume and PersistentVolumeClaim construction
//!
//! Volumes are statically provisioned: each test creates a bucket, a PV whose
//! CSI source points at it with explicit mount options, and a claim pre-bound
//! to that PV.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use tracing::{debug, info};
use uuid::Uuid;

use super::pod::wait_for;
use super::{ignore_not_found, KubeClient};
use crate::driver::{S3Driver, TestVolume};
use crate::error::{E2eError, Result};

const ACCESS_MODE: &str = "ReadWriteMany";
const CAPACITY: &str = "1200Gi";

/// Ordered mount option tokens handed to the driver verbatim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions(Vec<String>);

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, option: impl Into<String>) -> &mut Self {
        self.0.push(option.into());
        self
    }

    pub fn with(mut self, option: impl Into<String>) -> Self {
        self.0.push(option.into());
        self
    }

    pub fn contains(&self, option: &str) -> bool {
        self.0.iter().any(|o| o == option)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for MountOptions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for MountOptions {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

impl fmt::Display for MountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// `uid=`, `gid=`, `allow-other`, optional `file-mode=`, then `extra` in order
pub fn build_volume_with_options(
    uid: i64,
    gid: i64,
    file_mode: Option<&str>,
    extra: &[&str],
) -> MountOptions {
    let mut options = MountOptions::new()
        .with(format!("uid={uid}"))
        .with(format!("gid={gid}"))
        .with("allow-other");
    if let Some(mode) = file_mode {
        options.push(format!("file-mode={mode}"));
    }
    options.extend(extra.iter().copied());
    options
}

/// A PV, the claim bound to it and the bucket behind both
#[derive(Clone)]
pub struct VolumeResource {
    pub pv: PersistentVolume,
    pub pvc: PersistentVolumeClaim,
    pub volume: TestVolume,
}

impl VolumeResource {
    pub fn pv_name(&self) -> &str {
        self.pv.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn claim_name(&self) -> &str {
        self.pvc.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.pvc.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn bucket_name(&self) -> &str {
        self.volume.bucket_name()
    }
}

/// PersistentVolume with a CSI source and explicit mount options, pre-bound to a claim
pub fn build_persistent_volume(
    name: &str,
    claim_namespace: &str,
    claim_name: &str,
    source: CSIPersistentVolumeSource,
    mount_options: &MountOptions,
) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            capacity: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(CAPACITY.to_string()),
            )])),
            claim_ref: Some(ObjectReference {
                name: Some(claim_name.to_string()),
                namespace: Some(claim_namespace.to_string()),
                ..Default::default()
            }),
            csi: Some(source),
            mount_options: Some(mount_options.as_slice().to_vec()),
            storage_class_name: Some(String::new()),
            persistent_volume_reclaim_policy: Some("Retain".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Claim that binds only to `pv_name`
pub fn build_claim(namespace: &str, name: &str, pv_name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(CAPACITY.to_string()),
                )])),
                ..Default::default()
            }),
            storage_class_name: Some(String::new()),
            volume_name: Some(pv_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn claim_is_bound(claim: Option<&PersistentVolumeClaim>) -> bool {
    claim
        .and_then(|c| c.status.as_ref())
        .and_then(|s| s.phase.as_deref())
        == Some("Bound")
}

/// Create the PV and claim for `volume`, then wait until the claim is Bound
pub async fn create_volume_resource(
    client: &KubeClient,
    driver: &S3Driver,
    namespace: &str,
    volume: TestVolume,
    mount_options: &MountOptions,
) -> Result<VolumeResource> {
    let id = Uuid::new_v4();
    let pv_name = format!("s3-e2e-pv-{id}");
    let claim_name = format!("s3-e2e-pvc-{id}");

    let pv = build_persistent_volume(
        &pv_name,
        namespace,
        &claim_name,
        driver.csi_source(&volume),
        mount_options,
    );
    let pv = client.volumes().create(&PostParams::default(), &pv).await?;
    debug!("Created PV {} with options {}", pv_name, mount_options);

    let claims = client.claims(namespace);
    claims
        .create(&PostParams::default(), &build_claim(namespace, &claim_name, &pv_name))
        .await?;

    let pvc = wait_for(
        claims,
        &claim_name,
        format!("claim {namespace}/{claim_name} to bind"),
        claim_is_bound,
        client.config().claim_bound_timeout,
    )
    .await?
    .ok_or_else(|| E2eError::MissingField(format!("claim {namespace}/{claim_name}")))?;

    info!(
        "Claim {}/{} bound to {} (bucket {})",
        namespace,
        claim_name,
        pv_name,
        volume.bucket_name()
    );

    Ok(VolumeResource { pv, pvc, volume })
}

/// Create a bucket and expose it through a bound claim with `mount_options`
pub async fn create_volume_resource_with_mount_options(
    client: &KubeClient,
    driver: &S3Driver,
    namespace: &str,
    mount_options: &MountOptions,
) -> Result<VolumeResource> {
    let volume = driver.create_volume().await?;
    create_volume_resource(client, driver, namespace, volume, mount_options).await
}

/// Replace the mount options of an existing PV.
///
/// Only pods mounting the volume afterwards see the new options.
pub async fn update_mount_options(
    client: &KubeClient,
    pv_name: &str,
    mount_options: &MountOptions,
) -> Result<PersistentVolume> {
    let volumes = client.volumes();
    let mut pv = volumes.get(pv_name).await?;
    pv.spec
        .get_or_insert_with(Default::default)
        .mount_options = Some(mount_options.as_slice().to_vec());

    let updated = volumes.replace(pv_name, &PostParams::default(), &pv).await?;
    info!("Updated mount options of {} to {}", pv_name, mount_options);
    Ok(updated)
}

/// Delete the claim and then the PV; missing objects are not errors
pub async fn delete_volume_resource(client: &KubeClient, resource: &VolumeResource) -> Result<()> {
    let mut errors = Vec::new();

    if let Err(e) = client
        .claims(resource.namespace())
        .delete(resource.claim_name(), &DeleteParams::default())
        .await
    {
        if let Err(e) = ignore_not_found(e.into()) {
            errors.push(e);
        }
    }

    if let Err(e) = client
        .volumes()
        .delete(resource.pv_name(), &DeleteParams::default())
        .await
    {
        if let Err(e) = ignore_not_found(e.into()) {
            errors.push(e);
        }
    }

    E2eError::aggregate(format!("deleting volume {}", resource.pv_name()), errors)
}

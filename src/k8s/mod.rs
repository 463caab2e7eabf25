//! Kubernetes client and resource helpers
//!
//! - `exec`: run shell commands inside test pods
//! - `pod`: pod construction and lifecycle
//! - `volume`: PersistentVolume/PersistentVolumeClaim construction with mount options
//! - `secret`: credential secrets referenced by volumes
//! - `watch`: polling for pod errors surfaced through events and conditions

pub mod exec;
pub mod pod;
pub mod secret;
pub mod volume;
pub mod watch;

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{
    Event, Namespace, PersistentVolume, PersistentVolumeClaim, Pod, Secret,
};
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::{Api, Client};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::KubernetesConfig;
use crate::error::{E2eError, Result};

pub use exec::{ExecOutput, PodExec, PodRef};
pub use watch::{wait_for_pod_error, PodErrorSource};

/// RFC 3339 creation time, for spotting namespaces leaked by aborted runs
pub const CREATED_AT_ANNOTATION: &str = "s3-csi-e2e/created-at";

/// Pod Security Standard enforced on a test namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    Privileged,
    #[default]
    Baseline,
    Restricted,
}

impl SecurityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityLevel::Privileged => "privileged",
            SecurityLevel::Baseline => "baseline",
            SecurityLevel::Restricted => "restricted",
        }
    }
}

/// Kubernetes client plus the cluster-side settings of the run
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    config: KubernetesConfig,
}

impl KubeClient {
    pub fn new(client: Client, config: KubernetesConfig) -> Self {
        Self { client, config }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default(config: KubernetesConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, config))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn config(&self) -> &KubernetesConfig {
        &self.config
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn volumes(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }

    pub fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn events(&self, namespace: &str) -> Api<Event> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Create a uniquely named namespace enforcing `level`
    pub async fn create_namespace(&self, base: &str, level: SecurityLevel) -> Result<String> {
        let name = namespace_name(&self.config.namespace_prefix, base);
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(namespace_labels(level)),
                annotations: Some(BTreeMap::from([(
                    CREATED_AT_ANNOTATION.to_string(),
                    Utc::now().to_rfc3339(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        namespaces.create(&PostParams::default(), &namespace).await?;
        info!("Created namespace {} ({})", name, level.as_str());
        Ok(name)
    }

    /// Delete a namespace; a missing namespace is not an error
    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!("Deleted namespace {}", name);
                Ok(())
            }
            Err(e) => ignore_not_found(e.into()),
        }
    }

    /// Verify the driver's node plugin is fully rolled out
    pub async fn check_driver_ready(&self) -> Result<()> {
        let daemonsets: Api<DaemonSet> =
            Api::namespaced(self.client.clone(), &self.config.driver_namespace);
        let ds = daemonsets.get(&self.config.driver_daemonset).await?;
        let status = ds.status.unwrap_or_default();

        if status.desired_number_scheduled == 0
            || status.number_ready < status.desired_number_scheduled
        {
            return Err(E2eError::Wait {
                what: format!(
                    "daemonset {}/{}",
                    self.config.driver_namespace, self.config.driver_daemonset
                ),
                message: format!(
                    "{} of {} node plugin pods ready",
                    status.number_ready, status.desired_number_scheduled
                ),
            });
        }

        info!(
            "CSI node plugin ready on {} node(s)",
            status.number_ready
        );
        Ok(())
    }
}

/// Turn a 404 into success, pass everything else through
pub(crate) fn ignore_not_found(err: E2eError) -> Result<()> {
    if err.is_not_found() {
        Ok(())
    } else {
        Err(err)
    }
}

/// Short random suffix for resource names
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn namespace_name(prefix: &str, base: &str) -> String {
    let base: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let mut name = format!("{}{}", prefix, base.trim_matches('-'));
    // Namespace names are DNS labels: 63 chars including the suffix
    name.truncate(63 - 9);
    format!("{}-{}", name.trim_end_matches('-'), short_id())
}

fn namespace_labels(level: SecurityLevel) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for mode in ["enforce", "audit", "warn"] {
        labels.insert(
            format!("pod-security.kubernetes.io/{mode}"),
            level.as_str().to_string(),
        );
    }
    labels.insert("app.kubernetes.io/managed-by".to_string(), "s3-csi-e2e".to_string());
    labels
}

//! Test pod construction and lifecycle

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    Capabilities, Container, HostPathVolumeSource, PersistentVolumeClaimVolumeSource, Pod,
    PodSecurityContext, PodSpec, SeccompProfile, SecurityContext, Volume, VolumeMount,
};
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::runtime::conditions::{is_deleted, is_pod_running};
use kube::runtime::wait::{await_condition, Condition};
use kube::Api;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ignore_not_found, KubeClient, SecurityLevel};
use crate::error::{E2eError, Result};

/// uid used by non-root scenarios unless they pick their own
pub const DEFAULT_NON_ROOT_USER: i64 = 1001;

/// gid used by non-root scenarios unless they pick their own
pub const DEFAULT_NON_ROOT_GROUP: i64 = 2000;

/// Name of the main container of every test pod
pub const DEFAULT_CONTAINER: &str = "write-pod";

/// Where the cache host directory is visible inside pods
pub const CACHE_MOUNT_PATH: &str = "/cache";

const CACHE_VOLUME_NAME: &str = "make-cache-dir";
const ROOT: i64 = 0;

/// Keeps the container alive until it is deleted
const IDLE_COMMAND: &str = "trap exit TERM; while true; do sleep 1; done";

/// Mount path of the `index`-th claim, counting from 1
pub fn volume_path(index: usize) -> String {
    format!("/mnt/volume{index}")
}

/// Fresh cache directory on the node for one test
pub fn random_cache_dir() -> String {
    format!("/tmp/mp-cache/{}", Uuid::new_v4())
}

/// Builder for test pods mounting one or more claims
#[derive(Debug, Clone)]
pub struct PodBuilder {
    namespace: String,
    name: String,
    image: String,
    command: String,
    claims: Vec<String>,
    level: SecurityLevel,
    non_root: Option<(i64, i64)>,
    cache_dir: Option<String>,
    node_name: Option<String>,
    init_commands: Vec<(String, String)>,
}

impl PodBuilder {
    pub fn new(namespace: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: format!("pod-{}", Uuid::new_v4()),
            image: image.into(),
            command: IDLE_COMMAND.to_string(),
            claims: Vec::new(),
            level: SecurityLevel::default(),
            non_root: None,
            cache_dir: None,
            node_name: None,
            init_commands: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mount a claim at the next `/mnt/volumeN`
    pub fn claim(mut self, claim_name: impl Into<String>) -> Self {
        self.claims.push(claim_name.into());
        self
    }

    pub fn claims<I, S>(mut self, claim_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.claims.extend(claim_names.into_iter().map(Into::into));
        self
    }

    pub fn security_level(mut self, level: SecurityLevel) -> Self {
        self.level = level;
        self
    }

    /// Run every container as `uid:gid` with runAsNonRoot set
    pub fn non_root(mut self, uid: i64, gid: i64) -> Self {
        self.non_root = Some((uid, gid));
        self
    }

    /// Mount a world-writable host directory at `/cache`.
    ///
    /// The directory is created by the kubelet as root, so an init container
    /// running as root opens it up first.
    pub fn cache_dir(mut self, host_path: impl Into<String>) -> Self {
        self.cache_dir = Some(host_path.into());
        self
    }

    /// Replace the idle loop of the main container
    pub fn command(mut self, script: impl Into<String>) -> Self {
        self.command = script.into();
        self
    }

    /// Schedule onto a specific node
    pub fn node_name(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(node.into());
        self
    }

    /// Run `script` in an init container that mounts the same claims
    pub fn init_command(mut self, name: impl Into<String>, script: impl Into<String>) -> Self {
        self.init_commands.push((name.into(), script.into()));
        self
    }

    pub fn build(self) -> Pod {
        let mut volume_mounts = Vec::new();
        let mut volumes = Vec::new();
        for (i, claim) in self.claims.iter().enumerate() {
            let volume_name = format!("volume{}", i + 1);
            volume_mounts.push(VolumeMount {
                name: volume_name.clone(),
                mount_path: volume_path(i + 1),
                ..Default::default()
            });
            volumes.push(Volume {
                name: volume_name,
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim.clone(),
                    read_only: None,
                }),
                ..Default::default()
            });
        }

        let container_security = container_security_context(self.level, self.non_root);
        let mut pod_security = pod_security_context(self.level, self.non_root);

        let mut main = Container {
            name: DEFAULT_CONTAINER.to_string(),
            image: Some(self.image.clone()),
            command: Some(shell(&self.command)),
            volume_mounts: Some(volume_mounts.clone()),
            security_context: container_security.clone(),
            ..Default::default()
        };

        let mut init_containers: Vec<Container> = self
            .init_commands
            .iter()
            .map(|(name, script)| Container {
                name: name.clone(),
                image: Some(self.image.clone()),
                command: Some(shell(script)),
                volume_mounts: Some(volume_mounts.clone()),
                security_context: container_security.clone(),
                ..Default::default()
            })
            .collect();

        if let Some(host_path) = &self.cache_dir {
            let cache_mount = VolumeMount {
                name: CACHE_VOLUME_NAME.to_string(),
                mount_path: CACHE_MOUNT_PATH.to_string(),
                ..Default::default()
            };

            // chmod-cache-dir runs as root, which runAsNonRoot at pod level forbids
            pod_security
                .get_or_insert_with(PodSecurityContext::default)
                .run_as_non_root = Some(false);

            init_containers.insert(
                0,
                Container {
                    name: "chmod-cache-dir".to_string(),
                    image: Some(self.image.clone()),
                    command: Some(shell(&format!("chmod -R 777 {CACHE_MOUNT_PATH}"))),
                    security_context: Some(SecurityContext {
                        run_as_user: Some(ROOT),
                        run_as_group: Some(ROOT),
                        run_as_non_root: Some(false),
                        ..Default::default()
                    }),
                    volume_mounts: Some(vec![cache_mount.clone()]),
                    ..Default::default()
                },
            );
            volumes.push(Volume {
                name: CACHE_VOLUME_NAME.to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: host_path.clone(),
                    type_: Some("DirectoryOrCreate".to_string()),
                }),
                ..Default::default()
            });
            main.volume_mounts
                .get_or_insert_with(Vec::new)
                .push(cache_mount);
        }

        let node_selector = self.node_name.map(|node| {
            BTreeMap::from([("kubernetes.io/hostname".to_string(), node)])
        });

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![main],
                init_containers: (!init_containers.is_empty()).then_some(init_containers),
                volumes: Some(volumes),
                security_context: pod_security,
                restart_policy: Some("Never".to_string()),
                node_selector,
                termination_grace_period_seconds: Some(5),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn shell(script: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

fn runtime_default_seccomp() -> Option<SeccompProfile> {
    Some(SeccompProfile {
        type_: "RuntimeDefault".to_string(),
        localhost_profile: None,
    })
}

fn pod_security_context(
    level: SecurityLevel,
    non_root: Option<(i64, i64)>,
) -> Option<PodSecurityContext> {
    let mut ctx = match level {
        SecurityLevel::Restricted => PodSecurityContext {
            run_as_non_root: Some(true),
            run_as_user: Some(DEFAULT_NON_ROOT_USER),
            seccomp_profile: runtime_default_seccomp(),
            ..Default::default()
        },
        SecurityLevel::Baseline | SecurityLevel::Privileged => PodSecurityContext::default(),
    };

    if let Some((uid, gid)) = non_root {
        ctx.run_as_user = Some(uid);
        ctx.run_as_group = Some(gid);
        ctx.run_as_non_root = Some(true);
    }

    (ctx != PodSecurityContext::default()).then_some(ctx)
}

fn container_security_context(
    level: SecurityLevel,
    non_root: Option<(i64, i64)>,
) -> Option<SecurityContext> {
    let mut ctx = match level {
        SecurityLevel::Restricted => SecurityContext {
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                add: None,
            }),
            run_as_non_root: Some(true),
            seccomp_profile: runtime_default_seccomp(),
            ..Default::default()
        },
        SecurityLevel::Privileged => SecurityContext {
            privileged: Some(true),
            ..Default::default()
        },
        SecurityLevel::Baseline => SecurityContext::default(),
    };

    if let Some((uid, gid)) = non_root {
        ctx.run_as_user = Some(uid);
        ctx.run_as_group = Some(gid);
        ctx.run_as_non_root = Some(true);
    }

    (ctx != SecurityContext::default()).then_some(ctx)
}

fn pod_identity(pod: &Pod) -> Result<(String, String)> {
    let name = pod
        .metadata
        .name
        .clone()
        .ok_or_else(|| E2eError::MissingField("pod metadata.name".into()))?;
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| E2eError::MissingField(format!("namespace of pod {name}")))?;
    Ok((namespace, name))
}

/// Wait for `condition` on the named object, bounded by `timeout`
pub(crate) async fn wait_for<K, C>(
    api: Api<K>,
    name: &str,
    what: String,
    condition: C,
    timeout: Duration,
) -> Result<Option<K>>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + 'static,
    C: Condition<K>,
{
    match tokio::time::timeout(timeout, await_condition(api, name, condition)).await {
        Ok(Ok(obj)) => Ok(obj),
        Ok(Err(e)) => Err(E2eError::Wait {
            what,
            message: e.to_string(),
        }),
        Err(_) => Err(E2eError::WaitTimeout { what, timeout }),
    }
}

/// Create a pod, wait until it is Running and return its current state
pub async fn create_pod(client: &KubeClient, pod: &Pod) -> Result<Pod> {
    let (namespace, name) = pod_identity(pod)?;
    let pods = client.pods(&namespace);

    pods.create(&PostParams::default(), pod).await?;
    debug!("Created pod {}/{}", namespace, name);

    wait_for(
        pods.clone(),
        &name,
        format!("pod {namespace}/{name} to be running"),
        is_pod_running(),
        client.config().pod_start_timeout,
    )
    .await?;

    info!("Pod {}/{} is running", namespace, name);
    Ok(pods.get(&name).await?)
}

/// Create a pod without waiting for it to start, for pods expected to fail
pub async fn create_pod_no_wait(client: &KubeClient, pod: &Pod) -> Result<Pod> {
    let (namespace, name) = pod_identity(pod)?;
    debug!("Creating pod {}/{} without waiting", namespace, name);
    Ok(client
        .pods(&namespace)
        .create(&PostParams::default(), pod)
        .await?)
}

/// Delete a pod and wait until it is gone; a missing pod is not an error
pub async fn delete_pod(client: &KubeClient, namespace: &str, name: &str) -> Result<()> {
    let pods = client.pods(namespace);
    let Some(existing) = pods.get_opt(name).await? else {
        return Ok(());
    };
    let uid = existing.metadata.uid.unwrap_or_default();

    if let Err(e) = pods.delete(name, &DeleteParams::default()).await {
        return ignore_not_found(e.into());
    }

    wait_for(
        pods,
        name,
        format!("pod {namespace}/{name} to be deleted"),
        is_deleted(&uid),
        client.config().delete_timeout,
    )
    .await?;

    debug!("Deleted pod {}/{}", namespace, name);
    Ok(())
}

/// Force-delete a pod that never started (stuck mounting, failed auth)
pub async fn cleanup_pod_in_error_state(
    client: &KubeClient,
    namespace: &str,
    name: &str,
) -> Result<()> {
    let params = DeleteParams {
        grace_period_seconds: Some(0),
        ..DeleteParams::default()
    };
    match client.pods(namespace).delete(name, &params).await {
        Ok(_) => {
            debug!("Force-deleted pod {}/{}", namespace, name);
            Ok(())
        }
        Err(e) => ignore_not_found(e.into()),
    }
}

/// Node the pod was scheduled on
pub fn node_of(pod: &Pod) -> Result<String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .ok_or_else(|| E2eError::MissingField("pod spec.nodeName".into()))
}

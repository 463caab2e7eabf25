//! Accounts and negative-auth scenarios for credential suites

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use s3_csi_e2e::driver::TestVolume;
use s3_csi_e2e::k8s::pod::{DEFAULT_NON_ROOT_GROUP, DEFAULT_NON_ROOT_USER};
use s3_csi_e2e::k8s::short_id;
use s3_csi_e2e::k8s::volume::{build_volume_with_options, MountOptions};
use s3_csi_e2e::k8s::{wait_for_pod_error, SecurityLevel};
use s3_csi_e2e::s3::S3Credentials;

use crate::harness::TestContext;

/// How long the kubelet gets to surface a mount failure
pub const CREDENTIAL_ERROR_TIMEOUT: Duration = Duration::from_secs(60);

/// Name of the Secret holding the pod-side credentials
pub const CREDENTIALS_SECRET: &str = "credentials-test";

/// A static account provisioned on the test object store
#[derive(Debug, Clone, Copy)]
pub struct TestAccount {
    pub access_key_id: &'static str,
    pub secret_access_key: &'static str,
    pub canonical_id: &'static str,
}

impl TestAccount {
    pub fn credentials(&self) -> S3Credentials {
        S3Credentials::new(self.access_key_id, self.secret_access_key)
            .with_canonical_id(self.canonical_id)
    }
}

/// Secondary account, only reachable through a volume Secret
pub const LISA: TestAccount = TestAccount {
    access_key_id: "accessKey2",
    secret_access_key: "verySecretKey2",
    canonical_id: "79a59df900b949e55d96a1e698fbacedfd6e09d98eacf8f8d5218e7cd47ef2bf",
};

/// Default account, the one the driver itself is configured with
pub const BART: TestAccount = TestAccount {
    access_key_id: "accessKey1",
    secret_access_key: "verySecretKey1",
    canonical_id: "79a59df900b949e55d96a1e698fbacedfd6e09d98eacf8f8d5218e7cd47ef2be",
};

/// `allow-other` plus the default non-root uid and gid
pub fn non_root_mount_options() -> MountOptions {
    build_volume_with_options(DEFAULT_NON_ROOT_USER, DEFAULT_NON_ROOT_GROUP, None, &[])
}

/// One negative-auth scenario, from bucket creation to the pod error
#[derive(Debug, Clone)]
pub struct NegativeCredentialTestSpec {
    /// Account that creates the bucket
    pub bucket_owner: S3Credentials,
    /// Credentials the pod mounts with, stored in a Secret
    pub pod_credentials: S3Credentials,
    /// Substring the pod error must contain
    pub expected_error: String,
    pub description: String,
    /// Defaults to `test-credentials-error-<id>`
    pub pod_name: Option<String>,
}

impl NegativeCredentialTestSpec {
    fn pod_name(&self) -> String {
        self.pod_name
            .clone()
            .unwrap_or_else(|| format!("test-credentials-error-{}", short_id()))
    }
}

/// Create the owner's bucket, mount it with the pod credentials and wait for
/// the mount failure to be reported.
///
/// Succeeds only if `expected_error` shows up within a minute.
pub async fn run_negative_credential_test(
    ctx: &TestContext<'_>,
    spec: &NegativeCredentialTestSpec,
) -> Result<()> {
    info!("Negative credential scenario: {}", spec.description);

    let bucket = ctx.create_bucket_as(&spec.bucket_owner).await?;
    let secret = ctx
        .create_secret(CREDENTIALS_SECRET, &spec.pod_credentials)
        .await?;
    let volume = TestVolume::new(bucket).with_secret(ctx.namespace(), secret);
    let resource = ctx
        .create_volume_for(volume, &non_root_mount_options())
        .await?;

    let pod = ctx
        .pod_builder()
        .name(spec.pod_name())
        .claim(resource.claim_name())
        .non_root(DEFAULT_NON_ROOT_USER, DEFAULT_NON_ROOT_GROUP)
        .security_level(SecurityLevel::Restricted)
        .build();
    let pod = ctx.create_failing_pod(pod).await?;

    wait_for_pod_error(
        ctx.client(),
        &pod,
        &spec.expected_error,
        CREDENTIAL_ERROR_TIMEOUT,
        ctx.cancel_token(),
    )
    .await
    .with_context(|| format!("{}: expected {:?}", spec.description, spec.expected_error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounts_are_distinct() {
        assert_ne!(LISA.access_key_id, BART.access_key_id);
        assert_ne!(LISA.canonical_id, BART.canonical_id);
        assert_eq!(
            LISA.credentials().canonical_id.as_deref(),
            Some(LISA.canonical_id)
        );
    }

    #[test]
    fn test_non_root_mount_options() {
        let options = non_root_mount_options();
        assert!(options.contains("allow-other"));
        assert!(options.contains("uid=1001"));
        assert!(options.contains("gid=2000"));
    }

    #[test]
    fn test_default_pod_name() {
        let spec = NegativeCredentialTestSpec {
            bucket_owner: BART.credentials(),
            pod_credentials: S3Credentials::new("nope", "nope"),
            expected_error: "Forbidden".to_string(),
            description: "invalid key".to_string(),
            pod_name: None,
        };
        let name = spec.pod_name();
        assert!(name.starts_with("test-credentials-error-"));
        assert_eq!(name.len(), "test-credentials-error-".len() + 8);

        let named = NegativeCredentialTestSpec {
            pod_name: Some("custom".to_string()),
            ..spec
        };
        assert_eq!(named.pod_name(), "custom");
    }
}

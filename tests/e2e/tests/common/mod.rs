//! Common test utilities for the live-cluster suites
//!
//! Every test gets its own `Harness` and `TestContext`: a fresh namespace
//! whose resources are torn down according to the cleanup policy, even when
//! the test body fails.

#![allow(dead_code)]

pub use s3_csi_e2e::fileops::*;
pub use s3_csi_e2e::integrity::*;
pub use s3_csi_e2e::k8s::pod::{
    node_of, random_cache_dir, volume_path, DEFAULT_NON_ROOT_GROUP, DEFAULT_NON_ROOT_USER,
};
pub use s3_csi_e2e::k8s::volume::{build_volume_with_options, update_mount_options, MountOptions};
pub use s3_csi_e2e::k8s::{short_id, PodExec, PodRef};
pub use s3_csi_e2e::materialise::{materialise_paths, shell_quote, PathSpec};
pub use s3_csi_e2e_suites::*;

/// `uid`/`gid` of the default non-root user as the unsigned ids `stat` reports
pub fn non_root_ids() -> (u32, u32) {
    (DEFAULT_NON_ROOT_USER as u32, DEFAULT_NON_ROOT_GROUP as u32)
}

/// Start an idle pod running as the default non-root user with `claims` mounted
pub async fn create_non_root_pod(ctx: &TestContext<'_>, claims: &[&str]) -> anyhow::Result<PodRef> {
    let pod = ctx
        .pod_builder()
        .claims(claims.iter().copied())
        .non_root(DEFAULT_NON_ROOT_USER, DEFAULT_NON_ROOT_GROUP)
        .build();
    let (_, pod) = ctx.create_pod(pod).await?;
    Ok(pod)
}

/// Define an ignored live-cluster test with its own context.
///
/// The body runs with `$ctx: &TestContext` and must evaluate to
/// `anyhow::Result<()>`; the context is finished afterwards either way.
///
/// # Example
/// ```ignore
/// e2e_test!(test_my_feature, "my-suite", SecurityLevel::Restricted, |ctx| {
///     let volume = ctx.create_volume(&MountOptions::new()).await?;
///     Ok(())
/// });
/// ```
#[macro_export]
macro_rules! e2e_test {
    ($test_name:ident, $suite:expr, $level:expr, |$ctx:ident| $body:block) => {
        #[tokio::test]
        #[ignore = "requires a Kubernetes cluster with the S3 CSI driver installed"]
        async fn $test_name() -> anyhow::Result<()> {
            let harness = $crate::common::Harness::new().await?;
            let context = harness.context($suite, $level).await?;
            let result: anyhow::Result<()> = async {
                let $ctx = &context;
                $body
            }
            .await;
            context.finish(result).await
        }
    };
}

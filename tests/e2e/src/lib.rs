//! E2E suites for the S3 CSI driver
//!
//! This crate holds the pieces shared by every suite under `tests/`: the
//! per-test harness, in-pod assertions and the credential scenarios.
//!
//! ## Quick Start
//!
//! ```ignore
//! use s3_csi_e2e_suites::{Harness, SecurityLevel};
//!
//! #[tokio::test]
//! #[ignore = "requires a Kubernetes cluster with the S3 CSI driver installed"]
//! async fn my_test() -> anyhow::Result<()> {
//!     let harness = Harness::new().await?;
//!     let ctx = harness.context("my-suite", SecurityLevel::Restricted).await?;
//!     let result = async {
//!         // ... test using ctx.create_volume() and ctx.create_pod() ...
//!         Ok(())
//!     }
//!     .await;
//!     ctx.finish(result).await
//! }
//! ```
//!
//! Every suite is ignored by default. Run them against a cluster with
//! `cargo test -p s3-csi-e2e-suites -- --ignored`.

pub mod assertions;
pub mod credentials;

pub use assertions::*;
pub use credentials::{
    non_root_mount_options, run_negative_credential_test, NegativeCredentialTestSpec, TestAccount,
    BART, LISA,
};
pub use harness::{init_logging, shared_config, Harness, TestContext};

pub use s3_csi_e2e::k8s::SecurityLevel;

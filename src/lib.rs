//! s3-csi-e2e: end-to-end test harness for an S3-backed Kubernetes CSI driver
//!
//! The crate provisions buckets, PersistentVolumes, claims and pods, drives
//! the filesystem mounted through the driver under test and checks what is
//! observable from inside the pods.
//!
//! # Architecture
//!
//! - **Configuration**: `Config` loaded from YAML, `E2E_*` environment
//!   variables and CLI flags, passed explicitly to every client.
//! - **S3**: bucket fixtures and side-channel object access through
//!   `aws-sdk-s3`, bypassing the mount.
//! - **Kubernetes helpers** (`k8s`): volumes with custom mount options, pods
//!   with non-root and cache-dir modifiers, in-pod exec and a poller for
//!   errors surfaced through events and pod conditions.
//! - **In-pod checks**: batched path materialisation, seeded integrity
//!   writes and reads, and small file operations.
//! - **Cleanup and benchmarks**: per-test cleanup registry with aggregated
//!   errors, bounded fan-out and the fio benchmark artifact.
//!
//! # Example
//!
//! ```no_run
//! use s3_csi_e2e::config::Config;
//! use s3_csi_e2e::driver::S3Driver;
//! use s3_csi_e2e::k8s::volume::{build_volume_with_options, create_volume_resource_with_mount_options};
//! use s3_csi_e2e::k8s::{KubeClient, SecurityLevel};
//! use s3_csi_e2e::s3::S3Client;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let client = KubeClient::try_default(config.kubernetes.clone()).await?;
//! let driver = S3Driver::new(&config.kubernetes.driver_name, S3Client::new(&config.s3));
//!
//! let namespace = client.create_namespace("example", SecurityLevel::Baseline).await?;
//! let options = build_volume_with_options(1001, 2000, Some("0600"), &[]);
//! let volume = create_volume_resource_with_mount_options(&client, &driver, &namespace, &options).await?;
//! # Ok(())
//! # }
//! ```

pub mod bench;
pub mod cleanup;
pub mod config;
pub mod driver;
pub mod env;
pub mod error;
pub mod fileops;
pub mod integrity;
pub mod k8s;
pub mod materialise;
pub mod s3;


pub use error::{E2eError, Result};

use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber; `RUST_LOG` wins over `level`.
///
/// Safe to call from every test: only the first call installs anything.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

//! Seeded write/read integrity checks through a mounted volume
//!
//! The payload is a pure function of `(len, seed)`, so the read side can
//! rebuild the expected digest on its own, in another pod or after the
//! object was evicted, without the bytes being kept anywhere.
//!
//! Payloads are staged in the pod's local `/tmp` in base64 chunks (one
//! shell argument cannot carry more than ~128 KiB) and then copied onto the
//! mount with a single `dd`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{E2eError, Result};
use crate::k8s::{ExecOutput, PodExec, PodRef};
use crate::materialise::shell_quote;

/// Raw bytes per staging chunk; 48 KiB encodes to 64 KiB of base64
const STAGE_CHUNK: usize = 48 * 1024;

const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Deterministic pseudo-random payload
pub fn generate_data(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// First whitespace-separated token of `sha256sum` output
fn parse_digest(stdout: &str) -> String {
    stdout.split_whitespace().next().unwrap_or_default().to_string()
}

fn block_size(len: usize) -> usize {
    len.clamp(1, MAX_BLOCK_SIZE)
}

/// Copy `data` into a fresh file under `/tmp` in the pod and verify it arrived intact
async fn stage<E>(exec: &E, pod: &PodRef, data: &[u8]) -> Result<String>
where
    E: PodExec + ?Sized,
{
    let staged = format!("/tmp/s3-csi-e2e-{}", Uuid::new_v4().simple());
    let quoted = shell_quote(&staged);

    exec.run(pod, &format!(": > {quoted}")).await?;
    for chunk in data.chunks(STAGE_CHUNK) {
        let command = format!(
            "printf '%s' '{}' | base64 -d >> {quoted}",
            STANDARD.encode(chunk)
        );
        exec.run(pod, &command).await?;
    }

    let expected = sha256_hex(data);
    let actual = parse_digest(&exec.run(pod, &format!("sha256sum {quoted}")).await?);
    if actual != expected {
        return Err(E2eError::ChecksumMismatch {
            path: staged,
            expected,
            actual,
        });
    }

    Ok(staged)
}

fn copy_command(staged: &str, path: &str, len: usize) -> String {
    let staged = shell_quote(staged);
    format!(
        "trap 'rm -f {staged}' EXIT; dd if={staged} of={} bs={}",
        shell_quote(path),
        block_size(len)
    )
}

/// Write `len` seeded bytes to `path` through the mount
pub async fn check_write_to_path<E>(
    exec: &E,
    pod: &PodRef,
    path: &str,
    len: usize,
    seed: u64,
) -> Result<()>
where
    E: PodExec + ?Sized,
{
    let data = generate_data(len, seed);
    let staged = stage(exec, pod, &data).await?;
    exec.run(pod, &copy_command(&staged, path, len)).await?;
    debug!("Wrote {} seeded bytes to {} in {}", len, path, pod);
    Ok(())
}

/// Attempt the same write and require it to fail, returning the failing output
pub async fn check_write_to_path_fails<E>(
    exec: &E,
    pod: &PodRef,
    path: &str,
    len: usize,
    seed: u64,
) -> Result<ExecOutput>
where
    E: PodExec + ?Sized,
{
    let data = generate_data(len, seed);
    let staged = stage(exec, pod, &data).await?;
    exec.run_expect_failure(pod, &copy_command(&staged, path, len))
        .await
}

/// Hash the whole of `path` and compare against the seeded payload's digest.
///
/// Seeded payloads share prefixes across lengths, so the file is never cut
/// to `len` before hashing: a file of any other size must fail.
pub async fn check_read_from_path<E>(
    exec: &E,
    pod: &PodRef,
    path: &str,
    len: usize,
    seed: u64,
) -> Result<()>
where
    E: PodExec + ?Sized,
{
    let expected = sha256_hex(&generate_data(len, seed));
    let command = format!("sha256sum {}", shell_quote(path));
    let actual = parse_digest(&exec.run(pod, &command).await?);

    if actual != expected {
        return Err(E2eError::ChecksumMismatch {
            path: path.to_string(),
            expected,
            actual,
        });
    }
    debug!("Verified {} bytes of {} in {}", len, path, pod);
    Ok(())
}

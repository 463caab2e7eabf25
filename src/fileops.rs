//! Small in-pod file operations used by the scenarios

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use crate::error::{E2eError, Result};
use crate::integrity::{check_read_from_path, check_write_to_path};
use crate::k8s::{PodExec, PodRef};
use crate::materialise::shell_quote;

/// Mode bits and numeric owner as reported by `stat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Octal permission bits without leading zero, e.g. `"644"`
    pub mode: String,
    pub gid: u32,
    pub uid: u32,
}

impl FileStat {
    /// Parse `stat -c '%a %g %u'` output
    pub fn parse(path: &str, output: &str) -> Result<Self> {
        let malformed = || E2eError::Exec {
            pod: String::new(),
            message: format!("unexpected stat output for {path}: {output:?}"),
        };

        let mut fields = output.split_whitespace();
        let mode = fields.next().ok_or_else(malformed)?.to_string();
        let gid = fields
            .next()
            .and_then(|g| g.parse().ok())
            .ok_or_else(malformed)?;
        let uid = fields
            .next()
            .and_then(|u| u.parse().ok())
            .ok_or_else(malformed)?;

        Ok(Self { mode, gid, uid })
    }
}

pub async fn stat<E>(exec: &E, pod: &PodRef, path: &str) -> Result<FileStat>
where
    E: PodExec + ?Sized,
{
    let output = exec
        .run(pod, &format!("stat -c '%a %g %u' {}", shell_quote(path)))
        .await?;
    FileStat::parse(path, &output)
}

/// Permission bits of `path`, e.g. `"755"`
pub async fn stat_mode<E>(exec: &E, pod: &PodRef, path: &str) -> Result<String>
where
    E: PodExec + ?Sized,
{
    Ok(stat(exec, pod, path).await?.mode)
}

pub async fn path_exists<E>(exec: &E, pod: &PodRef, path: &str) -> Result<bool>
where
    E: PodExec + ?Sized,
{
    let output = exec
        .exec(pod, &format!("test -e {}", shell_quote(path)))
        .await?;
    Ok(output.success())
}

/// Write `content` plus a trailing newline to `path`
pub async fn create_file_in_pod<E>(exec: &E, pod: &PodRef, path: &str, content: &str) -> Result<()>
where
    E: PodExec + ?Sized,
{
    debug!("Creating file {} in {}", path, pod);
    exec.run(
        pod,
        &format!("echo {} > {}", shell_quote(content), shell_quote(path)),
    )
    .await?;
    Ok(())
}

pub async fn create_dir_in_pod<E>(exec: &E, pod: &PodRef, path: &str) -> Result<()>
where
    E: PodExec + ?Sized,
{
    create_dirs_in_pod(exec, pod, &[path]).await
}

/// `mkdir -p` every path in one command
pub async fn create_dirs_in_pod<E>(exec: &E, pod: &PodRef, paths: &[&str]) -> Result<()>
where
    E: PodExec + ?Sized,
{
    if paths.is_empty() {
        return Ok(());
    }
    let args: Vec<String> = paths.iter().map(|p| shell_quote(p)).collect();
    debug!("Creating directories {:?} in {}", paths, pod);
    exec.run(pod, &format!("mkdir -p {}", args.join(" "))).await?;
    Ok(())
}

/// Create `<base>/<prefix>.txt` and `<base>/<prefix>-dir`, returning both paths
pub async fn create_test_file_and_dir<E>(
    exec: &E,
    pod: &PodRef,
    base: &str,
    prefix: &str,
) -> Result<(String, String)>
where
    E: PodExec + ?Sized,
{
    let file = format!("{base}/{prefix}.txt");
    let dir = format!("{base}/{prefix}-dir");
    create_file_in_pod(exec, pod, &file, "test content").await?;
    create_dir_in_pod(exec, pod, &dir).await?;
    Ok((file, dir))
}

pub async fn copy_file_in_pod<E>(exec: &E, pod: &PodRef, source: &str, target: &str) -> Result<()>
where
    E: PodExec + ?Sized,
{
    debug!("Copying {} to {} in {}", source, target, pod);
    exec.run(
        pod,
        &format!("cp {} {}", shell_quote(source), shell_quote(target)),
    )
    .await?;
    Ok(())
}

pub async fn delete_file_in_pod<E>(exec: &E, pod: &PodRef, path: &str) -> Result<()>
where
    E: PodExec + ?Sized,
{
    debug!("Deleting {} in {}", path, pod);
    exec.run(pod, &format!("rm {}", shell_quote(path))).await?;
    Ok(())
}

/// Remove `path` and confirm it is gone
pub async fn check_deleting_path<E>(exec: &E, pod: &PodRef, path: &str) -> Result<()>
where
    E: PodExec + ?Sized,
{
    let quoted = shell_quote(path);
    exec.run(pod, &format!("rm -f {quoted}")).await?;
    exec.run(pod, &format!("[ ! -e {quoted} ]")).await?;
    Ok(())
}

/// `ls -1 path` must list every entry in `expected`
pub async fn check_listing_path_with_entries<E>(
    exec: &E,
    pod: &PodRef,
    path: &str,
    expected: &[&str],
) -> Result<()>
where
    E: PodExec + ?Sized,
{
    let listing = exec.run(pod, &format!("ls -1 {}", shell_quote(path))).await?;
    let entries: Vec<&str> = listing.lines().map(str::trim).collect();

    let missing: Vec<E2eError> = expected
        .iter()
        .filter(|name| !entries.contains(name))
        .map(|name| E2eError::Exec {
            pod: pod.to_string(),
            message: format!("{name:?} not listed in {path}"),
        })
        .collect();
    E2eError::aggregate(format!("listing {path}"), missing)
}

/// Write `content` with echo, then read it back and require an exact match
pub async fn write_and_verify_file<E>(exec: &E, pod: &PodRef, path: &str, content: &str) -> Result<()>
where
    E: PodExec + ?Sized,
{
    create_file_in_pod(exec, pod, path, content).await?;
    let read = exec.run(pod, &format!("cat {}", shell_quote(path))).await?;
    if read.trim_end_matches('\n') != content {
        return Err(E2eError::Exec {
            pod: pod.to_string(),
            message: format!("{path} contains {read:?}, expected {content:?}"),
        });
    }
    Ok(())
}

/// Copy a small local file into the pod via base64
pub async fn copy_small_file_to_pod<E>(
    exec: &E,
    pod: &PodRef,
    local: &Path,
    pod_path: &str,
) -> Result<()>
where
    E: PodExec + ?Sized,
{
    let data = tokio::fs::read(local).await?;
    exec.run(
        pod,
        &format!(
            "printf '%s' '{}' | base64 -d > {}",
            STANDARD.encode(data),
            shell_quote(pod_path)
        ),
    )
    .await?;
    Ok(())
}

/// Write, read, create a subdirectory, list, then delete under `base`
pub async fn check_basic_file_operations<E>(exec: &E, pod: &PodRef, base: &str, seed: u64) -> Result<()>
where
    E: PodExec + ?Sized,
{
    const SIZE: usize = 1024;

    let dir = format!("{base}/test-dir");
    let first = format!("{base}/first");
    let second = format!("{dir}/second");

    check_write_to_path(exec, pod, &first, SIZE, seed).await?;
    check_read_from_path(exec, pod, &first, SIZE, seed).await?;
    exec.run(
        pod,
        &format!("mkdir {} && touch {}", shell_quote(&dir), shell_quote(&second)),
    )
    .await?;
    for path in [&dir, base, &second] {
        exec.run(pod, &format!("ls {}", shell_quote(path))).await?;
    }
    check_deleting_path(exec, pod, &first).await?;
    check_deleting_path(exec, pod, &second).await?;
    Ok(())
}

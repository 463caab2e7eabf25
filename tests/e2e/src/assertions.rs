//! In-pod assertions for e2e suites
//!
//! Everything here runs through `PodExec`, so the checks observe the mount
//! exactly as the workload in the pod does.

use anyhow::{bail, ensure, Result};

use s3_csi_e2e::fileops::{path_exists, stat};
use s3_csi_e2e::k8s::{ExecOutput, PodExec, PodRef};

/// Errors a FUSE mount may return for an unsupported directory rename
pub const RENAME_UNSUPPORTED_ERRORS: [&str; 3] = [
    "Operation not permitted",
    "Operation not supported",
    "Function not implemented",
];

/// Assert the permission bits of `path`, e.g. `"644"`
pub async fn assert_mode<E>(exec: &E, pod: &PodRef, path: &str, expected: &str) -> Result<()>
where
    E: PodExec + ?Sized,
{
    let actual = stat(exec, pod, path).await?.mode;
    ensure!(
        actual == expected,
        "Mode mismatch at {} in {}: expected {}, got {}",
        path,
        pod,
        expected,
        actual
    );
    Ok(())
}

/// Assert the numeric owner of `path`
pub async fn assert_owner<E>(exec: &E, pod: &PodRef, path: &str, uid: u32, gid: u32) -> Result<()>
where
    E: PodExec + ?Sized,
{
    let stat = stat(exec, pod, path).await?;
    ensure!(
        (stat.uid, stat.gid) == (uid, gid),
        "Owner mismatch at {} in {}: expected {}:{}, got {}:{}",
        path,
        pod,
        uid,
        gid,
        stat.uid,
        stat.gid
    );
    Ok(())
}

pub async fn assert_exists<E>(exec: &E, pod: &PodRef, path: &str) -> Result<()>
where
    E: PodExec + ?Sized,
{
    ensure!(
        path_exists(exec, pod, path).await?,
        "Expected {} to exist in {}",
        path,
        pod
    );
    Ok(())
}

pub async fn assert_not_exists<E>(exec: &E, pod: &PodRef, path: &str) -> Result<()>
where
    E: PodExec + ?Sized,
{
    ensure!(
        !path_exists(exec, pod, path).await?,
        "Expected {} NOT to exist in {}",
        path,
        pod
    );
    Ok(())
}

/// The pod's processes run as `uid:gid`
pub async fn assert_identity<E>(exec: &E, pod: &PodRef, uid: u32, gid: u32) -> Result<()>
where
    E: PodExec + ?Sized,
{
    let output = exec.run(pod, "echo \"$(id -u) $(id -g)\"").await?;
    let expected = format!("{uid} {gid}");
    ensure!(
        output.trim() == expected,
        "Pod {} runs as {:?}, expected {:?}",
        pod,
        output.trim(),
        expected
    );
    Ok(())
}

/// Run `command`, require a non-zero exit and one of `patterns` in its output
pub async fn assert_fails_with<E>(
    exec: &E,
    pod: &PodRef,
    command: &str,
    patterns: &[&str],
) -> Result<ExecOutput>
where
    E: PodExec + ?Sized,
{
    let output = exec.run_expect_failure(pod, command).await?;
    check_output_contains(&output, command, patterns)?;
    Ok(output)
}

fn check_output_contains(output: &ExecOutput, command: &str, patterns: &[&str]) -> Result<()> {
    let combined = output.combined();
    if patterns.iter().any(|p| combined.contains(p)) {
        return Ok(());
    }
    bail!(
        "{:?} failed with exit code {} but none of {:?} appeared in: {}",
        command,
        output.exit_code,
        patterns,
        combined.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stderr: &str, exit_code: i32) -> ExecOutput {
        ExecOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    #[test]
    fn test_any_rename_error_is_accepted() {
        for error in RENAME_UNSUPPORTED_ERRORS {
            let out = output(&format!("mv: can't rename '/mnt/volume1/a': {error}"), 1);
            assert!(check_output_contains(&out, "mv a b", &RENAME_UNSUPPORTED_ERRORS).is_ok());
        }
    }

    #[test]
    fn test_unexpected_error_is_reported() {
        let out = output("mv: can't rename: No space left on device", 1);
        let err = check_output_contains(&out, "mv a b", &RENAME_UNSUPPORTED_ERRORS).unwrap_err();
        assert!(err.to_string().contains("No space left on device"));
    }
}

//! Shell execution inside test pods

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::AttachParams;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::KubeClient;
use crate::error::{E2eError, Result};

/// Where a command runs: namespace, pod and optionally a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    pub container: Option<String>,
}

impl PodRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            container: None,
        }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Reference an existing pod object; the first container is targeted
    pub fn from_pod(pod: &Pod) -> Result<Self> {
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
        let container = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .map(|c| c.name.clone());

        Ok(Self {
            namespace,
            name,
            container,
        })
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr together, for error-substring assertions
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    /// Convert a non-zero exit into `CommandFailed`
    pub fn into_result(self, command: &str) -> Result<ExecOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(E2eError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Shell invocation for scripts streamed over stdin
pub const SCRIPT_SHELL: [&str; 2] = ["/bin/sh", "-s"];

/// Runs `/bin/sh -c <command>` inside a pod
#[async_trait]
pub trait PodExec: Send + Sync {
    /// Run a command and capture its output whatever the exit code
    async fn exec(&self, pod: &PodRef, command: &str) -> Result<ExecOutput>;

    /// Run `script` through [`SCRIPT_SHELL`] with the script on stdin.
    ///
    /// A single exec argument is capped at 128 KiB by the kernel; stdin is not.
    async fn exec_script(&self, pod: &PodRef, script: &str) -> Result<ExecOutput>;

    /// Run a command that must succeed, returning its stdout
    async fn run(&self, pod: &PodRef, command: &str) -> Result<String> {
        let output = self.exec(pod, command).await?.into_result(command)?;
        Ok(output.stdout)
    }

    /// Run a command that must fail, returning its output
    async fn run_expect_failure(&self, pod: &PodRef, command: &str) -> Result<ExecOutput> {
        let output = self.exec(pod, command).await?;
        if output.success() {
            return Err(E2eError::Exec {
                pod: pod.to_string(),
                message: format!("expected {command:?} to fail but it succeeded"),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl PodExec for KubeClient {
    async fn exec(&self, pod: &PodRef, command: &str) -> Result<ExecOutput> {
        debug!("exec in {}: {}", pod, command);
        self.attach(pod, vec!["/bin/sh", "-c", command], None).await
    }

    async fn exec_script(&self, pod: &PodRef, script: &str) -> Result<ExecOutput> {
        debug!("exec in {}: script of {} bytes on stdin", pod, script.len());
        self.attach(pod, SCRIPT_SHELL.to_vec(), Some(script.as_bytes()))
            .await
    }
}

impl KubeClient {
    async fn attach(&self, pod: &PodRef, command: Vec<&str>, input: Option<&[u8]>) -> Result<ExecOutput> {
        let exec_error = |e: &dyn fmt::Display| E2eError::Exec {
            pod: pod.to_string(),
            message: e.to_string(),
        };

        let pods = self.pods(&pod.namespace);
        let mut params = AttachParams::default()
            .stdin(input.is_some())
            .stdout(true)
            .stderr(true);
        if let Some(container) = &pod.container {
            params = params.container(container.clone());
        }

        let mut process = pods
            .exec(&pod.name, command, &params)
            .await
            .map_err(|e| exec_error(&e))?;

        let stdin = process.stdin();
        let stdout = process.stdout();
        let stderr = process.stderr();
        let status = process.take_status();

        let (written, stdout, stderr) = tokio::join!(
            write_stream(stdin, input),
            read_stream(stdout),
            read_stream(stderr)
        );
        written.map_err(|e| exec_error(&e))?;
        let status = match status {
            Some(status) => status.await,
            None => None,
        };

        process.join().await.map_err(|e| exec_error(&e))?;

        let output = ExecOutput {
            stdout: stdout?,
            stderr: stderr?,
            exit_code: exit_code(status.as_ref()),
        };
        debug!("exec in {} exited with {}", pod, output.exit_code);
        Ok(output)
    }
}

/// Write all of `input` and close the stream so the remote shell sees EOF
async fn write_stream<W>(writer: Option<W>, input: Option<&[u8]>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if let (Some(mut writer), Some(input)) = (writer, input) {
        writer.write_all(input).await?;
        writer.shutdown().await?;
    }
    Ok(())
}

async fn read_stream<R>(reader: Option<R>) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Exit code reported through the exec status channel.
///
/// A missing status means the stream ended without a verdict and counts as
/// failure.
fn exit_code(status: Option<&Status>) -> i32 {
    let Some(status) = status else {
        return -1;
    };
    if status.status.as_deref() == Some("Success") {
        return 0;
    }

    status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
                .and_then(|c| c.message.as_deref())
                .and_then(|m| m.parse().ok())
        })
        .unwrap_or(1)
}

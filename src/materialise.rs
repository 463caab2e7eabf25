//! Batched creation of files and directories inside a pod
//!
//! Building a tree with one exec per file costs a round trip to the API
//! server each time. `materialise_paths` validates every entry locally, then
//! renders the whole batch into a single `set -euo pipefail` script, so a
//! failing step aborts the rest and its stderr comes back with the error.
//! The script travels on the shell's stdin, so inline content is not bound
//! by the per-argument size limit.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use crate::error::{E2eError, Result};
use crate::k8s::{PodExec, PodRef};

/// File content to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Written verbatim
    Text(String),
    /// Base64-encoded bytes, decoded inside the pod
    Binary(String),
}

impl Content {
    /// Encode raw bytes for transport
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Content::Binary(STANDARD.encode(bytes))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) | Content::Binary(s) => s.is_empty(),
        }
    }
}

/// One file or directory to create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSpec {
    /// Absolute path inside the pod
    pub path: String,

    /// File content; `None` or empty content makes a directory
    pub content: Option<Content>,

    /// Octal permission string such as `"0644"` or `"755"`
    pub mode: Option<String>,

    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl PathSpec {
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn file(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(Content::Text(text.into())),
            ..Default::default()
        }
    }

    pub fn binary(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            content: Some(Content::from_bytes(bytes)),
            ..Default::default()
        }
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.content.as_ref().map_or(true, Content::is_empty)
    }

    /// Check the invariants without touching the pod
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| E2eError::InvalidPathSpec {
            path: self.path.clone(),
            reason: reason.to_string(),
        };

        if self.path.is_empty() {
            return Err(invalid("path is empty"));
        }
        if !self.path.starts_with('/') {
            return Err(invalid("path must be absolute"));
        }
        if self.path.contains('\0') {
            return Err(invalid("path contains a NUL byte"));
        }
        if let Some(mode) = &self.mode {
            if !is_octal_mode(mode) {
                return Err(invalid(&format!("{mode:?} is not an octal permission string")));
            }
        }
        if let Some(Content::Binary(encoded)) = &self.content {
            STANDARD
                .decode(encoded)
                .map_err(|e| invalid(&format!("content is not valid base64: {e}")))?;
        }
        Ok(())
    }

    fn render(&self, script: &mut String) {
        let path = shell_quote(&self.path);

        if self.is_dir() {
            script.push_str(&format!("mkdir -p {path}\n"));
        } else {
            script.push_str(&format!("mkdir -p \"$(dirname {path})\"\n"));
            match &self.content {
                Some(Content::Text(text)) => {
                    script.push_str(&format!("printf '%s' {} > {path}\n", shell_quote(text)));
                }
                Some(Content::Binary(encoded)) => {
                    script.push_str(&format!(
                        "printf '%s' {} | base64 -d > {path}\n",
                        shell_quote(encoded)
                    ));
                }
                None => {}
            }
        }

        if let Some(mode) = &self.mode {
            let mode = mode.strip_prefix("0o").unwrap_or(mode);
            script.push_str(&format!("chmod {mode} {path}\n"));
        }

        match (self.uid, self.gid) {
            (Some(uid), Some(gid)) => script.push_str(&format!("chown {uid}:{gid} {path}\n")),
            (Some(uid), None) => script.push_str(&format!("chown {uid} {path}\n")),
            (None, Some(gid)) => script.push_str(&format!("chgrp {gid} {path}\n")),
            (None, None) => {}
        }
    }
}

/// One to four octal digits, at most 07777
fn is_octal_mode(mode: &str) -> bool {
    let digits = mode.strip_prefix("0o").unwrap_or(mode);
    !digits.is_empty()
        && digits.len() <= 5
        && digits.chars().all(|c| ('0'..='7').contains(&c))
        && u32::from_str_radix(digits, 8).map_or(false, |m| m <= 0o7777)
}

/// Quote `s` as a single POSIX shell word
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Render the script for `specs`, validating all of them first
pub fn build_script(specs: &[PathSpec]) -> Result<String> {
    for spec in specs {
        spec.validate()?;
    }

    let mut script = String::from("set -euo pipefail\n");
    for spec in specs {
        spec.render(&mut script);
    }
    Ok(script)
}

/// Create every entry of `specs` in `pod` with a single exec
pub async fn materialise_paths<E>(exec: &E, pod: &PodRef, specs: &[PathSpec]) -> Result<()>
where
    E: PodExec + ?Sized,
{
    if specs.is_empty() {
        return Ok(());
    }

    let script = build_script(specs)?;
    debug!("Materialising {} path(s) in {}", specs.len(), pod);

    let output = match exec.exec_script(pod, &script).await {
        Ok(output) => output,
        Err(e) => {
            return Err(E2eError::Materialise {
                source: Box::new(e),
                stderr: String::new(),
            })
        }
    };

    if !output.success() {
        return Err(E2eError::Materialise {
            stderr: output.stderr.clone(),
            source: Box::new(E2eError::CommandFailed {
                command: format!("materialise script ({} paths)", specs.len()),
                exit_code: output.exit_code,
                stderr: output.stderr,
            }),
        });
    }

    Ok(())
}

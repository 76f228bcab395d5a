//! Native process sandbox backend: direct subprocess execution under
//! `rlimit`-enforced resource caps, no container or microVM isolation.
//! Mirrors the source codebase's `NativeRunner` (pre_exec rlimit syscalls,
//! no shell wrapping, output truncation under a byte cap) generalized to
//! the orchestrator's `SandboxJob`/`SandboxOutcome` wire types.
//!
//! **Isolation warning**: this backend cannot honor a non-default
//! [`NetworkPolicy`](crate::types::NetworkPolicy) — any job that requests
//! network access beyond the default-deny is rejected as a policy
//! violation rather than silently running unconfined.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::SandboxBackend;
use crate::config::SandboxConfig;
use crate::types::{NetworkPolicy, SandboxError, SandboxJob, SandboxOutcome, SandboxStatus};

pub struct NativeSandboxBackend {
    config: SandboxConfig,
}

impl NativeSandboxBackend {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    #[cfg(unix)]
    fn apply_resource_limits(command: &mut Command, job: &SandboxJob) {
        let memory_bytes = job.resource_limits.memory_bytes;
        let cpu_seconds = job.resource_limits.wallclock_seconds * job.resource_limits.cpu_cores as u64;
        let tmpfs_bytes = job.resource_limits.tmpfs_bytes;
        let pids = job.resource_limits.pids as u64;

        // SAFETY: pre_exec runs between fork() and exec(); every call here
        // (setrlimit) is async-signal-safe.
        unsafe {
            command.pre_exec(move || {
                rlimit::setrlimit(rlimit::Resource::AS, memory_bytes, memory_bytes)
                    .map_err(|e| std::io::Error::other(format!("RLIMIT_AS: {e}")))?;
                rlimit::setrlimit(rlimit::Resource::CPU, cpu_seconds, cpu_seconds)
                    .map_err(|e| std::io::Error::other(format!("RLIMIT_CPU: {e}")))?;
                rlimit::setrlimit(rlimit::Resource::FSIZE, tmpfs_bytes, tmpfs_bytes)
                    .map_err(|e| std::io::Error::other(format!("RLIMIT_FSIZE: {e}")))?;
                rlimit::setrlimit(rlimit::Resource::NPROC, pids, pids)
                    .map_err(|e| std::io::Error::other(format!("RLIMIT_NPROC: {e}")))?;
                Ok(())
            });
        }
    }

    #[cfg(not(unix))]
    fn apply_resource_limits(_command: &mut Command, _job: &SandboxJob) {
        warn!("resource limits are not enforced on this platform");
    }

    async fn read_limited<R: AsyncReadExt + Unpin>(reader: &mut R, max_bytes: usize) -> (String, bool) {
        let mut buf = vec![0u8; max_bytes + 1];
        let mut total = 0usize;
        loop {
            match reader.read(&mut buf[total..]).await {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if total > max_bytes {
                        total = max_bytes;
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let truncated = total == max_bytes;
        let text = String::from_utf8_lossy(&buf[..total]).to_string();
        (text, truncated)
    }
}

#[async_trait]
impl SandboxBackend for NativeSandboxBackend {
    async fn run(&self, job: SandboxJob) -> Result<SandboxOutcome, SandboxError> {
        if !matches!(job.network_policy, NetworkPolicy::None) {
            warn!(job_id = %job.job_id, "native backend cannot isolate network, rejecting non-default policy");
            return Ok(SandboxOutcome {
                job_id: job.job_id,
                status: SandboxStatus::PolicyViolation,
                exit_code: None,
                stdout: String::new(),
                stdout_truncated: false,
                stderr: String::new(),
                stderr_truncated: false,
                collected_artifacts: Vec::new(),
            });
        }

        if !self.config.allowed_image_tags.is_empty()
            && !self.config.allowed_image_tags.contains(&job.image_tag)
        {
            warn!(job_id = %job.job_id, image_tag = %job.image_tag, "image tag not in allowlist");
            return Ok(SandboxOutcome {
                job_id: job.job_id,
                status: SandboxStatus::PolicyViolation,
                exit_code: None,
                stdout: String::new(),
                stdout_truncated: false,
                stderr: String::new(),
                stderr_truncated: false,
                collected_artifacts: Vec::new(),
            });
        }

        let Some((program, args)) = job.entry_command.split_first() else {
            return Err(SandboxError::LaunchFailed("entry_command is empty".into()));
        };

        let workdir = tempfile::tempdir()
            .map_err(|e| SandboxError::LaunchFailed(format!("failed to create sandbox workdir: {e}")))?;

        let mut command = Command::new(program);
        command.args(args);
        command.current_dir(workdir.path());
        command.envs(&job.env);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        Self::apply_resource_limits(&mut command, &job);

        let mut child = command
            .spawn()
            .map_err(|e| SandboxError::LaunchFailed(format!("failed to spawn '{program}': {e}")))?;

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();
        let output_cap = job.resource_limits.output_bytes_cap;
        let wallclock = std::time::Duration::from_secs(job.resource_limits.wallclock_seconds);

        debug!(job_id = %job.job_id, program, "sandbox job starting");

        let run = timeout(wallclock, async {
            let stdout_fut = async {
                match stdout_handle.as_mut() {
                    Some(r) => Self::read_limited(r, output_cap).await,
                    None => (String::new(), false),
                }
            };
            let stderr_fut = async {
                match stderr_handle.as_mut() {
                    Some(r) => Self::read_limited(r, output_cap).await,
                    None => (String::new(), false),
                }
            };
            let ((stdout, stdout_trunc), (stderr, stderr_trunc)) = tokio::join!(stdout_fut, stderr_fut);
            let status = child.wait().await;
            (stdout, stdout_trunc, stderr, stderr_trunc, status)
        })
        .await;

        match run {
            Ok((stdout, stdout_truncated, stderr, stderr_truncated, Ok(status))) => Ok(SandboxOutcome {
                job_id: job.job_id,
                status: SandboxStatus::Exited,
                exit_code: status.code(),
                stdout,
                stdout_truncated,
                stderr,
                stderr_truncated,
                collected_artifacts: Vec::new(),
            }),
            Ok((_, _, _, _, Err(e))) => Err(SandboxError::LaunchFailed(format!("waiting on child failed: {e}"))),
            Err(_) => {
                let _ = child.kill().await;
                warn!(job_id = %job.job_id, wallclock_seconds = job.resource_limits.wallclock_seconds, "sandbox job timed out");
                Ok(SandboxOutcome {
                    job_id: job.job_id,
                    status: SandboxStatus::Timeout,
                    exit_code: None,
                    stdout: String::new(),
                    stdout_truncated: false,
                    stderr: String::new(),
                    stderr_truncated: false,
                    collected_artifacts: Vec::new(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobId, ResourceLimits, TaskId};
    use std::collections::HashMap;

    fn job(entry_command: Vec<&str>, wallclock_seconds: u64) -> SandboxJob {
        SandboxJob {
            job_id: JobId::new(),
            task_id: TaskId::new(),
            image_tag: "local/test".to_string(),
            entry_command: entry_command.into_iter().map(String::from).collect(),
            env: HashMap::new(),
            resource_limits: ResourceLimits {
                wallclock_seconds,
                ..Default::default()
            },
            network_policy: NetworkPolicy::None,
            input_artifacts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn successful_command_reports_exit_code() {
        let backend = NativeSandboxBackend::new(SandboxConfig::default());
        let outcome = backend
            .run(job(vec!["echo", "hello"], 5))
            .await
            .unwrap();
        assert_eq!(outcome.status, SandboxStatus::Exited);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn wallclock_timeout_kills_and_reports_timeout() {
        let backend = NativeSandboxBackend::new(SandboxConfig::default());
        let outcome = backend
            .run(job(vec!["sleep", "5"], 1))
            .await
            .unwrap();
        assert_eq!(outcome.status, SandboxStatus::Timeout);
    }

    #[tokio::test]
    async fn non_default_network_policy_is_rejected_as_policy_violation() {
        let backend = NativeSandboxBackend::new(SandboxConfig::default());
        let mut j = job(vec!["echo", "hi"], 5);
        j.network_policy = NetworkPolicy::Allowlist(vec!["example.com".into()]);
        let outcome = backend.run(j).await.unwrap();
        assert_eq!(outcome.status, SandboxStatus::PolicyViolation);
    }

    #[tokio::test]
    async fn image_tag_outside_allowlist_is_rejected() {
        let mut config = SandboxConfig::default();
        config.allowed_image_tags = vec!["approved/only".to_string()];
        let backend = NativeSandboxBackend::new(config);
        let outcome = backend.run(job(vec!["echo", "hi"], 5)).await.unwrap();
        assert_eq!(outcome.status, SandboxStatus::PolicyViolation);
    }
}

//! Sandbox Manager (§4.7): executes untrusted task output as an isolated
//! subprocess under strict resource limits, wall-clock timeout, and a
//! deny-by-default network/filesystem policy. Adapted from the source
//! codebase's native process runner, generalized from a single shell/Python
//! snippet to an arbitrary `entry_command` and the orchestrator's own
//! `SandboxJob`/`SandboxOutcome` domain types.

#[cfg(feature = "native-sandbox")]
pub mod native;

#[cfg(feature = "native-sandbox")]
pub use native::NativeSandboxBackend;

use async_trait::async_trait;

use crate::types::{SandboxError, SandboxJob, SandboxOutcome};

/// Executes one [`SandboxJob`] to completion (or until timeout/kill) and
/// returns its [`SandboxOutcome`]. Implementations own the isolation
/// mechanism (native process + rlimits, container runtime, microVM).
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn run(&self, job: SandboxJob) -> Result<SandboxOutcome, SandboxError>;
}

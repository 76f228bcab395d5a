//! Convenience re-exports for embedders wiring an [`Orchestrator`] into
//! their own binary.

pub use crate::config::OrchestratorConfig;
pub use crate::registry::{MethodDescriptor, TaskRegistry, ValidatedTask};
pub use crate::saga::{InMemorySagaStore, SagaStore, StepExecutor};
pub use crate::sandbox::SandboxBackend;
pub use crate::types::*;
pub use crate::worker_pool::WorkerHandler;
pub use crate::{CapabilityHandler, Orchestrator};

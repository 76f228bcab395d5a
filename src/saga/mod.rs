//! Saga Engine (§4.6): executes ordered, multi-step workflows as a finite
//! state machine, with per-step retry and reverse-order compensation on
//! terminal failure. Adapted from the source codebase's tool-sequence saga
//! orchestrator, generalized from hardcoded tool calls to a pluggable
//! [`StepExecutor`] keyed by `(saga_id, step_name, attempt)` so actions and
//! compensations are idempotent by construction (§4.6).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::SagaConfig;
use crate::types::{
    DefinitionId, Saga, SagaError, SagaStatus, SagaStepRecord, StepClassification, StepStatus,
    TaskId,
};

/// Executes a single named action or compensation. The orchestrator core
/// never interprets `action_key`/`compensation_key` itself — they are
/// dispatch keys into whatever worker-side registry the deployment wires up
/// (AI provider call, sandbox launch, external API), consistent with "the
/// orchestrator treats each call as opaque external I/O" (§9).
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        key: &str,
        saga_id: TaskId,
        step_name: &str,
        attempt: u32,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, String>;
}

/// One step of an immutable saga definition (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStepDef {
    pub name: String,
    pub classification: StepClassification,
    pub action_key: String,
    pub compensation_key: Option<String>,
    pub params: serde_json::Value,
}

/// An immutable, registered saga definition, referenced by [`DefinitionId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaDefinition {
    pub definition_id: DefinitionId,
    pub steps: Vec<SagaStepDef>,
}

impl SagaDefinition {
    /// Validates the same two invariants as the source codebase's
    /// orchestrator: `Final` steps never precede a non-`Final` step, and
    /// every `Compensatable` step carries a compensation.
    pub fn validate(&self) -> Result<(), SagaError> {
        let mut seen_final = false;
        for step in &self.steps {
            if seen_final && step.classification != StepClassification::Final {
                return Err(SagaError::InvalidDefinition(format!(
                    "step '{}' follows a Final step",
                    step.name
                )));
            }
            if step.classification == StepClassification::Final {
                seen_final = true;
            }
            if step.classification == StepClassification::Compensatable
                && step.compensation_key.is_none()
            {
                return Err(SagaError::InvalidDefinition(format!(
                    "compensatable step '{}' has no compensation_key",
                    step.name
                )));
            }
        }
        Ok(())
    }
}

/// Persists `Saga` aggregates so a restarted engine can resume at
/// `current_step` from the latest checkpoint (§4.6, §4.9).
#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn save(&self, saga: &Saga);
    async fn load(&self, saga_id: TaskId) -> Option<Saga>;
    async fn list_non_terminal(&self) -> Vec<Saga>;
}

#[derive(Default)]
pub struct InMemorySagaStore {
    sagas: DashMap<TaskId, Saga>,
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn save(&self, saga: &Saga) {
        self.sagas.insert(saga.saga_id, saga.clone());
    }

    async fn load(&self, saga_id: TaskId) -> Option<Saga> {
        self.sagas.get(&saga_id).map(|s| s.clone())
    }

    async fn list_non_terminal(&self) -> Vec<Saga> {
        self.sagas
            .iter()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.clone())
            .collect()
    }
}

pub struct SagaEngine {
    definitions: DashMap<DefinitionId, SagaDefinition>,
    executor: Arc<dyn StepExecutor>,
    store: Arc<dyn SagaStore>,
    config: SagaConfig,
}

impl SagaEngine {
    pub fn new(executor: Arc<dyn StepExecutor>, store: Arc<dyn SagaStore>, config: SagaConfig) -> Self {
        Self {
            definitions: DashMap::new(),
            executor,
            store,
            config,
        }
    }

    pub fn register_definition(&self, definition: SagaDefinition) -> Result<(), SagaError> {
        definition.validate()?;
        self.definitions.insert(definition.definition_id.clone(), definition);
        Ok(())
    }

    /// Starts a fresh saga and runs it to a terminal status.
    pub async fn start(
        &self,
        saga_id: TaskId,
        definition_id: DefinitionId,
    ) -> Result<Saga, SagaError> {
        let definition = self
            .definitions
            .get(&definition_id)
            .ok_or_else(|| SagaError::UnknownDefinition(definition_id.0.clone()))?
            .clone();

        let steps = definition
            .steps
            .iter()
            .map(|s| SagaStepRecord {
                name: s.name.clone(),
                classification: s.classification,
                status: StepStatus::Pending,
                started_at: None,
                finished_at: None,
                result_ref: None,
                error: None,
            })
            .collect();

        let saga = Saga::new(saga_id, definition_id, steps);
        self.store.save(&saga).await;
        self.run(saga).await
    }

    /// Resumes a non-terminal saga from `current_step` using its latest
    /// checkpoint (Recovery Supervisor entry point, §4.9).
    pub async fn resume(&self, saga_id: TaskId) -> Result<Saga, SagaError> {
        let saga = self
            .store
            .load(saga_id)
            .await
            .ok_or_else(|| SagaError::UnknownDefinition(saga_id.to_string()))?;
        if saga.status.is_terminal() {
            return Ok(saga);
        }
        self.run(saga).await
    }

    async fn run(&self, mut saga: Saga) -> Result<Saga, SagaError> {
        let definition = self
            .definitions
            .get(&saga.definition_id)
            .ok_or_else(|| SagaError::UnknownDefinition(saga.definition_id.0.clone()))?
            .clone();

        while saga.current_step < definition.steps.len() {
            let step_def = &definition.steps[saga.current_step];
            saga.steps[saga.current_step].status = StepStatus::Running;
            saga.steps[saga.current_step].started_at = Some(chrono::Utc::now());
            self.store.save(&saga).await;

            match self.run_step_with_retry(&saga, step_def).await {
                Ok(output) => {
                    let record = &mut saga.steps[saga.current_step];
                    record.status = StepStatus::Succeeded;
                    record.finished_at = Some(chrono::Utc::now());
                    record.result_ref = Some(output);
                    saga.current_step += 1;
                    self.store.save(&saga).await;
                }
                Err(reason) => {
                    let record = &mut saga.steps[saga.current_step];
                    record.status = StepStatus::Failed;
                    record.finished_at = Some(chrono::Utc::now());
                    record.error = Some(reason.clone());
                    saga.status = SagaStatus::Compensating;
                    self.store.save(&saga).await;
                    return self.compensate(saga, &definition).await;
                }
            }
        }

        saga.status = SagaStatus::Succeeded;
        self.store.save(&saga).await;
        Ok(saga)
    }

    async fn run_step_with_retry(
        &self,
        saga: &Saga,
        step_def: &SagaStepDef,
    ) -> Result<serde_json::Value, String> {
        let mut attempt = 1u32;
        let mut backoff = self.config.backoff_base;
        loop {
            let result = self
                .executor
                .execute(&step_def.action_key, saga.saga_id, &step_def.name, attempt, &step_def.params)
                .await;
            match result {
                Ok(output) => return Ok(output),
                Err(reason) if attempt < self.config.step_max_attempts => {
                    warn!(step = %step_def.name, attempt, %reason, "saga step failed, retrying");
                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.backoff_cap);
                    attempt += 1;
                }
                Err(reason) => return Err(reason),
            }
        }
    }

    async fn compensate(
        &self,
        mut saga: Saga,
        definition: &SagaDefinition,
    ) -> Result<Saga, SagaError> {
        // Compensate, in reverse, every step whose status is `Succeeded` —
        // the failed step itself never had side effects committed (§8 S4).
        let succeeded_indices: Vec<usize> = saga
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StepStatus::Succeeded)
            .map(|(i, _)| i)
            .collect();

        for &idx in succeeded_indices.iter().rev() {
            let step_def = &definition.steps[idx];
            let Some(compensation_key) = &step_def.compensation_key else {
                continue;
            };

            saga.steps[idx].status = StepStatus::Compensating;
            self.store.save(&saga).await;

            let mut attempt = 1u32;
            let mut backoff = self.config.backoff_base;
            let outcome = loop {
                let result = self
                    .executor
                    .execute(compensation_key, saga.saga_id, &step_def.name, attempt, &step_def.params)
                    .await;
                match result {
                    Ok(_) => break Ok(()),
                    Err(reason) if attempt < self.config.compensation_max_attempts => {
                        warn!(step = %step_def.name, attempt, %reason, "compensation failed, retrying");
                        sleep(backoff).await;
                        backoff = std::cmp::min(backoff * 2, self.config.backoff_cap);
                        attempt += 1;
                    }
                    Err(reason) => break Err(reason),
                }
            };

            match outcome {
                Ok(()) => {
                    saga.steps[idx].status = StepStatus::Compensated;
                    self.store.save(&saga).await;
                }
                Err(reason) => {
                    saga.status = SagaStatus::Failed;
                    self.store.save(&saga).await;
                    return Err(SagaError::CompensationFailed {
                        saga_id: saga.saga_id,
                        reason,
                    });
                }
            }
        }

        saga.status = SagaStatus::Compensated;
        self.store.save(&saga).await;
        info!(saga_id = %saga.saga_id, "saga compensated after step failure");
        Ok(saga)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ScriptedExecutor {
        calls: Mutex<Vec<String>>,
        fail_action: Option<String>,
    }

    #[async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            key: &str,
            _saga_id: TaskId,
            step_name: &str,
            _attempt: u32,
            _params: &serde_json::Value,
        ) -> Result<serde_json::Value, String> {
            self.calls.lock().push(key.to_string());
            if self.fail_action.as_deref() == Some(key) {
                Err(format!("forced failure at {step_name}"))
            } else {
                Ok(serde_json::json!("ok"))
            }
        }
    }

    fn definition() -> SagaDefinition {
        SagaDefinition {
            definition_id: DefinitionId("order-fulfillment".into()),
            steps: vec![
                SagaStepDef {
                    name: "reserve".into(),
                    classification: StepClassification::Compensatable,
                    action_key: "reserve.action".into(),
                    compensation_key: Some("reserve.compensate".into()),
                    params: serde_json::json!({}),
                },
                SagaStepDef {
                    name: "charge".into(),
                    classification: StepClassification::Compensatable,
                    action_key: "charge.action".into(),
                    compensation_key: Some("charge.compensate".into()),
                    params: serde_json::json!({}),
                },
                SagaStepDef {
                    name: "ship".into(),
                    classification: StepClassification::Compensatable,
                    action_key: "ship.action".into(),
                    compensation_key: Some("ship.compensate".into()),
                    params: serde_json::json!({}),
                },
            ],
        }
    }

    fn fast_config() -> SagaConfig {
        SagaConfig {
            step_max_attempts: 1,
            backoff_base: std::time::Duration::from_millis(1),
            backoff_cap: std::time::Duration::from_millis(1),
            compensation_max_attempts: 1,
            idempotency_retention: std::time::Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn happy_path_completes_all_steps() {
        let executor = Arc::new(ScriptedExecutor {
            calls: Mutex::new(Vec::new()),
            fail_action: None,
        });
        let engine = SagaEngine::new(executor.clone(), Arc::new(InMemorySagaStore::default()), fast_config());
        engine.register_definition(definition()).unwrap();

        let saga = engine
            .start(TaskId::new(), DefinitionId("order-fulfillment".into()))
            .await
            .unwrap();
        assert_eq!(saga.status, SagaStatus::Succeeded);
        assert_eq!(*executor.calls.lock(), vec!["reserve.action", "charge.action", "ship.action"]);
    }

    #[tokio::test]
    async fn ship_failure_compensates_in_reverse_order() {
        let executor = Arc::new(ScriptedExecutor {
            calls: Mutex::new(Vec::new()),
            fail_action: Some("ship.action".to_string()),
        });
        let engine = SagaEngine::new(executor.clone(), Arc::new(InMemorySagaStore::default()), fast_config());
        engine.register_definition(definition()).unwrap();

        let saga = engine
            .start(TaskId::new(), DefinitionId("order-fulfillment".into()))
            .await
            .unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert_eq!(
            *executor.calls.lock(),
            vec![
                "reserve.action",
                "charge.action",
                "ship.action",
                "charge.compensate",
                "reserve.compensate",
            ]
        );
    }

    #[tokio::test]
    async fn definition_rejects_compensatable_step_without_compensation() {
        let mut def = definition();
        def.steps[0].compensation_key = None;
        assert!(def.validate().is_err());
    }

    #[tokio::test]
    async fn definition_rejects_non_final_step_after_final() {
        let mut def = definition();
        def.steps[0].classification = StepClassification::Final;
        assert!(def.validate().is_err());
    }
}

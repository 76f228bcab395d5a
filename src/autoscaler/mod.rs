//! Autoscaler / SLA Monitor (§4.8): samples per-capability utilization on a
//! fixed interval and drives pool size up or down through hysteresis —
//! `k_up` consecutive high-utilization windows to scale up, `k_down`
//! consecutive low-utilization windows to scale down — with a cooldown that
//! rate-limits how often a capability may be resized. Adapted from the
//! source codebase's threshold-based resource monitor
//! (`types::resource::AlertThresholds`/`ResourceMonitorConfig`), replacing
//! per-agent memory/CPU alerting with per-capability pool-size control.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::config::AutoscalerConfig;
use crate::types::{AutoscalerError, Capability};
use crate::worker_pool::WorkerPoolManager;

/// Outcome of one sampling pass for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleUp { to: u32 },
    ScaleDown { to: u32 },
    Hold,
}

#[derive(Debug, Clone, Default)]
struct CapabilityState {
    consecutive_high: u32,
    consecutive_low: u32,
    last_scale_at: Option<DateTime<Utc>>,
}

pub struct Autoscaler {
    config: AutoscalerConfig,
    pool: Arc<WorkerPoolManager>,
    states: DashMap<Capability, CapabilityState>,
}

impl Autoscaler {
    pub fn new(pool: Arc<WorkerPoolManager>, config: AutoscalerConfig) -> Self {
        Self {
            config,
            pool,
            states: DashMap::new(),
        }
    }

    /// Records one utilization sample (`busy / current_size`, in `[0,1]`)
    /// for `capability` and applies a scale decision if hysteresis and
    /// cooldown both permit it.
    pub fn sample(&self, capability: &Capability, busy_workers: u32, current_size: u32, min: u32, max: u32) -> ScaleDecision {
        let utilization = if current_size == 0 {
            1.0
        } else {
            busy_workers as f64 / current_size as f64
        };

        let now = Utc::now();
        let mut state = self.states.entry(capability.clone()).or_default();

        if utilization >= self.config.up_threshold {
            state.consecutive_high += 1;
            state.consecutive_low = 0;
        } else if utilization <= self.config.down_threshold {
            state.consecutive_low += 1;
            state.consecutive_high = 0;
        } else {
            state.consecutive_high = 0;
            state.consecutive_low = 0;
        }

        let cooldown_active = state
            .last_scale_at
            .map(|t| now - t < chrono::Duration::from_std(self.config.cooldown).unwrap_or_default())
            .unwrap_or(false);
        if cooldown_active {
            return ScaleDecision::Hold;
        }

        if state.consecutive_high >= self.config.k_up && current_size < max {
            let to = (current_size + 1).min(max);
            state.consecutive_high = 0;
            state.last_scale_at = Some(now);
            let _ = self.pool.set_current_size(capability, to);
            info!(capability = %capability, to, utilization, "scaling up");
            return ScaleDecision::ScaleUp { to };
        }

        if state.consecutive_low >= self.config.k_down && current_size > min {
            let to = (current_size.saturating_sub(1)).max(min);
            state.consecutive_low = 0;
            state.last_scale_at = Some(now);
            let _ = self.pool.set_current_size(capability, to);
            info!(capability = %capability, to, utilization, "scaling down");
            return ScaleDecision::ScaleDown { to };
        }

        ScaleDecision::Hold
    }

    /// Operator-triggered resize (`control.scale`), bypassing hysteresis but
    /// still bounded by `[min, max]` — see [`WorkerPoolManager::set_current_size`].
    pub fn manual_scale(&self, capability: &Capability, target: u32, min: u32, max: u32) -> Result<(), AutoscalerError> {
        if min > max {
            return Err(AutoscalerError::InvalidBounds { min, max });
        }
        self.pool
            .set_current_size(capability, target)
            .map_err(|_| AutoscalerError::InvalidBounds { min, max })?;
        self.states.entry(capability.clone()).or_default().last_scale_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::config::WorkerPoolConfig;

    fn autoscaler() -> (Autoscaler, Arc<WorkerPoolManager>) {
        let queue = Arc::new(InMemoryQueue::new());
        let pool = Arc::new(WorkerPoolManager::new(queue, WorkerPoolConfig::default()));
        let mut config = AutoscalerConfig::default();
        config.k_up = 3;
        config.k_down = 2;
        config.cooldown = std::time::Duration::from_secs(0);
        let autoscaler = Autoscaler::new(pool.clone(), config);
        (autoscaler, pool)
    }

    #[test]
    fn scales_up_after_k_consecutive_high_windows() {
        let (autoscaler, _pool) = autoscaler();
        let cap = Capability::Reasoning;
        assert_eq!(autoscaler.sample(&cap, 9, 10, 1, 20), ScaleDecision::Hold);
        assert_eq!(autoscaler.sample(&cap, 9, 10, 1, 20), ScaleDecision::Hold);
        assert_eq!(autoscaler.sample(&cap, 9, 10, 1, 20), ScaleDecision::ScaleUp { to: 11 });
    }

    #[test]
    fn scales_down_after_k_consecutive_low_windows() {
        let (autoscaler, _pool) = autoscaler();
        let cap = Capability::Reasoning;
        assert_eq!(autoscaler.sample(&cap, 1, 10, 1, 20), ScaleDecision::Hold);
        assert_eq!(autoscaler.sample(&cap, 1, 10, 1, 20), ScaleDecision::ScaleDown { to: 9 });
    }

    #[test]
    fn never_scales_below_min_or_above_max() {
        let (autoscaler, _pool) = autoscaler();
        let cap = Capability::Reasoning;
        for _ in 0..10 {
            autoscaler.sample(&cap, 0, 1, 1, 20);
        }
        assert_eq!(autoscaler.sample(&cap, 0, 1, 1, 20), ScaleDecision::Hold);
    }

    #[test]
    fn mixed_windows_reset_the_streak() {
        let (autoscaler, _pool) = autoscaler();
        let cap = Capability::Reasoning;
        assert_eq!(autoscaler.sample(&cap, 9, 10, 1, 20), ScaleDecision::Hold);
        assert_eq!(autoscaler.sample(&cap, 5, 10, 1, 20), ScaleDecision::Hold);
        assert_eq!(autoscaler.sample(&cap, 9, 10, 1, 20), ScaleDecision::Hold);
        assert_eq!(autoscaler.sample(&cap, 9, 10, 1, 20), ScaleDecision::Hold);
    }
}

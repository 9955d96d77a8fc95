//! Autoscale policy

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaasError};

/// Policy as stored on the instance and returned by `GET /autoscale`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Autoscale {
    #[serde(rename = "minReplicas", alias = "min", default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(rename = "maxReplicas", alias = "max", default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rps: Option<i32>,
}

impl Autoscale {
    /// Checks a full policy (create, or the result of merging a patch).
    pub fn validate(&self) -> Result<()> {
        let max = self
            .max_replicas
            .ok_or_else(|| RpaasError::validation("max replicas is required"))?;
        if max < 1 {
            return Err(RpaasError::validation("max replicas must be at least 1"));
        }
        if let Some(min) = self.min_replicas {
            if min < 0 {
                return Err(RpaasError::validation("min replicas cannot be negative"));
            }
            if min > max {
                return Err(RpaasError::validation(
                    "max replicas must be greater than or equal to min replicas",
                ));
            }
        }
        if self.cpu.is_none() && self.memory.is_none() && self.rps.is_none() {
            return Err(RpaasError::validation(
                "at least one of cpu, memory or rps is required",
            ));
        }
        for (name, value) in [("cpu", self.cpu), ("memory", self.memory), ("rps", self.rps)] {
            if matches!(value, Some(v) if v <= 0) {
                return Err(RpaasError::validation(format!(
                    "{} target must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Applies a partial update, keeping every absent field.
    pub fn merge(&self, patch: &Autoscale) -> Autoscale {
        Autoscale {
            min_replicas: patch.min_replicas.or(self.min_replicas),
            max_replicas: patch.max_replicas.or(self.max_replicas),
            cpu: patch.cpu.or(self.cpu),
            memory: patch.memory.or(self.memory),
            rps: patch.rps.or(self.rps),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Autoscale::default()
    }
}

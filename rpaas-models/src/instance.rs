//! Instance level value types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaasError};

/// Longest accepted instance name (DNS label limit).
pub const MAX_INSTANCE_NAME_LEN: usize = 63;

/// Checks `[a-z0-9][a-z0-9-]{0,62}`.
pub fn validate_instance_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RpaasError::validation("name is required"));
    }
    if name.len() > MAX_INSTANCE_NAME_LEN {
        return Err(RpaasError::validation(format!(
            "instance name cannot be longer than {} characters",
            MAX_INSTANCE_NAME_LEN
        )));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !first_ok || !rest_ok {
        return Err(RpaasError::validation(format!(
            "invalid instance name {:?}: must match [a-z0-9][a-z0-9-]{{0,62}}",
            name
        )));
    }
    Ok(())
}

// ============================================================================
// Create / Update
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateArgs {
    pub name: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub flavors: Vec<String>,
    /// Free-form plan parameters (`parameters.flavors=...`, `parameters.ip=...`)
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl CreateArgs {
    pub fn validate(&self) -> Result<()> {
        validate_instance_name(&self.name)?;
        if self.team.is_empty() {
            return Err(RpaasError::validation("team name is required"));
        }
        validate_tags(&self.tags)
    }

    /// Flavors can arrive either as a top level list or inside `parameters.flavors`
    /// as a comma separated string.
    pub fn all_flavors(&self) -> Vec<String> {
        let mut flavors = self.flavors.clone();
        if let Some(value) = self.parameters.get("flavors") {
            flavors.extend(flatten_parameter(value));
        }
        flavors.retain(|f| !f.is_empty());
        dedup_keep_order(flavors)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateArgs {
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub flavors: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl UpdateArgs {
    pub fn validate(&self) -> Result<()> {
        validate_tags(&self.tags)
    }

    pub fn all_flavors(&self) -> Vec<String> {
        let mut flavors = self.flavors.clone();
        if let Some(value) = self.parameters.get("flavors") {
            flavors.extend(flatten_parameter(value));
        }
        flavors.retain(|f| !f.is_empty());
        dedup_keep_order(flavors)
    }
}

fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(RpaasError::validation("tags cannot be empty strings"));
    }
    Ok(())
}

fn flatten_parameter(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => s.split(',').map(|f| f.trim().to_string()).collect(),
        serde_json::Value::Array(items) => items.iter().flat_map(flatten_parameter).collect(),
        serde_json::Value::Object(map) => map.values().flat_map(flatten_parameter).collect(),
        other => vec![other.to_string()],
    }
}

fn dedup_keep_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

// ============================================================================
// Instance
// ============================================================================

/// Projection of an instance as stored by the operator
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    pub plan: String,
    pub team: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub flavors: Vec<String>,
    /// Desired replicas; `None` when the autoscaler owns the count
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub shutdown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flavor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One `{label, value}` row of the legacy service info document.
/// Counts go out as JSON numbers, everything else as strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInfoItem {
    pub label: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScaleArgs {
    pub quantity: i32,
}

impl ScaleArgs {
    pub fn validate(&self) -> Result<()> {
        if self.quantity < 0 {
            return Err(RpaasError::validation(format!(
                "invalid quantity: {}",
                self.quantity
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataItem {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata {
    #[serde(default)]
    pub labels: Vec<MetadataItem>,
    #[serde(default)]
    pub annotations: Vec<MetadataItem>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(RpaasError::validation("metadata cannot be empty"));
        }
        for item in self.labels.iter().chain(self.annotations.iter()) {
            if item.name.is_empty() {
                return Err(RpaasError::validation("metadata name is required"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Binds
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BindAppArgs {
    #[serde(rename = "app-name", alias = "app_name", default)]
    pub app_name: String,
    #[serde(rename = "app-hosts", alias = "app-host", default)]
    pub app_hosts: Vec<String>,
    #[serde(rename = "app-internal-hosts", default)]
    pub app_internal_hosts: Vec<String>,
    #[serde(rename = "app-cluster-name", default)]
    pub app_cluster_name: String,
}

impl BindAppArgs {
    pub fn validate(&self) -> Result<()> {
        if self.app_name.is_empty() {
            return Err(RpaasError::validation("app name is required"));
        }
        if self.app_hosts.is_empty() && self.app_internal_hosts.is_empty() {
            return Err(RpaasError::validation("application host is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnbindAppArgs {
    #[serde(rename = "app-name", alias = "app_name", default)]
    pub app_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bind {
    pub name: String,
    pub host: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_names() {
        assert!(validate_instance_name("my-instance").is_ok());
        assert!(validate_instance_name("0abc").is_ok());
        assert!(validate_instance_name(&"a".repeat(63)).is_ok());

        assert!(validate_instance_name("").is_err());
        assert!(validate_instance_name("-abc").is_err());
        assert!(validate_instance_name("My-Instance").is_err());
        assert!(validate_instance_name("my_instance").is_err());
        assert!(validate_instance_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn create_args_require_team() {
        let args = CreateArgs {
            name: "my-instance".to_string(),
            plan: "small".to_string(),
            ..Default::default()
        };
        let err = args.validate().unwrap_err();
        assert_eq!(err.to_string(), "team name is required");
    }

    #[test]
    fn flavors_from_parameters_are_merged() {
        let mut args = CreateArgs {
            name: "my-instance".to_string(),
            team: "team-one".to_string(),
            flavors: vec!["orange".to_string()],
            ..Default::default()
        };
        args.parameters.insert(
            "flavors".to_string(),
            serde_json::Value::String("strawberry, orange,mango".to_string()),
        );
        assert_eq!(args.all_flavors(), vec!["orange", "strawberry", "mango"]);
    }

    #[test]
    fn negative_scale_is_rejected() {
        let err = ScaleArgs { quantity: -1 }.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid quantity: -1");
    }

    #[test]
    fn bind_app_needs_a_host() {
        let args = BindAppArgs {
            app_name: "app1".to_string(),
            ..Default::default()
        };
        assert!(args.validate().is_err());
    }
}

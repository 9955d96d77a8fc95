//! Cache purge requests and results

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaasError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurgeArgs {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub preserve_path: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, Vec<String>>,
}

impl PurgeArgs {
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(RpaasError::validation("path is required"));
        }
        Ok(())
    }
}

/// One entry of the bulk purge response, in request order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurgeBulkResult {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances_purged: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PurgeBulkResult {
    pub fn purged(path: impl Into<String>, count: usize) -> Self {
        Self {
            path: path.into(),
            instances_purged: Some(count),
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            instances_purged: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub fn purged_message(count: usize) -> String {
    format!("Object purged on {} servers", count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_serialize_like_the_wire_format() {
        let ok = serde_json::to_string(&PurgeBulkResult::purged("/a", 3)).unwrap();
        assert_eq!(ok, r#"{"path":"/a","instances_purged":3}"#);
        let failed = serde_json::to_string(&PurgeBulkResult::failed("/b", "timeout")).unwrap();
        assert_eq!(failed, r#"{"path":"/b","error":"timeout"}"#);
    }

    #[test]
    fn bulk_items_accept_missing_optional_fields() {
        let items: Vec<PurgeArgs> =
            serde_json::from_str(r#"[{"path":"/a"},{"path":"/b","preserve_path":true,"extra_headers":{"Host":["x"]}}]"#)
                .unwrap();
        assert_eq!(items.len(), 2);
        assert!(!items[0].preserve_path);
        assert_eq!(items[1].extra_headers["Host"], vec!["x".to_string()]);
    }

    #[test]
    fn path_is_required() {
        assert!(PurgeArgs::default().validate().is_err());
    }
}

//! Access control list: upstreams an instance is allowed to reach

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaasError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AllowedUpstream {
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

impl AllowedUpstream {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RpaasError::validation("host is required"));
        }
        if let Some(port) = self.port {
            if !(1..=65535).contains(&port) {
                return Err(RpaasError::validation(format!(
                    "invalid port {}: must be between 1 and 65535",
                    port
                )));
            }
        }
        Ok(())
    }

    /// Form clients send `port=0` or nothing when the port is unset
    pub fn normalized(mut self) -> Self {
        if self.port == Some(0) {
            self.port = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_and_port_rules() {
        let ok = AllowedUpstream {
            host: "10.0.0.1".to_string(),
            port: Some(443),
        };
        assert!(ok.validate().is_ok());

        let no_port = AllowedUpstream {
            host: "my-app.apps.tsuru.io".to_string(),
            port: None,
        };
        assert!(no_port.validate().is_ok());

        let empty = AllowedUpstream::default();
        assert_eq!(empty.validate().unwrap_err().to_string(), "host is required");

        let bad_port = AllowedUpstream {
            host: "10.0.0.1".to_string(),
            port: Some(70000),
        };
        assert!(bad_port.validate().is_err());
    }

    #[test]
    fn zero_port_means_unset() {
        let upstream = AllowedUpstream {
            host: "h".to_string(),
            port: Some(0),
        }
        .normalized();
        assert_eq!(upstream.port, None);
    }
}

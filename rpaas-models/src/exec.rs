//! Options for the streaming endpoints (exec, debug, log)

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaasError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

/// Query parameters accepted by `/exec` and `/debug`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecOptions {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u16>,
    /// Debug only: image of the ephemeral container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub ws: bool,
}

impl ExecOptions {
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() && self.image.is_none() {
            return Err(RpaasError::validation("command is required"));
        }
        if self.width.is_some() != self.height.is_some() {
            return Err(RpaasError::validation(
                "width and height must be provided together",
            ));
        }
        Ok(())
    }

    pub fn terminal_size(&self) -> Option<TerminalSize> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if self.tty => Some(TerminalSize { width, height }),
            _ => None,
        }
    }
}

/// Query parameters accepted by `/log`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<i64>,
    /// Only return logs newer than this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default)]
    pub follow: bool,
    #[serde(default)]
    pub timestamp: bool,
}

impl LogOptions {
    pub fn validate(&self) -> Result<()> {
        if matches!(self.lines, Some(l) if l < 0) {
            return Err(RpaasError::validation("lines cannot be negative"));
        }
        if matches!(self.since, Some(s) if s < 0) {
            return Err(RpaasError::validation("since cannot be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_size_requires_tty() {
        let mut opts = ExecOptions {
            command: vec!["bash".to_string()],
            width: Some(80),
            height: Some(24),
            ..Default::default()
        };
        assert_eq!(opts.terminal_size(), None);
        opts.tty = true;
        assert_eq!(
            opts.terminal_size(),
            Some(TerminalSize {
                width: 80,
                height: 24
            })
        );
    }

    #[test]
    fn command_is_required_for_exec() {
        assert!(ExecOptions::default().validate().is_err());
        let debug = ExecOptions {
            image: Some("busybox".to_string()),
            ..Default::default()
        };
        assert!(debug.validate().is_ok());
    }

    #[test]
    fn partial_size_is_rejected() {
        let opts = ExecOptions {
            command: vec!["sh".to_string()],
            width: Some(80),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }
}

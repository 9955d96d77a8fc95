//! Application-layer routes (NGINX locations)

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaasError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, rename = "https_only", alias = "httpsOnly")]
    pub https_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Route {
    /// Normalizes empty strings into `None` so form submissions behave like JSON.
    pub fn normalized(mut self) -> Self {
        self.server_name = self.server_name.filter(|s| !s.is_empty());
        self.destination = self.destination.filter(|s| !s.is_empty());
        self.content = self.content.filter(|s| !s.is_empty());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(RpaasError::validation("path is required"));
        }
        match (&self.destination, &self.content) {
            (None, None) => {
                return Err(RpaasError::validation("either content or destination are required"))
            }
            (Some(_), Some(_)) => {
                return Err(RpaasError::validation(
                    "cannot set both content and destination",
                ))
            }
            _ => {}
        }
        if self.https_only && self.destination.is_none() {
            return Err(RpaasError::validation(
                "https_only requires a destination",
            ));
        }
        Ok(())
    }

    /// `(server_name, path)` identifies a route inside an instance
    pub fn same_key(&self, server_name: Option<&str>, path: &str) -> bool {
        self.path == path && self.server_name.as_deref() == server_name
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeleteRouteArgs {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub server_name: Option<String>,
}

impl DeleteRouteArgs {
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(RpaasError::validation("path is required"));
        }
        Ok(())
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteList {
    pub paths: Vec<Route>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(destination: Option<&str>, content: Option<&str>, https_only: bool) -> Route {
        Route {
            path: "/app".to_string(),
            server_name: None,
            destination: destination.map(String::from),
            https_only,
            content: content.map(String::from),
        }
    }

    #[test]
    fn exactly_one_of_destination_or_content() {
        assert!(route(Some("app.tsuru.io"), None, false).validate().is_ok());
        assert!(route(None, Some("return 204;"), false).validate().is_ok());
        assert!(route(None, None, false).validate().is_err());
        assert!(route(Some("app.tsuru.io"), Some("return 204;"), false)
            .validate()
            .is_err());
    }

    #[test]
    fn https_only_requires_destination() {
        assert!(route(Some("app.tsuru.io"), None, true).validate().is_ok());
        let err = route(None, Some("return 204;"), true).validate().unwrap_err();
        assert_eq!(err.to_string(), "https_only requires a destination");
    }

    #[test]
    fn empty_strings_are_normalized() {
        let r = Route {
            path: "/".to_string(),
            server_name: Some(String::new()),
            destination: Some("app".to_string()),
            https_only: false,
            content: Some(String::new()),
        }
        .normalized();
        assert!(r.server_name.is_none());
        assert!(r.content.is_none());
        assert!(r.validate().is_ok());
    }
}

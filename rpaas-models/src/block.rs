//! NGINX configuration fragments

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaasError};

/// NGINX context a fragment is injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockContext {
    Root,
    Http,
    Server,
    LuaServer,
    LuaWorker,
}

impl BlockContext {
    pub const ALL: [BlockContext; 5] = [
        BlockContext::Root,
        BlockContext::Http,
        BlockContext::Server,
        BlockContext::LuaServer,
        BlockContext::LuaWorker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockContext::Root => "root",
            BlockContext::Http => "http",
            BlockContext::Server => "server",
            BlockContext::LuaServer => "lua-server",
            BlockContext::LuaWorker => "lua-worker",
        }
    }
}

impl fmt::Display for BlockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockContext {
    type Err = RpaasError;

    fn from_str(s: &str) -> Result<Self> {
        BlockContext::ALL
            .iter()
            .copied()
            .find(|ctx| ctx.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = BlockContext::ALL.iter().map(|c| c.as_str()).collect();
                RpaasError::validation(format!(
                    "invalid block_name {:?}: allowed values are {}",
                    s,
                    allowed.join(", ")
                ))
            })
    }
}

/// Incoming `POST /block` form
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateBlockArgs {
    #[serde(default)]
    pub block_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub extend: bool,
}

impl UpdateBlockArgs {
    pub fn into_block(self) -> Result<ConfigurationBlock> {
        let context = self.block_name.parse::<BlockContext>()?;
        let block = ConfigurationBlock {
            context,
            content: self.content,
            server_name: self.server_name.filter(|s| !s.is_empty()),
            extend: self.extend,
        };
        block.validate()?;
        Ok(block)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigurationBlock {
    #[serde(rename = "block_name")]
    pub context: BlockContext,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extend: bool,
}

impl ConfigurationBlock {
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(RpaasError::validation("content is required"));
        }
        if self.server_name.is_some() && self.context != BlockContext::Server {
            return Err(RpaasError::validation(
                "server_name is only supported on the server block",
            ));
        }
        Ok(())
    }
}

/// Removal query; `server_name` narrows a server block removal to one host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeleteBlockArgs {
    #[serde(default)]
    pub server_name: Option<String>,
}

impl DeleteBlockArgs {
    pub fn server_name(&self, context: BlockContext) -> Result<Option<&str>> {
        let server_name = self.server_name.as_deref().filter(|s| !s.is_empty());
        if server_name.is_some() && context != BlockContext::Server {
            return Err(RpaasError::validation(
                "server_name is only supported on the server block",
            ));
        }
        Ok(server_name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockList {
    pub blocks: Vec<ConfigurationBlock>,
}

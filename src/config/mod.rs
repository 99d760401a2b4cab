//! Configuration bundle input model
//!
//! A [`MergeConfig`] is one project's configuration bundle: its permission
//! grants, plugin-server (MCP) registrations, and free-form settings tree.
//! Bundles are parsed from a project's JSON configuration file and are
//! immutable once read; file discovery itself is the caller's concern.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Errors raised while reading a configuration bundle
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("configuration root must be a JSON object")]
    NotAnObject,

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// A named plugin-server (MCP) registration
///
/// The descriptor is an open record: fields beyond the well-known ones are
/// preserved under `config` so they survive a merge round-trip verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    /// Whether the server is enabled
    #[serde(default = "enabled_default")]
    pub enabled: bool,

    /// Endpoint URL, if the server is remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// API key reference, if the endpoint requires one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Any additional descriptor fields, kept as-is
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

fn enabled_default() -> bool {
    true
}

impl Default for McpServer {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            api_key: None,
            config: Map::new(),
        }
    }
}

/// One project's configuration bundle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    /// Project identifier, assigned by the loader (directory name by default)
    #[serde(default)]
    pub project: String,

    /// Permission grant expressions in source order, e.g. `Read(*)`, `Write(src/*)`
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Plugin-server registrations keyed by name
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServer>,

    /// Free-form settings tree (arbitrarily nested JSON)
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl MergeConfig {
    /// Create an empty bundle for the given project identifier
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    /// Parse a bundle from a project's JSON configuration text
    ///
    /// Recognized top-level keys are `permissions`, `mcpServers`, and
    /// `settings`. Unknown top-level keys are preserved under `settings`
    /// rather than dropped, so nothing a project wrote is lost in the merge.
    pub fn from_json(project: impl Into<String>, json: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_json::from_str(json)?;
        let Value::Object(root) = root else {
            return Err(ConfigError::NotAnObject);
        };

        let mut config = Self::new(project);

        for (key, value) in root {
            match key.as_str() {
                "permissions" => {
                    config.permissions = parse_permissions(value)?;
                }
                "mcpServers" => {
                    config.mcp_servers =
                        serde_json::from_value(value).map_err(|e| ConfigError::InvalidField {
                            field: "mcpServers".to_string(),
                            reason: e.to_string(),
                        })?;
                }
                "settings" => {
                    if let Value::Object(map) = value {
                        // Explicit settings merge under any unknown keys
                        // already collected; explicit keys win.
                        for (k, v) in map {
                            config.settings.insert(k, v);
                        }
                    } else {
                        return Err(ConfigError::InvalidField {
                            field: "settings".to_string(),
                            reason: "expected a JSON object".to_string(),
                        });
                    }
                }
                _ => {
                    config.settings.entry(key).or_insert(value);
                }
            }
        }

        Ok(config)
    }

    /// Load a bundle from a project's JSON configuration file
    ///
    /// The project identifier is the containing directory name, falling back
    /// to the file stem when the file sits at a filesystem root.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        let project = path
            .parent()
            .and_then(Path::file_name)
            .or_else(|| path.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_json(project, &json)
    }
}

fn parse_permissions(value: Value) -> Result<Vec<String>, ConfigError> {
    let Value::Array(items) = value else {
        return Err(ConfigError::InvalidField {
            field: "permissions".to_string(),
            reason: "expected a JSON array of strings".to_string(),
        });
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(ConfigError::InvalidField {
                field: "permissions".to_string(),
                reason: format!("expected a string, got {other}"),
            }),
        })
        .collect()
}

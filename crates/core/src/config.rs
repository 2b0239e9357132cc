//! TOML-based configuration for a local workspace.
//!
//! Every section is optional; a missing section takes its defaults, so an
//! empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conflict::{AutoResolveOptions, AutoResolvePolicy, MergeOptions, RenameEditPrecedence};
use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Workspace identity and local storage.
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Which conflicts are resolved without asking.
    #[serde(default)]
    pub auto_resolve: AutoResolveConfig,

    /// Conflict marker layout.
    #[serde(default)]
    pub merge: MergeConfig,
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Display name of the workspace.
    #[serde(default)]
    pub name: String,

    /// Directory holding the local version database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level filter (e.g. "info", "debug", "lws_core=trace").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".lws")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Auto-resolve
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoResolveConfig {
    /// Enabled rules: `only_local_target`, `only_server_source`, `both`,
    /// `incoming_name`, `redundant`.
    #[serde(default = "default_options")]
    pub options: Vec<String>,

    /// Do not report resolutions that took a name or encoding from the
    /// server.
    #[serde(default)]
    pub silent: bool,

    #[serde(default)]
    pub rename_edit_precedence: RenameEditPrecedence,
}

fn default_options() -> Vec<String> {
    [
        "only_local_target",
        "only_server_source",
        "both",
        "incoming_name",
        "redundant",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for AutoResolveConfig {
    fn default() -> Self {
        Self {
            options: default_options(),
            silent: false,
            rename_edit_precedence: RenameEditPrecedence::default(),
        }
    }
}

impl AutoResolveConfig {
    /// The configured rules as a flag set.
    pub fn flags(&self) -> Result<AutoResolveOptions, ConfigError> {
        let mut flags = AutoResolveOptions::empty();
        for name in &self.options {
            let flag = AutoResolveOptions::from_rule_name(name).ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "auto_resolve.options".into(),
                    detail: format!("unknown rule '{}'", name),
                }
            })?;
            flags |= flag;
        }
        if self.silent {
            flags |= AutoResolveOptions::SILENT;
        }
        Ok(flags)
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_local_label")]
    pub local_label: String,

    #[serde(default = "default_latest_label")]
    pub latest_label: String,

    /// Include the ancestor lines inside conflict markers.
    #[serde(default)]
    pub include_base: bool,
}

fn default_local_label() -> String {
    "yours".to_string()
}

fn default_latest_label() -> String {
    "theirs".to_string()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            local_label: default_local_label(),
            latest_label: default_latest_label(),
            include_base: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file on disk.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate that the configuration is internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace.log_level.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "workspace.log_level".into(),
                detail: "log level must not be empty".into(),
            });
        }
        if self.workspace.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "workspace.data_dir".into(),
                detail: "data directory must not be empty".into(),
            });
        }

        self.auto_resolve.flags()?;

        for (field, label) in [
            ("merge.local_label", &self.merge.local_label),
            ("merge.latest_label", &self.merge.latest_label),
        ] {
            if label.contains('\n') {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "label must fit on one line".into(),
                });
            }
        }

        info!("configuration validated successfully");
        Ok(())
    }

    /// The auto-resolve policy described by `[auto_resolve]`.
    pub fn policy(&self) -> Result<AutoResolvePolicy, ConfigError> {
        Ok(AutoResolvePolicy::new(self.auto_resolve.flags()?)
            .with_rename_edit(self.auto_resolve.rename_edit_precedence))
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            local_label: self.merge.local_label.clone(),
            latest_label: self.merge.latest_label.clone(),
            include_base: self.merge.include_base,
        }
    }

    /// Path of the local version database.
    pub fn database_path(&self) -> PathBuf {
        self.workspace.data_dir.join("lws.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[workspace]
name = "dev-box"
data_dir = "/tmp/lws"
log_level = "debug"

[auto_resolve]
options = ["only_local_target", "redundant"]
silent = true
rename_edit_precedence = "path_only"

[merge]
local_label = "workspace"
latest_label = "server"
include_base = true
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml_str(sample_toml()).unwrap();
        assert_eq!(config.workspace.name, "dev-box");
        assert_eq!(config.workspace.data_dir, PathBuf::from("/tmp/lws"));
        assert_eq!(config.workspace.log_level, "debug");
        assert_eq!(
            config.auto_resolve.rename_edit_precedence,
            RenameEditPrecedence::PathOnly
        );
        assert!(config.merge.include_base);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/lws/lws.db"));
    }

    #[test]
    fn test_defaults_from_empty_file() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.workspace.data_dir, PathBuf::from(".lws"));
        assert_eq!(config.merge.local_label, "yours");
        assert_eq!(config.merge.latest_label, "theirs");
        assert_eq!(config.auto_resolve.flags().unwrap(), AutoResolveOptions::ALL);
        config.validate().unwrap();
    }

    #[test]
    fn test_policy_from_config() {
        let config = AppConfig::from_toml_str(sample_toml()).unwrap();
        let policy = config.policy().unwrap();
        assert_eq!(
            policy.options,
            AutoResolveOptions::ONLY_LOCAL_TARGET
                | AutoResolveOptions::REDUNDANT
                | AutoResolveOptions::SILENT
        );
        assert_eq!(policy.rename_edit, RenameEditPrecedence::PathOnly);

        let options = config.merge_options();
        assert_eq!(options.local_label, "workspace");
        assert!(options.include_base);
    }

    #[test]
    fn test_unknown_rule_rejected() {
        let config =
            AppConfig::from_toml_str("[auto_resolve]\noptions = [\"everything\"]\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "auto_resolve.options"
        ));
    }

    #[test]
    fn test_validate_empty_log_level() {
        let mut config = AppConfig::default();
        config.workspace.log_level = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml() {
        let err = AppConfig::from_toml_str("[workspace\nname = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();
        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.workspace.name, "dev-box");
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load_from_file("/nonexistent/lws.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = AppConfig::from_toml_str(sample_toml()).unwrap();
        let text = config.to_toml_string().unwrap();
        assert_eq!(AppConfig::from_toml_str(&text).unwrap(), config);
    }
}

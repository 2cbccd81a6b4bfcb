//! TOML-based configuration for SceneMerge.
//!
//! The git executable path can be overridden through an environment variable
//! named by `vcs.git_path_env`; it is resolved at load time by
//! [`MergeConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::action::{Confirmation, FilterSettings, MergeFilter};
use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file. Every section is
/// optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Resolution behaviour.
    #[serde(default)]
    pub merge: MergeSettings,

    /// Version-control settings.
    #[serde(default)]
    pub vcs: VcsConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Default group filter.
    #[serde(default)]
    pub filter: FilterSettings,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// What to do when resolving a parenting conflict "theirs" needs a parent
/// that does not exist on our side yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingParentPolicy {
    /// Ask the user.
    #[default]
    Ask,
    /// Add the parent without asking.
    Always,
    /// Never add it; the parenting conflict stays unresolved.
    Never,
}

impl MissingParentPolicy {
    /// The answer handed to the engine up front.
    pub fn confirmation(self) -> Confirmation {
        match self {
            Self::Ask => Confirmation::Ask,
            Self::Always => Confirmation::Granted,
            Self::Never => Confirmation::Denied,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSettings {
    /// Resolve node and component existence conflicts to their default side
    /// as soon as they are detected (default true).
    #[serde(default = "default_automerge")]
    pub automerge: bool,

    #[serde(default)]
    pub missing_parent: MissingParentPolicy,
}

fn default_automerge() -> bool {
    true
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            automerge: default_automerge(),
            missing_parent: MissingParentPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// VCS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Path to the git executable.
    #[serde(default = "default_git_path")]
    pub git_path: PathBuf,

    /// Environment variable that, when set, overrides `git_path`.
    #[serde(default)]
    pub git_path_env: Option<String>,
}

#[cfg(windows)]
fn default_git_path() -> PathBuf {
    PathBuf::from(r"C:\Program Files (x86)\Git\bin\git.exe")
}

#[cfg(not(windows))]
fn default_git_path() -> PathBuf {
    PathBuf::from("/usr/bin/git")
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            git_path: default_git_path(),
            git_path_env: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl MergeConfig {
    /// Load a [`MergeConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: MergeConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Write the configuration back as TOML, creating parent folders.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Apply `vcs.git_path_env` if it names a variable that is set.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.vcs.git_path_env {
            if let Some(path) = resolve_optional_env(env_name, "vcs.git_path_env") {
                self.vcs.git_path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vcs.git_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "vcs.git_path".into(),
                detail: "git path must not be empty".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.log.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log.level".into(),
                detail: format!(
                    "unknown level '{}', expected one of {}",
                    self.log.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        if let Err(e) = MergeFilter::new(self.filter.clone()) {
            return Err(ConfigError::InvalidValue {
                field: "filter.expression".into(),
                detail: e.to_string(),
            });
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FilterMode;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[merge]
automerge = false
missing_parent = "always"

[vcs]
git_path = "/opt/git/bin/git"
git_path_env = "SCENEMERGE_TEST_UNSET_GIT"

[log]
level = "debug"

[filter]
enabled = true
expression = "Enemy"
mode = "exclusion"

[filter.state]
conflict = true
done = false
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: MergeConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert!(!config.merge.automerge);
        assert_eq!(config.merge.missing_parent, MissingParentPolicy::Always);
        assert_eq!(config.vcs.git_path, PathBuf::from("/opt/git/bin/git"));
        assert_eq!(config.log.level, "debug");
        assert!(config.filter.enabled);
        assert_eq!(config.filter.mode, FilterMode::Exclusion);
        assert!(!config.filter.state.done);
    }

    #[test]
    fn test_defaults() {
        let config: MergeConfig = toml::from_str("").unwrap();
        assert!(config.merge.automerge);
        assert_eq!(config.merge.missing_parent, MissingParentPolicy::Ask);
        assert_eq!(config.vcs.git_path, default_git_path());
        assert_eq!(config.log.level, "info");
        assert!(!config.filter.enabled);
        assert!(config.filter.state.conflict && config.filter.state.done);
        assert_eq!(config, MergeConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenemerge.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = MergeConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = MergeConfig::load_from_file("/nonexistent/scenemerge.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scenemerge.toml");
        let config: MergeConfig = toml::from_str(sample_toml()).unwrap();
        config.save_to_file(&path).unwrap();

        let loaded = MergeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let mut config = MergeConfig::default();
        config.log.level = "chatty".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "log.level"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_filter_regex() {
        let mut config = MergeConfig::default();
        config.filter.regex = true;
        config.filter.expression = "[oops".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "filter.expression"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("SCENEMERGE_TEST_GIT", "/custom/git");
        let mut config = MergeConfig::default();
        config.vcs.git_path_env = Some("SCENEMERGE_TEST_GIT".into());
        config.resolve_env_vars().unwrap();
        assert_eq!(config.vcs.git_path, PathBuf::from("/custom/git"));

        // An unset variable leaves the configured path alone.
        let mut config: MergeConfig = toml::from_str(sample_toml()).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.vcs.git_path, PathBuf::from("/opt/git/bin/git"));

        std::env::remove_var("SCENEMERGE_TEST_GIT");
    }

    #[test]
    fn test_policy_confirmation() {
        assert_eq!(MissingParentPolicy::Ask.confirmation(), Confirmation::Ask);
        assert_eq!(MissingParentPolicy::Always.confirmation(), Confirmation::Granted);
        assert_eq!(MissingParentPolicy::Never.confirmation(), Confirmation::Denied);
    }
}

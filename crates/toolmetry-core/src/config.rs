//! Analytics configuration.
//!
//! # Resolution Algorithm
//!
//! 1. `TOOLMETRY_CONFIG` pointing at a file
//! 2. `toolmetry.toml` in the current directory
//! 3. Parent directories (walk up to filesystem root)
//! 4. XDG config directory (`~/.config/toolmetry/toolmetry.toml`)
//! 5. Built-in defaults
//!
//! Environment overrides (`POSTHOG_API_KEY`, `POSTHOG_HOST`,
//! `TOOLMETRY_ANONYMIZE`, `TOOLMETRY_FLAG_TIMEOUT_MS`) are applied on top of
//! whichever source won.
//!
//! # Example
//!
//! ```toml
//! api_key = "phc_..."
//! host = "https://eu.i.posthog.com"
//! anonymize = true
//! flag_timeout_ms = 1500
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default analytics ingestion host.
pub const DEFAULT_POSTHOG_HOST: &str = "https://us.i.posthog.com";

const CONFIG_FILE_NAME: &str = "toolmetry.toml";
const CONFIG_PATH_ENV: &str = "TOOLMETRY_CONFIG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),
}

/// Settings for the analytics backend and the instrumentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Project API key. Without one, analytics is disabled.
    pub api_key: Option<String>,
    pub host: String,
    /// Redact argument values in error reports.
    pub anonymize: bool,
    /// Bound on each startup flag query.
    pub flag_timeout_ms: u64,
    /// Turns analytics off even when a key is present.
    pub disabled: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            host: DEFAULT_POSTHOG_HOST.to_string(),
            anonymize: true,
            flag_timeout_ms: 3000,
            disabled: false,
        }
    }
}

impl AnalyticsConfig {
    /// Loads a config file from an explicit path. Environment overrides are
    /// not applied.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist, `Io` if it cannot be
    /// read and `Parse` if it is not valid TOML for this type.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolves configuration from the process environment and working
    /// directory, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file was found but could not be loaded,
    /// or if `TOOLMETRY_CONFIG` points at a missing file.
    pub fn resolve() -> Result<Self, ConfigError> {
        let start = std::env::current_dir().map_err(|source| ConfigError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        let lookup = |key: &str| std::env::var(key).ok();
        let xdg = dirs::config_dir().map(|dir| dir.join("toolmetry").join(CONFIG_FILE_NAME));

        Self::resolve_with(&start, xdg.as_deref(), lookup)
    }

    /// Resolution with every input made explicit.
    ///
    /// # Errors
    ///
    /// Same as [`AnalyticsConfig::resolve`].
    pub fn resolve_with(
        start: &Path,
        xdg_file: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config = match find_config_file(start, xdg_file, &lookup) {
            Some(path) => {
                debug!(path = %path.display(), "loading analytics config");
                Self::load(&path)?
            }
            None => {
                // An explicit path must exist.
                if let Some(explicit) = lookup(CONFIG_PATH_ENV) {
                    return Err(ConfigError::NotFound(PathBuf::from(explicit)));
                }
                debug!("no analytics config file found, using defaults");
                Self::default()
            }
        };

        Ok(config.with_env_overrides(lookup))
    }

    /// Applies environment overrides on top of this config.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("POSTHOG_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(host) = lookup("POSTHOG_HOST") {
            self.host = host;
        }
        if let Some(value) = lookup("TOOLMETRY_ANONYMIZE") {
            match parse_bool(&value) {
                Some(anonymize) => self.anonymize = anonymize,
                None => warn!(value, "ignoring invalid TOOLMETRY_ANONYMIZE"),
            }
        }
        if let Some(value) = lookup("TOOLMETRY_FLAG_TIMEOUT_MS") {
            match value.trim().parse() {
                Ok(millis) => self.flag_timeout_ms = millis,
                Err(_) => warn!(value, "ignoring invalid TOOLMETRY_FLAG_TIMEOUT_MS"),
            }
        }
        self
    }

    /// Whether an analytics backend should be built.
    pub fn is_configured(&self) -> bool {
        !self.disabled && self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    pub fn flag_timeout(&self) -> Duration {
        Duration::from_millis(self.flag_timeout_ms)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn find_config_file(
    start: &Path,
    xdg_file: Option<&Path>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    if let Some(explicit) = lookup(CONFIG_PATH_ENV) {
        let path = PathBuf::from(explicit);
        return path.exists().then_some(path);
    }

    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = current.parent();
    }

    xdg_file.filter(|path| path.is_file()).map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_found() {
        let temp = TempDir::new().unwrap();

        let config = AnalyticsConfig::resolve_with(temp.path(), None, env(&[])).unwrap();

        // A toolmetry.toml above the temp dir would change this; temp dirs
        // normally have none.
        assert_eq!(config.host, DEFAULT_POSTHOG_HOST);
        assert!(config.anonymize);
        assert_eq!(config.flag_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_resolve_from_current_dir() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "api_key = \"phc_local\"\nflag_timeout_ms = 500\n",
        )
        .unwrap();

        let config = AnalyticsConfig::resolve_with(temp.path(), None, env(&[])).unwrap();

        assert_eq!(config.api_key.as_deref(), Some("phc_local"));
        assert_eq!(config.flag_timeout_ms, 500);
        assert!(config.is_configured());
    }

    #[test]
    fn test_resolve_walks_up_directories() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("deeply/nested/project");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "host = \"https://parent.example\"\n",
        )
        .unwrap();

        let config = AnalyticsConfig::resolve_with(&nested, None, env(&[])).unwrap();

        assert_eq!(config.host, "https://parent.example");
    }

    #[test]
    fn test_env_path_takes_precedence_over_directory() {
        let temp = TempDir::new().unwrap();
        let custom = temp.path().join("custom.toml");
        fs::write(&custom, "api_key = \"phc_custom\"\n").unwrap();
        fs::write(temp.path().join(CONFIG_FILE_NAME), "api_key = \"phc_dir\"\n").unwrap();

        let config = AnalyticsConfig::resolve_with(
            temp.path(),
            None,
            env(&[(CONFIG_PATH_ENV, custom.to_str().unwrap())]),
        )
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("phc_custom"));
    }

    #[test]
    fn test_missing_env_path_is_an_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.toml");

        let result = AnalyticsConfig::resolve_with(
            temp.path(),
            None,
            env(&[(CONFIG_PATH_ENV, missing.to_str().unwrap())]),
        );

        assert!(matches!(result, Err(ConfigError::NotFound(path)) if path == missing));
    }

    #[test]
    fn test_xdg_file_is_last_resort() {
        let project = TempDir::new().unwrap();
        let xdg = TempDir::new().unwrap();
        let xdg_file = xdg.path().join(CONFIG_FILE_NAME);
        fs::write(&xdg_file, "anonymize = false\n").unwrap();

        let config =
            AnalyticsConfig::resolve_with(project.path(), Some(&xdg_file), env(&[])).unwrap();

        assert!(!config.anonymize);
    }

    #[test]
    fn test_env_overrides_apply_last() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "api_key = \"phc_file\"\nanonymize = true\n",
        )
        .unwrap();

        let config = AnalyticsConfig::resolve_with(
            temp.path(),
            None,
            env(&[
                ("POSTHOG_API_KEY", "phc_env"),
                ("POSTHOG_HOST", "http://localhost:8000"),
                ("TOOLMETRY_ANONYMIZE", "0"),
                ("TOOLMETRY_FLAG_TIMEOUT_MS", "250"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("phc_env"));
        assert_eq!(config.host, "http://localhost:8000");
        assert!(!config.anonymize);
        assert_eq!(config.flag_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let config = AnalyticsConfig::default().with_env_overrides(env(&[
            ("TOOLMETRY_ANONYMIZE", "sometimes"),
            ("TOOLMETRY_FLAG_TIMEOUT_MS", "soon"),
        ]));

        assert!(config.anonymize);
        assert_eq!(config.flag_timeout_ms, 3000);
    }

    #[test]
    fn test_is_configured() {
        let mut config = AnalyticsConfig::default();
        assert!(!config.is_configured());

        config.api_key = Some("   ".to_string());
        assert!(!config.is_configured());

        config.api_key = Some("phc_key".to_string());
        assert!(config.is_configured());

        config.disabled = true;
        assert!(!config.is_configured());
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "flag_timeout_ms = \"fast\"\n").unwrap();

        let error = AnalyticsConfig::load(&path).unwrap_err();

        assert!(matches!(error, ConfigError::Parse { .. }));
        assert!(error.to_string().contains("toolmetry.toml"));
    }
}

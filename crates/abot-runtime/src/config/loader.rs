//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config`: TOML files (`abot.toml`, `config.toml`)
//! - `yaml-config`: YAML files (`abot.yaml`, `abot.yml`, `config.yaml`, `config.yml`)
//!
//! Both can be enabled at once, in which case both formats are searched.
//!
//! # Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic overrides from [`ConfigLoader::merge`]
//! 3. Profile-specific file (`abot.{profile}.toml`)
//! 4. Main file (`abot.toml`)
//! 5. Environment variables (`ABOT_*`)
//!
//! An explicit [`ConfigLoader::file`] replaces steps 3 and 4.
//!
//! # Environment Variables
//!
//! The `ABOT_` prefix is stripped and `__` separates nesting levels:
//!
//! - `ABOT_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `ABOT_RUNTIME__RESTART_DELAY_MS=500` → `runtime.restart_delay_ms = 500`
//! - `ABOT_BACKENDS__DUBTRACK__PASSWORD=xxx` → `backends.dubtrack.password = "xxx"`
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::AbotConfig;

/// Environment variable prefix.
const ENV_PREFIX: &str = "ABOT_";

/// Directory name under the user config dir.
const APP_DIR: &str = "abot";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// Returns the profile name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the short forms `dev` and `prod`.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `ABOT_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("ABOT_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-source configuration loader.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader that searches the default locations and reads the
    /// environment.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    ///
    /// Once any path is added, the default locations are no longer searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to the search paths.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds `<user config dir>/abot` to the search paths.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join(APP_DIR)),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables environment variables (the default).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Layers a programmatic configuration above the defaults.
    pub fn merge(mut self, config: AbotConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<AbotConfig> {
        let profile = self.profile.clone();
        let config: AbotConfig = self.build_figment()?.extract()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            backends = config.backends.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(AbotConfig::default()))
            .merge(std::mem::take(&mut self.figment));

        let files = match self.config_file.take() {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path)),
            Some(path) => vec![path],
            None => self.discover(),
        };
        if files.is_empty() {
            warn!("No configuration file found, using defaults");
        }
        for path in &files {
            info!(path = %path.display(), "Loading configuration file");
            figment = merge_file(figment, path)?;
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment)
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join(APP_DIR)))
            .collect()
    }

    /// Files to merge, lowest priority first.
    ///
    /// Walks `search paths × BASE_NAMES`, picking up the profile variant of
    /// each name on the way. The first base file found ends the walk.
    fn discover(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for dir in self.resolve_search_paths() {
            for name in BASE_NAMES {
                let Some((stem, ext)) = name.rsplit_once('.') else {
                    continue;
                };
                if !readable(ext) {
                    continue;
                }

                let profiled = dir.join(format!("{stem}.{}.{ext}", self.profile));
                if profiled.exists() {
                    debug!(path = %profiled.display(), "Found profile-specific config");
                    files.push(profiled);
                }

                let base = dir.join(name);
                if base.exists() {
                    files.push(base);
                    return files;
                }
            }
        }
        files
    }
}

/// File names searched in every search path, in order.
const BASE_NAMES: &[&str] = &[
    "abot.toml",
    "config.toml",
    "abot.yaml",
    "abot.yml",
    "config.yaml",
    "config.yml",
];

/// Whether this build can parse files with extension `ext`.
fn readable(ext: &str) -> bool {
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => true,
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => true,
        _ => false,
    }
}

#[cfg_attr(
    not(any(feature = "toml-config", feature = "yaml-config")),
    allow(unused_variables)
)]
fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

mod loader;
pub mod secrets;
pub mod typed;
pub mod value;

use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};

pub use secrets::{DefaultSecretResolver, SecretResolver};
pub use typed::{ConfigProperties, PropertyMeta};
pub use value::{ConfigValue, FromConfigValue};

/// Environment variable that selects the active profile.
pub const PROFILE_ENV: &str = "AMBIT_PROFILE";

/// Error type for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// The requested key was not found in the configuration.
    NotFound(String),
    /// The value could not be converted to the requested type.
    TypeMismatch { key: String, expected: &'static str },
    /// An I/O or YAML parsing error occurred while loading config files.
    Load(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "missing configuration key `{key}`"),
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "configuration key `{key}` is not a valid {expected}")
            }
            ConfigError::Load(msg) => write!(f, "cannot load configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Flat, dot-keyed view over every configuration source of a service.
///
/// `AmbitConfig` (= `AmbitConfig<()>`) provides raw key-value access only.
/// `AmbitConfig<T>` adds typed access to a config section via `Deref<Target = T>`.
///
/// Later sources override earlier ones:
/// 1. `application.yaml`
/// 2. `application-{profile}.yaml`
/// 3. `.env`, then `.env.{profile}` (never overwrite variables already set)
/// 4. Environment variables (`APP_DATABASE_URL` overrides `app.database.url`)
///
/// The profile comes from `AMBIT_PROFILE` if set, else the argument.
#[derive(Debug, Clone)]
pub struct AmbitConfig<T = ()> {
    values: HashMap<String, ConfigValue>,
    profile: String,
    typed: T,
}

impl AmbitConfig {
    /// Load configuration for `profile` from the current working directory.
    pub fn load(profile: &str) -> Result<Self, ConfigError> {
        Self::load_from(Path::new("."), profile, &DefaultSecretResolver)
    }

    /// Load configuration from `dir` with a custom secret resolver.
    pub fn load_from(
        dir: &Path,
        profile: &str,
        resolver: &dyn SecretResolver,
    ) -> Result<Self, ConfigError> {
        let active_profile = std::env::var(PROFILE_ENV).unwrap_or_else(|_| profile.to_string());
        let mut values = HashMap::new();

        loader::merge_file(&dir.join("application.yaml"), &mut values)?;
        loader::merge_file(&dir.join(format!("application-{active_profile}.yaml")), &mut values)?;

        let _ = dotenvy::from_path(dir.join(".env"));
        let profile_env: PathBuf = dir.join(format!(".env.{active_profile}"));
        let _ = dotenvy::from_path(profile_env);

        for value in values.values_mut() {
            if let ConfigValue::String(s) = value {
                if s.contains("${") {
                    *s = secrets::resolve_placeholders(s, resolver)?;
                }
            }
        }

        for (env_key, env_val) in std::env::vars() {
            let key = env_key.to_lowercase().replace('_', ".");
            values.insert(key, ConfigValue::String(env_val));
        }

        tracing::debug!(profile = %active_profile, keys = values.len(), "configuration loaded");
        Ok(AmbitConfig {
            values,
            profile: active_profile,
            typed: (),
        })
    }

    /// Build a config from an inline YAML document. No files, no environment.
    pub fn from_yaml_str(yaml: &str, profile: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        loader::merge_str(yaml, &mut values)?;
        Ok(AmbitConfig {
            values,
            profile: profile.to_string(),
            typed: (),
        })
    }

    /// A config with no keys, under profile `test`.
    pub fn empty() -> Self {
        AmbitConfig {
            values: HashMap::new(),
            profile: "test".to_string(),
            typed: (),
        }
    }

    /// Insert or replace one key.
    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(key.to_string(), value);
    }

    /// Upgrade to a typed config by constructing `C` from the raw values.
    pub fn with_typed<C: ConfigProperties>(self) -> Result<AmbitConfig<C>, ConfigError> {
        let typed = C::from_config(&self)?;
        Ok(AmbitConfig {
            values: self.values,
            profile: self.profile,
            typed,
        })
    }
}

impl<T> AmbitConfig<T> {
    /// Get a typed value for the given dot-separated key.
    pub fn get<V: FromConfigValue>(&self, key: &str) -> Result<V, ConfigError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        V::from_config_value(value, key)
    }

    /// Get a typed value, falling back to `default` only when the key is absent.
    ///
    /// A present but malformed value is still an error.
    pub fn get_or<V: FromConfigValue>(&self, key: &str, default: V) -> Result<V, ConfigError> {
        match self.values.get(key) {
            Some(value) => V::from_config_value(value, key),
            None => Ok(default),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The active profile name.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn typed(&self) -> &T {
        &self.typed
    }

    /// Downgrade to a raw (untyped) config.
    pub fn raw(&self) -> AmbitConfig {
        AmbitConfig {
            values: self.values.clone(),
            profile: self.profile.clone(),
            typed: (),
        }
    }
}

impl<T> Deref for AmbitConfig<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.typed
    }
}

use super::{AmbitConfig, ConfigError};

/// Metadata about a single configuration property.
#[derive(Debug, Clone)]
pub struct PropertyMeta {
    /// Absolute key (e.g., `"app.database.pool.max.open"`).
    pub key: String,
    /// Rust type name (e.g., `"u32"`).
    pub type_name: &'static str,
    /// Whether the property must be present.
    pub required: bool,
    /// Default value as a string, if any.
    pub default_value: Option<String>,
    pub description: Option<String>,
}

impl PropertyMeta {
    pub fn required(key: &str, type_name: &'static str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            type_name,
            required: true,
            default_value: None,
            description: Some(description.to_string()),
        }
    }

    pub fn with_default(
        key: &str,
        type_name: &'static str,
        default: impl ToString,
        description: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            type_name,
            required: false,
            default_value: Some(default.to_string()),
            description: Some(description.to_string()),
        }
    }
}

/// Trait for strongly-typed configuration sections.
///
/// ```ignore
/// impl ConfigProperties for PoolConfig {
///     fn prefix() -> &'static str { "app.database" }
///     fn properties_metadata() -> Vec<PropertyMeta> { /* ... */ }
///     fn from_config(config: &AmbitConfig) -> Result<Self, ConfigError> {
///         Ok(PoolConfig { url: config.get("app.database.url")?, /* ... */ })
///     }
/// }
/// ```
pub trait ConfigProperties: Sized {
    /// The configuration key prefix (e.g., `"app.database"`).
    fn prefix() -> &'static str;

    /// Metadata about all expected properties.
    fn properties_metadata() -> Vec<PropertyMeta>;

    fn from_config(config: &AmbitConfig) -> Result<Self, ConfigError>;

    /// Keys marked required in [`properties_metadata`](Self::properties_metadata)
    /// that are absent from `config`.
    fn missing_keys(config: &AmbitConfig) -> Vec<String> {
        Self::properties_metadata()
            .into_iter()
            .filter(|meta| meta.required && !config.contains_key(&meta.key))
            .map(|meta| meta.key)
            .collect()
    }
}

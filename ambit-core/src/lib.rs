//! # ambit-core
//!
//! Ambient runtime pieces shared by every ambit service: layered
//! configuration, the HTTP error type, tracing setup and health probes.

pub mod config;
pub mod error;
pub mod health;
pub mod layers;

pub use config::{
    AmbitConfig, ConfigError, ConfigProperties, ConfigValue, DefaultSecretResolver,
    FromConfigValue, PropertyMeta, SecretResolver,
};
pub use error::{error_response, HttpError};
pub use health::{HealthBuilder, HealthIndicator, HealthStatus};
pub use layers::{default_trace, init_tracing};

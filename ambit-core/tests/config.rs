use std::time::Duration;

use ambit_core::config::{
    AmbitConfig, ConfigError, ConfigProperties, ConfigValue, DefaultSecretResolver, PropertyMeta,
};

#[test]
fn test_empty_config() {
    let config = AmbitConfig::empty();
    assert!(matches!(config.get::<String>("nonexistent"), Err(ConfigError::NotFound(_))));
}

#[test]
fn test_set_and_get() {
    let mut config = AmbitConfig::empty();
    config.set("app.name", ConfigValue::String("bookshelf".into()));
    assert_eq!(config.get::<String>("app.name").unwrap(), "bookshelf");
}

#[test]
fn test_get_or_only_defaults_absent_keys() {
    let mut config = AmbitConfig::empty();
    assert_eq!(config.get_or("missing", 42i64).unwrap(), 42);

    config.set("present", ConfigValue::String("not-a-number".into()));
    assert!(matches!(
        config.get_or("present", 42i64),
        Err(ConfigError::TypeMismatch { .. })
    ));
}

#[test]
fn test_type_conversions() {
    let mut config = AmbitConfig::empty();
    config.set("int_val", ConfigValue::Integer(42));
    config.set("float_val", ConfigValue::Float(2.5));
    config.set("bool_val", ConfigValue::String("yes".into()));
    config.set("null_val", ConfigValue::Null);

    assert_eq!(config.get::<i64>("int_val").unwrap(), 42);
    assert_eq!(config.get::<u32>("int_val").unwrap(), 42);
    assert_eq!(config.get::<f64>("float_val").unwrap(), 2.5);
    assert!(config.get::<bool>("bool_val").unwrap());
    assert_eq!(config.get::<String>("int_val").unwrap(), "42");
    assert!(config.get::<Option<String>>("null_val").unwrap().is_none());
}

#[test]
fn test_negative_into_unsigned_is_mismatch() {
    let mut config = AmbitConfig::empty();
    config.set("max", ConfigValue::Integer(-1));
    assert!(matches!(config.get::<u32>("max"), Err(ConfigError::TypeMismatch { .. })));
}

#[test]
fn test_duration_from_seconds() {
    let mut config = AmbitConfig::empty();
    config.set("whole", ConfigValue::Integer(19));
    config.set("fraction", ConfigValue::Float(0.25));
    config.set("env_style", ConfigValue::String("30".into()));
    config.set("negative", ConfigValue::Integer(-3));

    assert_eq!(config.get::<Duration>("whole").unwrap(), Duration::from_secs(19));
    assert_eq!(config.get::<Duration>("fraction").unwrap(), Duration::from_millis(250));
    assert_eq!(config.get::<Duration>("env_style").unwrap(), Duration::from_secs(30));
    assert!(config.get::<Duration>("negative").is_err());
}

#[test]
fn test_flatten_yaml() {
    let yaml = r#"
app:
  database:
    url: "postgres://localhost/books"
    pool:
      max:
        open: 20
  name: "bookshelf"
"#;
    let config = AmbitConfig::from_yaml_str(yaml, "test").unwrap();

    assert_eq!(
        config.get::<String>("app.database.url").unwrap(),
        "postgres://localhost/books"
    );
    assert_eq!(config.get::<i64>("app.database.pool.max.open").unwrap(), 20);
    assert_eq!(config.get::<String>("app.name").unwrap(), "bookshelf");
    assert_eq!(config.profile(), "test");
}

#[test]
fn test_list_config_and_indexed_access() {
    let yaml = r#"
app:
  origins:
    - "http://localhost"
    - "https://prod.com"
"#;
    let config = AmbitConfig::from_yaml_str(yaml, "test").unwrap();
    let origins: Vec<String> = config.get("app.origins").unwrap();
    assert_eq!(origins, vec!["http://localhost", "https://prod.com"]);
    assert_eq!(config.get::<String>("app.origins.1").unwrap(), "https://prod.com");
}

#[test]
fn test_single_value_as_vec() {
    let mut config = AmbitConfig::empty();
    config.set("single", ConfigValue::String("only-one".into()));
    let result: Vec<String> = config.get("single").unwrap();
    assert_eq!(result, vec!["only-one"]);
}

#[test]
fn test_invalid_yaml_is_load_error() {
    let result = AmbitConfig::from_yaml_str("app: [unclosed", "test");
    assert!(matches!(result, Err(ConfigError::Load(_))));
}

#[test]
fn test_load_from_directory_with_profile_overlay() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("application.yaml"),
        "svc:\n  name: base\n  port: 8080\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("application-staging.yaml"),
        "svc:\n  port: 9090\n",
    )
    .unwrap();

    let config = AmbitConfig::load_from(dir.path(), "staging", &DefaultSecretResolver).unwrap();
    assert_eq!(config.get::<String>("svc.name").unwrap(), "base");
    assert_eq!(config.get::<u16>("svc.port").unwrap(), 9090);
}

#[test]
fn test_load_resolves_placeholders() {
    unsafe { std::env::set_var("TEST_AMBIT_CFG_PASSWORD", "s3cret") };
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("application.yaml"),
        "svc:\n  dsn: \"postgres://app:${TEST_AMBIT_CFG_PASSWORD}@db/app\"\n",
    )
    .unwrap();

    let config = AmbitConfig::load_from(dir.path(), "dev", &DefaultSecretResolver).unwrap();
    assert_eq!(
        config.get::<String>("svc.dsn").unwrap(),
        "postgres://app:s3cret@db/app"
    );
    unsafe { std::env::remove_var("TEST_AMBIT_CFG_PASSWORD") };
}

#[test]
fn test_env_overrides_yaml() {
    unsafe { std::env::set_var("TESTAMBITENV_SVC_PORT", "7070") };
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("application.yaml"),
        "testambitenv:\n  svc:\n    port: 8080\n",
    )
    .unwrap();

    let config = AmbitConfig::load_from(dir.path(), "dev", &DefaultSecretResolver).unwrap();
    assert_eq!(config.get::<u16>("testambitenv.svc.port").unwrap(), 7070);
    unsafe { std::env::remove_var("TESTAMBITENV_SVC_PORT") };
}

// --- ConfigProperties: hand-written section ---

#[derive(Debug, Clone)]
struct CacheConfig {
    url: String,
    ttl: Duration,
}

impl ConfigProperties for CacheConfig {
    fn prefix() -> &'static str {
        "app.cache"
    }

    fn properties_metadata() -> Vec<PropertyMeta> {
        vec![
            PropertyMeta::required("app.cache.url", "String", "Cache endpoint"),
            PropertyMeta::with_default("app.cache.ttl", "Duration", 60, "Entry TTL in seconds"),
        ]
    }

    fn from_config(config: &AmbitConfig) -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            url: config.get("app.cache.url")?,
            ttl: config.get_or("app.cache.ttl", Duration::from_secs(60))?,
        })
    }
}

#[test]
fn test_config_properties_defaults_and_required() {
    let config = AmbitConfig::from_yaml_str("app:\n  cache:\n    url: redis://cache\n", "test").unwrap();
    let cache = CacheConfig::from_config(&config).unwrap();
    assert_eq!(cache.url, "redis://cache");
    assert_eq!(cache.ttl, Duration::from_secs(60));

    let empty = AmbitConfig::empty();
    assert!(CacheConfig::from_config(&empty).is_err());
    assert_eq!(CacheConfig::missing_keys(&empty), vec!["app.cache.url".to_string()]);
}

#[test]
fn test_with_typed_derefs_to_section() {
    let config = AmbitConfig::from_yaml_str("app:\n  cache:\n    url: redis://cache\n    ttl: 5\n", "test")
        .unwrap()
        .with_typed::<CacheConfig>()
        .unwrap();
    assert_eq!(config.ttl, Duration::from_secs(5));
    assert_eq!(config.raw().get::<String>("app.cache.url").unwrap(), "redis://cache");
}

use super::ConfigError;

/// Backend that turns a `${...}` reference into its value.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<String, ConfigError>;
}

/// Resolves environment variables and secret files.
///
/// - `${NAME}` / `${env:NAME}`: environment variable
/// - `${NAME:-fallback}`: environment variable with a literal fallback
/// - `${file:/run/secrets/db_password}`: file contents, trimmed
pub struct DefaultSecretResolver;

impl SecretResolver for DefaultSecretResolver {
    fn resolve(&self, reference: &str) -> Result<String, ConfigError> {
        let reference = reference.trim();
        if let Some(path) = reference.strip_prefix("file:") {
            let path = path.trim();
            return std::fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .map_err(|e| ConfigError::Load(format!("secret file '{path}': {e}")));
        }
        let name = reference.strip_prefix("env:").unwrap_or(reference);
        let (name, fallback) = match name.split_once(":-") {
            Some((name, fallback)) => (name.trim(), Some(fallback)),
            None => (name.trim(), None),
        };
        match (std::env::var(name), fallback) {
            (Ok(value), _) => Ok(value),
            (Err(_), Some(fallback)) => Ok(fallback.to_string()),
            (Err(_), None) => Err(ConfigError::NotFound(format!("env:{name}"))),
        }
    }
}

/// Replace every `${...}` placeholder in `value` using `resolver`.
///
/// Resolved text is not rescanned, so a secret containing `${` is kept verbatim.
pub fn resolve_placeholders(
    value: &str,
    resolver: &dyn SecretResolver,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::Load(format!("unclosed placeholder in: {value}")))?;
        out.push_str(&resolver.resolve(&after[..end])?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

use std::collections::HashMap;
use std::path::Path;

use super::value::ConfigValue;
use super::ConfigError;

pub(crate) type ValueMap = HashMap<String, ConfigValue>;

/// Merge a YAML file into `values`. A missing file is not an error: profile
/// overlays are optional.
pub(crate) fn merge_file(path: &Path, values: &mut ValueMap) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Ok(());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
    merge_str(&content, values)
        .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))
}

/// Merge a YAML document into `values`; later documents override earlier keys.
pub(crate) fn merge_str(content: &str, values: &mut ValueMap) -> Result<(), ConfigError> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))?;
    flatten("", &doc, values);
    Ok(())
}

/// Flatten nested mappings into dot-separated keys.
///
/// Sequences are stored both whole (`key`) and per element (`key.0`, `key.1`)
/// so that `APP_HOSTS_0` style environment overrides still line up.
fn flatten(prefix: &str, node: &serde_yaml::Value, out: &mut ValueMap) {
    match node {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let segment = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => format!("{other:?}"),
                };
                let key = if prefix.is_empty() {
                    segment
                } else {
                    format!("{prefix}.{segment}")
                };
                flatten(&key, v, out);
            }
        }
        serde_yaml::Value::Sequence(items) if !prefix.is_empty() => {
            out.insert(prefix.to_string(), ConfigValue::from_yaml(node));
            for (i, item) in items.iter().enumerate() {
                flatten(&format!("{prefix}.{i}"), item, out);
            }
        }
        leaf if !prefix.is_empty() => {
            out.insert(prefix.to_string(), ConfigValue::from_yaml(leaf));
        }
        _ => {}
    }
}

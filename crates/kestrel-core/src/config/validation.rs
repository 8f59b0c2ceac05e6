//! Config validation - warns about unknown fields

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Validate JSON config and warn about unknown fields.
///
/// Returns the offending paths so callers can surface them too.
pub fn warn_unknown_fields(content: &str, config_name: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return Vec::new();
    };

    let unknowns = find_unknown_keys(&value, &expected_config_keys(), "");
    for path in &unknowns {
        warn!("Unknown config field in {config_name}: {path}");
    }
    unknowns
}

/// Find unknown keys in JSON value compared to expected keys.
/// Returns paths like "search.unknownField" or "plugins[2].typo".
fn find_unknown_keys(value: &Value, expected: &ExpectedKeys, prefix: &str) -> Vec<String> {
    let mut unknowns = Vec::new();

    let Value::Object(obj) = value else {
        return unknowns;
    };

    for (key, child) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        if let Some(nested) = expected.nested.get(key.as_str()) {
            unknowns.extend(find_unknown_keys(child, nested, &path));
        } else if let Some(element) = expected.arrays.get(key.as_str()) {
            if let Value::Array(items) = child {
                for (i, item) in items.iter().enumerate() {
                    unknowns.extend(find_unknown_keys(item, element, &format!("{path}[{i}]")));
                }
            }
        } else if !expected.fields.contains(key.as_str()) {
            unknowns.push(path);
        }
    }

    unknowns
}

/// Expected keys for a config section.
/// `fields` are leaf fields, `nested` are objects and `arrays` are arrays of
/// objects, each with their own expected keys.
struct ExpectedKeys {
    fields: HashSet<&'static str>,
    nested: HashMap<&'static str, ExpectedKeys>,
    arrays: HashMap<&'static str, ExpectedKeys>,
}

impl ExpectedKeys {
    fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.iter().copied().collect(),
            nested: HashMap::new(),
            arrays: HashMap::new(),
        }
    }

    fn with_nested(mut self, key: &'static str, nested: ExpectedKeys) -> Self {
        self.nested.insert(key, nested);
        self
    }

    fn with_array(mut self, key: &'static str, element: ExpectedKeys) -> Self {
        self.arrays.insert(key, element);
        self
    }
}

/// Expected keys for `Config` (settings.rs)
fn expected_config_keys() -> ExpectedKeys {
    let search_keys =
        ExpectedKeys::new(&["maxResults", "pluginTimeoutMs", "skipEmptyGlobalQuery"]);

    let history_keys =
        ExpectedKeys::new(&["capacity", "boostCap", "boostHalfCount", "compactThreshold"]);

    let plugin_keys =
        ExpectedKeys::new(&["id", "actionKeyword", "isGlobal", "weightBoost", "disabled"]);

    ExpectedKeys::new(&[])
        .with_nested("search", search_keys)
        .with_nested("history", history_keys)
        .with_array("plugins", plugin_keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_fields_pass() {
        let json = r#"{
            "search": { "maxResults": 10, "pluginTimeoutMs": 500 },
            "history": { "capacity": 5 },
            "plugins": [{ "id": "calc", "actionKeyword": "=" }]
        }"#;
        assert!(warn_unknown_fields(json, "config.json").is_empty());
    }

    #[test]
    fn test_unknown_top_level_and_nested() {
        let json = r#"{
            "serach": {},
            "search": { "maxResult": 10 }
        }"#;
        let mut unknowns = warn_unknown_fields(json, "config.json");
        unknowns.sort();
        assert_eq!(unknowns, vec!["search.maxResult", "serach"]);
    }

    #[test]
    fn test_unknown_field_in_plugin_entry() {
        let json = r#"{ "plugins": [{ "id": "a" }, { "id": "b", "keyword": "x" }] }"#;
        assert_eq!(
            warn_unknown_fields(json, "config.json"),
            vec!["plugins[1].keyword"]
        );
    }

    #[test]
    fn test_invalid_json_reports_nothing() {
        assert!(warn_unknown_fields("{ not json", "config.json").is_empty());
    }
}

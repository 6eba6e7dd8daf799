use once_cell::sync::Lazy;
use pocket_core::{PocketError, Result};
use regex::{Captures, Regex};
use serde_json::Value;
use std::env;

// ${VAR} and ${VAR:-default}
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex pattern")
});

/// Recursively substitute environment variables in every string of a JSON value.
///
/// All missing variables (those without a default) are collected and reported
/// together in a single [`PocketError::ConfigError`].
pub fn substitute_env_vars(value: &mut Value) -> Result<()> {
    let mut missing = Vec::new();
    substitute_value(value, &mut missing);

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort();
    missing.dedup();
    Err(PocketError::ConfigError(format!(
        "Missing required environment variables: {}",
        missing.join(", ")
    )))
}

fn substitute_value(value: &mut Value, missing: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = substitute_in_string(s, missing);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, missing);
            }
        }
        Value::Array(arr) => {
            for v in arr.iter_mut() {
                substitute_value(v, missing);
            }
        }
        _ => {}
    }
}

fn substitute_in_string(input: &str, missing: &mut Vec<String>) -> String {
    ENV_VAR_REGEX
        .replace_all(input, |caps: &Captures<'_>| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => {
                        missing.push(var_name.to_string());
                        caps[0].to_string()
                    }
                },
            }
        })
        .into_owned()
}

//! Dotted path lookups into a cluster file, e.g. `machineSets[0].spec.image`

use super::Config;
use crate::error::{Result, VindError};
use serde_json::Value;

fn is_separator(c: char) -> bool {
    matches!(c, '.' | '[' | ']' | '"')
}

/// Lowercase the first character so `Privileged` finds `privileged`
fn lower_first(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Config {
    /// Value found at `path`
    pub fn get_value(&self, path: &str) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;

        for key in path.split(is_separator).filter(|k| !k.is_empty()) {
            value = match value {
                Value::Object(mut map) => map
                    .remove(key)
                    .or_else(|| map.remove(&lower_first(key)))
                    .ok_or_else(|| VindError::ConfigPath(format!("{} key does not exist", key)))?,
                Value::Array(mut items) => {
                    let index: usize = key
                        .parse()
                        .map_err(|_| VindError::ConfigPath(format!("{} is not an index", key)))?;
                    if index >= items.len() {
                        return Err(VindError::ConfigPath(format!(
                            "index {} out of range ({} items)",
                            index,
                            items.len()
                        )));
                    }
                    items.swap_remove(index)
                }
                other => {
                    return Err(VindError::ConfigPath(format!(
                        "{} is neither a list nor an object",
                        other
                    )))
                }
            };
        }

        Ok(value)
    }
}

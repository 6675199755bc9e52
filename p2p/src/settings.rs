//! Persistent per-contact settings.

use std::{collections::BTreeMap, str::FromStr};

/// A string-keyed store for contact settings.
pub trait Settings {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: String);

    fn remove(&mut self, key: &str);

    /// Read and parse `key`, falling back to `default` if it is missing or does not parse.
    fn get_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }
}

/// Settings held in memory.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    values: BTreeMap<String, String>,
}

impl Memory {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Settings for Memory {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

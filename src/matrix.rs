// DAMONBENCH CONFIGURATION MATRIX
// EXPANDS NAMED OPTION LISTS INTO THE CARTESIAN PRODUCT OF RUN CONFIGURATIONS.
//
// EACH option() CALL MULTIPLIES THE CURRENT SET BY ONE DIMENSION, IN CALL
// ORDER. THE LAST DIMENSION VARIES FASTEST. ITERATIONS ARE JUST ANOTHER
// DIMENSION (1..=N). CONDITIONAL DIMENSIONS (--default-only) ARE RESOLVED BY
// THE CALLER BEFORE THE LIST IS PASSED IN.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{BenchError, Result};

pub const BENCHMARK: &str = "benchmark";
pub const CGROUP_NAME: &str = "cgroup_name";
pub const CGROUP_SIZE: &str = "cgroup_size";
pub const ITERATION: &str = "iteration";
pub const PASSES: &str = "passes";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OptionValue {
    Int(u64),
    Str(String),
}

impl OptionValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            OptionValue::Int(v) => Some(*v),
            OptionValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            OptionValue::Int(_) => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Str(s) => f.write_str(s),
        }
    }
}

impl Serialize for OptionValue {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            OptionValue::Int(v) => s.serialize_u64(*v),
            OptionValue::Str(v) => s.serialize_str(v),
        }
    }
}

impl From<u64> for OptionValue {
    fn from(v: u64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        OptionValue::Int(v as u64)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Str(v)
    }
}

// ORDERED NAME -> VALUE MAPPING. IMMUTABLE ONCE THE MATRIX IS BUILT.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigRecord {
    entries: Vec<(String, OptionValue)>,
}

impl ConfigRecord {
    fn with(&self, name: &str, value: OptionValue) -> Self {
        let mut entries = self.entries.clone();
        entries.push((name.to_string(), value));
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn get_u64(&self, name: &str) -> Result<u64> {
        self.get(name)
            .and_then(OptionValue::as_u64)
            .ok_or_else(|| missing(name, "an integer"))
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(OptionValue::as_str)
            .ok_or_else(|| missing(name, "a string"))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn missing(name: &str, kind: &str) -> BenchError {
    BenchError::Configuration(format!("option `{}` missing or not {}", name, kind))
}

impl fmt::Display for ConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

impl Serialize for ConfigRecord {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ONE DIMENSION STEP: EVERY PARTIAL RECORD x EVERY CANDIDATE VALUE.
// AN EMPTY CANDIDATE LIST EMPTIES THE SET; IT IS NOT AN ERROR HERE.
pub fn add_config_option<V>(name: &str, values: &[V], configs: &[ConfigRecord]) -> Vec<ConfigRecord>
where
    V: Clone + Into<OptionValue>,
{
    let mut out = Vec::with_capacity(configs.len() * values.len());
    for config in configs {
        for value in values {
            out.push(config.with(name, value.clone().into()));
        }
    }
    out
}

pub fn iteration_values(iterations: u32) -> Vec<u32> {
    (1..=iterations).collect()
}

#[derive(Clone, Debug)]
pub struct MatrixBuilder {
    configs: Vec<ConfigRecord>,
    names: Vec<String>,
    conflicts: Vec<String>,
}

impl Default for MatrixBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixBuilder {
    // SEEDED WITH ONE EMPTY RECORD: THE IDENTITY OF THE PRODUCT
    pub fn new() -> Self {
        Self {
            configs: vec![ConfigRecord::default()],
            names: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn option<V>(mut self, name: &str, values: &[V]) -> Self
    where
        V: Clone + Into<OptionValue>,
    {
        if self.names.iter().any(|n| n == name) {
            self.conflicts.push(name.to_string());
        } else {
            self.names.push(name.to_string());
            self.configs = add_config_option(name, values, &self.configs);
        }
        self
    }

    pub fn iterations(self, iterations: u32) -> Self {
        self.option(ITERATION, &iteration_values(iterations))
    }

    pub fn build(self) -> Result<Vec<ConfigRecord>> {
        if !self.conflicts.is_empty() {
            return Err(BenchError::Configuration(format!(
                "option dimension(s) given more than once: {}",
                self.conflicts.join(", ")
            )));
        }
        if self.names.is_empty() || self.configs.is_empty() {
            return Err(BenchError::Configuration(
                "configuration matrix is empty".to_string(),
            ));
        }
        Ok(self.configs)
    }
}

// WHAT THE ARGUMENT PARSER HANDS THE WORKLOAD. `extra` DIMENSIONS ARE
// EXPANDED AFTER THE WORKLOAD'S OWN AND BEFORE THE ITERATION DIMENSION.
#[derive(Clone, Debug, Default)]
pub struct MatrixInput {
    pub default_only: bool,
    pub iterations: u32,
    pub extra: Vec<(String, Vec<OptionValue>)>,
}

impl MatrixInput {
    pub fn new(iterations: u32, default_only: bool) -> Self {
        Self {
            default_only,
            iterations,
            extra: Vec::new(),
        }
    }

    pub fn apply_extra(&self, mut builder: MatrixBuilder) -> MatrixBuilder {
        for (name, values) in &self.extra {
            builder = builder.option(name, values);
        }
        builder
    }
}

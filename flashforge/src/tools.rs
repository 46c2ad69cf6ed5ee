//! Temperature readings grouped by tool.

use std::ops::Index;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Current and target temperature of one heated tool.
///
/// Identity is the lower-cased name; two readings with the same name refer
/// to the same tool.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TemperatureReading {
    /// Lower-cased tool name, e.g. `t0` or `b`.
    pub name: String,
    /// Measured temperature in degrees Celsius.
    pub current: f64,
    /// Target temperature in degrees Celsius.
    pub target: f64,
}

impl TemperatureReading {
    /// Build a reading, normalising `name` to lower case.
    pub fn new(name: &str, current: f64, target: f64) -> Self {
        Self {
            name: name.to_lowercase(),
            current,
            target,
        }
    }
}

/// Insertion-ordered set of [TemperatureReading]s, at most one per name.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ToolRegistry {
    tools: IndexMap<String, TemperatureReading>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `reading`, replacing an existing entry of the same name in
    /// place (its position is kept).
    pub fn add(&mut self, reading: TemperatureReading) {
        let key = reading.name.to_lowercase();
        self.tools.insert(key, reading);
    }

    /// The first inserted reading.
    pub fn first(&self) -> Option<&TemperatureReading> {
        self.tools.first().map(|(_, reading)| reading)
    }

    /// Look a reading up by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&TemperatureReading> {
        self.tools.get(&name.to_lowercase())
    }

    /// Remove and return the reading called `name`. Later entries move up
    /// one position.
    pub fn delete(&mut self, name: &str) -> Option<TemperatureReading> {
        self.tools.shift_remove(&name.to_lowercase())
    }

    /// Readings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TemperatureReading> {
        self.tools.values()
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Positional lookup in insertion order.
///
/// # Panics
///
/// Panics if `index` is out of range, like slice indexing.
impl Index<usize> for ToolRegistry {
    type Output = TemperatureReading;

    fn index(&self, index: usize) -> &TemperatureReading {
        match self.tools.get_index(index) {
            Some((_, reading)) => reading,
            None => panic!("tool index {index} out of range for registry of {} tools", self.len()),
        }
    }
}

impl<'a> IntoIterator for &'a ToolRegistry {
    type Item = &'a TemperatureReading;
    type IntoIter = indexmap::map::Values<'a, String, TemperatureReading>;

    fn into_iter(self) -> Self::IntoIter {
        self.tools.values()
    }
}

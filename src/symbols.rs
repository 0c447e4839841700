use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Variable name to value, iterated in first-assignment order.
/// Serializes as a plain JSON object in that same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    names: Vec<String>,
    values: HashMap<String, f64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Reassignment keeps the name at its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        if self.values.insert(name.clone(), value).is_none() {
            self.names.push(name);
        }
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.names
            .iter()
            .filter_map(move |name| self.values.get(name).map(|value| (name.as_str(), *value)))
    }
}

/// Integral values print without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl Serialize for SymbolTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

struct SymbolTableVisitor;

impl<'de> Visitor<'de> for SymbolTableVisitor {
    type Value = SymbolTable;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of variable names to numbers")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SymbolTable, A::Error> {
        let mut table = SymbolTable::new();
        while let Some((name, value)) = access.next_entry::<String, f64>()? {
            table.insert(name, value);
        }
        Ok(table)
    }
}

impl<'de> Deserialize<'de> for SymbolTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(SymbolTableVisitor)
    }
}

impl fmt::Display for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{} = {}", name, format_number(value))?;
        }
        Ok(())
    }
}

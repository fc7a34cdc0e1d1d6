//! Materialized configuration values.

use serde::{Deserialize, Serialize};

/// A named property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

/// Value of a property, mirroring the shape of its definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// `None` is a property that is present but has no value.
    Simple(Option<String>),
    Map(PropertyMap),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn simple(value: impl Into<String>) -> Self {
        PropertyValue::Simple(Some(value.into()))
    }

    pub fn as_simple(&self) -> Option<&str> {
        match self {
            PropertyValue::Simple(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&PropertyMap> {
        match self {
            PropertyValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Name-keyed properties in insertion order.
///
/// Names are unique: inserting an existing name replaces its value in place
/// and keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap {
    entries: Vec<Property>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PropertyValue> {
        self.entries.iter_mut().find(|p| p.name == name).map(|p| &mut p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|p| p.name == name)
    }

    /// Inserts or replaces `name`, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) -> Option<PropertyValue> {
        let name = name.into();
        match self.get_mut(&name) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push(Property { name, value });
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        let index = self.entries.iter().position(|p| p.name == name)?;
        Some(self.entries.remove(index).value)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Property) -> bool) {
        self.entries.retain(|p| keep(p));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, PropertyValue)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        let mut map = PropertyMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

/// Top-level set of properties for a resource, plugin or operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    properties: PropertyMap,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(properties: PropertyMap) -> Self {
        Self { properties }
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Value of a top-level simple property, if present and set.
    pub fn simple_value(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(PropertyValue::as_simple)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) -> Option<PropertyValue> {
        self.properties.insert(name, value)
    }

    /// Shorthand for inserting a set simple property.
    #[must_use]
    pub fn with_simple(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name, PropertyValue::simple(value));
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

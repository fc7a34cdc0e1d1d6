//! Configuration schema types.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::fingerprint::SchemaFingerprint;

// =============================================================================
// Simple Types
// =============================================================================

/// Value type of a simple property. Values are always carried as strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleType {
    #[default]
    String,
    LongString,
    Password,
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    File,
    Directory,
}

impl SimpleType {
    /// Maximum value length applied when a definition does not set one.
    pub fn default_max_length(&self) -> usize {
        match self {
            SimpleType::LongString => 65535,
            _ => 2048,
        }
    }

    /// Returns true if `value` is acceptable for this type.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            SimpleType::Boolean => value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false"),
            SimpleType::Integer => value.parse::<i32>().is_ok(),
            SimpleType::Long => value.parse::<i64>().is_ok(),
            SimpleType::Float => value.parse::<f32>().is_ok(),
            SimpleType::Double => value.parse::<f64>().is_ok(),
            SimpleType::String
            | SimpleType::LongString
            | SimpleType::Password
            | SimpleType::File
            | SimpleType::Directory => true,
        }
    }
}

impl fmt::Display for SimpleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SimpleType::String => "string",
            SimpleType::LongString => "long string",
            SimpleType::Password => "password",
            SimpleType::Boolean => "boolean",
            SimpleType::Integer => "integer",
            SimpleType::Long => "long",
            SimpleType::Float => "float",
            SimpleType::Double => "double",
            SimpleType::File => "file",
            SimpleType::Directory => "directory",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Property Definitions
// =============================================================================

/// One node of a configuration schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(flatten)]
    pub kind: DefinitionKind,
}

/// Shape of a property definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DefinitionKind {
    Simple {
        #[serde(default)]
        simple_type: SimpleType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Map {
        members: Vec<PropertyDefinition>,
    },
    /// Every element of the list is shaped by `member`.
    List {
        member: Box<PropertyDefinition>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_entries: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_entries: Option<usize>,
    },
}

impl PropertyDefinition {
    /// An optional string property without a default.
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            read_only: false,
            kind: DefinitionKind::Simple {
                simple_type: SimpleType::String,
                default: None,
                max_length: None,
            },
        }
    }

    pub fn map(name: impl Into<String>, members: Vec<PropertyDefinition>) -> Self {
        Self {
            name: name.into(),
            required: false,
            read_only: false,
            kind: DefinitionKind::Map { members },
        }
    }

    pub fn list(name: impl Into<String>, member: PropertyDefinition) -> Self {
        Self {
            name: name.into(),
            required: false,
            read_only: false,
            kind: DefinitionKind::List {
                member: Box::new(member),
                min_entries: None,
                max_entries: None,
            },
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Sets the default of a simple property. Ignored for maps and lists.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        if let DefinitionKind::Simple { default, .. } = &mut self.kind {
            *default = Some(value.into());
        }
        self
    }

    /// Sets the value type of a simple property. Ignored for maps and lists.
    #[must_use]
    pub fn of_type(mut self, ty: SimpleType) -> Self {
        if let DefinitionKind::Simple { simple_type, .. } = &mut self.kind {
            *simple_type = ty;
        }
        self
    }

    #[must_use]
    pub fn with_max_length(mut self, len: usize) -> Self {
        if let DefinitionKind::Simple { max_length, .. } = &mut self.kind {
            *max_length = Some(len);
        }
        self
    }

    /// Sets the entry bounds of a list property. Ignored for simples and maps.
    #[must_use]
    pub fn with_entries(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        if let DefinitionKind::List {
            min_entries,
            max_entries,
            ..
        } = &mut self.kind
        {
            *min_entries = min;
            *max_entries = max;
        }
        self
    }

    /// The explicit default of a simple property.
    pub fn default_value(&self) -> Option<&str> {
        match &self.kind {
            DefinitionKind::Simple { default, .. } => default.as_deref(),
            _ => None,
        }
    }

    pub fn members(&self) -> &[PropertyDefinition] {
        match &self.kind {
            DefinitionKind::Map { members } => members,
            _ => &[],
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self.kind, DefinitionKind::Simple { .. })
    }

    fn check(&self, parent: &str, out_path: &mut Vec<String>) -> Result<(), SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::EmptyName {
                parent: parent.to_string(),
            });
        }
        out_path.push(self.name.clone());
        let path = out_path.join(".");

        match &self.kind {
            DefinitionKind::Simple {
                simple_type,
                default,
                ..
            } => {
                if let Some(default) = default {
                    if !simple_type.accepts(default) {
                        return Err(SchemaError::InvalidDefault {
                            name: path,
                            default: default.clone(),
                            simple_type: *simple_type,
                        });
                    }
                }
            }
            DefinitionKind::Map { members } => check_siblings(&path, members, out_path)?,
            DefinitionKind::List {
                member,
                min_entries,
                max_entries,
            } => {
                if let (Some(min), Some(max)) = (min_entries, max_entries) {
                    if min > max {
                        return Err(SchemaError::InvalidListBounds {
                            name: path,
                            min: *min,
                            max: *max,
                        });
                    }
                }
                member.check(&path, out_path)?;
            }
        }

        out_path.pop();
        Ok(())
    }
}

fn check_siblings(
    parent: &str,
    members: &[PropertyDefinition],
    out_path: &mut Vec<String>,
) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for member in members {
        if !seen.insert(member.name.as_str()) {
            return Err(SchemaError::DuplicateName {
                parent: parent.to_string(),
                name: member.name.clone(),
            });
        }
        member.check(parent, out_path)?;
    }
    Ok(())
}

// =============================================================================
// Configuration Definition
// =============================================================================

/// A validated configuration schema.
///
/// Construction and deserialization both reject malformed trees, so holders
/// of a `ConfigurationDefinition` can rely on unique sibling names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDefinition", into = "RawDefinition")]
pub struct ConfigurationDefinition {
    name: String,
    properties: Vec<PropertyDefinition>,
    fingerprint: SchemaFingerprint,
}

#[derive(Serialize, Deserialize)]
struct RawDefinition {
    name: String,
    #[serde(default)]
    properties: Vec<PropertyDefinition>,
}

impl ConfigurationDefinition {
    pub fn new(
        name: impl Into<String>,
        properties: Vec<PropertyDefinition>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        check_siblings(&name, &properties, &mut Vec::new())?;
        let fingerprint = SchemaFingerprint::of(&name, &properties)?;
        Ok(Self {
            name,
            properties,
            fingerprint,
        })
    }

    /// A schema with no properties.
    pub fn empty(name: impl Into<String>) -> Self {
        let name = name.into();
        let fingerprint = SchemaFingerprint::of_empty(&name);
        Self {
            name,
            properties: Vec::new(),
            fingerprint,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[PropertyDefinition] {
        &self.properties
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Content hash of the schema, stable across processes.
    pub fn fingerprint(&self) -> &SchemaFingerprint {
        &self.fingerprint
    }
}

impl TryFrom<RawDefinition> for ConfigurationDefinition {
    type Error = SchemaError;

    fn try_from(raw: RawDefinition) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.properties)
    }
}

impl From<ConfigurationDefinition> for RawDefinition {
    fn from(def: ConfigurationDefinition) -> Self {
        Self {
            name: def.name,
            properties: def.properties,
        }
    }
}

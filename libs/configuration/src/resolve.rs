//! Default configuration resolution.

use crate::configuration::{Configuration, PropertyMap, PropertyValue};
use crate::definition::{ConfigurationDefinition, DefinitionKind, PropertyDefinition};

/// Builds the minimal configuration satisfying `definition`.
///
/// A property is emitted when it is required or has a default. Maps have an
/// implicit default when any member would be emitted, and lists have one
/// when their member would be. Emitted maps contain their emitted members in
/// declaration order; emitted lists hold exactly one element resolved from
/// the member definition when the member would be emitted, and none
/// otherwise. Required simples without a default are present with no value.
///
/// Output depends only on `definition`.
pub fn resolve(definition: &ConfigurationDefinition) -> Configuration {
    Configuration::from_map(resolve_members(definition.properties()))
}

pub(crate) fn resolve_members(members: &[PropertyDefinition]) -> PropertyMap {
    members
        .iter()
        .filter(|def| contributes(def))
        .map(|def| (def.name.clone(), resolve_value(def)))
        .collect()
}

/// Value of a property that [`contributes`].
pub(crate) fn resolve_value(def: &PropertyDefinition) -> PropertyValue {
    match &def.kind {
        DefinitionKind::Simple { default, .. } => PropertyValue::Simple(default.clone()),
        DefinitionKind::Map { members } => PropertyValue::Map(resolve_members(members)),
        DefinitionKind::List { member, .. } => {
            if contributes(member) {
                PropertyValue::List(vec![resolve_value(member)])
            } else {
                PropertyValue::List(Vec::new())
            }
        }
    }
}

pub(crate) fn contributes(def: &PropertyDefinition) -> bool {
    def.required || has_default(def)
}

fn has_default(def: &PropertyDefinition) -> bool {
    match &def.kind {
        DefinitionKind::Simple { default, .. } => default.is_some(),
        DefinitionKind::Map { members } => members.iter().any(contributes),
        DefinitionKind::List { member, .. } => contributes(member),
    }
}

//! Carrying configurations across schema changes.

use crate::configuration::{Configuration, PropertyMap, PropertyValue};
use crate::definition::{ConfigurationDefinition, DefinitionKind, PropertyDefinition};
use crate::resolve::{contributes, resolve_value};

/// Rebuilds `existing` for `definition`, typically a newer schema.
///
/// Properties the schema no longer defines are dropped. Writable values are
/// kept. Read-only simples that have a default take the default unless
/// `keep_read_only` is set, in which case the existing value survives.
/// Properties missing from `existing` are seeded the way [`resolve`] would
/// seed them. Values whose shape no longer matches their definition are
/// replaced by the resolved default.
///
/// [`resolve`]: crate::resolve
pub fn adapt(
    existing: &Configuration,
    definition: &ConfigurationDefinition,
    keep_read_only: bool,
) -> Configuration {
    Configuration::from_map(adapt_members(
        existing.properties(),
        definition.properties(),
        keep_read_only,
    ))
}

fn adapt_members(
    existing: &PropertyMap,
    members: &[PropertyDefinition],
    keep_read_only: bool,
) -> PropertyMap {
    let mut out = PropertyMap::new();
    for def in members {
        match existing.get(&def.name) {
            Some(value) => {
                out.insert(def.name.clone(), adapt_value(value, def, keep_read_only));
            }
            None if contributes(def) => {
                out.insert(def.name.clone(), resolve_value(def));
            }
            None => {}
        }
    }
    out
}

fn adapt_value(value: &PropertyValue, def: &PropertyDefinition, keep_read_only: bool) -> PropertyValue {
    match (&def.kind, value) {
        (DefinitionKind::Simple { default, .. }, PropertyValue::Simple(v)) => {
            match default {
                Some(default) if def.read_only && !keep_read_only => {
                    PropertyValue::Simple(Some(default.clone()))
                }
                _ => PropertyValue::Simple(v.clone()),
            }
        }
        (DefinitionKind::Map { members }, PropertyValue::Map(map)) => {
            PropertyValue::Map(adapt_members(map, members, keep_read_only))
        }
        (DefinitionKind::List { member, .. }, PropertyValue::List(items)) => PropertyValue::List(
            items
                .iter()
                .map(|item| adapt_value(item, member, keep_read_only))
                .collect(),
        ),
        _ => resolve_value(def),
    }
}

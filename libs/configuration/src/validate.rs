//! Schema validation of configurations.

use crate::configuration::{Configuration, PropertyMap, PropertyValue};
use crate::definition::{ConfigurationDefinition, DefinitionKind, PropertyDefinition};

/// Checks `config` against `definition` and returns one message per problem.
///
/// `current` is the configuration presently in effect; when given, read-only
/// properties must keep their current values. An empty result means the
/// configuration is valid.
pub fn validate(
    config: &Configuration,
    current: Option<&Configuration>,
    definition: &ConfigurationDefinition,
) -> Vec<String> {
    let mut errors = Vec::new();
    validate_members(
        config.properties(),
        current.map(Configuration::properties),
        definition.properties(),
        "",
        &mut errors,
    );
    errors
}

fn path_of(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn validate_members(
    map: &PropertyMap,
    current: Option<&PropertyMap>,
    members: &[PropertyDefinition],
    prefix: &str,
    errors: &mut Vec<String>,
) {
    for def in members {
        let path = path_of(prefix, &def.name);
        let current_value = current.and_then(|c| c.get(&def.name));
        match map.get(&def.name) {
            None => {
                if def.required {
                    errors.push(format!("Required property '{path}' was not set"));
                }
            }
            Some(value) => validate_value(value, current_value, def, &path, errors),
        }
    }
}

fn validate_value(
    value: &PropertyValue,
    current: Option<&PropertyValue>,
    def: &PropertyDefinition,
    path: &str,
    errors: &mut Vec<String>,
) {
    if def.read_only {
        if let Some(current) = current {
            if current != value {
                errors.push(format!("Property '{path}' is read-only and cannot be changed"));
                return;
            }
        }
    }

    match (&def.kind, value) {
        (DefinitionKind::Simple { simple_type, .. }, PropertyValue::Simple(v)) => match v {
            None if def.required => {
                errors.push(format!("Required property '{path}' has no value"));
            }
            Some(s) if !simple_type.accepts(s) => {
                errors.push(format!("Property '{path}' value '{s}' is not a valid {simple_type}"));
            }
            _ => {}
        },
        (DefinitionKind::Map { members }, PropertyValue::Map(map)) => {
            validate_members(map, current.and_then(PropertyValue::as_map), members, path, errors);
        }
        (
            DefinitionKind::List {
                member,
                min_entries,
                max_entries,
            },
            PropertyValue::List(items),
        ) => {
            if let Some(min) = min_entries {
                if items.len() < *min {
                    errors.push(format!(
                        "List property '{path}' has {} entries, fewer than the minimum of {min}",
                        items.len()
                    ));
                }
            }
            if let Some(max) = max_entries {
                if items.len() > *max {
                    errors.push(format!(
                        "List property '{path}' has {} entries, more than the maximum of {max}",
                        items.len()
                    ));
                }
            }
            let current_items = current.and_then(PropertyValue::as_list);
            for (index, item) in items.iter().enumerate() {
                let current_item = current_items.and_then(|c| c.get(index));
                validate_value(item, current_item, member, &format!("{path}[{index}]"), errors);
            }
        }
        _ => errors.push(format!("Property '{path}' does not match its definition")),
    }
}

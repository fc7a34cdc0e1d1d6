//! In-place cleanup of configurations against their schema.

use crate::configuration::{Configuration, PropertyMap, PropertyValue};
use crate::definition::{ConfigurationDefinition, DefinitionKind, PropertyDefinition};

/// Brings `config` into the shape of `definition`.
///
/// Missing simple properties are added without a value, or with their
/// default when the matching flag (`required_defaults` for required
/// properties, `optional_defaults` for the rest) is set. Missing maps and
/// lists are added empty. Empty strings become unset and values longer
/// than their maximum length are truncated. The walk recurses into maps and
/// into lists of maps. Properties the schema does not define are left alone.
pub fn normalize(
    config: &mut Configuration,
    definition: &ConfigurationDefinition,
    required_defaults: bool,
    optional_defaults: bool,
) {
    let flags = Flags {
        required_defaults,
        optional_defaults,
    };
    normalize_members(config.properties_mut(), definition.properties(), flags);
}

#[derive(Clone, Copy)]
struct Flags {
    required_defaults: bool,
    optional_defaults: bool,
}

fn normalize_members(map: &mut PropertyMap, members: &[PropertyDefinition], flags: Flags) {
    for def in members {
        match map.get_mut(&def.name) {
            Some(value) => normalize_value(value, def, flags),
            None => {
                map.insert(def.name.clone(), missing_value(def, flags));
            }
        }
    }
}

fn missing_value(def: &PropertyDefinition, flags: Flags) -> PropertyValue {
    match &def.kind {
        DefinitionKind::Simple { default, .. } => {
            let use_default = if def.required {
                flags.required_defaults
            } else {
                flags.optional_defaults
            };
            PropertyValue::Simple(if use_default { default.clone() } else { None })
        }
        DefinitionKind::Map { .. } => PropertyValue::Map(PropertyMap::new()),
        DefinitionKind::List { .. } => PropertyValue::List(Vec::new()),
    }
}

fn normalize_value(value: &mut PropertyValue, def: &PropertyDefinition, flags: Flags) {
    match (&def.kind, value) {
        (
            DefinitionKind::Simple {
                simple_type,
                max_length,
                ..
            },
            PropertyValue::Simple(slot),
        ) => {
            if slot.as_deref() == Some("") {
                *slot = None;
            }
            if let Some(s) = slot {
                let limit = max_length.unwrap_or_else(|| simple_type.default_max_length());
                truncate_chars(s, limit);
            }
        }
        (DefinitionKind::Map { members }, PropertyValue::Map(map)) => {
            normalize_members(map, members, flags);
        }
        (DefinitionKind::List { member, .. }, PropertyValue::List(items)) => {
            for item in items.iter_mut() {
                normalize_value(item, member, flags);
            }
        }
        // Shape mismatches are reported by `validate`.
        _ => {}
    }
}

fn truncate_chars(s: &mut String, limit: usize) {
    if let Some((index, _)) = s.char_indices().nth(limit) {
        s.truncate(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PropertyDefinition as P;
    use rstest::rstest;

    fn schema() -> ConfigurationDefinition {
        ConfigurationDefinition::new(
            "test",
            vec![
                P::simple("req").required().with_default("R"),
                P::simple("opt").with_default("O"),
                P::map("conn", vec![P::simple("host").required().with_default("localhost")]),
                P::list("tags", P::simple("tag")),
            ],
        )
        .unwrap()
    }

    #[rstest]
    #[case(false, false, None, None)]
    #[case(true, false, Some("R"), None)]
    #[case(false, true, None, Some("O"))]
    #[case(true, true, Some("R"), Some("O"))]
    fn test_missing_simples_follow_default_flags(
        #[case] required_defaults: bool,
        #[case] optional_defaults: bool,
        #[case] req: Option<&str>,
        #[case] opt: Option<&str>,
    ) {
        let mut config = Configuration::new();
        normalize(&mut config, &schema(), required_defaults, optional_defaults);

        assert!(config.contains("req"));
        assert!(config.contains("opt"));
        assert_eq!(config.simple_value("req"), req);
        assert_eq!(config.simple_value("opt"), opt);
    }

    #[test]
    fn test_missing_map_and_list_added_empty() {
        let mut config = Configuration::new();
        normalize(&mut config, &schema(), true, true);
        assert_eq!(config.get("conn"), Some(&PropertyValue::Map(PropertyMap::new())));
        assert_eq!(config.get("tags"), Some(&PropertyValue::List(Vec::new())));
    }

    #[test]
    fn test_existing_map_members_filled() {
        let mut config = Configuration::new();
        config.insert("conn", PropertyValue::Map(PropertyMap::new()));
        normalize(&mut config, &schema(), true, false);
        let conn = config.get("conn").and_then(PropertyValue::as_map).unwrap();
        assert_eq!(conn.get("host").and_then(PropertyValue::as_simple), Some("localhost"));
    }

    #[test]
    fn test_empty_string_becomes_unset() {
        let mut config = Configuration::new().with_simple("opt", "");
        normalize(&mut config, &schema(), false, false);
        assert!(config.contains("opt"));
        assert_eq!(config.simple_value("opt"), None);
    }

    #[test]
    fn test_overlong_value_truncated() {
        let def = ConfigurationDefinition::new("t", vec![P::simple("s").with_max_length(3)]).unwrap();
        let mut config = Configuration::new().with_simple("s", "abcdef");
        normalize(&mut config, &def, false, false);
        assert_eq!(config.simple_value("s"), Some("abc"));
    }

    #[test]
    fn test_unknown_properties_untouched() {
        let mut config = Configuration::new().with_simple("extra", "kept");
        normalize(&mut config, &schema(), false, false);
        assert_eq!(config.simple_value("extra"), Some("kept"));
    }
}

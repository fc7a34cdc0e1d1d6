//! Resource types declared by plugins.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use fleet_configuration::{ConfigurationDefinition, SchemaFingerprint};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Composite key of a resource type: owning plugin plus type name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceTypeKey {
    pub plugin: String,
    pub name: String,
}

impl ResourceTypeKey {
    pub fn new(plugin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin, self.name)
    }
}

impl FromStr for ResourceTypeKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((plugin, name)) if !plugin.is_empty() && !name.is_empty() => {
                Ok(Self::new(plugin, name))
            }
            _ => Err(DomainError::InvalidTypeKey(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Platform,
    Server,
    Service,
}

/// Which factory requests a resource type accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateDeletePolicy {
    #[default]
    Neither,
    CreateOnly,
    DeleteOnly,
    Both,
}

impl CreateDeletePolicy {
    pub fn allows_create(&self) -> bool {
        matches!(self, CreateDeletePolicy::CreateOnly | CreateDeletePolicy::Both)
    }

    pub fn allows_delete(&self) -> bool {
        matches!(self, CreateDeletePolicy::DeleteOnly | CreateDeletePolicy::Both)
    }
}

/// Reachability of a started resource, as last reported by its component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Up,
    Down,
    #[default]
    Unknown,
}

/// An operation a resource type exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ConfigurationDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ConfigurationDefinition>,
    /// Run time limit in seconds. Callers fall back to their own default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl OperationDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
            results: None,
            timeout_secs: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: ConfigurationDefinition) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// A category of manageable resource declared by a plugin.
///
/// Types form a DAG through `parents`: a type may be discovered beneath any
/// of its parent types. A type without parents is a root, which is only
/// valid for platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub key: ResourceTypeKey,
    pub category: ResourceCategory,
    pub plugin_config_definition: ConfigurationDefinition,
    pub resource_config_definition: ConfigurationDefinition,
    #[serde(default)]
    pub operations: Vec<OperationDefinition>,
    #[serde(default)]
    pub parents: Vec<ResourceTypeKey>,
    #[serde(default)]
    pub create_delete_policy: CreateDeletePolicy,
}

impl ResourceType {
    pub fn new(plugin: impl Into<String>, name: impl Into<String>, category: ResourceCategory) -> Self {
        let key = ResourceTypeKey::new(plugin, name);
        Self {
            plugin_config_definition: ConfigurationDefinition::empty(format!("{key}/plugin")),
            resource_config_definition: ConfigurationDefinition::empty(format!("{key}/resource")),
            key,
            category,
            operations: Vec::new(),
            parents: Vec::new(),
            create_delete_policy: CreateDeletePolicy::Neither,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: ResourceTypeKey) -> Self {
        self.parents.push(parent);
        self
    }

    #[must_use]
    pub fn with_plugin_config(mut self, definition: ConfigurationDefinition) -> Self {
        self.plugin_config_definition = definition;
        self
    }

    #[must_use]
    pub fn with_resource_config(mut self, definition: ConfigurationDefinition) -> Self {
        self.resource_config_definition = definition;
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: OperationDefinition) -> Self {
        self.operations.push(operation);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: CreateDeletePolicy) -> Self {
        self.create_delete_policy = policy;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn has_parent(&self, parent: &ResourceTypeKey) -> bool {
        self.parents.contains(parent)
    }

    pub fn operation(&self, name: &str) -> Option<&OperationDefinition> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Version of the type's configuration shape.
    ///
    /// Changes whenever either configuration schema changes. Inventory nodes
    /// remember the version they were last committed or upgraded under.
    pub fn schema_version(&self) -> SchemaFingerprint {
        SchemaFingerprint::combine([
            self.plugin_config_definition.fingerprint(),
            self.resource_config_definition.fingerprint(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_configuration::PropertyDefinition;
    use rstest::rstest;

    #[rstest]
    #[case(CreateDeletePolicy::Neither, false, false)]
    #[case(CreateDeletePolicy::CreateOnly, true, false)]
    #[case(CreateDeletePolicy::DeleteOnly, false, true)]
    #[case(CreateDeletePolicy::Both, true, true)]
    fn test_policy_permissions(
        #[case] policy: CreateDeletePolicy,
        #[case] create: bool,
        #[case] delete: bool,
    ) {
        assert_eq!(policy.allows_create(), create);
        assert_eq!(policy.allows_delete(), delete);
    }

    #[test]
    fn test_type_key_parse() {
        let key: ResourceTypeKey = "postgres:database".parse().unwrap();
        assert_eq!(key, ResourceTypeKey::new("postgres", "database"));
        assert_eq!(key.to_string(), "postgres:database");
        assert!("postgres".parse::<ResourceTypeKey>().is_err());
        assert!(":database".parse::<ResourceTypeKey>().is_err());
    }

    #[test]
    fn test_schema_version_tracks_config_schemas() {
        let v1 = ResourceType::new("pg", "db", ResourceCategory::Service);
        let v2 = v1.clone().with_plugin_config(
            ConfigurationDefinition::new("pg:db/plugin", vec![PropertyDefinition::simple("port")])
                .unwrap(),
        );
        assert_eq!(v1.schema_version(), v1.clone().schema_version());
        assert_ne!(v1.schema_version(), v2.schema_version());
    }

    #[test]
    fn test_type_dag_parents() {
        let host = ResourceTypeKey::new("platform", "linux");
        let jvm = ResourceTypeKey::new("jvm", "process");
        let agent = ResourceType::new("monitor", "agent", ResourceCategory::Server)
            .with_parent(host.clone())
            .with_parent(jvm.clone());
        assert!(!agent.is_root());
        assert!(agent.has_parent(&host));
        assert!(agent.has_parent(&jvm));
    }
}

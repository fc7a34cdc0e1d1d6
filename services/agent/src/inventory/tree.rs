//! Arena of inventory nodes.

use std::collections::HashMap;

use chrono::Utc;
use fleet_domain::{Availability, ResourceTypeKey};
use fleet_id::{ResourceId, Sequence};

use super::error::InventoryError;
use super::node::{ComponentState, NewResource, ResourceNode};
use crate::plugin::ComponentSet;

/// Nodes addressed by id with parent/child edges stored as ids.
///
/// The tree has no locking of its own and never calls into plugins; the
/// [`InventoryManager`](super::InventoryManager) wraps it for both.
#[derive(Debug, Default)]
pub struct InventoryTree {
    nodes: HashMap<ResourceId, ResourceNode>,
    components: HashMap<ResourceId, ComponentSet>,
    roots: Vec<ResourceId>,
    ids: Sequence,
}

impl InventoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node beneath `parent`, or as a root when `parent` is `None`.
    pub fn insert(
        &mut self,
        parent: Option<ResourceId>,
        new: NewResource,
    ) -> Result<ResourceId, InventoryError> {
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(&parent_id) {
                return Err(InventoryError::NotFound(parent_id));
            }
        }
        if self.find(parent, &new.resource_type, &new.key).is_some() {
            return Err(InventoryError::DuplicateKey {
                parent,
                resource_type: new.resource_type,
                key: new.key,
            });
        }

        let id: ResourceId = self.ids.next();
        let now = Utc::now();
        let node = ResourceNode {
            id,
            key: new.key,
            name: new.name,
            version: new.version,
            description: new.description,
            resource_type: new.resource_type,
            plugin_configuration: new.plugin_configuration,
            resource_configuration: new.resource_configuration,
            inventory_status: new.inventory_status,
            component_state: ComponentState::Uninitialized,
            availability: Availability::Unknown,
            schema_version: new.schema_version,
            errors: Vec::new(),
            parent,
            children: Vec::new(),
            created_at: now,
            modified_at: now,
        };
        self.nodes.insert(id, node);

        match parent.and_then(|p| self.nodes.get_mut(&p)) {
            Some(parent_node) => parent_node.children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(&id)
    }

    pub fn require(&self, id: ResourceId) -> Result<&ResourceNode, InventoryError> {
        self.nodes.get(&id).ok_or(InventoryError::NotFound(id))
    }

    pub fn require_mut(&mut self, id: ResourceId) -> Result<&mut ResourceNode, InventoryError> {
        self.nodes.get_mut(&id).ok_or(InventoryError::NotFound(id))
    }

    /// The sibling of type `resource_type` with `key` beneath `parent`.
    pub fn find(
        &self,
        parent: Option<ResourceId>,
        resource_type: &ResourceTypeKey,
        key: &str,
    ) -> Option<ResourceId> {
        self.child_ids(parent)
            .iter()
            .copied()
            .find(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| &n.resource_type == resource_type && n.key == key)
            })
    }

    /// Children of `parent`, or the roots when `parent` is `None`.
    pub fn child_ids(&self, parent: Option<ResourceId>) -> &[ResourceId] {
        match parent {
            Some(id) => self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[]),
            None => &self.roots,
        }
    }

    pub fn roots(&self) -> &[ResourceId] {
        &self.roots
    }

    /// `id` and its descendants, children before parents.
    pub fn post_order(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                out.push(current);
                continue;
            }
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            stack.push((current, true));
            for child in node.children.iter().rev() {
                stack.push((*child, false));
            }
        }
        out
    }

    /// Removes `id` and its descendants, children first.
    ///
    /// Components are handed back so the caller can release them; the tree
    /// itself does not stop anything.
    pub fn detach(&mut self, id: ResourceId) -> Vec<(ResourceNode, Option<ComponentSet>)> {
        let order = self.post_order(id);
        let parent = self.nodes.get(&id).and_then(|n| n.parent);

        let mut removed = Vec::with_capacity(order.len());
        for node_id in order {
            if let Some(node) = self.nodes.remove(&node_id) {
                let component = self.components.remove(&node_id);
                removed.push((node, component));
            }
        }

        match parent.and_then(|p| self.nodes.get_mut(&p)) {
            Some(parent_node) => parent_node.children.retain(|c| *c != id),
            None => self.roots.retain(|r| *r != id),
        }
        removed
    }

    pub fn component(&self, id: ResourceId) -> Option<&ComponentSet> {
        self.components.get(&id)
    }

    pub fn set_component(&mut self, id: ResourceId, component: ComponentSet) {
        if self.nodes.contains_key(&id) {
            self.components.insert(id, component);
        }
    }

    pub fn take_component(&mut self, id: ResourceId) -> Option<ComponentSet> {
        self.components.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::node::{Activation, InventoryStatus};
    use fleet_configuration::{Configuration, ConfigurationDefinition};

    fn new_resource(key: &str) -> NewResource {
        NewResource {
            key: key.to_string(),
            name: key.to_string(),
            version: None,
            description: None,
            resource_type: ResourceTypeKey::new("test", "thing"),
            plugin_configuration: Configuration::new(),
            resource_configuration: Configuration::new(),
            schema_version: ConfigurationDefinition::empty("x").fingerprint().clone(),
            inventory_status: InventoryStatus::Committed(Activation::Active),
        }
    }

    #[test]
    fn test_insert_links_parent_and_child() {
        let mut tree = InventoryTree::new();
        let root = tree.insert(None, new_resource("host")).unwrap();
        let child = tree.insert(Some(root), new_resource("db")).unwrap();

        assert_eq!(tree.roots(), &[root]);
        assert_eq!(tree.get(root).unwrap().children, vec![child]);
        assert_eq!(tree.get(child).unwrap().parent, Some(root));
    }

    #[test]
    fn test_duplicate_key_among_siblings_rejected() {
        let mut tree = InventoryTree::new();
        let root = tree.insert(None, new_resource("host")).unwrap();
        tree.insert(Some(root), new_resource("db")).unwrap();
        let result = tree.insert(Some(root), new_resource("db"));
        assert!(matches!(result, Err(InventoryError::DuplicateKey { .. })));
    }

    #[test]
    fn test_same_key_under_different_parents_allowed() {
        let mut tree = InventoryTree::new();
        let a = tree.insert(None, new_resource("a")).unwrap();
        let b = tree.insert(None, new_resource("b")).unwrap();
        tree.insert(Some(a), new_resource("db")).unwrap();
        assert!(tree.insert(Some(b), new_resource("db")).is_ok());
    }

    #[test]
    fn test_insert_under_missing_parent_rejected() {
        let mut tree = InventoryTree::new();
        let result = tree.insert(Some(ResourceId::new(99)), new_resource("db"));
        assert!(matches!(result, Err(InventoryError::NotFound(_))));
    }

    #[test]
    fn test_post_order_visits_children_first() {
        let mut tree = InventoryTree::new();
        let root = tree.insert(None, new_resource("root")).unwrap();
        let a = tree.insert(Some(root), new_resource("a")).unwrap();
        let a1 = tree.insert(Some(a), new_resource("a1")).unwrap();
        let b = tree.insert(Some(root), new_resource("b")).unwrap();

        assert_eq!(tree.post_order(root), vec![a1, a, b, root]);
    }

    #[test]
    fn test_detach_removes_subtree_only() {
        let mut tree = InventoryTree::new();
        let root = tree.insert(None, new_resource("root")).unwrap();
        let a = tree.insert(Some(root), new_resource("a")).unwrap();
        tree.insert(Some(a), new_resource("a1")).unwrap();
        let b = tree.insert(Some(root), new_resource("b")).unwrap();

        let removed = tree.detach(a);
        assert_eq!(removed.len(), 2);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(root).unwrap().children, vec![b]);
    }

    #[test]
    fn test_detach_root() {
        let mut tree = InventoryTree::new();
        let root = tree.insert(None, new_resource("root")).unwrap();
        tree.insert(Some(root), new_resource("a")).unwrap();

        tree.detach(root);
        assert!(tree.is_empty());
        assert!(tree.roots().is_empty());
    }
}

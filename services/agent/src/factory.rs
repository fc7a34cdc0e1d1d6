//! Agent side of resource creation and deletion.

use std::sync::Arc;
use std::time::Duration;

use fleet_configuration::{normalize, resolve, validate};
use fleet_domain::{
    CreateResourceRequest, CreateResourceResponse, CreateResourceStatus, DeleteResourceRequest,
    DeleteResourceResponse,
};
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::inventory::InventoryManager;
use crate::plugin::CreateChildRequest;

/// Carries out create and delete requests against the local inventory.
pub struct FactoryExecutor {
    inventory: Arc<InventoryManager>,
    timeout: Duration,
}

impl FactoryExecutor {
    pub fn new(inventory: Arc<InventoryManager>, timeout: Duration) -> Self {
        Self { inventory, timeout }
    }

    /// Creates a child resource. Every outcome is reported in the response.
    #[instrument(skip(self, request), fields(request_id = %request.request_id, resource_type = %request.resource_type))]
    pub async fn create(&self, request: CreateResourceRequest) -> CreateResourceResponse {
        let id = request.request_id;
        let fail = |message: String| {
            warn!(error = %message, "Create request failed");
            CreateResourceResponse::failure(id, message)
        };

        let Some(parent) = self.inventory.get(request.parent_resource_id).await else {
            return fail(format!("parent resource {} not found", request.parent_resource_id));
        };
        let Some(rt) = self.inventory.registry().resource_type(&request.resource_type) else {
            return fail(format!("resource type {} is not registered", request.resource_type));
        };
        if !rt.create_delete_policy.allows_create() {
            return fail(format!("resource type {} does not support creation", rt.key));
        }
        if !rt.has_parent(&parent.resource_type) {
            return fail(format!(
                "resource type {} cannot be created beneath a {} resource",
                rt.key, parent.resource_type
            ));
        }

        let plugin_configuration = request
            .plugin_configuration
            .clone()
            .unwrap_or_else(|| resolve(&rt.plugin_config_definition));
        let mut resource_configuration = request.resource_configuration.clone();
        normalize(&mut resource_configuration, &rt.resource_config_definition, true, false);

        let mut problems = validate(&plugin_configuration, None, &rt.plugin_config_definition);
        problems.extend(validate(&resource_configuration, None, &rt.resource_config_definition));
        if !problems.is_empty() {
            warn!(problems = problems.len(), "Create request has invalid configuration");
            let mut response = CreateResourceResponse::failed(
                id,
                CreateResourceStatus::InvalidConfiguration,
                problems.join("; "),
            );
            response.resource_configuration = Some(resource_configuration);
            return response;
        }

        let Some(children) = self
            .inventory
            .component(parent.id)
            .await
            .and_then(|c| c.children)
        else {
            return fail(format!("resource {} does not support creating children", parent.id));
        };

        let child_request = CreateChildRequest {
            resource_type: rt.clone(),
            resource_name: request.resource_name.clone(),
            plugin_configuration: plugin_configuration.clone(),
            resource_configuration: resource_configuration.clone(),
        };
        let created = match timeout(self.timeout, children.create_child(&child_request)).await {
            Ok(Ok(created)) => created,
            Ok(Err(e)) => return fail(format!("{e:#}")),
            Err(_) => {
                warn!("Create request timed out in plugin");
                return CreateResourceResponse::timed_out(
                    id,
                    format!("plugin did not create the resource within {}s", self.timeout.as_secs()),
                );
            }
        };

        match self
            .inventory
            .add_created(
                parent.id,
                &rt.key,
                created.resource_key.clone(),
                created.resource_name.clone(),
                plugin_configuration,
                resource_configuration.clone(),
            )
            .await
        {
            Ok(resource_id) => {
                info!(resource_id = %resource_id, resource_key = %created.resource_key, "Created resource");
                let mut response =
                    CreateResourceResponse::success(id, created.resource_key, created.resource_name);
                response.resource_configuration = Some(resource_configuration);
                response
            }
            Err(e) => fail(e.to_string()),
        }
    }

    /// Deletes a resource and removes its subtree from inventory.
    #[instrument(skip(self, request), fields(request_id = %request.request_id, resource_id = %request.resource_id))]
    pub async fn delete(&self, request: DeleteResourceRequest) -> DeleteResourceResponse {
        let id = request.request_id;
        let fail = |message: String| {
            warn!(error = %message, "Delete request failed");
            DeleteResourceResponse::failure(id, message)
        };

        let Some(node) = self.inventory.get(request.resource_id).await else {
            return fail(format!("resource {} not found", request.resource_id));
        };
        let allowed = self
            .inventory
            .registry()
            .resource_type(&node.resource_type)
            .is_some_and(|rt| rt.create_delete_policy.allows_delete());
        if !allowed {
            return fail(format!("resource type {} does not support deletion", node.resource_type));
        }
        let Some(deleter) = self
            .inventory
            .component(node.id)
            .await
            .and_then(|c| c.deleter)
        else {
            return fail(format!("resource {} does not support deletion", node.id));
        };

        match timeout(self.timeout, deleter.delete()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return fail(format!("{e:#}")),
            Err(_) => {
                warn!("Delete request timed out in plugin");
                return DeleteResourceResponse::timed_out(
                    id,
                    format!("plugin did not delete the resource within {}s", self.timeout.as_secs()),
                );
            }
        }

        match self.inventory.remove(node.id).await {
            Ok(removed) => {
                info!(removed = removed.len(), "Deleted resource");
                DeleteResourceResponse::success(id)
            }
            Err(e) => fail(e.to_string()),
        }
    }
}

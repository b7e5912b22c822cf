pub mod blueprint;
pub mod blueprint_deploy;
pub mod configlet;
pub mod ct_assignments;
pub mod device_allocation;
pub mod routing_policy;
pub mod routing_zone;
pub mod security_policy;
pub mod svi_ip;
pub mod tag;
pub mod virtual_network;
pub mod vn_binding;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::apstra::ApstraError;
use crate::error::ProviderError;
use crate::framework::{Diagnostics, Schema};
use crate::provider::ProviderContext;

/// A managed Apstra object. All documents are JSON objects shaped by
/// `schema()`.
#[async_trait]
pub trait Resource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    /// Checks that need more than one attribute or an attribute's schema.
    fn validate_config(&self, _config: &JsonValue, _diags: &mut Diagnostics) {}

    /// Adjusts the planned document after the generic schema plan.
    fn modify_plan(
        &self,
        _config: &JsonValue,
        _prior: Option<&JsonValue>,
        _planned: &mut JsonValue,
        _diags: &mut Diagnostics,
    ) {
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue>;

    /// `None` without errors in `diags` means the object is gone.
    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue>;

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue>;

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics);

    /// Builds a skeleton state from an import ID of the form
    /// `<blueprint_id>:<object_id>`.
    fn import_state(&self, id: &str, diags: &mut Diagnostics) -> Option<JsonValue> {
        let (blueprint_id, object_id) = parse_import_id(id, diags)?;
        let mut state = self.schema().null_state();
        state["blueprint_id"] = JsonValue::String(blueprint_id);
        state["id"] = JsonValue::String(object_id);
        Some(state)
    }
}

pub const RESOURCE_TYPES: &[&str] = &[
    "apstra_blueprint_deployment",
    "apstra_datacenter_blueprint",
    "apstra_datacenter_configlet",
    "apstra_datacenter_connectivity_template_assignments",
    "apstra_datacenter_device_allocation",
    "apstra_datacenter_routing_policy",
    "apstra_datacenter_routing_zone",
    "apstra_datacenter_security_policy",
    "apstra_datacenter_virtual_network",
    "apstra_tag",
];

pub fn get_resource(name: &str) -> Result<Box<dyn Resource>, ProviderError> {
    match name {
        "apstra_blueprint_deployment" => Ok(Box::new(blueprint_deploy::BlueprintDeployment)),
        "apstra_datacenter_blueprint" => Ok(Box::new(blueprint::DatacenterBlueprint)),
        "apstra_datacenter_configlet" => Ok(Box::new(configlet::DatacenterConfiglet)),
        "apstra_datacenter_connectivity_template_assignments" => {
            Ok(Box::new(ct_assignments::CtAssignments))
        }
        "apstra_datacenter_device_allocation" => {
            Ok(Box::new(device_allocation::DeviceAllocation))
        }
        "apstra_datacenter_routing_policy" => Ok(Box::new(routing_policy::RoutingPolicy)),
        "apstra_datacenter_routing_zone" => Ok(Box::new(routing_zone::RoutingZone)),
        "apstra_datacenter_security_policy" => Ok(Box::new(security_policy::SecurityPolicy)),
        "apstra_datacenter_virtual_network" => Ok(Box::new(virtual_network::VirtualNetwork)),
        "apstra_tag" => Ok(Box::new(tag::Tag)),
        other => Err(ProviderError::UnknownResource(other.to_string())),
    }
}

/// The `{"id": ...}` body Apstra returns from POST.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectId {
    pub id: String,
}

/// Decodes a document into a typed model, reporting failures as diagnostics.
pub fn from_doc<T: DeserializeOwned>(doc: &JsonValue, diags: &mut Diagnostics) -> Option<T> {
    match serde_json::from_value(doc.clone()) {
        Ok(model) => Some(model),
        Err(e) => {
            diags.add_error("failed to decode document", e.to_string());
            None
        }
    }
}

pub fn to_doc<T: Serialize>(model: &T, diags: &mut Diagnostics) -> Option<JsonValue> {
    match serde_json::to_value(model) {
        Ok(doc) => Some(doc),
        Err(e) => {
            diags.add_error("failed to encode document", e.to_string());
            None
        }
    }
}

pub fn parse_import_id(id: &str, diags: &mut Diagnostics) -> Option<(String, String)> {
    match id.split_once(':') {
        Some((bp, obj)) if !bp.is_empty() && !obj.is_empty() && !obj.contains(':') => {
            Some((bp.to_string(), obj.to_string()))
        }
        _ => {
            diags.add_error(
                "Invalid import ID",
                format!("expected <blueprint_id>:<object_id>, got {:?}", id),
            );
            None
        }
    }
}

pub fn api_error(diags: &mut Diagnostics, summary: &str, err: &ApstraError) {
    diags.add_error(summary, err.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_resource_known_types() {
        for name in RESOURCE_TYPES {
            let resource = get_resource(name).unwrap();
            assert_eq!(resource.type_name(), *name);
            assert!(!resource.schema().attributes.is_empty());
        }
    }

    #[test]
    fn test_get_resource_unknown() {
        match get_resource("apstra_bogus") {
            Err(ProviderError::UnknownResource(name)) => assert_eq!(name, "apstra_bogus"),
            _ => panic!("expected UnknownResource error"),
        }
    }

    #[test]
    fn test_parse_import_id() {
        let mut diags = Diagnostics::new();
        assert_eq!(
            parse_import_id("bp1:vn1", &mut diags),
            Some(("bp1".to_string(), "vn1".to_string()))
        );
        assert!(!diags.has_error());
        assert!(parse_import_id("vn1", &mut diags).is_none());
        assert!(parse_import_id("a:b:c", &mut diags).is_none());
        assert!(parse_import_id(":b", &mut diags).is_none());
        assert_eq!(diags.errors().count(), 3);
    }

    #[test]
    fn test_default_import_state_is_blueprint_scoped() {
        let resource = get_resource("apstra_datacenter_routing_zone").unwrap();
        let mut diags = Diagnostics::new();
        let state = resource.import_state("bp1:rz1", &mut diags).unwrap();
        assert_eq!(state["blueprint_id"], "bp1");
        assert_eq!(state["id"], "rz1");
        assert!(state["name"].is_null());
    }
}

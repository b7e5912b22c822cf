//! Assigns an interface map and (optionally) a physical device to a switch
//! node in a datacenter blueprint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use super::{Resource, from_doc, parse_import_id, to_doc};
use crate::apstra::client::encode;
use crate::apstra::graph::{PathQuery, qe};
use crate::apstra::{ApstraClient, ApstraError};
use crate::framework::validators::{at_least_one_of, length_at_least};
use crate::framework::value::string_value_or_null;
use crate::framework::{Attribute, Diagnostics, Schema, Value};
use crate::provider::ProviderContext;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceAllocationModel {
    pub blueprint_id: Value<String>,
    pub node_name: Value<String>,
    pub device_key: Value<String>,
    pub interface_map_id: Value<String>,
    pub node_id: Value<String>,
    pub device_profile_node_id: Value<String>,
}

#[derive(Debug, Deserialize)]
struct GraphNode {
    id: String,
    #[serde(default)]
    system_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SystemItem {
    n_system: GraphNode,
}

#[derive(Debug, Deserialize)]
struct DeviceProfileItem {
    n_device_profile: GraphNode,
}

#[derive(Debug, Deserialize)]
struct InterfaceMapItem {
    n_interface_map: GraphNode,
}

#[derive(Debug, Default, Deserialize)]
struct SystemFacts {
    #[serde(default)]
    aos_hcl_model: String,
}

#[derive(Debug, Deserialize)]
struct SystemInfo {
    device_key: String,
    #[serde(default)]
    facts: SystemFacts,
}

#[derive(Debug, Deserialize)]
struct SystemInfoList {
    #[serde(default)]
    items: Vec<SystemInfo>,
}

/// Outcome of a graph lookup that may find the blueprint missing.
enum Lookup<T> {
    Found(T),
    BlueprintGone,
    Failed,
}

fn system_by_label_query(label: &str) -> PathQuery {
    PathQuery::new().node(vec![
        qe("type", "system"),
        qe("label", label),
        qe("name", "n_system"),
    ])
}

fn system_by_id_query(node_id: &str) -> PathQuery {
    PathQuery::new().node(vec![
        qe("type", "system"),
        qe("id", node_id),
        qe("name", "n_system"),
    ])
}

fn device_profile_by_model_query(model: &str) -> PathQuery {
    PathQuery::new().node(vec![
        qe("type", "device_profile"),
        qe("device_profile_id", model),
        qe("name", "n_device_profile"),
    ])
}

fn device_profile_by_interface_map_query(interface_map_id: &str) -> PathQuery {
    PathQuery::new()
        .node(vec![qe("type", "interface_map"), qe("id", interface_map_id)])
        .out(vec![qe("type", "device_profile")])
        .node(vec![qe("type", "device_profile"), qe("name", "n_device_profile")])
}

/// Interface maps linking the system's logical device to the device profile.
/// With `interface_map_id` the path is pinned to that one map.
fn interface_map_candidates_query(
    node_id: &str,
    device_profile_id: &str,
    interface_map_id: Option<&str>,
) -> PathQuery {
    let mut interface_map = vec![qe("type", "interface_map"), qe("name", "n_interface_map")];
    if let Some(id) = interface_map_id {
        interface_map.push(qe("id", id));
    }
    PathQuery::new()
        .node(vec![qe("type", "system"), qe("id", node_id)])
        .out(vec![qe("type", "logical_device")])
        .node(vec![qe("type", "logical_device")])
        .in_(vec![qe("type", "logical_device")])
        .node(interface_map)
        .out(vec![qe("type", "device_profile")])
        .node(vec![qe("type", "device_profile"), qe("id", device_profile_id)])
}

fn current_interface_map_query(node_id: &str) -> PathQuery {
    PathQuery::new()
        .node(vec![qe("type", "system"), qe("id", node_id)])
        .out(vec![qe("type", "interface_map")])
        .node(vec![qe("type", "interface_map"), qe("name", "n_interface_map")])
}

fn current_device_profile_query(node_id: &str) -> PathQuery {
    PathQuery::new()
        .node(vec![qe("type", "system"), qe("id", node_id)])
        .out(vec![qe("type", "interface_map")])
        .node(vec![qe("type", "interface_map")])
        .out(vec![qe("type", "device_profile")])
        .node(vec![qe("type", "device_profile"), qe("name", "n_device_profile")])
}

fn quoted_list(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("{:?}", id))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn query_items<T: serde::de::DeserializeOwned>(
    client: &ApstraClient,
    blueprint_id: &str,
    query: &PathQuery,
    summary: &str,
    diags: &mut Diagnostics,
) -> Lookup<Vec<T>> {
    match client.graph_query::<T>(blueprint_id, query).await {
        Ok(response) => Lookup::Found(response.items),
        Err(e) if e.is_not_found() => Lookup::BlueprintGone,
        Err(e) => {
            diags.add_error(summary, e.to_string());
            Lookup::Failed
        }
    }
}

fn blueprint_gone(blueprint_id: &str, diags: &mut Diagnostics) -> bool {
    diags.add_error(
        "Blueprint not found",
        format!("blueprint {:?} not found", blueprint_id),
    );
    false
}

async fn system_models(client: &ApstraClient) -> Result<Vec<SystemInfo>, ApstraError> {
    let list: SystemInfoList = client.get("/api/systems").await?;
    Ok(list.items)
}

impl DeviceAllocationModel {
    fn blueprint(&self) -> String {
        self.blueprint_id.value_or_default()
    }

    /// Resolves `node_name` to the system node ID. Returns false when the
    /// blueprint is gone or an error was reported.
    async fn populate_node_id(&mut self, client: &ApstraClient, diags: &mut Diagnostics) -> bool {
        let name = self.node_name.value_or_default();
        let query = system_by_label_query(&name);
        let items: Vec<SystemItem> = match query_items(
            client,
            &self.blueprint(),
            &query,
            "error querying graphDB for switch node",
            diags,
        )
        .await
        {
            Lookup::Found(items) => items,
            Lookup::BlueprintGone => return blueprint_gone(&self.blueprint(), diags),
            Lookup::Failed => return false,
        };
        match items.as_slice() {
            [] => {
                diags.add_attribute_error(
                    "node_name",
                    "switch node not found in blueprint",
                    format!("switch node with label {:?} not found in blueprint {:?}", name, self.blueprint()),
                );
                false
            }
            [item] => {
                self.node_id = Value::Value(item.n_system.id.clone());
                true
            }
            _ => {
                diags.add_attribute_error(
                    "node_name",
                    "multiple matches found in blueprint",
                    format!("node label {:?} matches {} system nodes", name, items.len()),
                );
                false
            }
        }
    }

    async fn device_profile_from_interface_map(
        &mut self,
        client: &ApstraClient,
        diags: &mut Diagnostics,
    ) -> bool {
        let query = device_profile_by_interface_map_query(&self.interface_map_id.value_or_default());
        let items: Vec<DeviceProfileItem> = match query_items(
            client,
            &self.blueprint(),
            &query,
            "error querying graphDB for device profile",
            diags,
        )
        .await
        {
            Lookup::Found(items) => items,
            Lookup::BlueprintGone => return blueprint_gone(&self.blueprint(), diags),
            Lookup::Failed => return false,
        };
        match items.as_slice() {
            [item] => {
                self.device_profile_node_id = Value::Value(item.n_device_profile.id.clone());
                true
            }
            [] => {
                diags.add_error(
                    "no results when querying for Device Profile",
                    format!("query string {:?}", query.to_string()),
                );
                false
            }
            _ => {
                diags.add_error(
                    "multiple matches when querying for Device Profile",
                    format!("query string {:?}", query.to_string()),
                );
                false
            }
        }
    }

    async fn device_profile_from_device_key(
        &mut self,
        client: &ApstraClient,
        diags: &mut Diagnostics,
    ) -> bool {
        let systems = match system_models(client).await {
            Ok(systems) => systems,
            Err(e) => {
                diags.add_error("error fetching managed systems", e.to_string());
                return false;
            }
        };
        let device_key = self.device_key.value_or_default();
        let Some(system) = systems.iter().find(|s| s.device_key == device_key) else {
            diags.add_attribute_error(
                "device_key",
                "Device Key not found",
                format!("Device Key {:?} not found", device_key),
            );
            return false;
        };

        let query = device_profile_by_model_query(&system.facts.aos_hcl_model);
        let items: Vec<DeviceProfileItem> = match query_items(
            client,
            &self.blueprint(),
            &query,
            "error querying graphDB for device profile",
            diags,
        )
        .await
        {
            Lookup::Found(items) => items,
            Lookup::BlueprintGone => return blueprint_gone(&self.blueprint(), diags),
            Lookup::Failed => return false,
        };
        if items.len() != 1 {
            diags.add_error(
                format!("expected 1 graphDB query result, got {}", items.len()),
                format!("query: {:?}", query.to_string()),
            );
            return false;
        }
        self.device_profile_node_id = Value::Value(items[0].n_device_profile.id.clone());
        true
    }

    /// Picks the only interface map joining the node to its device profile.
    async fn choose_interface_map(&mut self, client: &ApstraClient, diags: &mut Diagnostics) -> bool {
        let query = interface_map_candidates_query(
            &self.node_id.value_or_default(),
            &self.device_profile_node_id.value_or_default(),
            None,
        );
        let items: Vec<InterfaceMapItem> = match query_items(
            client,
            &self.blueprint(),
            &query,
            "error querying for interface map candidates",
            diags,
        )
        .await
        {
            Lookup::Found(items) => items,
            Lookup::BlueprintGone => return blueprint_gone(&self.blueprint(), diags),
            Lookup::Failed => return false,
        };
        match items.as_slice() {
            [] => {
                diags.add_attribute_error(
                    "interface_map_id",
                    "unable to assign interface_map",
                    format!(
                        "no interface map links node {:?} to device profile {:?}",
                        self.node_name.value_or_default(),
                        self.device_profile_node_id.value_or_default()
                    ),
                );
                false
            }
            [item] => {
                self.interface_map_id = Value::Value(item.n_interface_map.id.clone());
                true
            }
            _ => {
                let candidates: Vec<String> =
                    items.iter().map(|i| i.n_interface_map.id.clone()).collect();
                diags.add_attribute_error(
                    "interface_map_id",
                    "multiple Interface Map candidates",
                    format!(
                        "node {:?} can use interface maps {}; set interface_map_id to choose one",
                        self.node_name.value_or_default(),
                        quoted_list(&candidates)
                    ),
                );
                false
            }
        }
    }

    async fn validate_interface_map(&self, client: &ApstraClient, diags: &mut Diagnostics) -> bool {
        let interface_map_id = self.interface_map_id.value_or_default();
        let query = interface_map_candidates_query(
            &self.node_id.value_or_default(),
            &self.device_profile_node_id.value_or_default(),
            Some(&interface_map_id),
        );
        let items: Vec<InterfaceMapItem> = match query_items(
            client,
            &self.blueprint(),
            &query,
            "error validating interface map",
            diags,
        )
        .await
        {
            Lookup::Found(items) => items,
            Lookup::BlueprintGone => return blueprint_gone(&self.blueprint(), diags),
            Lookup::Failed => return false,
        };
        if items.len() != 1 {
            diags.add_attribute_error(
                "interface_map_id",
                "invalid interface map",
                format!(
                    "interface map {:?} does not link node {:?} to device profile {:?}",
                    interface_map_id,
                    self.node_name.value_or_default(),
                    self.device_profile_node_id.value_or_default()
                ),
            );
            return false;
        }
        true
    }

    /// Fills in node, device profile and interface map from the graph.
    pub async fn populate_from_graph(&mut self, client: &ApstraClient, diags: &mut Diagnostics) -> bool {
        if !self.populate_node_id(client, diags).await {
            return false;
        }

        let found_profile = if self.device_key.is_known() {
            self.device_profile_from_device_key(client, diags).await
        } else if self.interface_map_id.is_known() {
            self.device_profile_from_interface_map(client, diags).await
        } else {
            diags.add_error(
                "cannot determine device profile",
                "one of device_key and interface_map_id must be set",
            );
            false
        };
        if !found_profile {
            return false;
        }

        if !self.interface_map_id.is_known() {
            return self.choose_interface_map(client, diags).await;
        }
        self.validate_interface_map(client, diags).await
    }

    pub async fn set_interface_map(
        &self,
        client: &ApstraClient,
        diags: &mut Diagnostics,
    ) -> Result<(), ApstraError> {
        let path = format!(
            "/api/blueprints/{}/interface-map-assignments",
            encode(&self.blueprint())
        );
        let node_id = self.node_id.value_or_default();
        let body = json!({"assignments": {node_id: self.interface_map_id.as_option()}});
        let result: Result<JsonValue, _> = client.patch(&path, &body).await;
        if let Err(e) = &result {
            diags.add_error("error assigning interface map", e.to_string());
        }
        result.map(|_| ())
    }

    pub async fn set_node_system_id(
        &self,
        client: &ApstraClient,
        diags: &mut Diagnostics,
    ) -> Result<(), ApstraError> {
        let path = format!(
            "/api/blueprints/{}/nodes/{}",
            encode(&self.blueprint()),
            encode(&self.node_id.value_or_default())
        );
        let body = json!({"system_id": self.device_key.as_option()});
        let result: Result<JsonValue, _> = client.patch(&path, &body).await;
        if let Err(e) = &result {
            diags.add_error("error assigning device to switch node", e.to_string());
        }
        result.map(|_| ())
    }

    /// Refreshes `device_key`. Returns false if the node is gone.
    async fn read_system_id(&mut self, client: &ApstraClient, diags: &mut Diagnostics) -> Option<bool> {
        let query = system_by_id_query(&self.node_id.value_or_default());
        let items: Vec<SystemItem> = match query_items(
            client,
            &self.blueprint(),
            &query,
            "error querying graphDB for switch node",
            diags,
        )
        .await
        {
            Lookup::Found(items) => items,
            Lookup::BlueprintGone => return Some(false),
            Lookup::Failed => return None,
        };
        let Some(item) = items.first() else {
            self.node_id = Value::Null;
            self.device_key = Value::Null;
            return Some(false);
        };
        self.device_key = string_value_or_null(item.n_system.system_id.as_deref().unwrap_or_default());
        Some(true)
    }

    async fn read_interface_map(&mut self, client: &ApstraClient, diags: &mut Diagnostics) -> Option<bool> {
        let query = current_interface_map_query(&self.node_id.value_or_default());
        let items: Vec<InterfaceMapItem> = match query_items(
            client,
            &self.blueprint(),
            &query,
            "error querying graphDB for interface map",
            diags,
        )
        .await
        {
            Lookup::Found(items) => items,
            Lookup::BlueprintGone => return Some(false),
            Lookup::Failed => return None,
        };
        match items.as_slice() {
            [] => self.interface_map_id = Value::Null,
            [item] => self.interface_map_id = Value::Value(item.n_interface_map.id.clone()),
            _ => {
                let ids: Vec<String> = items.iter().map(|i| i.n_interface_map.id.clone()).collect();
                diags.add_error(
                    "cannot proceed: graphDB links system node to multiple interface maps",
                    format!("{:?} matches {}", self.node_name.value_or_default(), quoted_list(&ids)),
                );
                return None;
            }
        }
        Some(true)
    }

    async fn read_device_profile(&mut self, client: &ApstraClient, diags: &mut Diagnostics) -> Option<bool> {
        let query = current_device_profile_query(&self.node_id.value_or_default());
        let items: Vec<DeviceProfileItem> = match query_items(
            client,
            &self.blueprint(),
            &query,
            "error querying device profile",
            diags,
        )
        .await
        {
            Lookup::Found(items) => items,
            Lookup::BlueprintGone => return Some(false),
            Lookup::Failed => return None,
        };
        match items.as_slice() {
            [] => self.device_profile_node_id = Value::Null,
            [item] => self.device_profile_node_id = Value::Value(item.n_device_profile.id.clone()),
            _ => {
                let ids: Vec<String> = items.iter().map(|i| i.n_device_profile.id.clone()).collect();
                diags.add_error(
                    "cannot proceed: graphDB links system node to multiple device profiles",
                    format!("{:?} matches {}", self.node_name.value_or_default(), quoted_list(&ids)),
                );
                return None;
            }
        }
        Some(true)
    }

    /// Refreshes everything derived from the node. `Some(false)` means the
    /// node or blueprint no longer exists.
    pub async fn refresh(&mut self, client: &ApstraClient, diags: &mut Diagnostics) -> Option<bool> {
        if !self.read_system_id(client, diags).await? {
            return Some(false);
        }
        if !self.read_interface_map(client, diags).await? {
            return Some(false);
        }
        self.read_device_profile(client, diags).await
    }
}

pub struct DeviceAllocation;

impl DeviceAllocation {
    async fn fetch(
        &self,
        ctx: &ProviderContext,
        mut model: DeviceAllocationModel,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        match model.refresh(&ctx.client, diags).await {
            Some(true) => to_doc(&model, diags),
            _ => None,
        }
    }
}

#[async_trait]
impl Resource for DeviceAllocation {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_device_allocation"
    }

    fn schema(&self) -> Schema {
        Schema::new("Allocates a Managed Device to a switch node within a Datacenter Blueprint.")
            .attribute(
                "blueprint_id",
                Attribute::string()
                    .required()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description("Apstra Blueprint ID."),
            )
            .attribute(
                "node_name",
                Attribute::string()
                    .required()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description("GraphDB node label of the switch, as shown in the web UI."),
            )
            .attribute(
                "device_key",
                Attribute::string()
                    .optional()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .validator(at_least_one_of(&["device_key", "interface_map_id"]))
                    .description("Unique ID (usually the serial number) of a Managed Device."),
            )
            .attribute(
                "interface_map_id",
                Attribute::string()
                    .optional()
                    .computed()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description(
                        "Interface Map ID to assign to the node. Chosen automatically \
                         when exactly one candidate exists.",
                    ),
            )
            .attribute(
                "node_id",
                Attribute::string()
                    .computed()
                    .use_state_for_unknown()
                    .description("GraphDB node ID of the switch."),
            )
            .attribute(
                "device_profile_node_id",
                Attribute::string()
                    .computed()
                    .description("GraphDB node ID of the Device Profile in use by the node."),
            )
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: DeviceAllocationModel = from_doc(plan, diags)?;
        let blueprint_id = model.blueprint();
        if !model.populate_from_graph(&ctx.client, diags).await {
            return None;
        }
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        model.set_interface_map(&ctx.client, diags).await.ok()?;
        if model.device_key.is_known() {
            model.set_node_system_id(&ctx.client, diags).await.ok()?;
        }
        tracing::info!(
            blueprint_id = %blueprint_id,
            node_id = %model.node_id.value_or_default(),
            interface_map_id = %model.interface_map_id.value_or_default(),
            "device allocated"
        );
        to_doc(&model, diags)
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: DeviceAllocationModel = from_doc(state, diags)?;
        if model.node_id.is_null() && !model.populate_node_id(&ctx.client, diags).await {
            return None;
        }
        self.fetch(ctx, model, diags).await
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: DeviceAllocationModel = from_doc(plan, diags)?;
        let prior: DeviceAllocationModel = from_doc(state, diags)?;
        model.node_id = prior.node_id;
        if !model.interface_map_id.is_known() {
            model.interface_map_id = prior.interface_map_id;
        }
        if model.device_key != prior.device_key {
            let blueprint_id = model.blueprint();
            if !ctx.lock_blueprint(&blueprint_id, diags).await {
                return None;
            }
            model.set_node_system_id(&ctx.client, diags).await.ok()?;
        }
        self.fetch(ctx, model, diags).await
    }

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics) {
        let Some(mut model) = from_doc::<DeviceAllocationModel>(state, diags) else {
            return;
        };
        let blueprint_id = model.blueprint();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return;
        }

        model.interface_map_id = Value::Null;
        let mut step = Diagnostics::new();
        match model.set_interface_map(&ctx.client, &mut step).await {
            Err(e) if e.is_not_found() => return,
            Err(_) => {
                diags.append(step);
                return;
            }
            Ok(()) => {}
        }

        model.device_key = Value::Null;
        let mut step = Diagnostics::new();
        match model.set_node_system_id(&ctx.client, &mut step).await {
            Err(e) if e.is_not_found() => {}
            Err(_) => diags.append(step),
            Ok(()) => {
                tracing::info!(
                    blueprint_id = %blueprint_id,
                    node_id = %model.node_id.value_or_default(),
                    "device allocation removed"
                )
            }
        }
    }

    /// Import IDs have the form `<blueprint_id>:<node_name>`.
    fn import_state(&self, id: &str, diags: &mut Diagnostics) -> Option<JsonValue> {
        let (blueprint_id, node_name) = parse_import_id(id, diags)?;
        let mut state = self.schema().null_state();
        state["blueprint_id"] = JsonValue::String(blueprint_id);
        state["node_name"] = JsonValue::String(node_name);
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_by_label_query() {
        assert_eq!(
            system_by_label_query("leaf1").to_string(),
            "node(type='system', label='leaf1', name='n_system')"
        );
    }

    #[test]
    fn test_interface_map_candidates_query() {
        assert_eq!(
            interface_map_candidates_query("sys1", "dp1", None).to_string(),
            "node(type='system', id='sys1').out(type='logical_device').node(type='logical_device')\
             .in_(type='logical_device').node(type='interface_map', name='n_interface_map')\
             .out(type='device_profile').node(type='device_profile', id='dp1')"
        );
        assert!(
            interface_map_candidates_query("sys1", "dp1", Some("im1"))
                .to_string()
                .contains("node(type='interface_map', name='n_interface_map', id='im1')")
        );
    }

    #[test]
    fn test_current_device_profile_query() {
        assert_eq!(
            current_device_profile_query("sys1").to_string(),
            "node(type='system', id='sys1').out(type='interface_map').node(type='interface_map')\
             .out(type='device_profile').node(type='device_profile', name='n_device_profile')"
        );
    }

    #[test]
    fn test_validate_requires_key_or_interface_map() {
        let mut diags = Diagnostics::new();
        DeviceAllocation
            .schema()
            .validate(&serde_json::json!({"blueprint_id": "bp", "node_name": "leaf1"}), &mut diags);
        assert!(diags.has_error());

        let mut diags = Diagnostics::new();
        DeviceAllocation.schema().validate(
            &serde_json::json!({"blueprint_id": "bp", "node_name": "leaf1", "interface_map_id": "im"}),
            &mut diags,
        );
        assert!(!diags.has_error());
    }

    #[test]
    fn test_import_state_uses_node_name() {
        let mut diags = Diagnostics::new();
        let state = DeviceAllocation.import_state("bp1:leaf1", &mut diags).unwrap();
        assert_eq!(state["blueprint_id"], "bp1");
        assert_eq!(state["node_name"], "leaf1");
        assert!(state["node_id"].is_null());
    }

    #[test]
    fn test_quoted_list() {
        assert_eq!(
            quoted_list(&["a".to_string(), "b".to_string()]),
            r#""a", "b""#
        );
    }
}

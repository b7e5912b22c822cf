use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use super::{ObjectId, Resource, api_error, from_doc, to_doc};
use crate::apstra::client::encode;
use crate::apstra::graph::{MatchQuery, PathQuery, qe};
use crate::apstra::{ApstraClient, ApstraError};
use crate::framework::validators::{length_at_least, one_of};
use crate::framework::{Attribute, Diagnostics, Schema, Value};
use crate::provider::ProviderContext;
use crate::utils::rosetta::FABRIC_ADDRESSING;

const DESIGN_TWO_STAGE_L3CLOS: &str = "two_stage_l3clos";
const INIT_TYPE_TEMPLATE_REFERENCE: &str = "template_reference";

/// Status fields of `/api/blueprints/{id}`. Counts default to zero.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BlueprintStatus {
    pub id: String,
    pub label: String,
    pub status: String,
    pub version: i64,
    pub superspine_count: i64,
    pub spine_count: i64,
    pub leaf_count: i64,
    pub access_count: i64,
    pub generic_count: i64,
    pub external_router_count: i64,
    pub has_uncommitted_changes: bool,
    pub build_errors_count: i64,
    pub build_warnings_count: i64,
}

pub async fn blueprint_status(
    client: &ApstraClient,
    blueprint_id: &str,
) -> Result<BlueprintStatus, ApstraError> {
    client
        .get(&format!("/api/blueprints/{}", encode(blueprint_id)))
        .await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueprintModel {
    pub id: Value<String>,
    pub name: Value<String>,
    pub template_id: Value<String>,
    pub fabric_addressing: Value<String>,
    pub status: Value<String>,
    pub superspine_count: Value<i64>,
    pub spine_count: Value<i64>,
    pub leaf_switch_count: Value<i64>,
    pub access_switch_count: Value<i64>,
    pub generic_system_count: Value<i64>,
    pub external_router_count: Value<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateBlueprintRequest {
    pub label: String,
    pub design: String,
    pub init_type: String,
    pub template_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fabric_addressing_policy: Option<JsonValue>,
}

impl BlueprintModel {
    pub fn request(&self) -> CreateBlueprintRequest {
        let fabric_addressing_policy = self.fabric_addressing.as_option().map(|fa| {
            json!({
                "spine_leaf_links": fa,
                "spine_superspine_links": fa,
            })
        });
        CreateBlueprintRequest {
            label: self.name.value_or_default(),
            design: DESIGN_TWO_STAGE_L3CLOS.to_string(),
            init_type: INIT_TYPE_TEMPLATE_REFERENCE.to_string(),
            template_id: self.template_id.value_or_default(),
            fabric_addressing_policy,
        }
    }

    /// `template_id` and `fabric_addressing` are not reported back by the
    /// API, so they keep whatever the state already held.
    pub fn load_api_data(&mut self, status: &BlueprintStatus) {
        self.id = Value::Value(status.id.clone());
        self.name = Value::Value(status.label.clone());
        self.status = Value::Value(status.status.clone());
        self.superspine_count = Value::Value(status.superspine_count);
        self.spine_count = Value::Value(status.spine_count);
        self.leaf_switch_count = Value::Value(status.leaf_count);
        self.access_switch_count = Value::Value(status.access_count);
        self.generic_system_count = Value::Value(status.generic_count);
        self.external_router_count = Value::Value(status.external_router_count);
    }
}

#[derive(Debug, Deserialize)]
struct MetadataItem {
    n_metadata: MetadataNode,
}

#[derive(Debug, Deserialize)]
struct MetadataNode {
    id: String,
}

/// Renames a blueprint by patching the label of its metadata node.
pub async fn set_name(
    client: &ApstraClient,
    blueprint_id: &str,
    name: &str,
    diags: &mut Diagnostics,
) {
    let query = MatchQuery::new().match_(
        PathQuery::new().node(vec![qe("type", "metadata"), qe("name", "n_metadata")]),
    );
    let result = match client.graph_query::<MetadataItem>(blueprint_id, &query).await {
        Ok(result) => result,
        Err(e) => {
            api_error(diags, "error querying Blueprint metadata node", &e);
            return;
        }
    };
    if result.items.len() != 1 {
        diags.add_error(
            "wrong number of metadata nodes",
            format!("expecting 1 got {} nodes", result.items.len()),
        );
        return;
    }
    let node_id = &result.items[0].n_metadata.id;
    let path = format!(
        "/api/blueprints/{}/nodes/{}",
        encode(blueprint_id),
        encode(node_id)
    );
    let patched: Result<JsonValue, _> = client.patch(&path, &json!({"label": name})).await;
    if let Err(e) = patched {
        api_error(
            diags,
            &format!("error renaming Blueprint {:?}", blueprint_id),
            &e,
        );
    }
}

pub struct DatacenterBlueprint;

fn count(description: &str) -> Attribute {
    Attribute::int64().computed().description(description)
}

impl DatacenterBlueprint {
    async fn refresh(
        &self,
        client: &ApstraClient,
        mut model: BlueprintModel,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let id = model.id.value_or_default();
        match blueprint_status(client, &id).await {
            Ok(status) => {
                model.load_api_data(&status);
                to_doc(&model, diags)
            }
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                api_error(diags, &format!("error reading Blueprint {:?}", id), &e);
                None
            }
        }
    }
}

#[async_trait]
impl Resource for DatacenterBlueprint {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_blueprint"
    }

    fn schema(&self) -> Schema {
        Schema::new("Instantiates a Datacenter Blueprint from a Template.")
            .attribute(
                "id",
                Attribute::string()
                    .computed()
                    .use_state_for_unknown()
                    .description("Blueprint ID assigned by Apstra."),
            )
            .attribute(
                "name",
                Attribute::string()
                    .required()
                    .validator(length_at_least(1))
                    .description("Blueprint name."),
            )
            .attribute(
                "template_id",
                Attribute::string()
                    .required()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description("ID of Template used to instantiate the Blueprint."),
            )
            .attribute(
                "fabric_addressing",
                Attribute::string()
                    .optional()
                    .requires_replace()
                    .validator(one_of(FABRIC_ADDRESSING))
                    .description("Addressing scheme for both spine/leaf and spine/superspine links."),
            )
            .attribute(
                "status",
                Attribute::string()
                    .computed()
                    .description("Deployment status of the Blueprint"),
            )
            .attribute("superspine_count", count("Superspine Switch Count"))
            .attribute("spine_count", count("Spine Switch Count"))
            .attribute("leaf_switch_count", count("Leaf Switch Count"))
            .attribute("access_switch_count", count("Access Switch Count"))
            .attribute("generic_system_count", count("Generic System Count"))
            .attribute("external_router_count", count("External Router Count"))
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: BlueprintModel = from_doc(plan, diags)?;
        let created: ObjectId = match ctx.client.post("/api/blueprints", &model.request()).await
        {
            Ok(created) => created,
            Err(e) => {
                api_error(diags, "error creating Blueprint", &e);
                return None;
            }
        };
        tracing::info!(blueprint_id = %created.id, "blueprint created");
        model.id = Value::Value(created.id);
        let state = self.refresh(&ctx.client, model, diags).await;
        if state.is_none() && !diags.has_error() {
            diags.add_error(
                "error reading new Blueprint",
                "blueprint disappeared immediately after creation",
            );
        }
        state
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let model: BlueprintModel = from_doc(state, diags)?;
        self.refresh(&ctx.client, model, diags).await
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: BlueprintModel = from_doc(plan, diags)?;
        let prior: BlueprintModel = from_doc(state, diags)?;
        let id = prior.id.value_or_default();
        model.id = Value::Value(id.clone());

        if model.name != prior.name {
            if !ctx.lock_blueprint(&id, diags).await {
                return None;
            }
            set_name(&ctx.client, &id, &model.name.value_or_default(), diags).await;
            if diags.has_error() {
                return None;
            }
        }
        self.refresh(&ctx.client, model, diags).await
    }

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics) {
        let Some(model) = from_doc::<BlueprintModel>(state, diags) else {
            return;
        };
        let id = model.id.value_or_default();
        match ctx
            .client
            .delete(&format!("/api/blueprints/{}", encode(&id)))
            .await
        {
            Ok(()) => tracing::info!(blueprint_id = %id, "blueprint deleted"),
            Err(e) if e.is_not_found() => {}
            Err(e) => api_error(diags, &format!("error deleting Blueprint {:?}", id), &e),
        }
    }

    fn import_state(&self, id: &str, _diags: &mut Diagnostics) -> Option<JsonValue> {
        let mut state = self.schema().null_state();
        state["id"] = JsonValue::String(id.to_string());
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_fabric_addressing() {
        let model: BlueprintModel =
            serde_json::from_value(json!({"name": "dc1", "template_id": "L2_Virtual"})).unwrap();
        assert_eq!(
            serde_json::to_value(model.request()).unwrap(),
            json!({
                "label": "dc1",
                "design": "two_stage_l3clos",
                "init_type": "template_reference",
                "template_id": "L2_Virtual",
            })
        );
    }

    #[test]
    fn test_request_with_fabric_addressing() {
        let model: BlueprintModel = serde_json::from_value(json!({
            "name": "dc1",
            "template_id": "t",
            "fabric_addressing": "ipv4_ipv6",
        }))
        .unwrap();
        let body = serde_json::to_value(model.request()).unwrap();
        assert_eq!(
            body["fabric_addressing_policy"]["spine_leaf_links"],
            "ipv4_ipv6"
        );
    }

    #[test]
    fn test_load_keeps_template_id() {
        let mut model = BlueprintModel {
            template_id: Value::Value("t".to_string()),
            ..Default::default()
        };
        let status: BlueprintStatus = serde_json::from_value(json!({
            "id": "bp1",
            "label": "dc1",
            "status": "created",
            "leaf_count": 4,
        }))
        .unwrap();
        model.load_api_data(&status);
        assert_eq!(model.template_id, Value::Value("t".to_string()));
        assert_eq!(model.leaf_switch_count, Value::Value(4));
        assert_eq!(model.spine_count, Value::Value(0));
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::virtual_network::{VNI_MAX, VNI_MIN};
use super::{ObjectId, Resource, api_error, from_doc, to_doc};
use crate::apstra::client::encode;
use crate::framework::validators::{between, length_at_least, length_between, regex_matches};
use crate::framework::value::{int_value_or_null, string_value_or_null};
use crate::framework::{Attribute, Diagnostics, Schema, Value};
use crate::provider::ProviderContext;

const SZ_TYPE_EVPN: &str = "evpn";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingZoneModel {
    pub id: Value<String>,
    pub blueprint_id: Value<String>,
    pub name: Value<String>,
    pub vlan_id: Value<i64>,
    pub vni: Value<i64>,
    pub routing_policy_id: Value<String>,
}

/// `/api/blueprints/{bp}/security-zones` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityZoneData {
    pub sz_type: String,
    pub vrf_name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vni_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_policy_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecurityZoneObject {
    id: String,
    #[serde(flatten)]
    data: SecurityZoneData,
}

impl RoutingZoneModel {
    pub fn request(&self) -> SecurityZoneData {
        let name = self.name.value_or_default();
        SecurityZoneData {
            sz_type: SZ_TYPE_EVPN.to_string(),
            vrf_name: name.clone(),
            label: name,
            vlan_id: self.vlan_id.as_option().copied(),
            vni_id: self.vni.as_option().copied(),
            routing_policy_id: self.routing_policy_id.as_option().cloned(),
        }
    }

    pub fn load_api_data(&mut self, data: &SecurityZoneData) {
        self.name = Value::Value(data.vrf_name.clone());
        self.vlan_id = int_value_or_null(data.vlan_id);
        self.vni = int_value_or_null(data.vni_id);
        self.routing_policy_id =
            string_value_or_null(data.routing_policy_id.as_deref().unwrap_or_default());
    }
}

fn zones_path(blueprint_id: &str) -> String {
    format!("/api/blueprints/{}/security-zones", encode(blueprint_id))
}

fn zone_path(blueprint_id: &str, id: &str) -> String {
    format!("{}/{}", zones_path(blueprint_id), encode(id))
}

pub struct RoutingZone;

impl RoutingZone {
    async fn fetch(
        &self,
        ctx: &ProviderContext,
        mut model: RoutingZoneModel,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        let zone: SecurityZoneObject = match ctx.client.get(&zone_path(&blueprint_id, &id)).await {
            Ok(zone) => zone,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                api_error(diags, &format!("error reading routing zone {:?}", id), &e);
                return None;
            }
        };
        model.id = Value::Value(zone.id);
        model.load_api_data(&zone.data);
        to_doc(&model, diags)
    }
}

#[async_trait]
impl Resource for RoutingZone {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_routing_zone"
    }

    fn schema(&self) -> Schema {
        Schema::new("Creates a Routing Zone within a Datacenter Blueprint.")
            .attribute(
                "id",
                Attribute::string()
                    .computed()
                    .use_state_for_unknown()
                    .description("Apstra graph node ID."),
            )
            .attribute(
                "blueprint_id",
                Attribute::string()
                    .required()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description("Apstra Blueprint ID."),
            )
            .attribute(
                "name",
                Attribute::string()
                    .required()
                    .validator(regex_matches(
                        "^[A-Za-z0-9_-]+$",
                        "only underscore, dash and alphanumeric characters allowed.",
                    ))
                    .validator(length_between(1, 15))
                    .description("VRF name displayed in the Apstra web UI."),
            )
            .attribute(
                "vlan_id",
                Attribute::int64()
                    .optional()
                    .computed()
                    .validator(between(2, 4094))
                    .description(
                        "Used for VLAN tagged Layer 3 links on external connections. \
                         Assigned from a static pool when omitted.",
                    ),
            )
            .attribute(
                "vni",
                Attribute::int64()
                    .optional()
                    .validator(between(VNI_MIN, VNI_MAX))
                    .description("VxLAN VNI associated with the routing zone."),
            )
            .attribute(
                "routing_policy_id",
                Attribute::string()
                    .optional()
                    .computed()
                    .validator(length_at_least(1))
                    .description("Non-default routing policy for an EVPN blueprint."),
            )
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: RoutingZoneModel = from_doc(plan, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let created: ObjectId = match ctx
            .client
            .post(&zones_path(&blueprint_id), &model.request())
            .await
        {
            Ok(created) => created,
            Err(e) => {
                api_error(diags, "error creating routing zone", &e);
                return None;
            }
        };
        tracing::info!(blueprint_id = %blueprint_id, routing_zone_id = %created.id, "routing zone created");
        model.id = Value::Value(created.id);
        let state = self.fetch(ctx, model, diags).await;
        if state.is_none() && !diags.has_error() {
            diags.add_error(
                "error fetching just-created routing zone",
                "routing zone not found after creation",
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
        let model: RoutingZoneModel = from_doc(state, diags)?;
        self.fetch(ctx, model, diags).await
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: RoutingZoneModel = from_doc(plan, diags)?;
        let prior: RoutingZoneModel = from_doc(state, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = prior.id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let result: Result<JsonValue, _> = ctx
            .client
            .put(&zone_path(&blueprint_id, &id), &model.request())
            .await;
        if let Err(e) = result {
            api_error(diags, &format!("error updating routing zone {:?}", id), &e);
            return None;
        }
        tracing::info!(blueprint_id = %blueprint_id, routing_zone_id = %id, "routing zone updated");
        model.id = Value::Value(id);
        self.fetch(ctx, model, diags).await
    }

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics) {
        let Some(model) = from_doc::<RoutingZoneModel>(state, diags) else {
            return;
        };
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return;
        }
        match ctx.client.delete(&zone_path(&blueprint_id, &id)).await {
            Ok(()) => {
                tracing::info!(blueprint_id = %blueprint_id, routing_zone_id = %id, "routing zone deleted")
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => api_error(diags, &format!("error deleting routing zone {:?}", id), &e),
        }
    }
}

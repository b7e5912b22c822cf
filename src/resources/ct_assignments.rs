//! Assigns one connectivity template to a set of application points
//! (interfaces or systems).

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{Resource, from_doc, parse_import_id, to_doc};
use crate::apstra::client::{encode, status_error};
use crate::apstra::graph::{MatchQuery, PathQuery, is_in, qe};
use crate::apstra::{ApstraClient, ApstraError};
use crate::framework::validators::{Validator, length_at_least, value_strings_are};
use crate::framework::value::set_value_or_null;
use crate::framework::{Attribute, Diagnostics, ElementType, Schema, Value};
use crate::provider::ProviderContext;

/// Application point ID → connectivity template ID → assigned.
pub type AssignmentRequest = BTreeMap<String, BTreeMap<String, bool>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtAssignmentsModel {
    pub blueprint_id: Value<String>,
    pub connectivity_template_id: Value<String>,
    pub application_point_ids: Value<BTreeSet<String>>,
    pub fetch_ip_link_ids: Value<bool>,
    pub ip_links_ids: Value<BTreeMap<String, BTreeMap<String, String>>>,
}

/// The `errors` object of a rejected batch apply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CtAssignmentFailedDetail {
    #[serde(default)]
    pub invalid_application_point_ids: Vec<String>,
    #[serde(default)]
    pub invalid_connectivity_template_ids: Vec<String>,
}

impl CtAssignmentFailedDetail {
    fn is_empty(&self) -> bool {
        self.invalid_application_point_ids.is_empty()
            && self.invalid_connectivity_template_ids.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct PolicyUsage<'a> {
    policy: &'a str,
    used: bool,
}

#[derive(Debug, Serialize)]
struct ApplicationPoint<'a> {
    id: &'a str,
    policies: Vec<PolicyUsage<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchApply<'a> {
    application_points: Vec<ApplicationPoint<'a>>,
}

impl<'a> BatchApply<'a> {
    fn new(request: &'a AssignmentRequest) -> Self {
        let application_points = request
            .iter()
            .map(|(ap_id, policies)| ApplicationPoint {
                id: ap_id,
                policies: policies
                    .iter()
                    .map(|(ct_id, used)| PolicyUsage {
                        policy: ct_id,
                        used: *used,
                    })
                    .collect(),
            })
            .collect();
        Self { application_points }
    }
}

#[derive(Debug, Deserialize)]
struct NodeId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApplicationPointItem {
    n_ap: NodeId,
}

#[derive(Debug, Deserialize)]
struct IpLinkPrimitive {
    /// JSON document embedded as a string.
    attributes: String,
}

#[derive(Debug, Default, Deserialize)]
struct IpLinkAttributes {
    #[serde(default)]
    vlan_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Subinterface {
    #[serde(default)]
    vlan_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct IpLinkItem {
    n_iplp: IpLinkPrimitive,
    n_ap: NodeId,
    n_si: Subinterface,
    n_ll: NodeId,
}

/// Drops entries the API rejected and that only ask for removal: `false`
/// entries on invalid application points, `false` entries for invalid
/// templates, then application points left with nothing to do. Returns the
/// number of entries and application points removed.
pub fn trim_request_based_on_error(
    request: &mut AssignmentRequest,
    detail: &CtAssignmentFailedDetail,
) -> usize {
    let mut removed = 0;

    for ap_id in &detail.invalid_application_point_ids {
        if let Some(policies) = request.get_mut(ap_id) {
            let before = policies.len();
            policies.retain(|_, used| *used);
            removed += before - policies.len();
        }
    }

    for ct_id in &detail.invalid_connectivity_template_ids {
        for policies in request.values_mut() {
            if policies.get(ct_id) == Some(&false) {
                policies.remove(ct_id);
                removed += 1;
            }
        }
    }

    let before = request.len();
    request.retain(|_, policies| !policies.is_empty());
    removed + before - request.len()
}

fn batch_apply_path(blueprint_id: &str) -> String {
    format!("/api/blueprints/{}/obj-policy-batch-apply", encode(blueprint_id))
}

async fn post_assignments(
    client: &ApstraClient,
    blueprint_id: &str,
    request: &AssignmentRequest,
) -> Result<(), ApstraError> {
    let path = batch_apply_path(blueprint_id);
    let (status, text) = client
        .send_raw(Method::POST, &path, Some(&BatchApply::new(request)))
        .await?;
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        let errors = serde_json::from_str::<JsonValue>(&text)
            .ok()
            .and_then(|body| body.get("errors").cloned());
        if let Some(errors) = errors {
            let detail: CtAssignmentFailedDetail =
                serde_json::from_value(errors.clone()).unwrap_or_default();
            if !detail.is_empty() {
                return Err(ApstraError::CtAssignmentFailed { detail: errors });
            }
        }
    }
    Err(status_error(status, &path, &text))
}

/// Applies `request`. When the API rejects IDs that were only being removed
/// the request is trimmed and retried once.
pub async fn set_application_points_connectivity_templates(
    client: &ApstraClient,
    blueprint_id: &str,
    mut request: AssignmentRequest,
) -> Result<(), ApstraError> {
    if request.is_empty() {
        return Ok(());
    }
    let err = match post_assignments(client, blueprint_id, &request).await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    let ApstraError::CtAssignmentFailed { detail } = &err else {
        return Err(err);
    };
    let detail: CtAssignmentFailedDetail =
        serde_json::from_value(detail.clone()).unwrap_or_default();
    let removed = trim_request_based_on_error(&mut request, &detail);
    if removed == 0 {
        return Err(err);
    }
    tracing::warn!(
        blueprint_id = %blueprint_id,
        removed,
        "retrying connectivity template assignment without invalid IDs"
    );
    if request.is_empty() {
        return Ok(());
    }
    post_assignments(client, blueprint_id, &request).await
}

fn application_points_query(ct_id: &str) -> PathQuery {
    PathQuery::new()
        .node(vec![qe("type", "ep_endpoint_policy"), qe("id", ct_id)])
        .in_(vec![qe("type", "ep_nested")])
        .node(vec![qe("type", "ep_application_instance")])
        .out(vec![qe("type", "ep_affected_by")])
        .node(vec![qe("type", "ep_group")])
        .in_(vec![qe("type", "ep_member_of")])
        .node(vec![qe("name", "n_ap")])
}

fn ip_link_query(ct_id: &str, ap_ids: &[String]) -> MatchQuery {
    let ct = PathQuery::new().node(vec![
        qe("type", "ep_endpoint_policy"),
        qe("id", ct_id),
        qe("name", "n_ct"),
    ]);
    let iplp = PathQuery::new()
        .node(vec![qe("name", "n_ct")])
        .out(vec![qe("type", "ep_subpolicy")])
        .node(vec![qe("type", "ep_endpoint_policy")])
        .out(vec![qe("type", "ep_first_subpolicy")])
        .node(vec![
            qe("type", "ep_endpoint_policy"),
            qe("policy_type_name", "AttachLogicalLink"),
            qe("name", "n_iplp"),
        ]);
    let ll = PathQuery::new()
        .node(vec![qe("name", "n_ct")])
        .in_(vec![qe("type", "ep_nested")])
        .node(vec![qe("type", "ep_application_instance")])
        .out(vec![qe("type", "ep_affected_by")])
        .node(vec![qe("type", "ep_group")])
        .in_(vec![qe("type", "ep_member_of")])
        .node(vec![qe("type", "interface"), qe("id", is_in(ap_ids)), qe("name", "n_ap")])
        .out(vec![qe("type", "composed_of")])
        .node(vec![
            qe("type", "interface"),
            qe("if_type", "subinterface"),
            qe("name", "n_si"),
        ])
        .out(vec![qe("type", "link")])
        .node(vec![
            qe("type", "link"),
            qe("link_type", "logical_link"),
            qe("name", "n_ll"),
        ]);
    MatchQuery::new().match_(ct).match_(iplp).match_(ll)
}

/// Keys logical links by application point and VLAN. Untagged links use
/// VLAN `0`; a tagged primitive never matches an untagged subinterface.
fn ip_link_ids_from_items(
    items: &[IpLinkItem],
    diags: &mut Diagnostics,
) -> Option<BTreeMap<String, BTreeMap<String, String>>> {
    let mut result: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for item in items {
        let attributes: IpLinkAttributes = match serde_json::from_str(&item.n_iplp.attributes) {
            Ok(attributes) => attributes,
            Err(e) => {
                diags.add_error(
                    format!("failed to unmarshal IP Link attributes - '{}'", item.n_iplp.attributes),
                    e.to_string(),
                );
                return None;
            }
        };
        let vlan = match (attributes.vlan_id, item.n_si.vlan_id) {
            (None, None) => 0,
            (Some(a), Some(b)) if a == b => a,
            _ => continue,
        };
        result
            .entry(item.n_ap.id.clone())
            .or_default()
            .insert(vlan.to_string(), item.n_ll.id.clone());
    }
    Some(result)
}

impl CtAssignmentsModel {
    /// Changes needed to move from `state` to this model.
    pub fn request(&self, state: Option<&CtAssignmentsModel>) -> AssignmentRequest {
        let ct_id = self.connectivity_template_id.value_or_default();
        let desired = self.application_point_ids.value_or_default();
        let current = state
            .map(|s| s.application_point_ids.value_or_default())
            .unwrap_or_default();

        let mut result = AssignmentRequest::new();
        for ap_id in desired.difference(&current) {
            result.insert(ap_id.clone(), BTreeMap::from([(ct_id.clone(), true)]));
        }
        for ap_id in current.difference(&desired) {
            result.insert(ap_id.clone(), BTreeMap::from([(ct_id.clone(), false)]));
        }
        result
    }

    pub async fn get_ip_link_ids(&mut self, client: &ApstraClient, diags: &mut Diagnostics) {
        self.ip_links_ids = Value::Null;
        if !self.fetch_ip_link_ids.value_or_default() {
            return;
        }

        let ap_ids: Vec<String> = self
            .application_point_ids
            .value_or_default()
            .into_iter()
            .collect();
        let query = ip_link_query(&self.connectivity_template_id.value_or_default(), &ap_ids);
        let items = match client
            .graph_query::<IpLinkItem>(&self.blueprint_id.value_or_default(), &query)
            .await
        {
            Ok(response) => response.items,
            Err(e) => {
                diags.add_error(format!("failed to run graph query - {:?}", query.to_string()), e.to_string());
                return;
            }
        };
        if let Some(ids) = ip_link_ids_from_items(&items, diags) {
            self.ip_links_ids = Value::Value(ids);
        }
    }
}

pub struct CtAssignments;

impl CtAssignments {
    async fn apply(
        &self,
        ctx: &ProviderContext,
        mut model: CtAssignmentsModel,
        state: Option<&CtAssignmentsModel>,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let blueprint_id = model.blueprint_id.value_or_default();
        let ct_id = model.connectivity_template_id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let request = model.request(state);
        if let Err(e) =
            set_application_points_connectivity_templates(&ctx.client, &blueprint_id, request).await
        {
            diags.add_error(
                format!(
                    "failed while assigning Connectivity Template {:?} to Application Points",
                    ct_id
                ),
                e.to_string(),
            );
            return None;
        }
        tracing::info!(
            blueprint_id = %blueprint_id,
            connectivity_template_id = %ct_id,
            application_points = model.application_point_ids.value_or_default().len(),
            "connectivity template assigned"
        );
        model.get_ip_link_ids(&ctx.client, diags).await;
        to_doc(&model, diags)
    }
}

#[async_trait]
impl Resource for CtAssignments {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_connectivity_template_assignments"
    }

    fn schema(&self) -> Schema {
        Schema::new(
            "Assigns a Connectivity Template to a set of Application Points within a \
             Datacenter Blueprint.",
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
            "connectivity_template_id",
            Attribute::string()
                .required()
                .requires_replace()
                .validator(length_at_least(1))
                .description(
                    "Connectivity Template ID which should be applied to the Application Points.",
                ),
        )
        .attribute(
            "application_point_ids",
            Attribute::set(ElementType::String)
                .required()
                .validator(Validator::SizeAtLeast(1))
                .validator(value_strings_are(length_at_least(1)))
                .description(
                    "Set of Apstra node IDs of the Interfaces or Systems where the \
                     Connectivity Template should be applied.",
                ),
        )
        .attribute(
            "fetch_ip_link_ids",
            Attribute::bool()
                .optional()
                .description("When `true`, the read-only `ip_links_ids` attribute is populated."),
        )
        .attribute(
            "ip_links_ids",
            Attribute::map(ElementType::StringMap)
                .computed()
                .description(
                    "Logical links created by IP Link primitives, keyed by Application Point \
                     ID and then by VLAN. Untagged links use key `0`.",
                ),
        )
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let model: CtAssignmentsModel = from_doc(plan, diags)?;
        self.apply(ctx, model, None, diags).await
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: CtAssignmentsModel = from_doc(state, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        let ct_id = model.connectivity_template_id.value_or_default();
        let items = match ctx
            .client
            .graph_query::<ApplicationPointItem>(&blueprint_id, &application_points_query(&ct_id))
            .await
        {
            Ok(response) => response.items,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                diags.add_error(
                    format!(
                        "failed while reading Application Point assignments for Connectivity Template {:?}",
                        ct_id
                    ),
                    e.to_string(),
                );
                return None;
            }
        };
        model.application_point_ids = set_value_or_null(items.into_iter().map(|i| i.n_ap.id));
        if model.application_point_ids.is_null() {
            return None;
        }
        model.get_ip_link_ids(&ctx.client, diags).await;
        to_doc(&model, diags)
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let model: CtAssignmentsModel = from_doc(plan, diags)?;
        let prior: CtAssignmentsModel = from_doc(state, diags)?;
        self.apply(ctx, model, Some(&prior), diags).await
    }

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics) {
        let Some(model) = from_doc::<CtAssignmentsModel>(state, diags) else {
            return;
        };
        let blueprint_id = model.blueprint_id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return;
        }
        let cleared = CtAssignmentsModel {
            application_point_ids: Value::Null,
            ..model.clone()
        };
        let request = cleared.request(Some(&model));
        match set_application_points_connectivity_templates(&ctx.client, &blueprint_id, request).await
        {
            Ok(()) => tracing::info!(
                blueprint_id = %blueprint_id,
                connectivity_template_id = %model.connectivity_template_id.value_or_default(),
                "connectivity template unassigned"
            ),
            Err(e) if e.is_not_found() => {}
            Err(e) => diags.add_error(
                "failed clearing connectivity template from application points",
                e.to_string(),
            ),
        }
    }

    /// Import IDs have the form `<blueprint_id>:<connectivity_template_id>`.
    fn import_state(&self, id: &str, diags: &mut Diagnostics) -> Option<JsonValue> {
        let (blueprint_id, ct_id) = parse_import_id(id, diags)?;
        let mut state = self.schema().null_state();
        state["blueprint_id"] = JsonValue::String(blueprint_id);
        state["connectivity_template_id"] = JsonValue::String(ct_id);
        Some(state)
    }
}

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use super::{ObjectId, Resource, api_error, from_doc, to_doc};
use crate::apstra::client::encode;
use crate::apstra::{ApstraClient, ApstraError};
use crate::framework::validators::{
    Validator, between, length_at_least, length_between, one_of, parse_cidr, regex_matches,
    value_strings_are,
};
use crate::framework::value::{int_value_or_null, list_value_or_null, string_value_or_null};
use crate::framework::{Attribute, Diagnostics, ElementType, NestedObject, Schema, Value};
use crate::provider::ProviderContext;
use crate::utils::rosetta::{IMPORT_POLICIES, PREFIX_FILTER_ACTIONS};

const POLICY_TYPE_USER: &str = "user";
const DEFAULT_IMPORT_POLICY: &str = "default_only";
const DEFAULT_PREFIX_FILTER_ACTION: &str = "permit";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportPolicy {
    pub spine_leaf_links: Value<bool>,
    pub spine_superspine_links: Value<bool>,
    pub l3_edge_server_links: Value<bool>,
    pub l2_edge_subnet_links: Value<bool>,
    pub loopbacks: Value<bool>,
    pub static_routes: Value<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiExportPolicy {
    #[serde(default)]
    pub spine_leaf_links: bool,
    #[serde(default)]
    pub spine_superspine_links: bool,
    #[serde(default)]
    pub l3edge_server_links: bool,
    #[serde(default)]
    pub l2edge_subnets: bool,
    #[serde(default)]
    pub loopbacks: bool,
    #[serde(default)]
    pub static_routes: bool,
}

impl ExportPolicy {
    fn default_document() -> JsonValue {
        json!({
            "spine_leaf_links": false,
            "spine_superspine_links": false,
            "l3_edge_server_links": true,
            "l2_edge_subnet_links": true,
            "loopbacks": true,
            "static_routes": false,
        })
    }

    /// Unset flags are sent as false.
    pub fn request(&self) -> ApiExportPolicy {
        ApiExportPolicy {
            spine_leaf_links: self.spine_leaf_links.value_or_default(),
            spine_superspine_links: self.spine_superspine_links.value_or_default(),
            l3edge_server_links: self.l3_edge_server_links.value_or_default(),
            l2edge_subnets: self.l2_edge_subnet_links.value_or_default(),
            loopbacks: self.loopbacks.value_or_default(),
            static_routes: self.static_routes.value_or_default(),
        }
    }

    pub fn load_api_data(&mut self, api: &ApiExportPolicy) {
        self.spine_leaf_links = Value::Value(api.spine_leaf_links);
        self.spine_superspine_links = Value::Value(api.spine_superspine_links);
        self.l3_edge_server_links = Value::Value(api.l3edge_server_links);
        self.l2_edge_subnet_links = Value::Value(api.l2edge_subnets);
        self.loopbacks = Value::Value(api.loopbacks);
        self.static_routes = Value::Value(api.static_routes);
    }

    fn filter_match(&self, candidate: &ExportPolicy) -> bool {
        [
            (&self.spine_leaf_links, &candidate.spine_leaf_links),
            (&self.spine_superspine_links, &candidate.spine_superspine_links),
            (&self.l3_edge_server_links, &candidate.l3_edge_server_links),
            (&self.l2_edge_subnet_links, &candidate.l2_edge_subnet_links),
            (&self.loopbacks, &candidate.loopbacks),
            (&self.static_routes, &candidate.static_routes),
        ]
        .into_iter()
        .all(|(want, have)| scalar_match(want, have))
    }
}

fn scalar_match<T: PartialEq>(want: &Value<T>, have: &Value<T>) -> bool {
    match want.as_option() {
        Some(w) => have.as_option() == Some(w),
        None => true,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefixFilter {
    pub prefix: Value<String>,
    pub ge_mask: Value<i64>,
    pub le_mask: Value<i64>,
    pub action: Value<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiPrefixFilter {
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ge_mask: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub le_mask: Option<i64>,
    pub action: String,
}

impl PrefixFilter {
    pub fn request(&self, diags: &mut Diagnostics) -> Option<ApiPrefixFilter> {
        let prefix = self.prefix.value_or_default();
        let net = match prefix.parse::<IpNet>() {
            Ok(net) => net,
            Err(e) => {
                diags.add_error(format!("error parsing prefix {:?}", prefix), e.to_string());
                return None;
            }
        };
        let action = self.action.value_or(DEFAULT_PREFIX_FILTER_ACTION.to_string());
        if !PREFIX_FILTER_ACTIONS.contains(&action.as_str()) {
            diags.add_error(
                "error parsing prefix filter action",
                format!("unknown action {:?}", action),
            );
            return None;
        }
        Some(ApiPrefixFilter {
            prefix: net.trunc().to_string(),
            ge_mask: self.ge_mask.as_option().copied(),
            le_mask: self.le_mask.as_option().copied(),
            action,
        })
    }

    pub fn load_api_data(&mut self, api: &ApiPrefixFilter) {
        self.prefix = Value::Value(api.prefix.clone());
        self.ge_mask = int_value_or_null(api.ge_mask);
        self.le_mask = int_value_or_null(api.le_mask);
        self.action = Value::Value(api.action.clone());
    }

    fn filter_match(&self, candidate: &PrefixFilter) -> bool {
        scalar_match(&self.prefix, &candidate.prefix)
            && scalar_match(&self.ge_mask, &candidate.ge_mask)
            && scalar_match(&self.le_mask, &candidate.le_mask)
            && scalar_match(&self.action, &candidate.action)
    }
}

fn prefix_filter_object(with_defaults: bool) -> NestedObject {
    let mut action = Attribute::string()
        .optional()
        .computed()
        .validator(one_of(PREFIX_FILTER_ACTIONS))
        .description("One of 'permit' or 'deny'.");
    if with_defaults {
        action = action.default(json!(DEFAULT_PREFIX_FILTER_ACTION));
    }
    NestedObject::new()
        .attribute(
            "prefix",
            Attribute::string()
                .required()
                .validator(parse_cidr(false, false))
                .description("IPv4 or IPv6 network address specified in the form of network/prefixlen."),
        )
        .attribute(
            "ge_mask",
            Attribute::int64()
                .optional()
                .validator(between(1, 128))
                .description("Match less-specific prefixes from a parent prefix, up from `ge_mask` to the prefix length."),
        )
        .attribute(
            "le_mask",
            Attribute::int64()
                .optional()
                .validator(between(1, 128))
                .description("Match more-specific prefixes from a parent prefix, up until `le_mask` length."),
        )
        .attribute("action", action)
        .validator(Validator::PrefixFilter)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPolicyModel {
    pub id: Value<String>,
    pub name: Value<String>,
    pub description: Value<String>,
    pub blueprint_id: Value<String>,
    pub import_policy: Value<String>,
    pub export_policy: Value<ExportPolicy>,
    pub expect_default_ipv4: Value<bool>,
    pub expect_default_ipv6: Value<bool>,
    pub aggregate_prefixes: Value<Vec<String>>,
    pub extra_imports: Value<Vec<PrefixFilter>>,
    pub extra_exports: Value<Vec<PrefixFilter>>,
}

/// `/api/blueprints/{bp}/routing-policies` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicyData {
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policy_type: String,
    #[serde(default)]
    pub import_policy: String,
    #[serde(default)]
    pub export_policy: ApiExportPolicy,
    #[serde(default)]
    pub expect_default_ipv4_route: bool,
    #[serde(default)]
    pub expect_default_ipv6_route: bool,
    #[serde(default)]
    pub aggregate_prefixes: Vec<String>,
    #[serde(default)]
    pub extra_import_routes: Vec<ApiPrefixFilter>,
    #[serde(default)]
    pub extra_export_routes: Vec<ApiPrefixFilter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingPolicyObject {
    pub id: String,
    #[serde(flatten)]
    pub data: RoutingPolicyData,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPolicyList {
    #[serde(default)]
    items: Vec<RoutingPolicyObject>,
}

fn prefix_filters_request(
    filters: &Value<Vec<PrefixFilter>>,
    diags: &mut Diagnostics,
) -> Option<Vec<ApiPrefixFilter>> {
    filters
        .value_or_default()
        .iter()
        .map(|pf| pf.request(diags))
        .collect()
}

fn load_prefix_filters(api: &[ApiPrefixFilter]) -> Value<Vec<PrefixFilter>> {
    list_value_or_null(
        api.iter()
            .map(|a| {
                let mut pf = PrefixFilter::default();
                pf.load_api_data(a);
                pf
            })
            .collect(),
    )
}

/// Every wanted filter must be present in `have`.
fn prefix_filters_match(want: &Value<Vec<PrefixFilter>>, have: &Value<Vec<PrefixFilter>>) -> bool {
    let Some(want) = want.as_option() else {
        return true;
    };
    let have = have.value_or_default();
    want.iter()
        .all(|w| have.iter().any(|h| w.filter_match(h)))
}

impl RoutingPolicyModel {
    pub fn request(&self, diags: &mut Diagnostics) -> Option<RoutingPolicyData> {
        let import_policy = self.import_policy.value_or(DEFAULT_IMPORT_POLICY.to_string());
        if !IMPORT_POLICIES.contains(&import_policy.as_str()) {
            diags.add_error(
                "error parsing routing import policy",
                format!("unknown import policy {:?}", import_policy),
            );
            return None;
        }

        let mut aggregate_prefixes = Vec::new();
        for prefix in self.aggregate_prefixes.value_or_default() {
            match prefix.parse::<IpNet>() {
                Ok(net) => aggregate_prefixes.push(net.trunc().to_string()),
                Err(e) => diags.add_error(
                    format!("error parsing aggregate prefix string {:?}", prefix),
                    e.to_string(),
                ),
            }
        }
        if diags.has_error() {
            return None;
        }

        let extra_import_routes = prefix_filters_request(&self.extra_imports, diags)?;
        let extra_export_routes = prefix_filters_request(&self.extra_exports, diags)?;

        Some(RoutingPolicyData {
            label: self.name.value_or_default(),
            description: self.description.value_or_default(),
            policy_type: POLICY_TYPE_USER.to_string(),
            import_policy,
            export_policy: self.export_policy.value_or_default().request(),
            expect_default_ipv4_route: self.expect_default_ipv4.value_or_default(),
            expect_default_ipv6_route: self.expect_default_ipv6.value_or_default(),
            aggregate_prefixes,
            extra_import_routes,
            extra_export_routes,
        })
    }

    pub fn load_api_data(&mut self, data: &RoutingPolicyData) {
        let mut export_policy = ExportPolicy::default();
        export_policy.load_api_data(&data.export_policy);

        self.name = Value::Value(data.label.clone());
        self.description = string_value_or_null(&data.description);
        self.import_policy = Value::Value(data.import_policy.clone());
        self.export_policy = Value::Value(export_policy);
        self.expect_default_ipv4 = Value::Value(data.expect_default_ipv4_route);
        self.expect_default_ipv6 = Value::Value(data.expect_default_ipv6_route);
        self.aggregate_prefixes = list_value_or_null(data.aggregate_prefixes.clone());
        self.extra_imports = load_prefix_filters(&data.extra_import_routes);
        self.extra_exports = load_prefix_filters(&data.extra_export_routes);
    }

    /// True when every non-null field of `self` agrees with `candidate`.
    pub fn filter_match(&self, candidate: &RoutingPolicyModel) -> bool {
        if !(scalar_match(&self.id, &candidate.id)
            && scalar_match(&self.name, &candidate.name)
            && scalar_match(&self.description, &candidate.description)
            && scalar_match(&self.import_policy, &candidate.import_policy)
            && scalar_match(&self.expect_default_ipv4, &candidate.expect_default_ipv4)
            && scalar_match(&self.expect_default_ipv6, &candidate.expect_default_ipv6))
        {
            return false;
        }

        if let Some(want) = self.export_policy.as_option() {
            if !want.filter_match(&candidate.export_policy.value_or_default()) {
                return false;
            }
        }

        if let Some(want) = self.aggregate_prefixes.as_option() {
            let have = candidate.aggregate_prefixes.value_or_default();
            if !want.iter().all(|p| have.contains(p)) {
                return false;
            }
        }

        prefix_filters_match(&self.extra_imports, &candidate.extra_imports)
            && prefix_filters_match(&self.extra_exports, &candidate.extra_exports)
    }
}

fn policies_path(blueprint_id: &str) -> String {
    format!("/api/blueprints/{}/routing-policies", encode(blueprint_id))
}

fn policy_path(blueprint_id: &str, id: &str) -> String {
    format!("{}/{}", policies_path(blueprint_id), encode(id))
}

pub async fn list_routing_policies(
    client: &ApstraClient,
    blueprint_id: &str,
) -> Result<Vec<RoutingPolicyObject>, ApstraError> {
    let list: RoutingPolicyList = client.get(&policies_path(blueprint_id)).await?;
    Ok(list.items)
}

fn export_policy_object() -> NestedObject {
    let flag = |description: &str| Attribute::bool().optional().computed().description(description);
    NestedObject::new()
        .attribute(
            "spine_leaf_links",
            flag("Exports all spine-leaf (fabric) links within a VRF."),
        )
        .attribute(
            "spine_superspine_links",
            flag("Exports all spine-superspine (fabric) links within the default routing zone."),
        )
        .attribute(
            "l3_edge_server_links",
            flag("Exports all leaf to L3 server links within a routing zone."),
        )
        .attribute(
            "l2_edge_subnet_links",
            flag("Exports all virtual networks (VLANs) that have L3 addresses within a routing zone."),
        )
        .attribute(
            "loopbacks",
            flag("Exports all loopbacks within a routing zone across spine, leaf, and L3 servers."),
        )
        .attribute(
            "static_routes",
            flag("Exports all subnets in a VRF associated with static routes."),
        )
}

/// The routing policy attributes as used to filter existing policies: all
/// optional, no defaults.
pub fn filter_object() -> NestedObject {
    NestedObject::new()
        .attribute("id", Attribute::string().optional().description("Apstra graph node ID."))
        .attribute("name", Attribute::string().optional().description("Web UI 'name' field."))
        .attribute(
            "description",
            Attribute::string().optional().description("Web UI 'description' field."),
        )
        .attribute(
            "import_policy",
            Attribute::string()
                .optional()
                .validator(one_of(IMPORT_POLICIES))
                .description("One of 'default_only', 'all', 'extra_only'."),
        )
        .attribute(
            "export_policy",
            Attribute::single_nested(export_policy_object()).optional(),
        )
        .attribute("expect_default_ipv4", Attribute::bool().optional())
        .attribute("expect_default_ipv6", Attribute::bool().optional())
        .attribute(
            "aggregate_prefixes",
            Attribute::list(ElementType::String)
                .optional()
                .validator(value_strings_are(parse_cidr(false, false))),
        )
        .attribute(
            "extra_imports",
            Attribute::list_nested(prefix_filter_object(false)).optional(),
        )
        .attribute(
            "extra_exports",
            Attribute::list_nested(prefix_filter_object(false)).optional(),
        )
}

pub struct RoutingPolicy;

impl RoutingPolicy {
    async fn fetch(
        &self,
        client: &ApstraClient,
        mut model: RoutingPolicyModel,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        let policy: RoutingPolicyObject = match client.get(&policy_path(&blueprint_id, &id)).await
        {
            Ok(policy) => policy,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                api_error(diags, &format!("error reading routing policy {:?}", id), &e);
                return None;
            }
        };
        model.id = Value::Value(policy.id);
        model.load_api_data(&policy.data);
        to_doc(&model, diags)
    }
}

#[async_trait]
impl Resource for RoutingPolicy {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_routing_policy"
    }

    fn schema(&self) -> Schema {
        Schema::new("Creates a Routing Policy within a Datacenter Blueprint.")
            .attribute(
                "id",
                Attribute::string()
                    .computed()
                    .use_state_for_unknown()
                    .description("Apstra graph node ID."),
            )
            .attribute(
                "name",
                Attribute::string()
                    .required()
                    .validator(length_between(1, 18))
                    .validator(regex_matches(
                        "^[A-Za-z0-9_-]+$",
                        "only underscore, dash and alphanumeric characters allowed.",
                    ))
                    .description("Web UI 'name' field."),
            )
            .attribute(
                "description",
                Attribute::string()
                    .optional()
                    .validator(length_at_least(1))
                    .description("Web UI 'description' field."),
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
                "import_policy",
                Attribute::string()
                    .optional()
                    .computed()
                    .default(json!(DEFAULT_IMPORT_POLICY))
                    .validator(one_of(IMPORT_POLICIES))
                    .description("One of 'default_only', 'all', 'extra_only'."),
            )
            .attribute(
                "export_policy",
                Attribute::single_nested(export_policy_object())
                    .optional()
                    .computed()
                    .default(ExportPolicy::default_document())
                    .description("Controls export of various types of fabric prefixes."),
            )
            .attribute(
                "expect_default_ipv4",
                Attribute::bool()
                    .optional()
                    .computed()
                    .default(json!(true))
                    .description("Default IPv4 route is expected to be imported via this policy."),
            )
            .attribute(
                "expect_default_ipv6",
                Attribute::bool()
                    .optional()
                    .computed()
                    .default(json!(true))
                    .description("Default IPv6 route is expected to be imported via this policy."),
            )
            .attribute(
                "aggregate_prefixes",
                Attribute::list(ElementType::String)
                    .optional()
                    .validator(Validator::SizeAtLeast(1))
                    .validator(value_strings_are(parse_cidr(false, false)))
                    .description("BGP aggregate routes imported into the routing zone on all border switches."),
            )
            .attribute(
                "extra_imports",
                Attribute::list_nested(prefix_filter_object(true))
                    .optional()
                    .validator(Validator::SizeAtLeast(1))
                    .description("User defined import routes, additive to the import policy."),
            )
            .attribute(
                "extra_exports",
                Attribute::list_nested(prefix_filter_object(true))
                    .optional()
                    .validator(Validator::SizeAtLeast(1))
                    .description("User defined export routes, additive to the export policy."),
            )
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: RoutingPolicyModel = from_doc(plan, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        let request = model.request(diags)?;
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let created: ObjectId = match ctx.client.post(&policies_path(&blueprint_id), &request).await
        {
            Ok(created) => created,
            Err(e) => {
                api_error(diags, "error creating routing policy", &e);
                return None;
            }
        };
        tracing::info!(blueprint_id = %blueprint_id, routing_policy_id = %created.id, "routing policy created");
        model.id = Value::Value(created.id);
        self.fetch(&ctx.client, model, diags).await
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let model: RoutingPolicyModel = from_doc(state, diags)?;
        self.fetch(&ctx.client, model, diags).await
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: RoutingPolicyModel = from_doc(plan, diags)?;
        let prior: RoutingPolicyModel = from_doc(state, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = prior.id.value_or_default();
        let request = model.request(diags)?;
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let result: Result<JsonValue, _> =
            ctx.client.put(&policy_path(&blueprint_id, &id), &request).await;
        if let Err(e) = result {
            api_error(diags, &format!("error updating routing policy {:?}", id), &e);
            return None;
        }
        tracing::info!(blueprint_id = %blueprint_id, routing_policy_id = %id, "routing policy updated");
        model.id = Value::Value(id);
        self.fetch(&ctx.client, model, diags).await
    }

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics) {
        let Some(model) = from_doc::<RoutingPolicyModel>(state, diags) else {
            return;
        };
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return;
        }
        match ctx.client.delete(&policy_path(&blueprint_id, &id)).await {
            Ok(()) => {
                tracing::info!(blueprint_id = %blueprint_id, routing_policy_id = %id, "routing policy deleted")
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => api_error(diags, &format!("error deleting routing policy {:?}", id), &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(doc: JsonValue) -> RoutingPolicyModel {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn test_export_policy_maps_one_to_one() {
        let export: ExportPolicy = serde_json::from_value(json!({
            "spine_leaf_links": true,
            "l2_edge_subnet_links": true,
            "static_routes": "(known after apply)",
        }))
        .unwrap();
        assert_eq!(
            serde_json::to_value(export.request()).unwrap(),
            json!({
                "spine_leaf_links": true,
                "spine_superspine_links": false,
                "l3edge_server_links": false,
                "l2edge_subnets": true,
                "loopbacks": false,
                "static_routes": false,
            })
        );
    }

    #[test]
    fn test_request() {
        let m = model(json!({
            "name": "rp1",
            "export_policy": ExportPolicy::default_document(),
            "expect_default_ipv4": true,
            "aggregate_prefixes": ["10.1.0.5/16"],
            "extra_imports": [{"prefix": "192.168.0.0/24", "le_mask": 28}],
        }));
        let mut diags = Diagnostics::new();
        let body = serde_json::to_value(m.request(&mut diags).unwrap()).unwrap();
        assert_eq!(body["policy_type"], "user");
        assert_eq!(body["import_policy"], "default_only");
        assert_eq!(body["export_policy"]["loopbacks"], true);
        assert_eq!(body["aggregate_prefixes"], json!(["10.1.0.0/16"]));
        assert_eq!(
            body["extra_import_routes"],
            json!([{"prefix": "192.168.0.0/24", "le_mask": 28, "action": "permit"}])
        );
        assert_eq!(body["extra_export_routes"], json!([]));
    }

    #[test]
    fn test_load_empty_lists_are_null() {
        let data: RoutingPolicyData =
            serde_json::from_value(json!({"label": "rp1", "import_policy": "all"})).unwrap();
        let mut m = RoutingPolicyModel::default();
        m.load_api_data(&data);
        assert!(m.aggregate_prefixes.is_null());
        assert!(m.extra_imports.is_null());
        assert!(m.extra_exports.is_null());
        assert!(m.description.is_null());
        assert_eq!(m.import_policy, Value::Value("all".to_string()));
    }

    #[test]
    fn test_filter_match() {
        let candidate = model(json!({
            "id": "rp-1",
            "name": "rp1",
            "import_policy": "all",
            "export_policy": ExportPolicy::default_document(),
            "aggregate_prefixes": ["10.0.0.0/8", "172.16.0.0/12"],
            "extra_exports": [{"prefix": "10.0.0.0/8", "action": "deny"}],
        }));

        assert!(RoutingPolicyModel::default().filter_match(&candidate));
        assert!(model(json!({"name": "rp1"})).filter_match(&candidate));
        assert!(!model(json!({"name": "rp2"})).filter_match(&candidate));
        assert!(model(json!({"export_policy": {"loopbacks": true}})).filter_match(&candidate));
        assert!(!model(json!({"export_policy": {"static_routes": true}})).filter_match(&candidate));
        assert!(model(json!({"aggregate_prefixes": ["10.0.0.0/8"]})).filter_match(&candidate));
        assert!(!model(json!({"aggregate_prefixes": ["192.168.0.0/16"]})).filter_match(&candidate));
        assert!(model(json!({"extra_exports": [{"prefix": "10.0.0.0/8"}]})).filter_match(&candidate));
        assert!(
            !model(json!({"extra_exports": [{"prefix": "10.0.0.0/8", "action": "permit"}]}))
                .filter_match(&candidate)
        );
    }

    #[test]
    fn test_validate_prefix_filter_masks() {
        let mut diags = Diagnostics::new();
        RoutingPolicy.schema().validate(
            &json!({
                "name": "rp1",
                "blueprint_id": "bp",
                "extra_imports": [{"prefix": "10.0.0.0/16", "ge_mask": 8}],
            }),
            &mut diags,
        );
        assert!(
            diags
                .errors()
                .any(|d| d.attribute.as_deref() == Some("extra_imports[0].ge_mask"))
        );
    }
}

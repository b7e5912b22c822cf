use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::DataSource;
use crate::framework::validators::{Validator, length_at_least};
use crate::framework::value::set_value_or_null;
use crate::framework::{Attribute, Diagnostics, ElementType, Schema, Value};
use crate::provider::ProviderContext;
use crate::resources::routing_policy::{
    RoutingPolicyModel, RoutingPolicyObject, filter_object, list_routing_policies,
};
use crate::resources::{from_doc, to_doc};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPoliciesModel {
    pub blueprint_id: Value<String>,
    pub filters: Value<Vec<RoutingPolicyModel>>,
    pub ids: Value<BTreeSet<String>>,
}

/// IDs of policies matching any filter. Without filters every ID matches.
pub fn matching_ids(
    policies: &[RoutingPolicyObject],
    filters: Option<&Vec<RoutingPolicyModel>>,
) -> BTreeSet<String> {
    policies
        .iter()
        .filter(|policy| {
            let Some(filters) = filters else {
                return true;
            };
            let mut candidate = RoutingPolicyModel {
                id: Value::Value(policy.id.clone()),
                ..Default::default()
            };
            candidate.load_api_data(&policy.data);
            filters.iter().any(|f| f.filter_match(&candidate))
        })
        .map(|policy| policy.id.clone())
        .collect()
}

pub struct RoutingPolicies;

#[async_trait]
impl DataSource for RoutingPolicies {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_routing_policies"
    }

    fn schema(&self) -> Schema {
        Schema::new(
            "Returns the IDs of Routing Policies within a Datacenter Blueprint that match \
             any of the supplied filters.",
        )
        .attribute(
            "blueprint_id",
            Attribute::string()
                .required()
                .validator(length_at_least(1))
                .description("Apstra Blueprint ID."),
        )
        .attribute(
            "filters",
            Attribute::list_nested(filter_object())
                .optional()
                .validator(Validator::SizeAtLeast(1))
                .description(
                    "List of filters. A policy matches when all attributes of at least one \
                     filter agree with it.",
                ),
        )
        .attribute(
            "ids",
            Attribute::set(ElementType::String)
                .computed()
                .description("IDs of the matching Routing Policies."),
        )
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        config: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: RoutingPoliciesModel = from_doc(config, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        let policies = match list_routing_policies(&ctx.client, &blueprint_id).await {
            Ok(policies) => policies,
            Err(e) if e.is_not_found() => {
                diags.add_error(
                    format!("blueprint {:?} not found", blueprint_id),
                    e.to_string(),
                );
                return None;
            }
            Err(e) => {
                diags.add_error("error retrieving routing policies", e.to_string());
                return None;
            }
        };

        model.ids = set_value_or_null(matching_ids(&policies, model.filters.as_option()));
        to_doc(&model, diags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policies() -> Vec<RoutingPolicyObject> {
        serde_json::from_value(json!([
            {"id": "rp1", "label": "blue", "description": "", "policy_type": "user",
             "import_policy": "all",
             "export_policy": {"spine_leaf_links": true, "spine_superspine_links": false,
                               "l3edge_server_links": false, "l2edge_subnets": true,
                               "loopbacks": true, "static_routes": false},
             "expect_default_ipv4_route": true, "expect_default_ipv6_route": false,
             "aggregate_prefixes": ["10.0.0.0/8"],
             "extra_import_routes": [], "extra_export_routes": []},
            {"id": "rp2", "label": "red", "description": "", "policy_type": "user",
             "import_policy": "default_only",
             "export_policy": {"spine_leaf_links": false, "spine_superspine_links": false,
                               "l3edge_server_links": false, "l2edge_subnets": false,
                               "loopbacks": false, "static_routes": false},
             "expect_default_ipv4_route": false, "expect_default_ipv6_route": false,
             "aggregate_prefixes": [],
             "extra_import_routes": [], "extra_export_routes": []},
        ]))
        .unwrap()
    }

    fn filter(value: JsonValue) -> RoutingPolicyModel {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_no_filters_returns_everything() {
        let ids = matching_ids(&policies(), None);
        assert_eq!(ids, BTreeSet::from(["rp1".to_string(), "rp2".to_string()]));
    }

    #[test]
    fn test_filters_are_or_of_ands() {
        let filters = vec![
            filter(json!({"name": "blue", "import_policy": "default_only"})),
            filter(json!({"import_policy": "default_only"})),
        ];
        assert_eq!(
            matching_ids(&policies(), Some(&filters)),
            BTreeSet::from(["rp2".to_string()])
        );
    }

    #[test]
    fn test_filter_on_aggregate_prefixes() {
        let filters = vec![filter(json!({"aggregate_prefixes": ["10.0.0.0/8"]}))];
        assert_eq!(
            matching_ids(&policies(), Some(&filters)),
            BTreeSet::from(["rp1".to_string()])
        );
    }
}

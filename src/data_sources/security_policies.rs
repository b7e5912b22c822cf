use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::DataSource;
use crate::framework::validators::{Validator, length_at_least};
use crate::framework::{Attribute, Diagnostics, ElementType, Schema, Value};
use crate::provider::ProviderContext;
use crate::resources::security_policy::{
    SecurityPolicyModel, filter_object, list_security_policy_ids,
};
use crate::resources::{from_doc, to_doc};

const RESULT_NAME: &str = "n_policy";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPoliciesModel {
    pub blueprint_id: Value<String>,
    pub filters: Value<Vec<SecurityPolicyModel>>,
    pub ids: Value<BTreeSet<String>>,
    pub graph_queries: Value<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PolicyNode {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PolicyItem {
    n_policy: PolicyNode,
}

pub struct SecurityPolicies;

#[async_trait]
impl DataSource for SecurityPolicies {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_security_policies"
    }

    fn schema(&self) -> Schema {
        Schema::new(
            "Returns the IDs of Security Policies within a Datacenter Blueprint that match \
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
                .description("Policies matching any one of these filters are returned."),
        )
        .attribute(
            "ids",
            Attribute::set(ElementType::String)
                .computed()
                .description("IDs of the matching Security Policies."),
        )
        .attribute(
            "graph_queries",
            Attribute::list(ElementType::String)
                .computed()
                .description("Graph queries generated from the filters, one per filter."),
        )
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        config: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: SecurityPoliciesModel = from_doc(config, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();

        let Some(filters) = model.filters.as_option() else {
            let ids = match list_security_policy_ids(&ctx.client, &blueprint_id).await {
                Ok(ids) => ids,
                Err(e) => {
                    diags.add_error(
                        format!("failed to retrieve security policies in blueprint {}", blueprint_id),
                        e.to_string(),
                    );
                    return None;
                }
            };
            model.ids = Value::Value(ids.into_iter().collect());
            model.graph_queries = Value::Null;
            return to_doc(&model, diags);
        };

        let mut ids = BTreeSet::new();
        let mut queries = Vec::with_capacity(filters.len());
        for filter in filters {
            let query = filter.query(RESULT_NAME);
            match ctx.client.graph_query::<PolicyItem>(&blueprint_id, &query).await {
                Ok(response) => ids.extend(response.items.into_iter().map(|i| i.n_policy.id)),
                Err(e) => {
                    diags.add_error(
                        format!("error running security policy query {:?}", query.to_string()),
                        e.to_string(),
                    );
                    return None;
                }
            }
            queries.push(query.to_string());
        }

        model.ids = Value::Value(ids);
        model.graph_queries = Value::Value(queries);
        to_doc(&model, diags)
    }
}

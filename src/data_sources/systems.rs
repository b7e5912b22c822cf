use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::DataSource;
use crate::apstra::graph::{MatchQuery, PathQuery, QEAttribute, qe};
use crate::framework::validators::{length_at_least, one_of, value_strings_are};
use crate::framework::{Attribute, Diagnostics, ElementType, NestedObject, Schema, Value};
use crate::provider::ProviderContext;
use crate::resources::{from_doc, to_doc};
use crate::utils::rosetta::{SYSTEM_ROLES, SYSTEM_TYPES};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemFilter {
    pub hostname: Value<String>,
    pub id: Value<String>,
    pub label: Value<String>,
    pub role: Value<String>,
    pub system_id: Value<String>,
    pub system_type: Value<String>,
    pub tag_ids: Value<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemsModel {
    pub blueprint_id: Value<String>,
    pub filter: Value<SystemFilter>,
    pub ids: Value<BTreeSet<String>>,
    pub query_string: Value<String>,
}

#[derive(Debug, Deserialize)]
struct SystemNode {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SystemItem {
    n_system: SystemNode,
}

impl SystemFilter {
    fn attributes(&self) -> Vec<QEAttribute> {
        let fields = [
            ("hostname", &self.hostname),
            ("id", &self.id),
            ("label", &self.label),
            ("role", &self.role),
            ("system_id", &self.system_id),
            ("system_type", &self.system_type),
        ];
        fields
            .into_iter()
            .filter_map(|(key, value)| value.as_option().map(|v| qe(key, v)))
            .collect()
    }

    /// Matches systems with every filter attribute and every tag.
    pub fn query(&self) -> MatchQuery {
        let mut system = vec![qe("type", "system"), qe("name", "n_system")];
        system.extend(self.attributes());
        let mut query = MatchQuery::new().match_(PathQuery::new().node(system));
        for tag in self.tag_ids.value_or_default() {
            query = query.match_(
                PathQuery::new()
                    .node(vec![qe("type", "system"), qe("name", "n_system")])
                    .in_(vec![qe("type", "tag")])
                    .node(vec![qe("type", "tag"), qe("label", tag)]),
            );
        }
        query
    }
}

fn filter_object() -> NestedObject {
    let string = |description: &str| {
        Attribute::string()
            .optional()
            .validator(length_at_least(1))
            .description(description)
    };
    NestedObject::new()
        .attribute("hostname", string("Apstra Graph DB node `hostname`"))
        .attribute("id", string("Apstra Graph DB node ID field"))
        .attribute("label", string("Apstra Graph DB node `label`"))
        .attribute(
            "role",
            Attribute::string()
                .optional()
                .validator(one_of(SYSTEM_ROLES))
                .description("Apstra Graph DB node `role`"),
        )
        .attribute("system_id", string("Serial number of the assigned device"))
        .attribute(
            "system_type",
            Attribute::string()
                .optional()
                .validator(one_of(SYSTEM_TYPES))
                .description("Apstra Graph DB node `system_type`"),
        )
        .attribute(
            "tag_ids",
            Attribute::set(ElementType::String)
                .optional()
                .validator(value_strings_are(length_at_least(1)))
                .description("Tag labels; a system must carry all of them to match."),
        )
}

pub struct Systems;

#[async_trait]
impl DataSource for Systems {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_systems"
    }

    fn schema(&self) -> Schema {
        Schema::new("Returns the IDs of `system` nodes within a Blueprint that match the filter.")
            .attribute(
                "blueprint_id",
                Attribute::string()
                    .required()
                    .validator(length_at_least(1))
                    .description("Apstra Blueprint to search."),
            )
            .attribute(
                "filter",
                Attribute::single_nested(filter_object())
                    .optional()
                    .description("All specified attributes must match."),
            )
            .attribute(
                "ids",
                Attribute::set(ElementType::String)
                    .computed()
                    .description("IDs of matching `system` Graph DB nodes."),
            )
            .attribute(
                "query_string",
                Attribute::string()
                    .computed()
                    .description("Graph DB query string based on the supplied filter."),
            )
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        config: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: SystemsModel = from_doc(config, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        let query = model.filter.value_or_default().query();
        let items = match ctx.client.graph_query::<SystemItem>(&blueprint_id, &query).await {
            Ok(response) => response.items,
            Err(e) => {
                diags.add_error("Error executing Blueprint query", e.to_string());
                return None;
            }
        };
        tracing::debug!(blueprint_id = %blueprint_id, matches = items.len(), "system query complete");
        model.ids = Value::Value(items.into_iter().map(|i| i.n_system.id).collect());
        model.query_string = Value::Value(query.to_string());
        to_doc(&model, diags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_without_filter() {
        assert_eq!(
            SystemFilter::default().query().to_string(),
            "match(node(type='system', name='n_system'))"
        );
    }

    #[test]
    fn test_query_with_attributes_and_tags() {
        let filter: SystemFilter = serde_json::from_value(json!({
            "role": "leaf",
            "system_type": "switch",
            "tag_ids": ["prod", "east"],
        }))
        .unwrap();
        assert_eq!(
            filter.query().to_string(),
            "match(node(type='system', name='n_system', role='leaf', system_type='switch'), \
             node(type='system', name='n_system').in_(type='tag').node(type='tag', label='east'), \
             node(type='system', name='n_system').in_(type='tag').node(type='tag', label='prod'))"
        );
    }

    #[test]
    fn test_filter_role_validated() {
        let mut diags = Diagnostics::new();
        Systems.schema().validate(
            &json!({"blueprint_id": "bp", "filter": {"role": "bogus"}}),
            &mut diags,
        );
        assert!(diags.has_error());
    }
}

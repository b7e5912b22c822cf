use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use super::{ObjectId, Resource, api_error, from_doc, to_doc};
use crate::apstra::client::encode;
use crate::apstra::{ApstraClient, ApstraError};
use crate::apstra::graph::{MatchQuery, PathQuery, qe};
use crate::framework::validators::{
    Validator, at_least_sibling, between, length_at_least, length_between, one_of,
    value_strings_are,
};
use crate::framework::value::{list_value_or_null, set_value_or_null, string_value_or_null};
use crate::framework::{Attribute, Diagnostics, ElementType, NestedObject, Schema, Value};
use crate::provider::ProviderContext;
use crate::utils::rosetta::{
    RULE_ACTIONS, RULE_PROTOCOLS, protocol_from_friendly, protocol_to_friendly,
};

const PORT_ANY: &str = "any";
const TCP_STATE_ESTABLISHED: &str = "established";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub from_port: Value<i64>,
    pub to_port: Value<i64>,
}

/// Renders port ranges the way the API wants them, e.g. `80-90,443`.
/// No ranges means any port.
pub fn encode_ports(ranges: &Value<Vec<PortRange>>) -> String {
    let mut pairs: Vec<(i64, i64)> = ranges
        .value_or_default()
        .iter()
        .map(|r| {
            let from = r.from_port.value_or_default();
            (from, r.to_port.value_or(from))
        })
        .collect();
    if pairs.is_empty() {
        return PORT_ANY.to_string();
    }
    pairs.sort();
    pairs
        .iter()
        .map(|(from, to)| {
            if from == to {
                from.to_string()
            } else {
                format!("{}-{}", from, to)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn decode_ports(ports: &str, diags: &mut Diagnostics) -> Value<Vec<PortRange>> {
    let ports = ports.trim();
    if ports.is_empty() || ports.eq_ignore_ascii_case(PORT_ANY) {
        return Value::Null;
    }
    let mut ranges = Vec::new();
    for item in ports.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (from, to) = item.split_once('-').unwrap_or((item, item));
        match (from.trim().parse::<i64>(), to.trim().parse::<i64>()) {
            (Ok(from), Ok(to)) => ranges.push(PortRange {
                from_port: Value::Value(from),
                to_port: Value::Value(to),
            }),
            _ => {
                diags.add_error(
                    "error parsing port range",
                    format!("cannot parse {:?} in port string {:?}", item, ports),
                );
                return Value::Null;
            }
        }
    }
    list_value_or_null(ranges)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub id: Value<String>,
    pub name: Value<String>,
    pub description: Value<String>,
    pub protocol: Value<String>,
    pub action: Value<String>,
    pub source_ports: Value<Vec<PortRange>>,
    pub destination_ports: Value<Vec<PortRange>>,
    pub established: Value<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub protocol: String,
    pub action: String,
    #[serde(default)]
    pub src_port: String,
    #[serde(default)]
    pub dst_port: String,
    #[serde(default)]
    pub tcp_state_qualifier: Option<String>,
}

impl Rule {
    pub fn request(&self) -> ApiRule {
        ApiRule {
            id: self.id.as_option().cloned(),
            label: self.name.value_or_default(),
            description: self.description.value_or_default(),
            protocol: protocol_from_friendly(&self.protocol.value_or_default()),
            action: self.action.value_or_default(),
            src_port: encode_ports(&self.source_ports),
            dst_port: encode_ports(&self.destination_ports),
            tcp_state_qualifier: self
                .established
                .value_or_default()
                .then(|| TCP_STATE_ESTABLISHED.to_string()),
        }
    }

    pub fn load_api_data(&mut self, api: &ApiRule, diags: &mut Diagnostics) {
        self.id = Value::from_option(api.id.clone());
        self.name = Value::Value(api.label.clone());
        self.description = string_value_or_null(&api.description);
        self.protocol = Value::Value(protocol_to_friendly(&api.protocol));
        self.action = Value::Value(api.action.clone());
        self.source_ports = decode_ports(&api.src_port, diags);
        self.destination_ports = decode_ports(&api.dst_port, diags);
        self.established = Value::from_option(
            api.tcp_state_qualifier
                .as_deref()
                .map(|q| q == TCP_STATE_ESTABLISHED),
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicyModel {
    pub blueprint_id: Value<String>,
    pub id: Value<String>,
    pub name: Value<String>,
    pub description: Value<String>,
    pub enabled: Value<bool>,
    pub source_application_point_id: Value<String>,
    pub destination_application_point_id: Value<String>,
    pub rules: Value<Vec<Rule>>,
    pub tags: Value<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPointRef {
    pub id: String,
}

/// `/api/blueprints/{bp}/policies` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyData {
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub src_application_point: Option<ApplicationPointRef>,
    #[serde(default)]
    pub dst_application_point: Option<ApplicationPointRef>,
    #[serde(default)]
    pub rules: Vec<ApiRule>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PolicyObject {
    id: String,
    #[serde(flatten)]
    data: PolicyData,
}

impl SecurityPolicyModel {
    pub fn request(&self) -> PolicyData {
        PolicyData {
            label: self.name.value_or_default(),
            description: self.description.value_or_default(),
            enabled: self.enabled.value_or(true),
            src_application_point: self
                .source_application_point_id
                .as_option()
                .map(|id| ApplicationPointRef { id: id.clone() }),
            dst_application_point: self
                .destination_application_point_id
                .as_option()
                .map(|id| ApplicationPointRef { id: id.clone() }),
            rules: self
                .rules
                .value_or_default()
                .iter()
                .map(Rule::request)
                .collect(),
            // an empty list clears existing tags
            tags: self.tags.value_or_default().into_iter().collect(),
        }
    }

    pub fn load_api_data(&mut self, data: &PolicyData, diags: &mut Diagnostics) {
        let rules = data
            .rules
            .iter()
            .map(|api| {
                let mut rule = Rule::default();
                rule.load_api_data(api, diags);
                rule
            })
            .collect();

        self.name = Value::Value(data.label.clone());
        self.description = string_value_or_null(&data.description);
        self.enabled = Value::Value(data.enabled);
        self.source_application_point_id =
            Value::from_option(data.src_application_point.as_ref().map(|ap| ap.id.clone()));
        self.destination_application_point_id =
            Value::from_option(data.dst_application_point.as_ref().map(|ap| ap.id.clone()));
        self.rules = list_value_or_null(rules);
        self.tags = set_value_or_null(data.tags.iter().cloned());
    }

    /// Graph query matching policies like this one. The policy node is
    /// named `result_name`; null fields are not constrained.
    pub fn query(&self, result_name: &str) -> MatchQuery {
        let mut attributes = vec![
            qe("type", "policy"),
            qe("policy_type", "security"),
            qe("name", result_name),
        ];
        if let Some(name) = self.name.as_option() {
            attributes.push(qe("label", name));
        }
        if let Some(description) = self.description.as_option() {
            attributes.push(qe("description", description));
        }
        if let Some(enabled) = self.enabled.as_option() {
            attributes.push(qe("enabled", *enabled));
        }

        let mut policy = PathQuery::new().node(attributes);
        for tag in self.tags.value_or_default() {
            policy = policy.where_(&format!(
                "lambda {n}: '{}' in ({n}.tags or [])",
                tag,
                n = result_name
            ));
        }

        let mut query = MatchQuery::new().match_(policy);
        let directions = [
            ("from", "src_app_point_id", &self.source_application_point_id),
            ("to", "dst_app_point_id", &self.destination_application_point_id),
        ];
        for (direction, name, ap_id) in directions {
            if ap_id.is_null() {
                continue;
            }
            let mut ap_node = vec![qe("name", name)];
            if let Some(id) = ap_id.as_option() {
                ap_node.push(qe("id", id));
            }
            query = query.match_(
                PathQuery::new()
                    .node(vec![qe("type", "policy"), qe("name", result_name)])
                    .in_(vec![
                        qe("type", "security_policy"),
                        qe("policy_direction", direction),
                    ])
                    .node(ap_node),
            );
        }
        query
    }
}

fn policies_path(blueprint_id: &str) -> String {
    format!("/api/blueprints/{}/policies", encode(blueprint_id))
}

fn policy_path(blueprint_id: &str, id: &str) -> String {
    format!("{}/{}", policies_path(blueprint_id), encode(id))
}

#[derive(Debug, Deserialize)]
struct PolicyList {
    #[serde(default)]
    policies: Vec<PolicyObject>,
}

/// IDs of every security policy in the blueprint.
pub async fn list_security_policy_ids(
    client: &ApstraClient,
    blueprint_id: &str,
) -> Result<Vec<String>, ApstraError> {
    let list: PolicyList = client.get(&policies_path(blueprint_id)).await?;
    Ok(list.policies.into_iter().map(|p| p.id).collect())
}

fn port_range_object() -> NestedObject {
    NestedObject::new()
        .attribute(
            "from_port",
            Attribute::int64()
                .required()
                .validator(between(1, 65535))
                .description("First (low) port number in a range of ports matched by the policy rule."),
        )
        .attribute(
            "to_port",
            Attribute::int64()
                .required()
                .validator(between(1, 65535))
                .validator(at_least_sibling("from_port"))
                .description("Last (high) port number in a range of ports matched by the policy rule."),
        )
}

fn rule_object() -> NestedObject {
    NestedObject::new()
        .attribute(
            "id",
            Attribute::string().computed().description("Security Policy Rule ID."),
        )
        .attribute(
            "name",
            Attribute::string()
                .required()
                .validator(length_at_least(1))
                .description("Security Policy Rule Name."),
        )
        .attribute(
            "description",
            Attribute::string()
                .optional()
                .validator(length_at_least(1))
                .description("Security Policy Rule Description."),
        )
        .attribute(
            "protocol",
            Attribute::string()
                .required()
                .validator(one_of(RULE_PROTOCOLS))
                .description("Security Policy Rule Protocol."),
        )
        .attribute(
            "action",
            Attribute::string()
                .required()
                .validator(one_of(RULE_ACTIONS))
                .description("Security Policy Rule Action."),
        )
        .attribute(
            "source_ports",
            Attribute::set_nested(port_range_object())
                .optional()
                .validator(Validator::SizeAtLeast(1))
                .description("Set of TCP/UDP source ports matched by this rule. Null matches any port."),
        )
        .attribute(
            "destination_ports",
            Attribute::set_nested(port_range_object())
                .optional()
                .validator(Validator::SizeAtLeast(1))
                .description("Set of TCP/UDP destination ports matched by this rule. Null matches any port."),
        )
        .attribute(
            "established",
            Attribute::bool()
                .optional()
                .description("Render the rule with the NOS `established` keyword for TCP entries."),
        )
}

/// Security policy attributes usable as a filter.
pub fn filter_object() -> NestedObject {
    NestedObject::new()
        .attribute("name", Attribute::string().optional().validator(length_at_least(1)))
        .attribute(
            "description",
            Attribute::string().optional().validator(length_at_least(1)),
        )
        .attribute("enabled", Attribute::bool().optional())
        .attribute(
            "source_application_point_id",
            Attribute::string().optional().validator(length_at_least(1)),
        )
        .attribute(
            "destination_application_point_id",
            Attribute::string().optional().validator(length_at_least(1)),
        )
        .attribute(
            "tags",
            Attribute::set(ElementType::String)
                .optional()
                .validator(value_strings_are(length_at_least(1))),
        )
}

pub struct SecurityPolicy;

impl SecurityPolicy {
    async fn fetch(
        &self,
        ctx: &ProviderContext,
        mut model: SecurityPolicyModel,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        let policy: PolicyObject = match ctx.client.get(&policy_path(&blueprint_id, &id)).await {
            Ok(policy) => policy,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                api_error(diags, &format!("error reading security policy {:?}", id), &e);
                return None;
            }
        };
        model.id = Value::Value(policy.id);
        model.load_api_data(&policy.data, diags);
        if diags.has_error() {
            return None;
        }
        to_doc(&model, diags)
    }
}

#[async_trait]
impl Resource for SecurityPolicy {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_security_policy"
    }

    fn schema(&self) -> Schema {
        Schema::new("Creates a Security Policy within a Datacenter Blueprint.")
            .attribute(
                "blueprint_id",
                Attribute::string()
                    .required()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description("Apstra graph ID of the Datacenter Blueprint."),
            )
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
                    .validator(length_between(1, 17))
                    .description("Security Policy name displayed in the web UI."),
            )
            .attribute(
                "description",
                Attribute::string()
                    .optional()
                    .validator(length_at_least(1))
                    .description("Security Policy description."),
            )
            .attribute(
                "enabled",
                Attribute::bool()
                    .optional()
                    .computed()
                    .default(json!(true))
                    .description("Enables rendering of the policy. Default: true"),
            )
            .attribute(
                "source_application_point_id",
                Attribute::string()
                    .optional()
                    .validator(length_at_least(1))
                    .description("Graph node ID of the source application point."),
            )
            .attribute(
                "destination_application_point_id",
                Attribute::string()
                    .optional()
                    .validator(length_at_least(1))
                    .description("Graph node ID of the destination application point."),
            )
            .attribute(
                "rules",
                Attribute::list_nested(rule_object())
                    .optional()
                    .validator(Validator::SizeAtLeast(1))
                    .description("Ordered list of policy rules."),
            )
            .attribute(
                "tags",
                Attribute::set(ElementType::String)
                    .optional()
                    .validator(Validator::SizeAtLeast(1))
                    .validator(value_strings_are(length_at_least(1)))
                    .description("Set of Tag labels."),
            )
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: SecurityPolicyModel = from_doc(plan, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let created: ObjectId = match ctx
            .client
            .post(&policies_path(&blueprint_id), &model.request())
            .await
        {
            Ok(created) => created,
            Err(e) => {
                api_error(diags, "error creating security policy", &e);
                return None;
            }
        };
        tracing::info!(blueprint_id = %blueprint_id, security_policy_id = %created.id, "security policy created");
        model.id = Value::Value(created.id);
        self.fetch(ctx, model, diags).await
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let model: SecurityPolicyModel = from_doc(state, diags)?;
        self.fetch(ctx, model, diags).await
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: SecurityPolicyModel = from_doc(plan, diags)?;
        let prior: SecurityPolicyModel = from_doc(state, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = prior.id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let result: Result<JsonValue, _> = ctx
            .client
            .put(&policy_path(&blueprint_id, &id), &model.request())
            .await;
        if let Err(e) = result {
            api_error(diags, &format!("error updating security policy {:?}", id), &e);
            return None;
        }
        tracing::info!(blueprint_id = %blueprint_id, security_policy_id = %id, "security policy updated");
        model.id = Value::Value(id);
        self.fetch(ctx, model, diags).await
    }

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics) {
        let Some(model) = from_doc::<SecurityPolicyModel>(state, diags) else {
            return;
        };
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return;
        }
        match ctx.client.delete(&policy_path(&blueprint_id, &id)).await {
            Ok(()) => {
                tracing::info!(blueprint_id = %blueprint_id, security_policy_id = %id, "security policy deleted")
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => api_error(diags, &format!("error deleting security policy {:?}", id), &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(pairs: &[(i64, i64)]) -> Value<Vec<PortRange>> {
        Value::Value(
            pairs
                .iter()
                .map(|(f, t)| PortRange {
                    from_port: Value::Value(*f),
                    to_port: Value::Value(*t),
                })
                .collect(),
        )
    }

    #[test]
    fn test_encode_ports() {
        assert_eq!(encode_ports(&Value::Null), "any");
        assert_eq!(encode_ports(&Value::Value(vec![])), "any");
        assert_eq!(encode_ports(&ports(&[(443, 443), (80, 90)])), "80-90,443");
    }

    #[test]
    fn test_decode_ports() {
        let mut diags = Diagnostics::new();
        assert!(decode_ports("any", &mut diags).is_null());
        assert!(decode_ports("", &mut diags).is_null());
        assert_eq!(decode_ports("80-90,443", &mut diags), ports(&[(80, 90), (443, 443)]));
        assert!(!diags.has_error());

        assert!(decode_ports("80-x", &mut diags).is_null());
        assert!(diags.has_error());
    }

    #[test]
    fn test_rule_request_and_load() {
        let rule: Rule = serde_json::from_value(json!({
            "name": "web",
            "protocol": "tcp",
            "action": "permit",
            "destination_ports": [{"from_port": 443, "to_port": 443}],
            "established": true,
        }))
        .unwrap();
        let api = rule.request();
        assert_eq!(
            serde_json::to_value(&api).unwrap(),
            json!({
                "label": "web",
                "description": "",
                "protocol": "TCP",
                "action": "permit",
                "src_port": "any",
                "dst_port": "443",
                "tcp_state_qualifier": "established",
            })
        );

        let mut loaded = Rule::default();
        let mut diags = Diagnostics::new();
        loaded.load_api_data(&api, &mut diags);
        assert_eq!(loaded.protocol, Value::Value("tcp".to_string()));
        assert!(loaded.source_ports.is_null());
        assert_eq!(loaded.destination_ports, ports(&[(443, 443)]));
        assert_eq!(loaded.established, Value::Value(true));
    }

    #[test]
    fn test_request_sends_empty_tags() {
        let model: SecurityPolicyModel =
            serde_json::from_value(json!({"name": "sp", "tags": null})).unwrap();
        let body = serde_json::to_value(model.request()).unwrap();
        assert_eq!(body["tags"], json!([]));
        assert_eq!(body["enabled"], true);
        assert!(body["src_application_point"].is_null());
    }

    #[test]
    fn test_query() {
        let model: SecurityPolicyModel = serde_json::from_value(json!({
            "name": "sp",
            "enabled": true,
            "tags": ["a"],
            "source_application_point_id": "ap1",
        }))
        .unwrap();
        assert_eq!(
            model.query("n_policy").to_string(),
            "match(node(type='policy', policy_type='security', name='n_policy', label='sp', enabled=True)\
             .where(lambda n_policy: 'a' in (n_policy.tags or [])), \
             node(type='policy', name='n_policy')\
             .in_(type='security_policy', policy_direction='from')\
             .node(name='src_app_point_id', id='ap1'))"
        );
    }

    #[test]
    fn test_validate_port_order() {
        let mut diags = Diagnostics::new();
        SecurityPolicy.schema().validate(
            &json!({
                "blueprint_id": "bp",
                "name": "sp",
                "rules": [{
                    "name": "r",
                    "protocol": "udp",
                    "action": "deny",
                    "source_ports": [{"from_port": 100, "to_port": 50}],
                }],
            }),
            &mut diags,
        );
        assert!(
            diags
                .errors()
                .any(|d| d.attribute.as_deref() == Some("rules[0].source_ports[0].to_port"))
        );
    }
}

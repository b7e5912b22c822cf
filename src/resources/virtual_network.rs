use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value as JsonValue, json};

use super::svi_ip::{self, ApiSviIp, SviIp, load_api_svi_ips};
use super::vn_binding::ApiVnBinding;
use super::{ObjectId, Resource, api_error, from_doc, to_doc};
use crate::apstra::client::encode;
use crate::apstra::{ApstraClient, ApstraError};
use crate::framework::validators::{
    Validator, also_requires_n_of, between, conflicts_with, falls_within_cidr,
    forbidden_when_value_is, length_at_least, length_between, one_of, parse_cidr, parse_ip,
    regex_matches, required_when_value_is, required_when_value_null, value_at_must_be,
    value_strings_are, when_sibling_is, when_value_is,
};
use crate::framework::value::{
    int_value_or_null, map_value_or_null, set_value_or_null, string_value_or_null,
};
use crate::framework::{
    Attribute, Diagnostics, ElementType, NestedObject, Schema, UNKNOWN, Value,
};
use crate::provider::ProviderContext;
use crate::utils::rosetta::VN_TYPES;

pub const VN_TYPE_VLAN: &str = "vlan";
pub const VN_TYPE_VXLAN: &str = "vxlan";

pub const VNI_MIN: i64 = 4096;
pub const VNI_MAX: i64 = 16_777_214;
pub const VLAN_MIN: i64 = 1;
pub const VLAN_MAX: i64 = 4094;
pub const L3_MTU_MIN: i64 = 1280;
pub const L3_MTU_MAX: i64 = 9216;

const DHCP_SERVICE_ENABLED: &str = "dhcpServiceEnabled";
const DHCP_SERVICE_DISABLED: &str = "dhcpServiceDisabled";

const NAME_PATTERN: &str = "^[A-Za-z0-9_-]+$";
const NAME_MESSAGE: &str =
    "only underscore, dash and alphanumeric characters allowed";

const SUBNET_RETRY_LIMIT: usize = 25;
const SUBNET_RETRY_DELAY: Duration = Duration::from_millis(200);

/// One entry of the `bindings` map. The map key is the leaf (or leaf
/// redundancy group) ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingEntry {
    pub vlan_id: Value<i64>,
    pub access_ids: Value<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualNetworkModel {
    pub id: Value<String>,
    pub name: Value<String>,
    pub description: Value<String>,
    pub blueprint_id: Value<String>,
    #[serde(rename = "type")]
    pub vn_type: Value<String>,
    pub routing_zone_id: Value<String>,
    pub vni: Value<i64>,
    pub had_prior_vni_config: Value<bool>,
    pub reserve_vlan: Value<bool>,
    pub reserved_vlan_id: Value<i64>,
    pub bindings: Value<BTreeMap<String, BindingEntry>>,
    pub dhcp_service_enabled: Value<bool>,
    pub ipv4_connectivity_enabled: Value<bool>,
    pub ipv6_connectivity_enabled: Value<bool>,
    pub ipv4_subnet: Value<String>,
    pub ipv6_subnet: Value<String>,
    pub ipv4_virtual_gateway_enabled: Value<bool>,
    pub ipv6_virtual_gateway_enabled: Value<bool>,
    pub ipv4_virtual_gateway: Value<String>,
    pub ipv6_virtual_gateway: Value<String>,
    pub l3_mtu: Value<i64>,
    pub import_route_targets: Value<BTreeSet<String>>,
    pub export_route_targets: Value<BTreeSet<String>>,
    pub svi_ips: Value<Vec<SviIp>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtPolicy {
    #[serde(rename = "import_RTs", default)]
    pub import_rts: Vec<String>,
    #[serde(rename = "export_RTs", default)]
    pub export_rts: Vec<String>,
}

/// `/api/blueprints/{bp}/virtual-networks` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualNetworkData {
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub vn_type: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "vn_id_as_string",
        deserialize_with = "vn_id_from_any"
    )]
    pub vn_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_zone_id: Option<String>,
    #[serde(default)]
    pub reserved_vlan_id: Option<i64>,
    #[serde(default)]
    pub dhcp_service: String,
    #[serde(default)]
    pub ipv4_enabled: bool,
    #[serde(default)]
    pub ipv4_subnet: Option<String>,
    #[serde(default)]
    pub ipv6_enabled: bool,
    #[serde(default)]
    pub ipv6_subnet: Option<String>,
    #[serde(default)]
    pub virtual_gateway_ipv4: Option<String>,
    #[serde(default)]
    pub virtual_gateway_ipv6: Option<String>,
    #[serde(default)]
    pub virtual_gateway_ipv4_enabled: bool,
    #[serde(default)]
    pub virtual_gateway_ipv6_enabled: bool,
    #[serde(default)]
    pub bound_to: Vec<ApiVnBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rt_policy: Option<RtPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svi_ips: Option<Vec<ApiSviIp>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l3_mtu: Option<i64>,
}

fn vn_id_as_string<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_str(&v.to_string()),
        None => serializer.serialize_none(),
    }
}

fn vn_id_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => Ok(None),
        JsonValue::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid vn_id {}", n))),
        JsonValue::String(s) if s.is_empty() => Ok(None),
        JsonValue::String(s) => s
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid vn_id {:?}", s))),
        other => Err(serde::de::Error::custom(format!("invalid vn_id {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct VirtualNetworkObject {
    id: String,
    #[serde(flatten)]
    data: VirtualNetworkData,
}

fn parse_subnet(attribute: &str, value: &Value<String>, diags: &mut Diagnostics) -> Option<String> {
    let s = value.as_option()?;
    match s.parse::<IpNet>() {
        Ok(net) => Some(net.trunc().to_string()),
        Err(e) => {
            diags.add_attribute_error(
                attribute,
                format!("error parsing attribute {} value {:?}", attribute, s),
                e.to_string(),
            );
            None
        }
    }
}

fn parse_gateway(attribute: &str, value: &Value<String>, diags: &mut Diagnostics) -> Option<String> {
    let s = value.as_option()?;
    match s.parse::<IpAddr>() {
        Ok(ip) => Some(ip.to_string()),
        Err(e) => {
            diags.add_attribute_error(
                attribute,
                format!("error parsing attribute {} value {:?}", attribute, s),
                e.to_string(),
            );
            None
        }
    }
}

impl VirtualNetworkModel {
    fn api_bindings(&self) -> Vec<ApiVnBinding> {
        self.bindings
            .as_option()
            .map(|bindings| {
                bindings
                    .iter()
                    .map(|(leaf_id, entry)| ApiVnBinding {
                        system_id: leaf_id.clone(),
                        vlan_id: entry.vlan_id.as_option().copied(),
                        access_switch_node_ids: entry
                            .access_ids
                            .value_or_default()
                            .into_iter()
                            .collect(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn request(&self, diags: &mut Diagnostics) -> Option<VirtualNetworkData> {
        let vn_type = self.vn_type.value_or(VN_TYPE_VXLAN.to_string());
        if !VN_TYPES.contains(&vn_type.as_str()) {
            diags.add_error(
                "error parsing virtual network type",
                format!("unknown virtual network type {:?}", vn_type),
            );
            return None;
        }

        let bound_to = self.api_bindings();
        let first_vlan = bound_to.first().and_then(|b| b.vlan_id);

        let mut vn_id = self.vni.as_option().copied();
        if vn_type == VN_TYPE_VLAN && first_vlan.is_some() {
            // vlan type networks use the VLAN as the VNI
            vn_id = first_vlan;
        }

        let reserved_vlan_id = if self.reserve_vlan.value_or_default() {
            self.reserved_vlan_id.as_option().copied().or(first_vlan)
        } else {
            None
        };

        let ipv4_subnet = parse_subnet("ipv4_subnet", &self.ipv4_subnet, diags);
        let ipv6_subnet = parse_subnet("ipv6_subnet", &self.ipv6_subnet, diags);
        let virtual_gateway_ipv4 =
            parse_gateway("ipv4_virtual_gateway", &self.ipv4_virtual_gateway, diags);
        let virtual_gateway_ipv6 =
            parse_gateway("ipv6_virtual_gateway", &self.ipv6_virtual_gateway, diags);

        let rt_policy = if self.import_route_targets.is_known() || self.export_route_targets.is_known()
        {
            Some(RtPolicy {
                import_rts: self.import_route_targets.value_or_default().into_iter().collect(),
                export_rts: self.export_route_targets.value_or_default().into_iter().collect(),
            })
        } else {
            None
        };

        let svi_ips = match self.svi_ips.as_option() {
            Some(items) => {
                let mut api = Vec::with_capacity(items.len());
                for item in items {
                    api.push(item.request(diags)?);
                }
                Some(api)
            }
            None => None,
        };

        if diags.has_error() {
            return None;
        }

        let dhcp_service = if self.dhcp_service_enabled.value_or_default() {
            DHCP_SERVICE_ENABLED
        } else {
            DHCP_SERVICE_DISABLED
        };

        Some(VirtualNetworkData {
            label: self.name.value_or_default(),
            description: self.description.value_or_default(),
            vn_type,
            vn_id,
            security_zone_id: self.routing_zone_id.as_option().cloned(),
            reserved_vlan_id,
            dhcp_service: dhcp_service.to_string(),
            ipv4_enabled: self.ipv4_connectivity_enabled.value_or(true),
            ipv4_subnet,
            ipv6_enabled: self.ipv6_connectivity_enabled.value_or_default(),
            ipv6_subnet,
            virtual_gateway_ipv4,
            virtual_gateway_ipv6,
            virtual_gateway_ipv4_enabled: self.ipv4_virtual_gateway_enabled.value_or_default(),
            virtual_gateway_ipv6_enabled: self.ipv6_virtual_gateway_enabled.value_or_default(),
            bound_to,
            rt_policy,
            svi_ips,
            l3_mtu: self.l3_mtu.as_option().copied(),
        })
    }

    pub fn load_api_data(&mut self, data: &VirtualNetworkData) {
        let bindings: BTreeMap<String, BindingEntry> = data
            .bound_to
            .iter()
            .map(|b| {
                (
                    b.system_id.clone(),
                    BindingEntry {
                        vlan_id: int_value_or_null(b.vlan_id),
                        access_ids: set_value_or_null(b.access_switch_node_ids.iter().cloned()),
                    },
                )
            })
            .collect();

        self.name = Value::Value(data.label.clone());
        self.description = string_value_or_null(&data.description);
        self.vn_type = Value::Value(data.vn_type.clone());
        self.routing_zone_id =
            Value::from_option(data.security_zone_id.clone().filter(|s| !s.is_empty()));
        self.bindings = map_value_or_null(bindings);
        self.vni = int_value_or_null(data.vn_id);
        self.dhcp_service_enabled = Value::Value(data.dhcp_service == DHCP_SERVICE_ENABLED);
        self.ipv4_connectivity_enabled = Value::Value(data.ipv4_enabled);
        self.ipv6_connectivity_enabled = Value::Value(data.ipv6_enabled);
        self.reserve_vlan = Value::Value(data.reserved_vlan_id.is_some());
        self.reserved_vlan_id = int_value_or_null(data.reserved_vlan_id);
        self.ipv4_subnet = string_value_or_null(data.ipv4_subnet.as_deref().unwrap_or_default());
        self.ipv6_subnet = string_value_or_null(data.ipv6_subnet.as_deref().unwrap_or_default());
        self.ipv4_virtual_gateway_enabled = Value::Value(data.virtual_gateway_ipv4_enabled);
        self.ipv6_virtual_gateway_enabled = Value::Value(data.virtual_gateway_ipv6_enabled);
        self.ipv4_virtual_gateway =
            string_value_or_null(data.virtual_gateway_ipv4.as_deref().unwrap_or_default());
        self.ipv6_virtual_gateway =
            string_value_or_null(data.virtual_gateway_ipv6.as_deref().unwrap_or_default());
        self.l3_mtu = int_value_or_null(data.l3_mtu);
        let rt_policy = data.rt_policy.clone().unwrap_or_default();
        self.import_route_targets = set_value_or_null(rt_policy.import_rts);
        self.export_route_targets = set_value_or_null(rt_policy.export_rts);
        self.svi_ips = load_api_svi_ips(data.svi_ips.as_deref().unwrap_or_default());
    }

    /// Keeps user-supplied addressing rather than the API's rendering of it.
    fn prefer_planned(&mut self, plan: &VirtualNetworkModel) {
        if !plan.ipv4_subnet.is_unknown() {
            self.ipv4_subnet = plan.ipv4_subnet.clone();
        }
        if !plan.ipv6_subnet.is_unknown() {
            self.ipv6_subnet = plan.ipv6_subnet.clone();
        }
        if !plan.ipv4_virtual_gateway.is_unknown() {
            self.ipv4_virtual_gateway = plan.ipv4_virtual_gateway.clone();
        }
        if !plan.ipv6_virtual_gateway.is_unknown() {
            self.ipv6_virtual_gateway = plan.ipv6_virtual_gateway.clone();
        }
        if !plan.reserve_vlan.is_unknown() {
            self.reserve_vlan = plan.reserve_vlan.clone();
        }
    }
}

fn vn_path(blueprint_id: &str) -> String {
    format!("/api/blueprints/{}/virtual-networks", encode(blueprint_id))
}

fn vn_item_path(blueprint_id: &str, id: &str) -> String {
    format!("{}/{}", vn_path(blueprint_id), encode(id))
}

async fn get_virtual_network(
    client: &ApstraClient,
    blueprint_id: &str,
    id: &str,
) -> Result<VirtualNetworkData, ApstraError> {
    let vn: VirtualNetworkObject = client.get(&vn_item_path(blueprint_id, id)).await?;
    tracing::debug!(virtual_network_id = %vn.id, "virtual network fetched");
    Ok(vn.data)
}

fn bindings_object() -> NestedObject {
    NestedObject::new()
        .attribute(
            "vlan_id",
            Attribute::int64()
                .optional()
                .computed()
                .validator(between(VLAN_MIN, VLAN_MAX))
                .description("When not specified, Apstra will choose the VLAN to be used on each switch."),
        )
        .attribute(
            "access_ids",
            Attribute::set(ElementType::String)
                .optional()
                .validator(value_strings_are(length_at_least(1)))
                .description(
                    "Graph node IDs of access switches or access switch redundancy groups beneath the leaf.",
                ),
        )
}

fn gateway_enabled(connectivity: &str, null_ok: bool, description: &str) -> Attribute {
    Attribute::bool()
        .optional()
        .computed()
        .validator(when_value_is(
            json!(true),
            value_at_must_be(connectivity, json!(true), null_ok),
        ))
        .description(description)
}

pub struct VirtualNetwork;

#[async_trait]
impl Resource for VirtualNetwork {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_virtual_network"
    }

    fn schema(&self) -> Schema {
        Schema::new("Creates a Virtual Network within a Datacenter Blueprint.")
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
                    .validator(length_between(1, 30))
                    .validator(regex_matches(NAME_PATTERN, NAME_MESSAGE))
                    .description("Virtual Network Name"),
            )
            .attribute(
                "description",
                Attribute::string()
                    .optional()
                    .validator(length_between(1, 222))
                    .validator(regex_matches(
                        r#"^[^"<>\\?]+$"#,
                        r#"must not contain the following characters: ", <, >, \, ?"#,
                    ))
                    .description("Virtual Network Description"),
            )
            .attribute(
                "blueprint_id",
                Attribute::string()
                    .required()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description("Blueprint ID"),
            )
            .attribute(
                "type",
                Attribute::string()
                    .optional()
                    .computed()
                    .default(json!(VN_TYPE_VXLAN))
                    .requires_replace()
                    .validator(one_of(VN_TYPES))
                    .description("Virtual Network Type"),
            )
            .attribute(
                "routing_zone_id",
                Attribute::string()
                    .optional()
                    .computed()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .validator(required_when_value_is("type", json!(VN_TYPE_VXLAN)))
                    .validator(required_when_value_null("type"))
                    .description("Routing Zone ID (required when `type == vxlan`)"),
            )
            .attribute(
                "vni",
                Attribute::int64()
                    .optional()
                    .computed()
                    .use_state_for_unknown()
                    .validator(between(VNI_MIN, VNI_MAX))
                    .validator(forbidden_when_value_is("type", json!(VN_TYPE_VLAN)))
                    .description(
                        "EVPN Virtual Network ID. When omitted, Apstra chooses a VNI from the resource pool.",
                    ),
            )
            .attribute(
                "had_prior_vni_config",
                Attribute::bool().computed().description(
                    "Used to trigger plan modification when `vni` has been removed from the configuration.",
                ),
            )
            .attribute(
                "reserve_vlan",
                Attribute::bool()
                    .optional()
                    .computed()
                    .validator(when_value_is(
                        json!(true),
                        forbidden_when_value_is("type", json!(VN_TYPE_VLAN)),
                    ))
                    .validator(also_requires_n_of(1, &["bindings", "reserved_vlan_id"]))
                    .description(
                        "For use only with `vxlan` type Virtual networks when all `bindings` use the same VLAN ID.",
                    ),
            )
            .attribute(
                "reserved_vlan_id",
                Attribute::int64()
                    .optional()
                    .computed()
                    .validator(forbidden_when_value_is("reserve_vlan", JsonValue::Null))
                    .validator(forbidden_when_value_is("reserve_vlan", json!(false)))
                    .validator(conflicts_with(&["bindings"]))
                    .validator(between(VLAN_MIN, VLAN_MAX))
                    .description("Used to specify the reserved VLAN ID without specifying any bindings."),
            )
            .attribute(
                "bindings",
                Attribute::map_nested(bindings_object())
                    .optional()
                    .validator(Validator::SizeAtLeast(1))
                    .validator(when_sibling_is(
                        "type",
                        json!(VN_TYPE_VLAN),
                        Validator::SizeAtMost(1),
                    ))
                    .description(
                        "Map keyed by graph node IDs of leaf switches or leaf switch redundancy groups.",
                    ),
            )
            .attribute(
                "dhcp_service_enabled",
                Attribute::bool()
                    .optional()
                    .computed()
                    .default(json!(false))
                    .validator(when_value_is(
                        json!(true),
                        also_requires_n_of(
                            1,
                            &["ipv4_connectivity_enabled", "ipv6_connectivity_enabled"],
                        ),
                    ))
                    .description("Enables a DHCP relay agent."),
            )
            .attribute(
                "ipv4_connectivity_enabled",
                Attribute::bool()
                    .optional()
                    .computed()
                    .default(json!(true))
                    .description("Enables IPv4 within the Virtual Network. Default: true"),
            )
            .attribute(
                "ipv6_connectivity_enabled",
                Attribute::bool()
                    .optional()
                    .computed()
                    .default(json!(false))
                    .description("Enables IPv6 within the Virtual Network. Default: false"),
            )
            .attribute(
                "ipv4_subnet",
                Attribute::string()
                    .optional()
                    .computed()
                    .validator(parse_cidr(true, false))
                    .validator(value_at_must_be("ipv4_connectivity_enabled", json!(true), true))
                    .description("IPv4 subnet associated with the Virtual Network."),
            )
            .attribute(
                "ipv6_subnet",
                Attribute::string()
                    .optional()
                    .computed()
                    .validator(parse_cidr(false, true))
                    .validator(value_at_must_be("ipv6_connectivity_enabled", json!(true), false))
                    .description("IPv6 subnet associated with the Virtual Network."),
            )
            .attribute(
                "ipv4_virtual_gateway_enabled",
                gateway_enabled(
                    "ipv4_connectivity_enabled",
                    true,
                    "Controls whether the IPv4 gateway is enabled. Requires `ipv4_connectivity_enabled`.",
                ),
            )
            .attribute(
                "ipv6_virtual_gateway_enabled",
                gateway_enabled(
                    "ipv6_connectivity_enabled",
                    false,
                    "Controls whether the IPv6 gateway is enabled. Requires `ipv6_connectivity_enabled`.",
                ),
            )
            .attribute(
                "ipv4_virtual_gateway",
                Attribute::string()
                    .optional()
                    .computed()
                    .validator(parse_ip(true, false))
                    .validator(falls_within_cidr("ipv4_subnet", false, false))
                    .description("Specifies the IPv4 virtual gateway address within the Virtual Network."),
            )
            .attribute(
                "ipv6_virtual_gateway",
                Attribute::string()
                    .optional()
                    .computed()
                    .validator(parse_ip(false, true))
                    .validator(falls_within_cidr("ipv6_subnet", true, true))
                    .description("Specifies the IPv6 virtual gateway address within the Virtual Network."),
            )
            .attribute(
                "l3_mtu",
                Attribute::int64()
                    .optional()
                    .computed()
                    .validator(between(L3_MTU_MIN, L3_MTU_MAX))
                    .validator(Validator::MustBeEven)
                    .description("L3 MTU used by the L3 switch interfaces participating in the Virtual Network."),
            )
            .attribute(
                "import_route_targets",
                Attribute::set(ElementType::String)
                    .optional()
                    .validator(Validator::SizeAtLeast(1))
                    .validator(value_strings_are(Validator::ParseRouteTarget))
                    .description("Import RTs for this Virtual Network."),
            )
            .attribute(
                "export_route_targets",
                Attribute::set(ElementType::String)
                    .optional()
                    .validator(Validator::SizeAtLeast(1))
                    .validator(value_strings_are(Validator::ParseRouteTarget))
                    .description("Export RTs for this Virtual Network."),
            )
            .attribute(
                "svi_ips",
                Attribute::set_nested(svi_ip::nested_object())
                    .optional()
                    .computed()
                    .description("SVI addressing of the Virtual Network on individual switches."),
            )
    }

    fn modify_plan(
        &self,
        config: &JsonValue,
        prior: Option<&JsonValue>,
        planned: &mut JsonValue,
        _diags: &mut Diagnostics,
    ) {
        let vni_configured = !config["vni"].is_null();
        planned["had_prior_vni_config"] = json!(vni_configured);

        let Some(prior) = prior else { return };
        // a user-set VNI removed from config goes back to Apstra's choice
        if !vni_configured && prior["had_prior_vni_config"] == json!(true) {
            planned["vni"] = json!(UNKNOWN);
        }
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let plan: VirtualNetworkModel = from_doc(plan, diags)?;
        let blueprint_id = plan.blueprint_id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let request = plan.request(diags)?;

        let created: ObjectId = match ctx.client.post(&vn_path(&blueprint_id), &request).await {
            Ok(created) => created,
            Err(e) => {
                api_error(diags, "error creating virtual network", &e);
                return None;
            }
        };
        tracing::info!(blueprint_id = %blueprint_id, virtual_network_id = %created.id, "virtual network created");

        // subnets are allocated asynchronously
        let mut data = None;
        for _ in 0..SUBNET_RETRY_LIMIT {
            let fetched = match get_virtual_network(&ctx.client, &blueprint_id, &created.id).await
            {
                Ok(fetched) => fetched,
                Err(e) => {
                    api_error(
                        diags,
                        &format!("error fetching just-created virtual network {:?}", created.id),
                        &e,
                    );
                    return None;
                }
            };
            let waiting = (request.ipv4_enabled && fetched.ipv4_subnet.is_none())
                || (request.ipv6_enabled && fetched.ipv6_subnet.is_none());
            data = Some(fetched);
            if !waiting {
                break;
            }
            tokio::time::sleep(SUBNET_RETRY_DELAY).await;
        }
        let data = data?;

        let mut state = VirtualNetworkModel {
            id: Value::Value(created.id),
            blueprint_id: plan.blueprint_id.clone(),
            had_prior_vni_config: Value::Value(plan.vni.is_known()),
            ..Default::default()
        };
        state.load_api_data(&data);
        state.prefer_planned(&plan);
        if plan.vni.is_known() {
            state.vni = plan.vni.clone();
        }
        if plan.bindings.is_null() {
            state.bindings = Value::Null;
        }
        to_doc(&state, diags)
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: VirtualNetworkModel = from_doc(state, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        let data = match get_virtual_network(&ctx.client, &blueprint_id, &id).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                api_error(diags, &format!("error reading virtual network {:?}", id), &e);
                return None;
            }
        };

        let bindings_should_be_null = model.bindings.is_null();
        model.load_api_data(&data);
        // bindings created outside this resource are not tracked
        if bindings_should_be_null {
            model.bindings = Value::Null;
        }
        if model.had_prior_vni_config.is_null() {
            model.had_prior_vni_config = Value::Value(false);
        }
        to_doc(&model, diags)
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let plan: VirtualNetworkModel = from_doc(plan, diags)?;
        let prior: VirtualNetworkModel = from_doc(state, diags)?;
        let blueprint_id = plan.blueprint_id.value_or_default();
        let id = prior.id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let request = plan.request(diags)?;

        let put: Result<JsonValue, _> = ctx
            .client
            .put(&vn_item_path(&blueprint_id, &id), &request)
            .await;
        if let Err(e) = put {
            api_error(diags, "error updating virtual network", &e);
            return None;
        }
        tracing::info!(blueprint_id = %blueprint_id, virtual_network_id = %id, "virtual network updated");

        let data = match get_virtual_network(&ctx.client, &blueprint_id, &id).await {
            Ok(data) => data,
            Err(e) => {
                api_error(
                    diags,
                    &format!("error fetching just-updated virtual network {:?}", id),
                    &e,
                );
                return None;
            }
        };

        let mut state = VirtualNetworkModel {
            id: Value::Value(id),
            blueprint_id: plan.blueprint_id.clone(),
            ..Default::default()
        };
        state.load_api_data(&data);
        state.prefer_planned(&plan);
        state.had_prior_vni_config = if plan.had_prior_vni_config.is_unknown() {
            Value::Value(plan.vni.is_known())
        } else {
            plan.had_prior_vni_config.clone()
        };
        if plan.bindings.is_null() {
            state.bindings = Value::Null;
        }
        to_doc(&state, diags)
    }

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics) {
        let Some(model) = from_doc::<VirtualNetworkModel>(state, diags) else {
            return;
        };
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return;
        }
        match ctx.client.delete(&vn_item_path(&blueprint_id, &id)).await {
            Ok(()) => {
                tracing::info!(blueprint_id = %blueprint_id, virtual_network_id = %id, "virtual network deleted")
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => api_error(diags, &format!("error deleting virtual network {:?}", id), &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(doc: JsonValue) -> VirtualNetworkModel {
        serde_json::from_value(doc).unwrap()
    }

    fn validate(config: JsonValue) -> Diagnostics {
        let mut diags = Diagnostics::new();
        VirtualNetwork.schema().validate(&config, &mut diags);
        diags
    }

    #[test]
    fn test_request_vxlan() {
        let m = model(json!({
            "name": "vn1",
            "blueprint_id": "bp",
            "type": "vxlan",
            "routing_zone_id": "rz1",
            "vni": 5000,
            "ipv4_connectivity_enabled": true,
            "ipv4_subnet": "10.1.1.0/24",
            "ipv4_virtual_gateway": "10.1.1.1",
            "ipv4_virtual_gateway_enabled": true,
            "dhcp_service_enabled": false,
            "bindings": {"leaf1": {"vlan_id": 10, "access_ids": null}},
        }));
        let mut diags = Diagnostics::new();
        let request = m.request(&mut diags).unwrap();
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["vn_id"], "5000");
        assert_eq!(body["security_zone_id"], "rz1");
        assert_eq!(body["dhcp_service"], "dhcpServiceDisabled");
        assert_eq!(body["ipv4_subnet"], "10.1.1.0/24");
        assert_eq!(body["virtual_gateway_ipv4"], "10.1.1.1");
        assert_eq!(
            body["bound_to"],
            json!([{"system_id": "leaf1", "vlan_id": 10, "access_switch_node_ids": []}])
        );
        assert!(body.get("rt_policy").is_none());
        assert!(body.get("svi_ips").is_none());
    }

    #[test]
    fn test_request_vlan_type_uses_binding_vlan_as_vni() {
        let m = model(json!({
            "name": "vn1",
            "type": "vlan",
            "bindings": {"leaf1": {"vlan_id": 33}},
        }));
        let mut diags = Diagnostics::new();
        let request = m.request(&mut diags).unwrap();
        assert_eq!(request.vn_id, Some(33));
    }

    #[test]
    fn test_request_reserved_vlan() {
        let mut diags = Diagnostics::new();
        let from_binding = model(json!({
            "name": "vn1",
            "reserve_vlan": true,
            "bindings": {"leaf1": {"vlan_id": 44}},
        }));
        assert_eq!(
            from_binding.request(&mut diags).unwrap().reserved_vlan_id,
            Some(44)
        );

        let explicit = model(json!({"name": "vn1", "reserve_vlan": true, "reserved_vlan_id": 55}));
        assert_eq!(explicit.request(&mut diags).unwrap().reserved_vlan_id, Some(55));

        let off = model(json!({"name": "vn1", "reserve_vlan": false, "reserved_vlan_id": 55}));
        assert_eq!(off.request(&mut diags).unwrap().reserved_vlan_id, None);
    }

    #[test]
    fn test_request_subnet_host_bits_are_masked() {
        let m = model(json!({"name": "vn1", "ipv4_subnet": "10.1.1.7/24"}));
        let mut diags = Diagnostics::new();
        let request = m.request(&mut diags).unwrap();
        assert_eq!(request.ipv4_subnet.as_deref(), Some("10.1.1.0/24"));
    }

    #[test]
    fn test_request_bad_subnet_is_attribute_error() {
        let m = model(json!({"name": "vn1", "ipv6_subnet": "nope"}));
        let mut diags = Diagnostics::new();
        assert!(m.request(&mut diags).is_none());
        assert_eq!(
            diags.errors().next().unwrap().attribute.as_deref(),
            Some("ipv6_subnet")
        );
    }

    #[test]
    fn test_request_rt_policy_when_either_set() {
        let m = model(json!({"name": "vn1", "export_route_targets": ["65000:100"]}));
        let mut diags = Diagnostics::new();
        let body = serde_json::to_value(m.request(&mut diags).unwrap()).unwrap();
        assert_eq!(
            body["rt_policy"],
            json!({"import_RTs": [], "export_RTs": ["65000:100"]})
        );
    }

    #[test]
    fn test_load_api_data() {
        let data: VirtualNetworkData = serde_json::from_value(json!({
            "label": "vn1",
            "vn_type": "vxlan",
            "vn_id": "5000",
            "security_zone_id": "rz1",
            "reserved_vlan_id": 10,
            "dhcp_service": "dhcpServiceEnabled",
            "ipv4_enabled": true,
            "ipv4_subnet": "10.1.1.0/24",
            "ipv6_enabled": false,
            "virtual_gateway_ipv4": "10.1.1.1",
            "virtual_gateway_ipv4_enabled": true,
            "bound_to": [{"system_id": "leaf1", "vlan_id": 10, "access_switch_node_ids": ["a1"]}],
        }))
        .unwrap();
        let mut m = VirtualNetworkModel::default();
        m.load_api_data(&data);
        assert_eq!(m.vni, Value::Value(5000));
        assert_eq!(m.reserve_vlan, Value::Value(true));
        assert_eq!(m.dhcp_service_enabled, Value::Value(true));
        assert!(m.ipv6_subnet.is_null());
        assert!(m.ipv6_virtual_gateway.is_null());
        assert!(m.description.is_null());
        assert!(m.svi_ips.is_null());
        assert!(m.import_route_targets.is_null());
        let bindings = m.bindings.as_option().unwrap();
        assert_eq!(bindings["leaf1"].vlan_id, Value::Value(10));
        assert!(bindings["leaf1"].access_ids.as_option().unwrap().contains("a1"));
    }

    #[test]
    fn test_validate_name_and_description() {
        let diags = validate(json!({
            "name": "bad name!",
            "blueprint_id": "bp",
            "routing_zone_id": "rz",
            "description": "has <angle>",
        }));
        let attrs: Vec<_> = diags.errors().filter_map(|d| d.attribute.clone()).collect();
        assert!(attrs.contains(&"name".to_string()));
        assert!(attrs.contains(&"description".to_string()));
    }

    #[test]
    fn test_validate_routing_zone_required_for_vxlan() {
        let diags = validate(json!({"name": "vn1", "blueprint_id": "bp"}));
        assert!(
            diags
                .errors()
                .any(|d| d.attribute.as_deref() == Some("routing_zone_id"))
        );
        let diags = validate(json!({
            "name": "vn1",
            "blueprint_id": "bp",
            "type": "vlan",
            "bindings": {"leaf1": {"vlan_id": 5}},
        }));
        assert!(!diags.has_error(), "{}", diags);
    }

    #[test]
    fn test_validate_vlan_type_forbids_vni_and_multiple_bindings() {
        let diags = validate(json!({
            "name": "vn1",
            "blueprint_id": "bp",
            "type": "vlan",
            "vni": 5000,
            "bindings": {"leaf1": {}, "leaf2": {}},
        }));
        let attrs: Vec<_> = diags.errors().filter_map(|d| d.attribute.clone()).collect();
        assert!(attrs.contains(&"vni".to_string()));
        assert!(attrs.contains(&"bindings".to_string()));
    }

    #[test]
    fn test_validate_reserved_vlan_rules() {
        let diags = validate(json!({
            "name": "vn1",
            "blueprint_id": "bp",
            "routing_zone_id": "rz",
            "reserved_vlan_id": 10,
        }));
        assert!(diags.has_error());

        let diags = validate(json!({
            "name": "vn1",
            "blueprint_id": "bp",
            "routing_zone_id": "rz",
            "reserve_vlan": true,
        }));
        assert!(diags.errors().any(|d| d.attribute.as_deref() == Some("reserve_vlan")));

        let diags = validate(json!({
            "name": "vn1",
            "blueprint_id": "bp",
            "routing_zone_id": "rz",
            "reserve_vlan": true,
            "reserved_vlan_id": 10,
        }));
        assert!(!diags.has_error(), "{}", diags);
    }

    #[test]
    fn test_validate_gateway_and_mtu() {
        let diags = validate(json!({
            "name": "vn1",
            "blueprint_id": "bp",
            "routing_zone_id": "rz",
            "ipv4_subnet": "10.0.0.0/24",
            "ipv4_virtual_gateway": "10.0.1.1",
            "l3_mtu": 1501,
        }));
        let attrs: Vec<_> = diags.errors().filter_map(|d| d.attribute.clone()).collect();
        assert!(attrs.contains(&"ipv4_virtual_gateway".to_string()));
        assert!(attrs.contains(&"l3_mtu".to_string()));
    }

    #[test]
    fn test_validate_ipv6_subnet_needs_ipv6_connectivity() {
        let diags = validate(json!({
            "name": "vn1",
            "blueprint_id": "bp",
            "routing_zone_id": "rz",
            "ipv6_subnet": "2001:db8::/64",
        }));
        assert!(
            diags
                .errors()
                .any(|d| d.attribute.as_deref() == Some("ipv6_connectivity_enabled"))
        );
    }

    #[test]
    fn test_modify_plan_vni_removed() {
        let prior = json!({"vni": 5000, "had_prior_vni_config": true});
        let mut planned = json!({"vni": 5000, "had_prior_vni_config": UNKNOWN});
        let mut diags = Diagnostics::new();
        VirtualNetwork.modify_plan(&json!({}), Some(&prior), &mut planned, &mut diags);
        assert_eq!(planned["vni"], UNKNOWN);
        assert_eq!(planned["had_prior_vni_config"], false);

        let prior = json!({"vni": 5000, "had_prior_vni_config": false});
        let mut planned = json!({"vni": 5000});
        VirtualNetwork.modify_plan(&json!({}), Some(&prior), &mut planned, &mut diags);
        assert_eq!(planned["vni"], 5000);
    }
}

//! SVI addressing of a virtual network on a single switch.

use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::framework::validators::{one_of, parse_cidr};
use crate::framework::{Attribute, Diagnostics, NestedObject, Value};
use crate::utils::rosetta::{SVI_IPV4_MODES, SVI_IPV6_MODES};

pub const DEFAULT_IPV4_MODE: &str = "enabled";
pub const DEFAULT_IPV6_MODE: &str = "disabled";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SviIp {
    pub system_id: Value<String>,
    pub ipv4_address: Value<String>,
    pub ipv4_mode: Value<String>,
    pub ipv6_address: Value<String>,
    pub ipv6_mode: Value<String>,
}

/// Wire form. Addresses are CIDR strings with the host bits kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSviIp {
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_addr: Option<Ipv4Net>,
    pub ipv4_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_addr: Option<Ipv6Net>,
    pub ipv6_mode: String,
}

pub fn nested_object() -> NestedObject {
    NestedObject::new()
        .attribute(
            "system_id",
            Attribute::string()
                .required()
                .description("Apstra Graph DB node ID of the switch hosting the SVI."),
        )
        .attribute(
            "ipv4_address",
            Attribute::string()
                .optional()
                .validator(parse_cidr(true, false))
                .description("IPv4 address of the SVI in CIDR notation, e.g. 192.0.2.2/24."),
        )
        .attribute(
            "ipv4_mode",
            Attribute::string()
                .optional()
                .computed()
                .default(json!(DEFAULT_IPV4_MODE))
                .validator(one_of(SVI_IPV4_MODES))
                .description("IPv4 SVI mode."),
        )
        .attribute(
            "ipv6_address",
            Attribute::string()
                .optional()
                .validator(parse_cidr(false, true))
                .description("IPv6 address of the SVI in CIDR notation, e.g. 2001:db8::2/64."),
        )
        .attribute(
            "ipv6_mode",
            Attribute::string()
                .optional()
                .computed()
                .default(json!(DEFAULT_IPV6_MODE))
                .validator(one_of(SVI_IPV6_MODES))
                .description("IPv6 SVI mode."),
        )
}

fn check_mode(attribute: &str, value: &str, allowed: &[&str], diags: &mut Diagnostics) -> bool {
    if allowed.contains(&value) {
        return true;
    }
    diags.add_error(
        format!("error parsing {} {:?}", attribute, value),
        format!("must be one of {:?}", allowed),
    );
    false
}

impl SviIp {
    pub fn request(&self, diags: &mut Diagnostics) -> Option<ApiSviIp> {
        let ipv4_mode = self.ipv4_mode.value_or(DEFAULT_IPV4_MODE.to_string());
        let ipv6_mode = self.ipv6_mode.value_or(DEFAULT_IPV6_MODE.to_string());
        if !check_mode("ipv4_mode", &ipv4_mode, SVI_IPV4_MODES, diags)
            || !check_mode("ipv6_mode", &ipv6_mode, SVI_IPV6_MODES, diags)
        {
            return None;
        }

        let mut result = ApiSviIp {
            system_id: self.system_id.value_or_default(),
            ipv4_addr: None,
            ipv4_mode,
            ipv6_addr: None,
            ipv6_mode,
        };

        if let Some(addr) = self.ipv4_address.as_option().filter(|a| !a.is_empty()) {
            match addr.parse::<Ipv4Net>() {
                Ok(net) => result.ipv4_addr = Some(net),
                Err(e) => {
                    diags.add_error(format!("error parsing ipv4_address {:?}", addr), e.to_string());
                    return None;
                }
            }
        }

        if let Some(addr) = self.ipv6_address.as_option().filter(|a| !a.is_empty()) {
            match addr.parse::<Ipv6Net>() {
                Ok(net) => result.ipv6_addr = Some(net),
                Err(e) => {
                    diags.add_error(format!("error parsing ipv6_address {:?}", addr), e.to_string());
                    return None;
                }
            }
        }

        Some(result)
    }

    pub fn load_api_data(&mut self, api: &ApiSviIp) {
        self.system_id = Value::Value(api.system_id.clone());
        self.ipv4_mode = Value::Value(api.ipv4_mode.clone());
        self.ipv6_mode = Value::Value(api.ipv6_mode.clone());
        self.ipv4_address = Value::from_option(api.ipv4_addr.map(|n| n.to_string()));
        self.ipv6_address = Value::from_option(api.ipv6_addr.map(|n| n.to_string()));
    }
}

pub fn load_api_svi_ips(api: &[ApiSviIp]) -> Value<Vec<SviIp>> {
    if api.is_empty() {
        return Value::Null;
    }
    Value::Value(
        api.iter()
            .map(|a| {
                let mut svi = SviIp::default();
                svi.load_api_data(a);
                svi
            })
            .collect(),
    )
}

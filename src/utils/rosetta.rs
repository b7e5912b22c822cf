//! Translation between Apstra API enum strings and the friendlier strings
//! used in configuration.

pub const ASN_ALLOCATION_UNIQUE: &str = "unique";

pub const OVERLAY_CONTROL_PROTOCOL_STATIC: &str = "static";

pub const DEPLOY_MODE_NOT_SET: &str = "not_set";

const JUNOS: &str = "junos";

const JUNOS_SECTIONS: &[(&str, &str)] = &[
    ("system", "top_level_hierarchical"),
    ("interface", "interface_level_hierarchical"),
    ("set_based_system", "top_level_set_delete"),
    ("delete_based_interface", "interface_level_delete"),
    ("set_based_interface", "interface_level_set"),
];

pub const VN_TYPES: &[&str] = &["vlan", "vxlan"];
pub const IMPORT_POLICIES: &[&str] = &["default_only", "all", "extra_only"];
pub const PREFIX_FILTER_ACTIONS: &[&str] = &["permit", "deny"];
pub const RULE_PROTOCOLS: &[&str] = &["icmp", "ip", "tcp", "udp"];
pub const RULE_ACTIONS: &[&str] = &["deny", "deny_log", "permit", "permit_log"];
pub const SVI_IPV4_MODES: &[&str] = &["disabled", "enabled", "forced"];
pub const SVI_IPV6_MODES: &[&str] = &["disabled", "enabled", "forced", "link_local"];
pub const FABRIC_ADDRESSING: &[&str] = &["ipv4", "ipv6", "ipv4_ipv6"];
pub const SYSTEM_ROLES: &[&str] = &[
    "superspine",
    "spine",
    "leaf",
    "access",
    "generic",
    "external_router",
];
pub const SYSTEM_TYPES: &[&str] = &["switch", "server"];
pub const CONFIG_STYLES: &[&str] = &["junos", "nxos", "eos", "sonic"];

pub fn asn_allocation_to_friendly(api: &str) -> String {
    match api {
        "distinct" => ASN_ALLOCATION_UNIQUE.to_string(),
        other => other.to_string(),
    }
}

pub fn asn_allocation_from_friendly(friendly: &str) -> String {
    match friendly {
        ASN_ALLOCATION_UNIQUE => "distinct".to_string(),
        other => other.to_string(),
    }
}

pub fn overlay_control_protocol_to_friendly(api: Option<&str>) -> String {
    match api {
        None | Some("") => OVERLAY_CONTROL_PROTOCOL_STATIC.to_string(),
        Some(other) => other.to_string(),
    }
}

pub fn overlay_control_protocol_from_friendly(friendly: &str) -> Option<String> {
    match friendly {
        OVERLAY_CONTROL_PROTOCOL_STATIC => None,
        other => Some(other.to_string()),
    }
}

/// Junos configlet sections are presented the way the Apstra UI names them.
pub fn configlet_section_to_friendly(section: &str, config_style: &str) -> String {
    if !config_style.eq_ignore_ascii_case(JUNOS) {
        return section.to_string();
    }
    JUNOS_SECTIONS
        .iter()
        .find(|(api, _)| *api == section)
        .map(|(_, friendly)| friendly.to_string())
        .unwrap_or_else(|| "unknown_section".to_string())
}

pub fn configlet_section_from_friendly(friendly: &str, config_style: &str) -> String {
    if !config_style.eq_ignore_ascii_case(JUNOS) {
        return friendly.to_string();
    }
    JUNOS_SECTIONS
        .iter()
        .find(|(_, f)| *f == friendly)
        .map(|(api, _)| api.to_string())
        .unwrap_or_else(|| friendly.to_string())
}

pub fn configlet_sections_for(config_style: &str) -> Vec<String> {
    if config_style.eq_ignore_ascii_case(JUNOS) {
        JUNOS_SECTIONS.iter().map(|(_, f)| f.to_string()).collect()
    } else {
        ["system", "interface", "file", "frr", "ospf"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

pub fn all_configlet_sections() -> Vec<String> {
    let mut out = configlet_sections_for("eos");
    out.extend(configlet_sections_for(JUNOS));
    out
}

/// Rule protocols are upper case in the API.
pub fn protocol_to_friendly(api: &str) -> String {
    api.to_lowercase()
}

pub fn protocol_from_friendly(friendly: &str) -> String {
    friendly.to_uppercase()
}

pub fn deploy_mode_to_friendly(api: Option<&str>) -> String {
    match api {
        None | Some("") | Some("none") => DEPLOY_MODE_NOT_SET.to_string(),
        Some(other) => other.to_string(),
    }
}

pub fn deploy_mode_from_friendly(friendly: &str) -> Option<String> {
    match friendly {
        DEPLOY_MODE_NOT_SET => None,
        other => Some(other.to_string()),
    }
}

//! Attribute validators.
//!
//! Value validators ignore null and unknown values. Cross-attribute validators
//! look at sibling attributes in the enclosing object and skip their check
//! while any sibling involved is still unknown.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{LazyLock, Mutex};

use ipnet::IpNet;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use super::diagnostics::Diagnostics;
use super::value::is_unknown_json;

pub struct ValidationRequest<'a> {
    pub path: &'a str,
    pub value: &'a JsonValue,
    pub siblings: &'a Map<String, JsonValue>,
}

impl<'a> ValidationRequest<'a> {
    fn sibling(&self, name: &str) -> &'a JsonValue {
        self.siblings.get(name).unwrap_or(&JsonValue::Null)
    }

    fn is_set(&self) -> bool {
        !self.value.is_null()
    }

    fn is_concrete(&self) -> bool {
        !self.value.is_null() && !is_unknown_json(self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validator {
    LengthAtLeast(usize),
    LengthBetween(usize, usize),
    RegexMatches { pattern: String, message: String },
    OneOf(Vec<String>),
    ParseCidr { ipv4: bool, ipv6: bool },
    ParseIp { ipv4: bool, ipv6: bool },
    ParseRouteTarget,
    FallsWithinCidr { sibling: String, first_ok: bool, last_ok: bool },
    Between(i64, i64),
    AtLeast(i64),
    MustBeEven,
    AtLeastSibling(String),
    SizeAtLeast(usize),
    SizeAtMost(usize),
    ValueStringsAre(Box<Validator>),
    RequiredWhenValueIs { sibling: String, value: JsonValue },
    RequiredWhenValueNull { sibling: String },
    ForbiddenWhenValueIs { sibling: String, value: JsonValue },
    ConflictsWith(Vec<String>),
    AtLeastOneOf(Vec<String>),
    ExactlyOneOf(Vec<String>),
    AlsoRequiresNOf { n: usize, attributes: Vec<String> },
    WhenValueIs { value: JsonValue, validator: Box<Validator> },
    WhenSiblingIs { sibling: String, value: JsonValue, validator: Box<Validator> },
    ValueAtMustBe { sibling: String, value: JsonValue, null_ok: bool },
    PrefixFilter,
}

pub fn length_at_least(n: usize) -> Validator {
    Validator::LengthAtLeast(n)
}

pub fn length_between(min: usize, max: usize) -> Validator {
    Validator::LengthBetween(min, max)
}

/// Compiled patterns, keyed by source.
static PATTERNS: LazyLock<Mutex<HashMap<String, Regex>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn compiled(pattern: &str) -> Result<Regex, regex::Error> {
    let mut patterns = PATTERNS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(re) = patterns.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    patterns.insert(pattern.to_string(), re.clone());
    Ok(re)
}

pub fn regex_matches(pattern: &str, message: &str) -> Validator {
    Validator::RegexMatches {
        pattern: pattern.to_string(),
        message: message.to_string(),
    }
}

pub fn one_of<S: AsRef<str>>(values: &[S]) -> Validator {
    Validator::OneOf(values.iter().map(|s| s.as_ref().to_string()).collect())
}

pub fn parse_cidr(ipv4: bool, ipv6: bool) -> Validator {
    Validator::ParseCidr { ipv4, ipv6 }
}

pub fn parse_ip(ipv4: bool, ipv6: bool) -> Validator {
    Validator::ParseIp { ipv4, ipv6 }
}

pub fn falls_within_cidr(sibling: &str, first_ok: bool, last_ok: bool) -> Validator {
    Validator::FallsWithinCidr {
        sibling: sibling.to_string(),
        first_ok,
        last_ok,
    }
}

pub fn between(min: i64, max: i64) -> Validator {
    Validator::Between(min, max)
}

pub fn at_least_sibling(sibling: &str) -> Validator {
    Validator::AtLeastSibling(sibling.to_string())
}

pub fn value_strings_are(inner: Validator) -> Validator {
    Validator::ValueStringsAre(Box::new(inner))
}

pub fn required_when_value_is(sibling: &str, value: JsonValue) -> Validator {
    Validator::RequiredWhenValueIs {
        sibling: sibling.to_string(),
        value,
    }
}

pub fn required_when_value_null(sibling: &str) -> Validator {
    Validator::RequiredWhenValueNull {
        sibling: sibling.to_string(),
    }
}

pub fn forbidden_when_value_is(sibling: &str, value: JsonValue) -> Validator {
    Validator::ForbiddenWhenValueIs {
        sibling: sibling.to_string(),
        value,
    }
}

fn names(attrs: &[&str]) -> Vec<String> {
    attrs.iter().map(|s| s.to_string()).collect()
}

pub fn conflicts_with(attrs: &[&str]) -> Validator {
    Validator::ConflictsWith(names(attrs))
}

pub fn at_least_one_of(attrs: &[&str]) -> Validator {
    Validator::AtLeastOneOf(names(attrs))
}

pub fn exactly_one_of(attrs: &[&str]) -> Validator {
    Validator::ExactlyOneOf(names(attrs))
}

pub fn also_requires_n_of(n: usize, attrs: &[&str]) -> Validator {
    Validator::AlsoRequiresNOf {
        n,
        attributes: names(attrs),
    }
}

pub fn when_value_is(value: JsonValue, inner: Validator) -> Validator {
    Validator::WhenValueIs {
        value,
        validator: Box::new(inner),
    }
}

pub fn when_sibling_is(sibling: &str, value: JsonValue, inner: Validator) -> Validator {
    Validator::WhenSiblingIs {
        sibling: sibling.to_string(),
        value,
        validator: Box::new(inner),
    }
}

pub fn value_at_must_be(sibling: &str, value: JsonValue, null_ok: bool) -> Validator {
    Validator::ValueAtMustBe {
        sibling: sibling.to_string(),
        value,
        null_ok,
    }
}

fn render(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

fn is_set(value: &JsonValue) -> bool {
    !value.is_null()
}

impl Validator {
    pub fn description(&self) -> String {
        match self {
            Validator::LengthAtLeast(n) => format!("string length must be at least {}", n),
            Validator::LengthBetween(min, max) => {
                format!("string length must be between {} and {}", min, max)
            }
            Validator::RegexMatches { message, .. } => message.clone(),
            Validator::OneOf(values) => format!("value must be one of: {:?}", values),
            Validator::ParseCidr { ipv4, ipv6 } => match (ipv4, ipv6) {
                (true, false) => "value must be an IPv4 CIDR block".to_string(),
                (false, true) => "value must be an IPv6 CIDR block".to_string(),
                _ => "value must be a CIDR block".to_string(),
            },
            Validator::ParseIp { ipv4, ipv6 } => match (ipv4, ipv6) {
                (true, false) => "value must be an IPv4 address".to_string(),
                (false, true) => "value must be an IPv6 address".to_string(),
                _ => "value must be an IP address".to_string(),
            },
            Validator::ParseRouteTarget => {
                "value must be a route target like <asn>:<nn> or <ipv4>:<nn>".to_string()
            }
            Validator::FallsWithinCidr { sibling, .. } => {
                format!("value must fall within the CIDR block at {:?}", sibling)
            }
            Validator::Between(min, max) => format!("value must be between {} and {}", min, max),
            Validator::AtLeast(min) => format!("value must be at least {}", min),
            Validator::MustBeEven => "value must be an even number".to_string(),
            Validator::AtLeastSibling(sibling) => {
                format!("value must be at least the value of {:?}", sibling)
            }
            Validator::SizeAtLeast(n) => format!("must contain at least {} element(s)", n),
            Validator::SizeAtMost(n) => format!("must contain at most {} element(s)", n),
            Validator::ValueStringsAre(inner) => format!("each element: {}", inner.description()),
            Validator::RequiredWhenValueIs { sibling, value } => format!(
                "value required when {:?} has value {}",
                sibling,
                render(value)
            ),
            Validator::RequiredWhenValueNull { sibling } => {
                format!("value required when {:?} is null", sibling)
            }
            Validator::ForbiddenWhenValueIs { sibling, value } => format!(
                "value not permitted when {:?} has value {}",
                sibling,
                render(value)
            ),
            Validator::ConflictsWith(attrs) => format!("conflicts with {:?}", attrs),
            Validator::AtLeastOneOf(attrs) => format!("at least one of {:?} must be set", attrs),
            Validator::ExactlyOneOf(attrs) => format!("exactly one of {:?} must be set", attrs),
            Validator::AlsoRequiresNOf { n, attributes } => format!(
                "at least {} attribute(s) from {:?} must also be set",
                n, attributes
            ),
            Validator::WhenValueIs { value, validator } => {
                format!("when value is {}: {}", render(value), validator.description())
            }
            Validator::WhenSiblingIs {
                sibling,
                value,
                validator,
            } => format!(
                "when {:?} is {}: {}",
                sibling,
                render(value),
                validator.description()
            ),
            Validator::ValueAtMustBe {
                sibling,
                value,
                null_ok,
            } => format!(
                "{:?} must be {} (null is {})",
                sibling,
                render(value),
                null_ok
            ),
            Validator::PrefixFilter => {
                "ge_mask and le_mask must satisfy prefix length <= ge_mask <= le_mask".to_string()
            }
        }
    }

    pub fn validate(&self, req: &ValidationRequest<'_>, diags: &mut Diagnostics) {
        match self {
            Validator::LengthAtLeast(n) => {
                if let Some(s) = concrete_str(req) {
                    let len = s.chars().count();
                    if len < *n {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Value Length",
                            format!("string length must be at least {}, got: {}", n, len),
                        );
                    }
                }
            }
            Validator::LengthBetween(min, max) => {
                if let Some(s) = concrete_str(req) {
                    let len = s.chars().count();
                    if len < *min || len > *max {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Value Length",
                            format!(
                                "string length must be between {} and {}, got: {}",
                                min, max, len
                            ),
                        );
                    }
                }
            }
            Validator::RegexMatches { pattern, message } => {
                if let Some(s) = concrete_str(req) {
                    match compiled(pattern) {
                        Ok(re) if re.is_match(s) => {}
                        Ok(_) => diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Value Match",
                            format!("{}, got: {:?}", message, s),
                        ),
                        Err(e) => diags.add_error(
                            "invalid validation pattern",
                            format!("pattern {:?}: {}", pattern, e),
                        ),
                    }
                }
            }
            Validator::OneOf(values) => {
                if let Some(s) = concrete_str(req) {
                    if !values.iter().any(|v| v == s) {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Value Match",
                            format!("value must be one of: {:?}, got: {:?}", values, s),
                        );
                    }
                }
            }
            Validator::ParseCidr { ipv4, ipv6 } => {
                if let Some(s) = concrete_str(req) {
                    check_cidr(req.path, s, *ipv4, *ipv6, diags);
                }
            }
            Validator::ParseIp { ipv4, ipv6 } => {
                if let Some(s) = concrete_str(req) {
                    match s.parse::<IpAddr>() {
                        Err(e) => diags.add_attribute_error(
                            req.path,
                            format!("failed to parse IP address {:?}", s),
                            e.to_string(),
                        ),
                        Ok(IpAddr::V6(_)) if *ipv4 && !*ipv6 => diags.add_attribute_error(
                            req.path,
                            "IPv4 address required",
                            format!("got {:?}", s),
                        ),
                        Ok(IpAddr::V4(_)) if *ipv6 && !*ipv4 => diags.add_attribute_error(
                            req.path,
                            "IPv6 address required",
                            format!("got {:?}", s),
                        ),
                        Ok(_) => {}
                    }
                }
            }
            Validator::ParseRouteTarget => {
                if let Some(s) = concrete_str(req) {
                    if !is_route_target(s) {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Route Target",
                            format!(
                                "expected <asn>:<nn> or <ipv4>:<nn>, got: {:?}",
                                s
                            ),
                        );
                    }
                }
            }
            Validator::FallsWithinCidr {
                sibling,
                first_ok,
                last_ok,
            } => {
                let Some(s) = concrete_str(req) else { return };
                let block = req.sibling(sibling);
                if is_unknown_json(block) {
                    return;
                }
                let Some(block) = block.as_str() else { return };
                let Ok(net) = block.parse::<IpNet>() else {
                    diags.add_attribute_error(
                        sibling.as_str(),
                        format!("error parsing CIDR block {:?}", block),
                        "invalid CIDR notation",
                    );
                    return;
                };
                let Ok(ip) = s.parse::<IpAddr>() else { return };
                let net = net.trunc();
                if !net.contains(&ip) {
                    diags.add_attribute_error(
                        req.path,
                        "Invalid Attribute Value",
                        format!("value must fall within {}, got: {}", net, s),
                    );
                } else if ip == net.network() && !first_ok {
                    diags.add_attribute_error(
                        req.path,
                        "Invalid Attribute Value",
                        format!("value must not be the all-zeros address {}", s),
                    );
                } else if ip == net.broadcast() && !last_ok {
                    diags.add_attribute_error(
                        req.path,
                        "Invalid Attribute Value",
                        format!("value must not be the all-ones address {}", s),
                    );
                }
            }
            Validator::Between(min, max) => {
                if let Some(i) = concrete_int(req) {
                    if i < *min || i > *max {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Value",
                            format!("value must be between {} and {}, got: {}", min, max, i),
                        );
                    }
                }
            }
            Validator::AtLeast(min) => {
                if let Some(i) = concrete_int(req) {
                    if i < *min {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Value",
                            format!("value must be at least {}, got: {}", min, i),
                        );
                    }
                }
            }
            Validator::MustBeEven => {
                if let Some(i) = concrete_int(req) {
                    if i % 2 != 0 {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Value",
                            format!("value must be even, got: {}", i),
                        );
                    }
                }
            }
            Validator::AtLeastSibling(sibling) => {
                let (Some(i), Some(other)) = (concrete_int(req), req.sibling(sibling).as_i64())
                else {
                    return;
                };
                if i < other {
                    diags.add_attribute_error(
                        req.path,
                        "Invalid Attribute Value",
                        format!(
                            "value must be at least {} (the value of {:?}), got: {}",
                            other, sibling, i
                        ),
                    );
                }
            }
            Validator::SizeAtLeast(n) => {
                if let Some(len) = collection_len(req) {
                    if len < *n {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Value",
                            format!("must contain at least {} element(s), got: {}", n, len),
                        );
                    }
                }
            }
            Validator::SizeAtMost(n) => {
                if let Some(len) = collection_len(req) {
                    if len > *n {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Value",
                            format!("must contain at most {} element(s), got: {}", n, len),
                        );
                    }
                }
            }
            Validator::ValueStringsAre(inner) => {
                if let Some(items) = req.value.as_array() {
                    for (i, item) in items.iter().enumerate() {
                        let path = format!("{}[{}]", req.path, i);
                        inner.validate(
                            &ValidationRequest {
                                path: &path,
                                value: item,
                                siblings: req.siblings,
                            },
                            diags,
                        );
                    }
                }
            }
            Validator::RequiredWhenValueIs { sibling, value } => {
                let other = req.sibling(sibling);
                if !req.is_set() && !is_unknown_json(other) && other == value {
                    diags.add_attribute_error(
                        req.path,
                        "Missing required argument",
                        format!(
                            "attribute {:?} required when {:?} has value {}",
                            req.path,
                            sibling,
                            render(value)
                        ),
                    );
                }
            }
            Validator::RequiredWhenValueNull { sibling } => {
                if !req.is_set() && req.sibling(sibling).is_null() {
                    diags.add_attribute_error(
                        req.path,
                        "Missing required argument",
                        format!("attribute {:?} required when {:?} is null", req.path, sibling),
                    );
                }
            }
            Validator::ForbiddenWhenValueIs { sibling, value } => {
                let other = req.sibling(sibling);
                if req.is_set() && !is_unknown_json(other) && other == value {
                    diags.add_attribute_error(
                        req.path,
                        "Invalid Attribute Combination",
                        format!(
                            "value not permitted when {:?} has value {}, got {}",
                            sibling,
                            render(value),
                            render(req.value)
                        ),
                    );
                }
            }
            Validator::ConflictsWith(attrs) => {
                if !req.is_set() {
                    return;
                }
                for attr in attrs {
                    if is_set(req.sibling(attr)) {
                        diags.add_attribute_error(
                            req.path,
                            "Invalid Attribute Combination",
                            format!("attribute {:?} cannot be specified when {:?} is specified", attr, req.path),
                        );
                    }
                }
            }
            Validator::AtLeastOneOf(attrs) => {
                if count_set(req, attrs) == 0 {
                    diags.add_attribute_error(
                        req.path,
                        "Invalid Attribute Combination",
                        format!("at least one attribute out of {:?} must be specified", attrs),
                    );
                }
            }
            Validator::ExactlyOneOf(attrs) => {
                let count = count_set(req, attrs);
                if count != 1 {
                    diags.add_attribute_error(
                        req.path,
                        "Invalid Attribute Combination",
                        format!(
                            "exactly one of {:?} must be specified, got {}",
                            attrs, count
                        ),
                    );
                }
            }
            Validator::AlsoRequiresNOf { n, attributes } => {
                if !req.is_set() {
                    return;
                }
                let count = count_set(req, attributes);
                if count < *n {
                    diags.add_attribute_error(
                        req.path,
                        "Invalid Attribute Combination",
                        format!(
                            "at least {} attributes out of {:?} must be set, got {}",
                            n, attributes, count
                        ),
                    );
                }
            }
            Validator::WhenValueIs { value, validator } => {
                if req.value == value {
                    validator.validate(req, diags);
                }
            }
            Validator::WhenSiblingIs {
                sibling,
                value,
                validator,
            } => {
                if req.sibling(sibling) == value {
                    validator.validate(req, diags);
                }
            }
            Validator::ValueAtMustBe {
                sibling,
                value,
                null_ok,
            } => {
                if !req.is_concrete() {
                    return;
                }
                let other = req.sibling(sibling);
                if is_unknown_json(other) || other == value || (other.is_null() && *null_ok) {
                    return;
                }
                diags.add_attribute_error(
                    sibling.as_str(),
                    "Invalid Attribute Combination",
                    format!(
                        "{:?} must be {} when {:?} is set",
                        sibling,
                        render(value),
                        req.path
                    ),
                );
            }
            Validator::PrefixFilter => validate_prefix_filter(req, diags),
        }
    }
}

fn concrete_str<'a>(req: &ValidationRequest<'a>) -> Option<&'a str> {
    if !req.is_concrete() {
        return None;
    }
    req.value.as_str()
}

fn concrete_int(req: &ValidationRequest<'_>) -> Option<i64> {
    if !req.is_concrete() {
        return None;
    }
    req.value.as_i64()
}

fn collection_len(req: &ValidationRequest<'_>) -> Option<usize> {
    match req.value {
        JsonValue::Array(items) => Some(items.len()),
        JsonValue::Object(map) => Some(map.len()),
        _ => None,
    }
}

fn count_set(req: &ValidationRequest<'_>, attrs: &[String]) -> usize {
    attrs.iter().filter(|a| is_set(req.sibling(a))).count()
}

fn check_cidr(path: &str, s: &str, ipv4: bool, ipv6: bool, diags: &mut Diagnostics) {
    match s.parse::<IpNet>() {
        Err(e) => diags.add_attribute_error(
            path,
            format!("failed to parse CIDR block {:?}", s),
            e.to_string(),
        ),
        Ok(IpNet::V6(_)) if ipv4 && !ipv6 => {
            diags.add_attribute_error(path, "IPv4 CIDR block required", format!("got {:?}", s))
        }
        Ok(IpNet::V4(_)) if ipv6 && !ipv4 => {
            diags.add_attribute_error(path, "IPv6 CIDR block required", format!("got {:?}", s))
        }
        Ok(_) => {}
    }
}

pub fn is_route_target(s: &str) -> bool {
    let Some((admin, assigned)) = s.split_once(':') else {
        return false;
    };
    let Ok(assigned) = assigned.parse::<u32>() else {
        return false;
    };
    if let Ok(asn) = admin.parse::<u32>() {
        return asn <= u16::MAX as u32 || assigned <= u16::MAX as u32;
    }
    admin.parse::<Ipv4Addr>().is_ok() && assigned <= u16::MAX as u32
}

fn validate_prefix_filter(req: &ValidationRequest<'_>, diags: &mut Diagnostics) {
    let Some(obj) = req.value.as_object() else { return };
    let Some(prefix) = obj.get("prefix").and_then(|p| p.as_str()) else {
        return;
    };
    let Ok(net) = prefix.parse::<IpNet>() else {
        return;
    };
    let prefix_len = net.prefix_len() as i64;
    let max_len = net.max_prefix_len() as i64;
    let ge = obj.get("ge_mask").and_then(|v| v.as_i64());
    let le = obj.get("le_mask").and_then(|v| v.as_i64());

    if let Some(ge) = ge {
        if ge < prefix_len || ge > max_len {
            diags.add_attribute_error(
                format!("{}.ge_mask", req.path),
                "Invalid Attribute Value",
                format!(
                    "ge_mask must be between {} and {}, got: {}",
                    prefix_len, max_len, ge
                ),
            );
        }
    }
    if let Some(le) = le {
        let floor = ge.unwrap_or(prefix_len);
        if le < floor || le > max_len {
            diags.add_attribute_error(
                format!("{}.le_mask", req.path),
                "Invalid Attribute Value",
                format!("le_mask must be between {} and {}, got: {}", floor, max_len, le),
            );
        }
    }
}

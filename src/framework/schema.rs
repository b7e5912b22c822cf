use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue, json};

use super::diagnostics::Diagnostics;
use super::validators::{ValidationRequest, Validator};
use super::value::{UNKNOWN, is_unknown_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    String,
    Int64,
    Bool,
    /// `map(string)`, for two-level maps.
    StringMap,
}

impl ElementType {
    fn name(&self) -> &'static str {
        match self {
            ElementType::String => "string",
            ElementType::Int64 => "int64",
            ElementType::Bool => "bool",
            ElementType::StringMap => "map(string)",
        }
    }

    fn accepts(&self, value: &JsonValue) -> bool {
        if is_unknown_json(value) || value.is_null() {
            return true;
        }
        match self {
            ElementType::String => value.is_string(),
            ElementType::Int64 => value.is_i64(),
            ElementType::Bool => value.is_boolean(),
            ElementType::StringMap => value
                .as_object()
                .is_some_and(|m| m.values().all(|v| ElementType::String.accepts(v))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeKind {
    String,
    Int64,
    Bool,
    List(ElementType),
    Set(ElementType),
    Map(ElementType),
    SingleNested(NestedObject),
    ListNested(NestedObject),
    SetNested(NestedObject),
    MapNested(NestedObject),
}

impl AttributeKind {
    pub fn type_name(&self) -> String {
        match self {
            AttributeKind::String => "string".to_string(),
            AttributeKind::Int64 => "int64".to_string(),
            AttributeKind::Bool => "bool".to_string(),
            AttributeKind::List(e) => format!("list({})", e.name()),
            AttributeKind::Set(e) => format!("set({})", e.name()),
            AttributeKind::Map(e) => format!("map({})", e.name()),
            AttributeKind::SingleNested(_) => "object".to_string(),
            AttributeKind::ListNested(_) => "list(object)".to_string(),
            AttributeKind::SetNested(_) => "set(object)".to_string(),
            AttributeKind::MapNested(_) => "map(object)".to_string(),
        }
    }

    pub fn nested(&self) -> Option<&NestedObject> {
        match self {
            AttributeKind::SingleNested(n)
            | AttributeKind::ListNested(n)
            | AttributeKind::SetNested(n)
            | AttributeKind::MapNested(n) => Some(n),
            _ => None,
        }
    }

    fn is_set(&self) -> bool {
        matches!(self, AttributeKind::Set(_) | AttributeKind::SetNested(_))
    }

    fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            AttributeKind::String => value.is_string(),
            AttributeKind::Int64 => value.is_i64(),
            AttributeKind::Bool => value.is_boolean(),
            AttributeKind::List(e) | AttributeKind::Set(e) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|i| e.accepts(i))),
            AttributeKind::Map(e) => value
                .as_object()
                .is_some_and(|m| m.values().all(|i| e.accepts(i))),
            AttributeKind::SingleNested(_) => value.is_object(),
            AttributeKind::ListNested(_) | AttributeKind::SetNested(_) => {
                value.as_array().is_some_and(|items| {
                    items.iter().all(|i| i.is_object() || is_unknown_json(i))
                })
            }
            AttributeKind::MapNested(_) => value
                .as_object()
                .is_some_and(|m| m.values().all(|i| i.is_object() || is_unknown_json(i))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanModifier {
    RequiresReplace,
    UseStateForUnknown,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedObject {
    pub attributes: BTreeMap<String, Attribute>,
    pub validators: Vec<Validator>,
}

impl NestedObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, name: &str, attribute: Attribute) -> Self {
        self.attributes.insert(name.to_string(), attribute);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub kind: AttributeKind,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    pub description: String,
    pub default: Option<JsonValue>,
    pub validators: Vec<Validator>,
    pub plan_modifiers: Vec<PlanModifier>,
}

impl Attribute {
    pub fn new(kind: AttributeKind) -> Self {
        Self {
            kind,
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            description: String::new(),
            default: None,
            validators: Vec::new(),
            plan_modifiers: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::new(AttributeKind::String)
    }

    pub fn int64() -> Self {
        Self::new(AttributeKind::Int64)
    }

    pub fn bool() -> Self {
        Self::new(AttributeKind::Bool)
    }

    pub fn list(element: ElementType) -> Self {
        Self::new(AttributeKind::List(element))
    }

    pub fn set(element: ElementType) -> Self {
        Self::new(AttributeKind::Set(element))
    }

    pub fn map(element: ElementType) -> Self {
        Self::new(AttributeKind::Map(element))
    }

    pub fn single_nested(object: NestedObject) -> Self {
        Self::new(AttributeKind::SingleNested(object))
    }

    pub fn list_nested(object: NestedObject) -> Self {
        Self::new(AttributeKind::ListNested(object))
    }

    pub fn set_nested(object: NestedObject) -> Self {
        Self::new(AttributeKind::SetNested(object))
    }

    pub fn map_nested(object: NestedObject) -> Self {
        Self::new(AttributeKind::MapNested(object))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Static default. Only meaningful on optional+computed attributes.
    pub fn default(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn requires_replace(mut self) -> Self {
        self.plan_modifiers.push(PlanModifier::RequiresReplace);
        self
    }

    pub fn use_state_for_unknown(mut self) -> Self {
        self.plan_modifiers.push(PlanModifier::UseStateForUnknown);
        self
    }

    fn read_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    fn has_modifier(&self, modifier: PlanModifier) -> bool {
        self.plan_modifiers.contains(&modifier)
    }

    fn to_json(&self) -> JsonValue {
        let mut out = json!({
            "type": self.kind.type_name(),
            "required": self.required,
            "optional": self.optional,
            "computed": self.computed,
            "sensitive": self.sensitive,
            "description": self.description,
        });
        if let Some(default) = &self.default {
            out["default"] = default.clone();
        }
        if !self.validators.is_empty() {
            out["validators"] = self
                .validators
                .iter()
                .map(|v| JsonValue::String(v.description()))
                .collect();
        }
        if !self.plan_modifiers.is_empty() {
            out["plan_modifiers"] = self
                .plan_modifiers
                .iter()
                .map(|m| JsonValue::String(format!("{:?}", m)))
                .collect();
        }
        if let Some(nested) = self.kind.nested() {
            out["attributes"] = attributes_to_json(&nested.attributes);
        }
        out
    }
}

fn attributes_to_json(attributes: &BTreeMap<String, Attribute>) -> JsonValue {
    let map: Map<String, JsonValue> = attributes
        .iter()
        .map(|(name, attr)| (name.clone(), attr.to_json()))
        .collect();
    JsonValue::Object(map)
}

/// Result of planning a configuration against prior state.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub planned: JsonValue,
    pub requires_replace: Vec<String>,
    pub changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub description: String,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Schema {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(mut self, name: &str, attribute: Attribute) -> Self {
        self.attributes.insert(name.to_string(), attribute);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn to_json(&self) -> JsonValue {
        json!({
            "description": self.description,
            "attributes": attributes_to_json(&self.attributes),
        })
    }

    pub fn validate(&self, config: &JsonValue, diags: &mut Diagnostics) {
        match config.as_object() {
            Some(obj) => validate_object(&self.attributes, obj, "", diags),
            None => diags.add_error(
                "Invalid configuration",
                "configuration must be a JSON object",
            ),
        }
    }

    /// Plans `config` against `prior`. When nothing but computed values would
    /// change, the prior state is returned unchanged.
    pub fn plan(&self, config: &JsonValue, prior: Option<&JsonValue>) -> Plan {
        let empty = Map::new();
        let config_obj = config.as_object().unwrap_or(&empty);
        let prior_obj = prior.and_then(|p| p.as_object());
        let mut requires_replace = Vec::new();
        let planned = JsonValue::Object(plan_object(
            &self.attributes,
            config_obj,
            prior_obj,
            "",
            &mut requires_replace,
        ));

        match prior {
            Some(prior) if matches_prior(&planned, prior) => Plan {
                planned: prior.clone(),
                requires_replace: Vec::new(),
                changed: false,
            },
            _ => Plan {
                planned,
                requires_replace,
                changed: true,
            },
        }
    }

    /// A state document with every attribute present, null where unset.
    pub fn null_state(&self) -> JsonValue {
        JsonValue::Object(
            self.attributes
                .keys()
                .map(|k| (k.clone(), JsonValue::Null))
                .collect(),
        )
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn validate_object(
    attributes: &BTreeMap<String, Attribute>,
    obj: &Map<String, JsonValue>,
    prefix: &str,
    diags: &mut Diagnostics,
) {
    for key in obj.keys() {
        if !attributes.contains_key(key) {
            diags.add_attribute_error(
                join(prefix, key),
                "Unsupported argument",
                format!("an argument named {:?} is not expected here", key),
            );
        }
    }

    for (name, attr) in attributes {
        let path = join(prefix, name);
        let value = obj.get(name).unwrap_or(&JsonValue::Null);

        if attr.required && value.is_null() {
            diags.add_attribute_error(
                &path,
                "Missing required argument",
                format!("the argument {:?} is required, but no definition was found", path),
            );
            continue;
        }
        if attr.read_only() && !value.is_null() {
            diags.add_attribute_error(
                &path,
                "Invalid configuration for read-only attribute",
                format!("cannot set value for {:?}: it is computed by the provider", path),
            );
            continue;
        }
        if !value.is_null() && !is_unknown_json(value) && !attr.kind.accepts(value) {
            diags.add_attribute_error(
                &path,
                "Incorrect attribute value type",
                format!("expected {}, got: {}", attr.kind.type_name(), value),
            );
            continue;
        }
        if attr.kind.is_set() {
            check_set_duplicates(&path, value, diags);
        }

        for validator in &attr.validators {
            validator.validate(
                &ValidationRequest {
                    path: &path,
                    value,
                    siblings: obj,
                },
                diags,
            );
        }

        if let Some(nested) = attr.kind.nested() {
            validate_nested(&attr.kind, nested, value, obj, &path, diags);
        }
    }
}

fn validate_nested(
    kind: &AttributeKind,
    nested: &NestedObject,
    value: &JsonValue,
    parent: &Map<String, JsonValue>,
    path: &str,
    diags: &mut Diagnostics,
) {
    let mut visit = |elem_path: String, elem: &JsonValue| {
        if let Some(elem_obj) = elem.as_object() {
            validate_object(&nested.attributes, elem_obj, &elem_path, diags);
            for validator in &nested.validators {
                validator.validate(
                    &ValidationRequest {
                        path: &elem_path,
                        value: elem,
                        siblings: parent,
                    },
                    diags,
                );
            }
        }
    };

    match kind {
        AttributeKind::SingleNested(_) => visit(path.to_string(), value),
        AttributeKind::ListNested(_) | AttributeKind::SetNested(_) => {
            if let Some(items) = value.as_array() {
                for (i, item) in items.iter().enumerate() {
                    visit(format!("{}[{}]", path, i), item);
                }
            }
        }
        AttributeKind::MapNested(_) => {
            if let Some(items) = value.as_object() {
                for (key, item) in items {
                    visit(format!("{}[{:?}]", path, key), item);
                }
            }
        }
        _ => {}
    }
}

fn check_set_duplicates(path: &str, value: &JsonValue, diags: &mut Diagnostics) {
    let Some(items) = value.as_array() else { return };
    for (i, item) in items.iter().enumerate() {
        if is_unknown_json(item) {
            continue;
        }
        if items[..i].contains(item) {
            diags.add_attribute_error(
                format!("{}[{}]", path, i),
                "Duplicate Set Element",
                format!("this attribute contains duplicate values of: {}", item),
            );
        }
    }
}

fn plan_object(
    attributes: &BTreeMap<String, Attribute>,
    config: &Map<String, JsonValue>,
    prior: Option<&Map<String, JsonValue>>,
    prefix: &str,
    requires_replace: &mut Vec<String>,
) -> Map<String, JsonValue> {
    let mut planned = Map::new();

    for (name, attr) in attributes {
        let path = join(prefix, name);
        let config_value = config.get(name).unwrap_or(&JsonValue::Null);
        let prior_value = prior.and_then(|p| p.get(name));

        let mut value = if !config_value.is_null() {
            plan_nested(attr, config_value, prior_value, &path, requires_replace)
        } else if let Some(default) = &attr.default {
            default.clone()
        } else if attr.computed {
            JsonValue::String(UNKNOWN.to_string())
        } else {
            JsonValue::Null
        };

        if attr.has_modifier(PlanModifier::UseStateForUnknown) && is_unknown_json(&value) {
            if let Some(p) = prior_value.filter(|p| !p.is_null() && !is_unknown_json(p)) {
                value = p.clone();
            }
        }

        if attr.kind.is_set() {
            if let Some(p) = prior_value.filter(|p| same_elements(&value, p)) {
                value = p.clone();
            }
        }

        if attr.has_modifier(PlanModifier::RequiresReplace) && prior.is_some() {
            let before = prior_value.unwrap_or(&JsonValue::Null);
            if !is_unknown_json(&value) && &value != before {
                requires_replace.push(path);
            }
        }

        planned.insert(name.clone(), value);
    }

    planned
}

fn plan_nested(
    attr: &Attribute,
    config_value: &JsonValue,
    prior_value: Option<&JsonValue>,
    path: &str,
    requires_replace: &mut Vec<String>,
) -> JsonValue {
    let Some(nested) = attr.kind.nested() else {
        return config_value.clone();
    };
    let plan_elem = |elem: &JsonValue,
                     prior_elem: Option<&JsonValue>,
                     elem_path: String,
                     rr: &mut Vec<String>| {
        match elem.as_object() {
            Some(obj) => JsonValue::Object(plan_object(
                &nested.attributes,
                obj,
                prior_elem.and_then(|p| p.as_object()),
                &elem_path,
                rr,
            )),
            None => elem.clone(),
        }
    };

    match (&attr.kind, config_value) {
        (AttributeKind::SingleNested(_), _) => {
            plan_elem(config_value, prior_value, path.to_string(), requires_replace)
        }
        (AttributeKind::ListNested(_), JsonValue::Array(items)) => {
            let prior_items = prior_value.and_then(|p| p.as_array());
            JsonValue::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let prior_elem = prior_items.and_then(|p| p.get(i));
                        plan_elem(item, prior_elem, format!("{}[{}]", path, i), requires_replace)
                    })
                    .collect(),
            )
        }
        (AttributeKind::SetNested(_), JsonValue::Array(items)) => JsonValue::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| plan_elem(item, None, format!("{}[{}]", path, i), requires_replace))
                .collect(),
        ),
        (AttributeKind::MapNested(_), JsonValue::Object(items)) => {
            let prior_items = prior_value.and_then(|p| p.as_object());
            JsonValue::Object(
                items
                    .iter()
                    .map(|(key, item)| {
                        let prior_elem = prior_items.and_then(|p| p.get(key));
                        let planned =
                            plan_elem(item, prior_elem, format!("{}[{:?}]", path, key), requires_replace);
                        (key.clone(), planned)
                    })
                    .collect(),
            )
        }
        _ => config_value.clone(),
    }
}

fn same_elements(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_array(), b.as_array()) {
        (Some(a), Some(b)) => {
            a.len() == b.len() && a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
        }
        _ => false,
    }
}

/// Compares a planned value with prior state, treating unknowns in the plan
/// as wildcards.
fn matches_prior(planned: &JsonValue, prior: &JsonValue) -> bool {
    if is_unknown_json(planned) {
        return true;
    }
    match (planned, prior) {
        (JsonValue::Object(p), JsonValue::Object(s)) => {
            p.iter()
                .all(|(k, v)| matches_prior(v, s.get(k).unwrap_or(&JsonValue::Null)))
                && s.iter()
                    .filter(|(k, _)| !p.contains_key(*k))
                    .all(|(_, v)| v.is_null())
        }
        (JsonValue::Array(p), JsonValue::Array(s)) => {
            p.len() == s.len() && p.iter().zip(s).all(|(a, b)| matches_prior(a, b))
        }
        _ => planned == prior,
    }
}

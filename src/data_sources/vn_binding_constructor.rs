use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::DataSource;
use crate::framework::validators::{Validator, between, length_at_least, value_strings_are};
use crate::framework::{Attribute, Diagnostics, ElementType, NestedObject, Schema, Value};
use crate::provider::ProviderContext;
use crate::resources::vn_binding::{VnBinding, construct_bindings};
use crate::resources::{from_doc, to_doc};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VnBindingConstructorModel {
    pub blueprint_id: Value<String>,
    pub vlan_id: Value<i64>,
    pub switch_ids: Value<BTreeSet<String>>,
    pub bindings: Value<Vec<VnBinding>>,
}

fn binding_object() -> NestedObject {
    NestedObject::new()
        .attribute(
            "vlan_id",
            Attribute::int64()
                .computed()
                .description("VLAN ID used on the leaf and its access switches."),
        )
        .attribute(
            "leaf_id",
            Attribute::string()
                .computed()
                .description("ID of the leaf switch or leaf redundancy group."),
        )
        .attribute(
            "access_ids",
            Attribute::set(ElementType::String)
                .computed()
                .description("IDs of access switches or access redundancy groups below the leaf."),
        )
}

pub struct VnBindingConstructor;

#[async_trait]
impl DataSource for VnBindingConstructor {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_virtual_network_binding_constructor"
    }

    fn schema(&self) -> Schema {
        Schema::new(
            "Builds the `bindings` value of a Virtual Network from a set of leaf and access \
             switch IDs, substituting redundancy groups where switches are paired.",
        )
        .attribute(
            "blueprint_id",
            Attribute::string()
                .required()
                .validator(length_at_least(1))
                .description("Apstra Blueprint ID."),
        )
        .attribute(
            "vlan_id",
            Attribute::int64()
                .optional()
                .validator(between(1, 4094))
                .description("VLAN ID applied to every binding. Leave null for automatic assignment."),
        )
        .attribute(
            "switch_ids",
            Attribute::set(ElementType::String)
                .required()
                .validator(Validator::SizeAtLeast(1))
                .validator(value_strings_are(length_at_least(1)))
                .description("IDs of leaf and access switches to which the VN should be bound."),
        )
        .attribute(
            "bindings",
            Attribute::set_nested(binding_object())
                .computed()
                .description("Bindings suitable for the `bindings` attribute of a Virtual Network."),
        )
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        config: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: VnBindingConstructorModel = from_doc(config, diags)?;
        let bindings = construct_bindings(
            &ctx.client,
            &model.blueprint_id.value_or_default(),
            model.vlan_id.as_option().copied(),
            &model.switch_ids.value_or_default(),
            diags,
        )
        .await?;
        model.bindings = Value::Value(bindings);
        to_doc(&model, diags)
    }
}

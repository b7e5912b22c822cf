use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{ObjectId, Resource, api_error, from_doc, to_doc};
use crate::apstra::client::encode;
use crate::apstra::{ApstraClient, ApstraError};
use crate::framework::validators::{
    Validator, exactly_one_of, length_at_least, one_of, regex_matches, required_when_value_null,
};
use crate::framework::value::{list_value_or_null, string_value_or_null};
use crate::framework::{Attribute, Diagnostics, NestedObject, Schema, Value};
use crate::provider::ProviderContext;
use crate::utils::rosetta::{
    CONFIG_STYLES, all_configlet_sections, configlet_section_from_friendly,
    configlet_section_to_friendly, configlet_sections_for,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Generator {
    pub config_style: Value<String>,
    pub section: Value<String>,
    pub template_text: Value<String>,
    pub negation_template_text: Value<String>,
    pub filename: Value<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiGenerator {
    pub config_style: String,
    pub section: String,
    pub template_text: String,
    #[serde(default)]
    pub negation_template_text: String,
    #[serde(default)]
    pub filename: String,
}

impl Generator {
    pub fn request(&self) -> ApiGenerator {
        let config_style = self.config_style.value_or_default();
        ApiGenerator {
            section: configlet_section_from_friendly(&self.section.value_or_default(), &config_style),
            config_style,
            template_text: self.template_text.value_or_default(),
            negation_template_text: self.negation_template_text.value_or_default(),
            filename: self.filename.value_or_default(),
        }
    }

    pub fn load_api_data(&mut self, api: &ApiGenerator) {
        self.config_style = Value::Value(api.config_style.clone());
        self.section = Value::Value(configlet_section_to_friendly(&api.section, &api.config_style));
        self.template_text = Value::Value(api.template_text.clone());
        self.negation_template_text = string_value_or_null(&api.negation_template_text);
        self.filename = string_value_or_null(&api.filename);
    }
}

/// Catalog (design) configlet body, also embedded in blueprint configlets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigletData {
    pub display_name: String,
    #[serde(default)]
    pub generators: Vec<ApiGenerator>,
}

/// `/api/blueprints/{bp}/configlets` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintConfigletData {
    pub label: String,
    pub condition: String,
    pub configlet: ConfigletData,
}

#[derive(Debug, Deserialize)]
struct BlueprintConfigletObject {
    id: String,
    #[serde(flatten)]
    data: BlueprintConfigletData,
}

pub async fn get_catalog_configlet(
    client: &ApstraClient,
    id: &str,
) -> Result<ConfigletData, ApstraError> {
    client
        .get(&format!("/api/design/configlets/{}", encode(id)))
        .await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigletModel {
    pub blueprint_id: Value<String>,
    pub id: Value<String>,
    pub name: Value<String>,
    pub condition: Value<String>,
    pub catalog_configlet_id: Value<String>,
    pub generators: Value<Vec<Generator>>,
}

impl ConfigletModel {
    pub fn request(&self) -> BlueprintConfigletData {
        let name = self.name.value_or_default();
        BlueprintConfigletData {
            label: name.clone(),
            condition: self.condition.value_or_default(),
            configlet: ConfigletData {
                display_name: name,
                generators: self
                    .generators
                    .value_or_default()
                    .iter()
                    .map(Generator::request)
                    .collect(),
            },
        }
    }

    pub fn load_api_data(&mut self, data: &BlueprintConfigletData) {
        self.name = Value::Value(data.label.clone());
        self.condition = Value::Value(data.condition.clone());
        self.generators = load_generators(&data.configlet.generators);
    }

    /// Fills `name` and `generators` from a catalog configlet.
    pub fn load_catalog(&mut self, catalog: &ConfigletData) {
        if !self.name.is_known() {
            self.name = Value::Value(catalog.display_name.clone());
        }
        self.generators = load_generators(&catalog.generators);
    }
}

fn load_generators(api: &[ApiGenerator]) -> Value<Vec<Generator>> {
    list_value_or_null(
        api.iter()
            .map(|a| {
                let mut g = Generator::default();
                g.load_api_data(a);
                g
            })
            .collect(),
    )
}

fn configlets_path(blueprint_id: &str) -> String {
    format!("/api/blueprints/{}/configlets", encode(blueprint_id))
}

fn configlet_path(blueprint_id: &str, id: &str) -> String {
    format!("{}/{}", configlets_path(blueprint_id), encode(id))
}

fn generator_object() -> NestedObject {
    NestedObject::new()
        .attribute(
            "config_style",
            Attribute::string()
                .required()
                .validator(one_of(CONFIG_STYLES))
                .description("Specifies the switch platform."),
        )
        .attribute(
            "section",
            Attribute::string()
                .required()
                .validator(one_of(all_configlet_sections().as_slice()))
                .description("Specifies where in the target device the configlet should be applied."),
        )
        .attribute(
            "template_text",
            Attribute::string()
                .required()
                .validator(length_at_least(1))
                .description("Template Text"),
        )
        .attribute(
            "negation_template_text",
            Attribute::string()
                .optional()
                .validator(length_at_least(1))
                .description("Negation Template Text"),
        )
        .attribute(
            "filename",
            Attribute::string()
                .optional()
                .validator(length_at_least(1))
                .validator(regex_matches(
                    "^/etc/",
                    "Only files in /etc/ are supported for configlets",
                ))
                .description("FileName"),
        )
}

pub struct DatacenterConfiglet;

impl DatacenterConfiglet {
    async fn fetch(
        &self,
        client: &ApstraClient,
        mut model: ConfigletModel,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        let configlet: BlueprintConfigletObject =
            match client.get(&configlet_path(&blueprint_id, &id)).await {
                Ok(configlet) => configlet,
                Err(e) if e.is_not_found() => return None,
                Err(e) => {
                    api_error(diags, &format!("error reading configlet {:?}", id), &e);
                    return None;
                }
            };
        model.id = Value::Value(configlet.id);
        model.load_api_data(&configlet.data);
        to_doc(&model, diags)
    }
}

#[async_trait]
impl Resource for DatacenterConfiglet {
    fn type_name(&self) -> &'static str {
        "apstra_datacenter_configlet"
    }

    fn schema(&self) -> Schema {
        Schema::new("Imports a Configlet into a Datacenter Blueprint.")
            .attribute(
                "blueprint_id",
                Attribute::string()
                    .required()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description("Apstra Blueprint ID."),
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
                    .optional()
                    .computed()
                    .use_state_for_unknown()
                    .validator(length_at_least(1))
                    .validator(required_when_value_null("catalog_configlet_id"))
                    .description("Configlet name. Taken from the catalog Configlet when omitted."),
            )
            .attribute(
                "condition",
                Attribute::string()
                    .required()
                    .validator(length_at_least(1))
                    .description("Condition determining where the Configlet is applied."),
            )
            .attribute(
                "catalog_configlet_id",
                Attribute::string()
                    .optional()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .validator(exactly_one_of(&["catalog_configlet_id", "generators"]))
                    .description("ID of the catalog Configlet to import."),
            )
            .attribute(
                "generators",
                Attribute::list_nested(generator_object())
                    .optional()
                    .computed()
                    .use_state_for_unknown()
                    .validator(Validator::SizeAtLeast(1))
                    .description("Generators organized by network OS."),
            )
    }

    fn validate_config(&self, config: &JsonValue, diags: &mut Diagnostics) {
        let Some(generators) = config["generators"].as_array() else {
            return;
        };
        for (i, generator) in generators.iter().enumerate() {
            let (Some(style), Some(section)) =
                (generator["config_style"].as_str(), generator["section"].as_str())
            else {
                continue;
            };
            let valid = configlet_sections_for(style);
            if !valid.iter().any(|s| s == section) {
                diags.add_attribute_error(
                    format!("generators[{}].section", i),
                    "Invalid Attribute Combination",
                    format!(
                        "section {:?} is not valid with config_style {:?}, must be one of {:?}",
                        section, style, valid
                    ),
                );
            }
        }
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: ConfigletModel = from_doc(plan, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();

        if let Some(catalog_id) = model.catalog_configlet_id.as_option().cloned() {
            match get_catalog_configlet(&ctx.client, &catalog_id).await {
                Ok(catalog) => model.load_catalog(&catalog),
                Err(e) => {
                    api_error(
                        diags,
                        &format!("error fetching catalog configlet {:?}", catalog_id),
                        &e,
                    );
                    return None;
                }
            }
        }

        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let created: ObjectId = match ctx
            .client
            .post(&configlets_path(&blueprint_id), &model.request())
            .await
        {
            Ok(created) => created,
            Err(e) => {
                api_error(diags, "error importing configlet", &e);
                return None;
            }
        };
        tracing::info!(blueprint_id = %blueprint_id, configlet_id = %created.id, "configlet imported");
        model.id = Value::Value(created.id);
        self.fetch(&ctx.client, model, diags).await
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let model: ConfigletModel = from_doc(state, diags)?;
        self.fetch(&ctx.client, model, diags).await
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: ConfigletModel = from_doc(plan, diags)?;
        let prior: ConfigletModel = from_doc(state, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = prior.id.value_or_default();
        if !model.generators.is_known() {
            model.generators = prior.generators.clone();
        }
        if !model.name.is_known() {
            model.name = prior.name.clone();
        }
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        let result: Result<JsonValue, _> = ctx
            .client
            .put(&configlet_path(&blueprint_id, &id), &model.request())
            .await;
        if let Err(e) = result {
            api_error(diags, &format!("error updating configlet {:?}", id), &e);
            return None;
        }
        tracing::info!(blueprint_id = %blueprint_id, configlet_id = %id, "configlet updated");
        model.id = Value::Value(id);
        self.fetch(&ctx.client, model, diags).await
    }

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics) {
        let Some(model) = from_doc::<ConfigletModel>(state, diags) else {
            return;
        };
        let blueprint_id = model.blueprint_id.value_or_default();
        let id = model.id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return;
        }
        match ctx.client.delete(&configlet_path(&blueprint_id, &id)).await {
            Ok(()) => {
                tracing::info!(blueprint_id = %blueprint_id, configlet_id = %id, "configlet deleted")
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => api_error(diags, &format!("error deleting configlet {:?}", id), &e),
        }
    }
}

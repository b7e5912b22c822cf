use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{ObjectId, Resource, api_error, from_doc, to_doc};
use crate::apstra::client::encode;
use crate::framework::validators::length_at_least;
use crate::framework::value::string_value_or_null;
use crate::framework::{Attribute, Diagnostics, Schema, Value};
use crate::provider::ProviderContext;

const TAGS_PATH: &str = "/api/design/tags";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagModel {
    pub id: Value<String>,
    pub name: Value<String>,
    pub description: Value<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagData {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct TagObject {
    id: String,
    #[serde(flatten)]
    data: TagData,
}

impl TagModel {
    pub fn request(&self) -> TagData {
        TagData {
            label: self.name.value_or_default(),
            description: self.description.value_or_default(),
        }
    }

    pub fn load_api_data(&mut self, data: &TagData) {
        self.name = Value::Value(data.label.clone());
        self.description = string_value_or_null(&data.description);
    }
}

fn tag_path(id: &str) -> String {
    format!("{}/{}", TAGS_PATH, encode(id))
}

pub struct Tag;

#[async_trait]
impl Resource for Tag {
    fn type_name(&self) -> &'static str {
        "apstra_tag"
    }

    fn schema(&self) -> Schema {
        Schema::new("Creates a Tag in the Apstra design (global catalog).")
            .attribute(
                "id",
                Attribute::string()
                    .computed()
                    .use_state_for_unknown()
                    .description("Apstra ID of the Tag."),
            )
            .attribute(
                "name",
                Attribute::string()
                    .required()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description("Name of the Tag as seen in the web UI."),
            )
            .attribute(
                "description",
                Attribute::string()
                    .optional()
                    .validator(length_at_least(1))
                    .description("Indicates what the Tag is for."),
            )
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: TagModel = from_doc(plan, diags)?;
        let created: ObjectId = match ctx.client.post(TAGS_PATH, &model.request()).await {
            Ok(created) => created,
            Err(e) => {
                api_error(diags, "error creating new Tag", &e);
                return None;
            }
        };
        tracing::info!(tag_id = %created.id, "tag created");
        model.id = Value::Value(created.id);
        to_doc(&model, diags)
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: TagModel = from_doc(state, diags)?;
        let id = model.id.value_or_default();
        let tag: TagObject = match ctx.client.get(&tag_path(&id)).await {
            Ok(tag) => tag,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                api_error(diags, &format!("error reading Tag {:?}", id), &e);
                return None;
            }
        };
        model.id = Value::Value(tag.id);
        model.load_api_data(&tag.data);
        to_doc(&model, diags)
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: TagModel = from_doc(plan, diags)?;
        let prior: TagModel = from_doc(state, diags)?;
        let id = prior.id.value_or_default();
        let result: Result<JsonValue, _> = ctx.client.put(&tag_path(&id), &model.request()).await;
        if let Err(e) = result {
            api_error(diags, &format!("error updating Tag {:?}", id), &e);
            return None;
        }
        model.id = Value::Value(id);
        to_doc(&model, diags)
    }

    async fn delete(&self, ctx: &ProviderContext, state: &JsonValue, diags: &mut Diagnostics) {
        let Some(model) = from_doc::<TagModel>(state, diags) else {
            return;
        };
        let id = model.id.value_or_default();
        match ctx.client.delete(&tag_path(&id)).await {
            Ok(()) => tracing::info!(tag_id = %id, "tag deleted"),
            Err(e) if e.is_not_found() => {}
            Err(e) => api_error(diags, &format!("error deleting Tag {:?}", id), &e),
        }
    }

    /// Tags are global, so the import ID is the tag ID alone.
    fn import_state(&self, id: &str, _diags: &mut Diagnostics) -> Option<JsonValue> {
        let mut state = self.schema().null_state();
        state["id"] = JsonValue::String(id.to_string());
        Some(state)
    }
}

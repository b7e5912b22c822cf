use std::time::Duration;

use tokio::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use super::blueprint::{BlueprintStatus, blueprint_status};
use super::{Resource, api_error, from_doc, to_doc};
use crate::apstra::client::encode;
use crate::apstra::{ApstraClient, ApstraError};
use crate::framework::validators::length_at_least;
use crate::framework::value::string_value_or_null;
use crate::framework::{Attribute, Diagnostics, Schema, Value};
use crate::provider::ProviderContext;

const DEPLOY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(300);
const DEPLOY_STATE_DEPLOYING: &str = "deploying";
const DEPLOY_STATE_SUCCESS: &str = "success";

const PROVIDER_VERSION_PLACEHOLDER: &str = "$[PROVIDER_VERSION]";
const TERRAFORM_VERSION_PLACEHOLDER: &str = "$[TERRAFORM_VERSION]";

/// Expands version placeholders in a deployment comment.
pub fn render_comment(template: &str) -> String {
    template
        .replace(PROVIDER_VERSION_PLACEHOLDER, env!("CARGO_PKG_VERSION"))
        .replace(
            TERRAFORM_VERSION_PLACEHOLDER,
            concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
        )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployModel {
    pub blueprint_id: Value<String>,
    pub comment: Value<String>,
    pub has_uncommitted_changes: Value<bool>,
    pub revision_active: Value<i64>,
    pub revision_staged: Value<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployRequest {
    pub version: i64,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeployStatus {
    pub state: String,
    pub version: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Revision {
    revision_id: i64,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RevisionList {
    items: Vec<Revision>,
}

fn deploy_path(blueprint_id: &str) -> String {
    format!("/api/blueprints/{}/deploy", encode(blueprint_id))
}

fn report_build_issues(status: &BlueprintStatus, errors_fatal: bool, diags: &mut Diagnostics) {
    if status.build_errors_count > 0 {
        let detail = format!("{} build errors must be resolved", status.build_errors_count);
        if errors_fatal {
            diags.add_error("Blueprint has build errors", detail);
        } else {
            diags.add_warning("Blueprint has build errors", detail);
        }
    }
    if status.build_warnings_count > 0 {
        diags.add_warning(
            "Blueprint has build warnings",
            format!("{} build warnings must be resolved", status.build_warnings_count),
        );
    }
}

/// Polls the deploy status until it leaves `deploying` or `timeout` passes.
async fn wait_for_deploy(
    client: &ApstraClient,
    blueprint_id: &str,
    timeout: Duration,
) -> Result<DeployStatus, ApstraError> {
    let deadline = Instant::now() + timeout;
    loop {
        let status: DeployStatus = client.get(&deploy_path(blueprint_id)).await?;
        if status.state != DEPLOY_STATE_DEPLOYING {
            return Ok(status);
        }
        if Instant::now() + DEPLOY_POLL_INTERVAL > deadline {
            return Err(ApstraError::DeployTimeout {
                blueprint_id: blueprint_id.to_string(),
                seconds: timeout.as_secs(),
            });
        }
        tracing::debug!(blueprint_id = %blueprint_id, version = status.version, "deploy in progress");
        tokio::time::sleep(DEPLOY_POLL_INTERVAL).await;
    }
}

async fn last_deployed_revision(
    client: &ApstraClient,
    blueprint_id: &str,
) -> Result<Option<Revision>, ApstraError> {
    let revisions: RevisionList = client
        .get(&format!("/api/blueprints/{}/revisions", encode(blueprint_id)))
        .await?;
    Ok(revisions
        .items
        .into_iter()
        .max_by_key(|r| r.revision_id))
}

impl DeployModel {
    pub fn request(&self, version: i64) -> DeployRequest {
        DeployRequest {
            version,
            description: render_comment(&self.comment.value_or_default()),
        }
    }

    /// Commits staged changes. Leaves the model untouched when there is
    /// nothing to deploy.
    pub async fn deploy(&mut self, client: &ApstraClient, diags: &mut Diagnostics) {
        let blueprint_id = self.blueprint_id.value_or_default();
        let status = match blueprint_status(client, &blueprint_id).await {
            Ok(status) => status,
            Err(e) => {
                api_error(diags, "error getting Blueprint status", &e);
                return;
            }
        };

        report_build_issues(&status, true, diags);
        if diags.has_error() {
            return;
        }

        if !status.has_uncommitted_changes {
            diags.add_warning(
                "no uncommitted changes",
                format!(
                    "deploy of Blueprint {:?} requested but current revision {} has no uncommitted changes",
                    blueprint_id, status.version
                ),
            );
            self.has_uncommitted_changes = Value::Value(false);
            self.revision_staged = Value::Value(status.version);
            if self.revision_active.is_unknown() {
                self.revision_active = Value::Null;
            }
            return;
        }

        let put: Result<JsonValue, _> = client
            .put(&deploy_path(&blueprint_id), &self.request(status.version))
            .await;
        if let Err(e) = put {
            api_error(diags, "error deploying Blueprint", &e);
            return;
        }

        let result = match wait_for_deploy(client, &blueprint_id, DEPLOY_TIMEOUT).await {
            Ok(result) => result,
            Err(e) => {
                api_error(diags, "error reading Blueprint deploy status", &e);
                return;
            }
        };
        if let Some(error) = &result.error {
            diags.add_error(
                format!("blueprint deployment: status {:?}", result.state),
                error.clone(),
            );
            return;
        }
        if result.state != DEPLOY_STATE_SUCCESS {
            diags.add_error(
                "blueprint deploy status",
                format!("status: {:?}", result.state),
            );
            return;
        }

        tracing::info!(blueprint_id = %blueprint_id, version = result.version, "blueprint deployed");
        self.revision_active = Value::Value(result.version);
        self.revision_staged = Value::Value(result.version);
        self.has_uncommitted_changes = Value::Value(false);
    }

    pub async fn read(&mut self, client: &ApstraClient, diags: &mut Diagnostics) -> bool {
        let blueprint_id = self.blueprint_id.value_or_default();
        let status = match blueprint_status(client, &blueprint_id).await {
            Ok(status) => status,
            Err(e) if e.is_not_found() => return false,
            Err(e) => {
                api_error(diags, "error getting Blueprint status", &e);
                return false;
            }
        };
        report_build_issues(&status, false, diags);
        self.has_uncommitted_changes = Value::Value(status.has_uncommitted_changes);

        match last_deployed_revision(client, &blueprint_id).await {
            Ok(Some(revision)) => {
                // state keeps the template as long as it renders to the deployed comment
                let template_matches = self
                    .comment
                    .as_option()
                    .is_some_and(|c| render_comment(c) == revision.description);
                if !template_matches {
                    self.comment = string_value_or_null(&revision.description);
                }
                self.revision_active = Value::Value(revision.revision_id);
                self.revision_staged = Value::Value(status.version);
            }
            Ok(None) => {}
            Err(e) => diags.add_warning(
                format!(
                    "error reading blueprint {:?} revision {}",
                    blueprint_id, status.version
                ),
                e.to_string(),
            ),
        }
        true
    }
}

pub struct BlueprintDeployment;

#[async_trait]
impl Resource for BlueprintDeployment {
    fn type_name(&self) -> &'static str {
        "apstra_blueprint_deployment"
    }

    fn schema(&self) -> Schema {
        Schema::new("Commits the staged changes of a Blueprint.")
            .attribute(
                "blueprint_id",
                Attribute::string()
                    .required()
                    .requires_replace()
                    .validator(length_at_least(1))
                    .description("ID of the Blueprint to deploy."),
            )
            .attribute(
                "comment",
                Attribute::string()
                    .optional()
                    .validator(length_at_least(1))
                    .description(
                        "Revision comment. $[PROVIDER_VERSION] and $[TERRAFORM_VERSION] are expanded.",
                    ),
            )
            .attribute(
                "has_uncommitted_changes",
                Attribute::bool()
                    .computed()
                    .description("True when the staging Blueprint differs from the deployed one."),
            )
            .attribute(
                "revision_active",
                Attribute::int64()
                    .computed()
                    .description("Revision of the deployed Blueprint."),
            )
            .attribute(
                "revision_staged",
                Attribute::int64()
                    .computed()
                    .description("Revision of the staging Blueprint."),
            )
    }

    async fn create(
        &self,
        ctx: &ProviderContext,
        plan: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: DeployModel = from_doc(plan, diags)?;
        let blueprint_id = model.blueprint_id.value_or_default();
        if !ctx.lock_blueprint(&blueprint_id, diags).await {
            return None;
        }
        model.deploy(&ctx.client, diags).await;
        if diags.has_error() {
            return None;
        }
        to_doc(&model, diags)
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        state: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: DeployModel = from_doc(state, diags)?;
        if !model.read(&ctx.client, diags).await {
            return None;
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
        let mut model: DeployModel = from_doc(plan, diags)?;
        let prior: DeployModel = from_doc(state, diags)?;
        model.revision_active = prior.revision_active;
        self.create(ctx, &to_doc(&model, diags)?, diags).await
    }

    async fn delete(&self, _ctx: &ProviderContext, state: &JsonValue, _diags: &mut Diagnostics) {
        tracing::info!(blueprint_id = %state["blueprint_id"], "deployment removed from state only");
    }

    fn import_state(&self, id: &str, _diags: &mut Diagnostics) -> Option<JsonValue> {
        let mut state = self.schema().null_state();
        state["blueprint_id"] = json!(id);
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_comment() {
        let rendered = render_comment("deployed by apstra-tf $[PROVIDER_VERSION]");
        assert_eq!(
            rendered,
            format!("deployed by apstra-tf {}", env!("CARGO_PKG_VERSION"))
        );
        assert!(!render_comment("$[TERRAFORM_VERSION]").contains("$["));
        assert_eq!(render_comment("plain"), "plain");
    }

    #[test]
    fn test_request() {
        let model = DeployModel {
            blueprint_id: Value::Value("bp".to_string()),
            comment: Value::Value("rev".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(model.request(7)).unwrap(),
            json!({"version": 7, "description": "rev"})
        );
    }

    #[tokio::test]
    async fn test_wait_for_deploy_gives_up() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/blueprints/bp1/deploy"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"state": "deploying", "version": 7})),
            )
            .mount(&mock_server)
            .await;
        let client = ApstraClient::with_base_url(
            mock_server.uri(),
            "admin".to_string(),
            "admin".to_string(),
        )
        .unwrap();

        let result = wait_for_deploy(&client, "bp1", Duration::from_secs(1)).await;
        match result {
            Err(ApstraError::DeployTimeout { blueprint_id, seconds }) => {
                assert_eq!(blueprint_id, "bp1");
                assert_eq!(seconds, 1);
            }
            other => panic!("expected DeployTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_build_errors_are_fatal_only_on_deploy() {
        let status = BlueprintStatus {
            build_errors_count: 2,
            build_warnings_count: 1,
            ..Default::default()
        };
        let mut diags = Diagnostics::new();
        report_build_issues(&status, true, &mut diags);
        assert_eq!(diags.errors().count(), 1);
        assert_eq!(diags.warnings().count(), 1);

        let mut diags = Diagnostics::new();
        report_build_issues(&status, false, &mut diags);
        assert!(!diags.has_error());
        assert_eq!(diags.warnings().count(), 2);
    }
}

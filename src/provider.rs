use serde_json::Value as JsonValue;

use crate::apstra::{ApstraClient, BlueprintMutexes};
use crate::config::ProviderConfig;
use crate::data_sources::DataSource;
use crate::error::ProviderError;
use crate::framework::{Diagnostics, Plan};
use crate::resources::Resource;

/// Everything a resource or data source needs to talk to Apstra.
#[derive(Debug)]
pub struct ProviderContext {
    pub client: ApstraClient,
    pub mutexes: BlueprintMutexes,
}

impl ProviderContext {
    pub fn new(client: ApstraClient, config: &ProviderConfig) -> Self {
        let mutexes = BlueprintMutexes::new(
            client.clone(),
            !config.blueprint_mutex_disabled,
            config.blueprint_mutex_timeout,
        );
        Self { client, mutexes }
    }

    /// NOTE: Primarily used for testing with mock servers.
    pub fn without_mutex(client: ApstraClient) -> Self {
        let mutexes =
            BlueprintMutexes::new(client.clone(), false, crate::config::DEFAULT_MUTEX_TIMEOUT);
        Self { client, mutexes }
    }

    pub async fn connect(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = ApstraClient::new(config)?;
        client.login().await?;
        Ok(Self::new(client, config))
    }

    /// Takes the blueprint mutex. Returns false after reporting an error.
    pub async fn lock_blueprint(&self, blueprint_id: &str, diags: &mut Diagnostics) -> bool {
        match self.mutexes.lock(blueprint_id).await {
            Ok(()) => true,
            Err(e) => {
                diags.add_error("Failed to lock blueprint mutex", e.to_string());
                false
            }
        }
    }

    /// Releases held mutexes and ends the API session.
    pub async fn close(&self, diags: &mut Diagnostics) {
        if let Err(e) = self.mutexes.unlock_all().await {
            diags.add_warning("Failed to release blueprint mutex", e.to_string());
        }
        if let Err(e) = self.client.logout().await {
            diags.add_warning("Failed to log out of Apstra", e.to_string());
        }
    }
}

pub fn validate_resource(resource: &dyn Resource, config: &JsonValue, diags: &mut Diagnostics) {
    resource.schema().validate(config, diags);
    if !diags.has_error() {
        resource.validate_config(config, diags);
    }
}

/// Validates and plans `config` against `prior`. Returns `None` when the
/// configuration is invalid.
pub fn plan_resource(
    resource: &dyn Resource,
    config: &JsonValue,
    prior: Option<&JsonValue>,
    diags: &mut Diagnostics,
) -> Option<Plan> {
    validate_resource(resource, config, diags);
    if diags.has_error() {
        return None;
    }
    let mut plan = resource.schema().plan(config, prior);
    resource.modify_plan(config, prior, &mut plan.planned, diags);
    // the resource hook may turn an otherwise unchanged plan into a change
    if let Some(prior) = prior
        && !plan.changed
        && plan.planned != *prior
    {
        plan.changed = true;
    }
    Some(plan)
}

/// Drives a full create, update or replace for one resource and returns the
/// new state.
pub async fn apply_resource(
    ctx: &ProviderContext,
    resource: &dyn Resource,
    config: &JsonValue,
    prior: Option<&JsonValue>,
    diags: &mut Diagnostics,
) -> Option<JsonValue> {
    let plan = plan_resource(resource, config, prior, diags)?;
    if diags.has_error() {
        return None;
    }

    let kind = resource.type_name();
    match prior {
        None => {
            tracing::info!(resource = kind, "creating");
            resource.create(ctx, &plan.planned, diags).await
        }
        Some(prior) if !plan.changed => {
            tracing::info!(resource = kind, "no changes");
            Some(prior.clone())
        }
        Some(prior) if !plan.requires_replace.is_empty() => {
            tracing::info!(resource = kind, attributes = ?plan.requires_replace, "replacing");
            resource.delete(ctx, prior, diags).await;
            if diags.has_error() {
                return Some(prior.clone());
            }
            resource.create(ctx, &plan.planned, diags).await
        }
        Some(prior) => {
            tracing::info!(resource = kind, "updating");
            resource.update(ctx, &plan.planned, prior, diags).await
        }
    }
}

pub async fn read_resource(
    ctx: &ProviderContext,
    resource: &dyn Resource,
    state: &JsonValue,
    diags: &mut Diagnostics,
) -> Option<JsonValue> {
    let refreshed = resource.read(ctx, state, diags).await;
    if refreshed.is_none() && !diags.has_error() {
        tracing::info!(resource = resource.type_name(), "object is gone, removing from state");
    }
    refreshed
}

pub async fn destroy_resource(
    ctx: &ProviderContext,
    resource: &dyn Resource,
    state: &JsonValue,
    diags: &mut Diagnostics,
) {
    tracing::info!(resource = resource.type_name(), "destroying");
    resource.delete(ctx, state, diags).await;
}

pub async fn read_data_source(
    ctx: &ProviderContext,
    data_source: &dyn DataSource,
    config: &JsonValue,
    diags: &mut Diagnostics,
) -> Option<JsonValue> {
    let schema = data_source.schema();
    schema.validate(config, diags);
    if diags.has_error() {
        return None;
    }
    data_source.read(ctx, config, diags).await
}

/// Builds the import skeleton and, with a context, refreshes it from the API.
pub async fn import_resource(
    ctx: Option<&ProviderContext>,
    resource: &dyn Resource,
    id: &str,
    diags: &mut Diagnostics,
) -> Option<JsonValue> {
    let skeleton = resource.import_state(id, diags)?;
    let Some(ctx) = ctx else {
        return Some(skeleton);
    };
    let state = resource.read(ctx, &skeleton, diags).await;
    if state.is_none() && !diags.has_error() {
        diags.add_error(
            "Cannot import non-existent remote object",
            format!("{} {:?} was not found", resource.type_name(), id),
        );
    }
    state
}

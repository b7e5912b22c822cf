pub mod args;

pub use args::{Cli, Command, GlobalArgs};

use std::path::Path;

use serde_json::Value as JsonValue;

use crate::config::ProviderConfig;
use crate::data_sources::{DATA_SOURCE_TYPES, get_data_source};
use crate::error::ProviderError;
use crate::framework::Diagnostics;
use crate::output::{TypeRow, schema_tree, types_table};
use crate::provider::{
    ProviderContext, apply_resource, destroy_resource, import_resource, plan_resource,
    read_data_source, read_resource, validate_resource,
};
use crate::resources::{RESOURCE_TYPES, get_resource};
use crate::terraform::state::{import_block, load_document, save_document};

fn print_json(doc: &JsonValue) -> Result<(), ProviderError> {
    println!("{}", serde_json::to_string_pretty(doc)?);
    Ok(())
}

fn load_optional(path: Option<&Path>) -> Result<Option<JsonValue>, ProviderError> {
    path.map(load_document).transpose()
}

async fn connect(global: &GlobalArgs) -> Result<ProviderContext, ProviderError> {
    let config = ProviderConfig::resolve(global.overrides())?;
    tracing::debug!(?config, "connecting");
    ProviderContext::connect(&config).await
}

fn list_types() -> String {
    let mut rows = Vec::new();
    for name in RESOURCE_TYPES {
        if let Ok(resource) = get_resource(name) {
            rows.push(TypeRow {
                name: name.to_string(),
                kind: "resource",
                description: resource.schema().description,
            });
        }
    }
    for name in DATA_SOURCE_TYPES {
        if let Ok(data_source) = get_data_source(name) {
            rows.push(TypeRow {
                name: name.to_string(),
                kind: "data source",
                description: data_source.schema().description,
            });
        }
    }
    types_table(rows)
}

/// Resources shadow data sources of the same name.
fn schema_for(type_name: &str) -> Result<crate::framework::Schema, ProviderError> {
    match get_resource(type_name) {
        Ok(resource) => Ok(resource.schema()),
        Err(_) => get_data_source(type_name).map(|ds| ds.schema()),
    }
}

/// Runs one command. Problems the API or the configuration report land in
/// the returned diagnostics; `Err` is reserved for failures that stop the
/// command before it can produce any.
pub async fn run(cli: Cli) -> Result<Diagnostics, ProviderError> {
    let mut diags = Diagnostics::new();
    let global = cli.global;

    match cli.command {
        Command::List => println!("{}", list_types()),

        Command::Schema(args) => {
            let schema = schema_for(&args.type_name)?;
            if args.tree {
                println!("{}", schema_tree(&args.type_name, &schema));
            } else {
                print_json(&schema.to_json())?;
            }
        }

        Command::Validate(args) => {
            let resource = get_resource(&args.type_name)?;
            let config = load_document(&args.config)?;
            validate_resource(resource.as_ref(), &config, &mut diags);
            if !diags.has_error() {
                tracing::info!(resource = %args.type_name, "configuration is valid");
            }
        }

        Command::Plan(args) => {
            let resource = get_resource(&args.type_name)?;
            let config = load_document(&args.config)?;
            let prior = load_optional(args.state.as_deref())?;
            if let Some(plan) = plan_resource(resource.as_ref(), &config, prior.as_ref(), &mut diags)
            {
                print_json(&serde_json::json!({
                    "planned": plan.planned,
                    "changed": plan.changed,
                    "requires_replace": plan.requires_replace,
                }))?;
            }
        }

        Command::Apply(args) => {
            let resource = get_resource(&args.type_name)?;
            let config = load_document(&args.config)?;
            let prior = load_optional(args.state.as_deref())?;
            let ctx = connect(&global).await?;
            let state =
                apply_resource(&ctx, resource.as_ref(), &config, prior.as_ref(), &mut diags).await;
            ctx.close(&mut diags).await;
            if let Some(state) = state {
                match args.out.as_deref().or(args.state.as_deref()) {
                    Some(path) => save_document(path, &state)?,
                    None => print_json(&state)?,
                }
            }
        }

        Command::Read(args) => {
            let resource = get_resource(&args.type_name)?;
            let state = load_document(&args.state)?;
            let ctx = connect(&global).await?;
            let refreshed = read_resource(&ctx, resource.as_ref(), &state, &mut diags).await;
            ctx.close(&mut diags).await;
            match refreshed {
                Some(refreshed) => print_json(&refreshed)?,
                None if !diags.has_error() => {
                    diags.add_warning(
                        "Resource not found",
                        format!("{} no longer exists and should be removed from state", args.type_name),
                    );
                }
                None => {}
            }
        }

        Command::Destroy(args) => {
            let resource = get_resource(&args.type_name)?;
            let state = load_document(&args.state)?;
            let ctx = connect(&global).await?;
            destroy_resource(&ctx, resource.as_ref(), &state, &mut diags).await;
            ctx.close(&mut diags).await;
        }

        Command::Data(args) => {
            let data_source = get_data_source(&args.type_name)?;
            let config = load_document(&args.config)?;
            let ctx = connect(&global).await?;
            let result = read_data_source(&ctx, data_source.as_ref(), &config, &mut diags).await;
            ctx.close(&mut diags).await;
            if let Some(result) = result {
                print_json(&result)?;
            }
        }

        Command::Import(args) => {
            let resource = get_resource(&args.type_name)?;
            if args.read {
                let ctx = connect(&global).await?;
                let state = import_resource(Some(&ctx), resource.as_ref(), &args.id, &mut diags).await;
                ctx.close(&mut diags).await;
                if let Some(state) = state {
                    print_json(&state)?;
                }
            } else if import_resource(None, resource.as_ref(), &args.id, &mut diags)
                .await
                .is_some()
            {
                print!("{}", import_block(&args.type_name, &args.name, &args.id));
            }
        }
    }

    Ok(diags)
}

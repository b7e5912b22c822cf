use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{ConfigOverrides, ENV_PASS, ENV_URL, ENV_USER};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Apstra URL, optionally with embedded credentials
    #[arg(long, global = true, env = ENV_URL)]
    pub url: Option<String>,

    #[arg(long, global = true, env = ENV_USER)]
    pub username: Option<String>,

    #[arg(long, global = true, env = ENV_PASS, hide_env_values = true, hide = true)]
    pub password: Option<String>,

    #[arg(long, global = true)]
    pub tls_validation_disabled: bool,

    #[arg(long, global = true)]
    pub blueprint_mutex_disabled: bool,

    /// JSON provider config file
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            tls_validation_disabled: self.tls_validation_disabled,
            blueprint_mutex_disabled: self.blueprint_mutex_disabled,
            config_file: self.config_file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List resource and data source types
    List,
    /// Show the schema of a resource or data source
    Schema(SchemaArgs),
    /// Validate a resource configuration
    Validate(ConfigArgs),
    /// Plan a resource configuration against optional prior state
    Plan(PlanArgs),
    /// Create, update or replace a resource
    Apply(ApplyArgs),
    /// Refresh resource state from Apstra
    Read(StateArgs),
    /// Delete a resource
    Destroy(StateArgs),
    /// Read a data source
    Data(ConfigArgs),
    /// Print a Terraform import block
    Import(ImportArgs),
}

#[derive(clap::Args, Debug)]
pub struct SchemaArgs {
    pub type_name: String,

    /// Render as a tree instead of JSON
    #[arg(long)]
    pub tree: bool,
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    pub type_name: String,

    #[arg(long)]
    pub config: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct PlanArgs {
    pub type_name: String,

    #[arg(long)]
    pub config: PathBuf,

    #[arg(long)]
    pub state: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ApplyArgs {
    pub type_name: String,

    #[arg(long)]
    pub config: PathBuf,

    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Where to write the new state. Defaults to --state, else stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct StateArgs {
    pub type_name: String,

    #[arg(long)]
    pub state: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    pub type_name: String,

    #[arg(long)]
    pub id: String,

    /// Resource name used in the import block
    #[arg(long, default_value = "this")]
    pub name: String,

    /// Also fetch the object and print its state
    #[arg(long)]
    pub read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;

    fn with_env<T>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> T) -> T {
        let backups: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(k, _)| (k.to_string(), std::env::var(k).ok()))
            .collect();
        unsafe {
            for (k, v) in vars {
                match v {
                    Some(v) => std::env::set_var(k, v),
                    None => std::env::remove_var(k),
                }
            }
        }
        let result = f();
        unsafe {
            for (k, v) in backups {
                match v {
                    Some(v) => std::env::set_var(&k, v),
                    None => std::env::remove_var(&k),
                }
            }
        }
        result
    }

    #[test]
    #[serial]
    fn test_url_from_flag() {
        let cli = with_env(&[(ENV_URL, None)], || {
            Cli::parse_from(["apstra-tf", "--url=https://apstra.local", "list"])
        });
        assert_eq!(cli.global.url.as_deref(), Some("https://apstra.local"));
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    #[serial]
    fn test_credentials_from_env() {
        let cli = with_env(
            &[(ENV_USER, Some("env_user")), (ENV_PASS, Some("env_pass"))],
            || Cli::parse_from(["apstra-tf", "list"]),
        );
        assert_eq!(cli.global.username.as_deref(), Some("env_user"));
        assert_eq!(cli.global.password.as_deref(), Some("env_pass"));
    }

    #[test]
    #[serial]
    fn test_flag_takes_precedence_over_env() {
        let cli = with_env(&[(ENV_USER, Some("env_user"))], || {
            Cli::parse_from(["apstra-tf", "list", "--username=cli_user"])
        });
        assert_eq!(cli.global.username.as_deref(), Some("cli_user"));
    }

    #[test]
    #[serial]
    fn test_no_credentials() {
        let cli = with_env(
            &[(ENV_URL, None), (ENV_USER, None), (ENV_PASS, None)],
            || Cli::parse_from(["apstra-tf", "list"]),
        );
        assert!(cli.global.url.is_none());
        assert!(cli.global.username.is_none());
        assert!(cli.global.password.is_none());
    }

    #[test]
    fn test_plan_args() {
        let cli = Cli::parse_from([
            "apstra-tf",
            "plan",
            "apstra_tag",
            "--config",
            "tag.json",
            "--state",
            "state.json",
        ]);
        let Command::Plan(args) = cli.command else {
            panic!("Expected Plan command, got {:?}", cli.command);
        };
        assert_eq!(args.type_name, "apstra_tag");
        assert_eq!(args.config, PathBuf::from("tag.json"));
        assert_eq!(args.state, Some(PathBuf::from("state.json")));
    }

    #[test]
    fn test_import_defaults() {
        let cli = Cli::parse_from(["apstra-tf", "import", "apstra_tag", "--id", "t1"]);
        let Command::Import(args) = cli.command else {
            panic!("Expected Import command, got {:?}", cli.command);
        };
        assert_eq!(args.name, "this");
        assert!(!args.read);
    }

    #[test]
    fn test_schema_tree_flag() {
        let cli = Cli::parse_from(["apstra-tf", "schema", "apstra_tag", "--tree"]);
        let Command::Schema(args) = cli.command else {
            panic!("Expected Schema command, got {:?}", cli.command);
        };
        assert!(args.tree);
    }

    #[test]
    fn test_overrides_carry_flags() {
        let cli = Cli::parse_from([
            "apstra-tf",
            "--tls-validation-disabled",
            "--blueprint-mutex-disabled",
            "--config-file=/tmp/p.json",
            "list",
        ]);
        let overrides = cli.global.overrides();
        assert!(overrides.tls_validation_disabled);
        assert!(overrides.blueprint_mutex_disabled);
        assert_eq!(overrides.config_file, Some(PathBuf::from("/tmp/p.json")));
    }
}

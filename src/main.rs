use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use apstra_tf::cli::{self, Cli};
use apstra_tf::config::ENV_LOG;
use apstra_tf::output::diagnostics_table;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;

fn init_tracing() -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    match std::env::var(ENV_LOG).ok().filter(|p| !p.is_empty()) {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .wrap_err_with(|| format!("opening log file {}", path))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    init_tracing()?;

    let cli = Cli::parse();
    let diags = cli::run(cli).await?;

    let table = diagnostics_table(&diags);
    if !table.is_empty() {
        eprintln!("{}", table);
    }

    if diags.has_error() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

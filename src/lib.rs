//! apstra-tf - Terraform provider core for Juniper Apstra
//!
//! Resource and data source implementations that manage Apstra blueprints
//! through its REST and graph query APIs, driven by JSON documents.

pub mod apstra;
pub mod cli;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod framework;
pub mod output;
pub mod provider;
pub mod resources;
pub mod terraform;
pub mod utils;

pub use apstra::{ApstraClient, ApstraError};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use framework::{Diagnostics, Schema, Value};
pub use provider::ProviderContext;

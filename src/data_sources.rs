pub mod api_token;
pub mod routing_policies;
pub mod security_policies;
pub mod systems;
pub mod vn_binding_constructor;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::ProviderError;
use crate::framework::{Diagnostics, Schema};
use crate::provider::ProviderContext;

/// A read-only lookup. `read` receives the validated configuration and
/// returns it with the computed attributes filled in.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    async fn read(
        &self,
        ctx: &ProviderContext,
        config: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue>;
}

pub const DATA_SOURCE_TYPES: &[&str] = &[
    "apstra_api_token",
    "apstra_datacenter_routing_policies",
    "apstra_datacenter_security_policies",
    "apstra_datacenter_systems",
    "apstra_datacenter_virtual_network_binding_constructor",
];

pub fn get_data_source(name: &str) -> Result<Box<dyn DataSource>, ProviderError> {
    match name {
        "apstra_api_token" => Ok(Box::new(api_token::ApiTokenSource)),
        "apstra_datacenter_routing_policies" => {
            Ok(Box::new(routing_policies::RoutingPolicies))
        }
        "apstra_datacenter_security_policies" => {
            Ok(Box::new(security_policies::SecurityPolicies))
        }
        "apstra_datacenter_systems" => Ok(Box::new(systems::Systems)),
        "apstra_datacenter_virtual_network_binding_constructor" => {
            Ok(Box::new(vn_binding_constructor::VnBindingConstructor))
        }
        other => Err(ProviderError::UnknownDataSource(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_data_source_known_types() {
        for name in DATA_SOURCE_TYPES {
            let data_source = get_data_source(name).unwrap();
            assert_eq!(data_source.type_name(), *name);
        }
    }

    #[test]
    fn test_get_data_source_unknown() {
        assert!(matches!(
            get_data_source("apstra_bogus"),
            Err(ProviderError::UnknownDataSource(_))
        ));
    }
}

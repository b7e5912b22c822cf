use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::DataSource;
use crate::apstra::ApiToken;
use crate::apstra::token::DEFAULT_WARN_SECONDS;
use crate::framework::validators::Validator;
use crate::framework::{Attribute, Diagnostics, Schema, Value};
use crate::provider::ProviderContext;
use crate::resources::{from_doc, to_doc};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiTokenModel {
    pub value: Value<String>,
    pub user_name: Value<String>,
    pub session_id: Value<String>,
    pub expires_at: Value<i64>,
    pub warn_seconds: Value<i64>,
}

impl ApiTokenModel {
    fn load_token(&mut self, token: ApiToken) {
        self.value = Value::Value(token.value);
        self.user_name = Value::Value(token.user_name);
        self.session_id = Value::Value(token.session_id);
        self.expires_at = Value::Value(token.expires_at);
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Adds the expiry warning when `token` is about to lapse.
fn warn_on_expiry(token: &ApiToken, warn_seconds: i64, now: i64, diags: &mut Diagnostics) {
    if token.expires_within(warn_seconds, now) {
        diags.add_warning(
            "API token expiration warning",
            format!(
                "API token for user {:?} expires in {} seconds",
                token.user_name,
                token.expires_at - now
            ),
        );
    }
}

pub struct ApiTokenSource;

#[async_trait]
impl DataSource for ApiTokenSource {
    fn type_name(&self) -> &'static str {
        "apstra_api_token"
    }

    fn schema(&self) -> Schema {
        Schema::new(
            "Opens a dedicated API session and returns its token, for use by external tools.",
        )
        .attribute(
            "value",
            Attribute::string()
                .computed()
                .sensitive()
                .description("The API token value."),
        )
        .attribute(
            "user_name",
            Attribute::string()
                .computed()
                .description("The user name associated with the session."),
        )
        .attribute(
            "session_id",
            Attribute::string()
                .computed()
                .description("The API session ID associated with the token."),
        )
        .attribute(
            "expires_at",
            Attribute::int64()
                .computed()
                .description("Token expiration time, in unix seconds."),
        )
        .attribute(
            "warn_seconds",
            Attribute::int64()
                .optional()
                .computed()
                .default(JsonValue::from(DEFAULT_WARN_SECONDS))
                .validator(Validator::AtLeast(0))
                .description(
                    "Emit a warning when the token expires within this many seconds. \
                     `0` disables the warning.",
                ),
        )
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        config: &JsonValue,
        diags: &mut Diagnostics,
    ) -> Option<JsonValue> {
        let mut model: ApiTokenModel = from_doc(config, diags)?;
        let warn_seconds = model.warn_seconds.value_or(DEFAULT_WARN_SECONDS);

        let raw = match ctx.client.new_session_token().await {
            Ok(raw) => raw,
            Err(e) => {
                diags.add_error("Error creating API session", e.to_string());
                return None;
            }
        };
        let token = match ApiToken::parse(&raw) {
            Ok(token) => token,
            Err(e) => {
                diags.add_error("Error parsing API token", e.to_string());
                return None;
            }
        };
        tracing::info!(user_name = %token.user_name, session_id = %token.session_id, "API session opened");

        warn_on_expiry(&token, warn_seconds, unix_now(), diags);
        model.warn_seconds = Value::Value(warn_seconds);
        model.load_token(token);
        to_doc(&model, diags)
    }
}

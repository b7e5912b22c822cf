use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use serde::Deserialize;

use super::ApstraError;

/// Default lead time, in seconds, for the token expiry warning.
pub const DEFAULT_WARN_SECONDS: i64 = 60;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    username: String,
    #[serde(default)]
    user_session: String,
    exp: i64,
}

/// An Apstra API token and the claims we care about.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken {
    pub value: String,
    pub user_name: String,
    pub session_id: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiToken")
            .field("value", &"[REDACTED]")
            .field("user_name", &self.user_name)
            .field("session_id", &self.session_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn pad(segment: &str) -> String {
    let mut padded = segment.trim_end_matches('=').to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    padded
}

impl ApiToken {
    pub fn parse(token: &str) -> Result<Self, ApstraError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(ApstraError::InvalidToken {
                message: format!("expected 3 dot-separated parts, got {}", parts.len()),
            });
        }

        let claims_segment = pad(parts[1]);
        let raw = STANDARD
            .decode(&claims_segment)
            .or_else(|_| URL_SAFE.decode(&claims_segment))
            .map_err(|e| ApstraError::InvalidToken {
                message: format!("claims are not base64: {}", e),
            })?;

        let claims: Claims =
            serde_json::from_slice(&raw).map_err(|e| ApstraError::InvalidToken {
                message: format!("claims are not valid JSON: {}", e),
            })?;

        Ok(Self {
            value: token.to_string(),
            user_name: claims.username,
            session_id: claims.user_session,
            expires_at: claims.exp,
        })
    }

    /// True when the token expires within `warn_seconds` of `now` (unix
    /// seconds). A `warn_seconds` of zero disables the check.
    pub fn expires_within(&self, warn_seconds: i64, now: i64) -> bool {
        warn_seconds > 0 && self.expires_at - now <= warn_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_token(claims: serde_json::Value) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = engine.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = engine.encode(claims.to_string());
        format!("{}.{}.signature", header, body)
    }

    #[test]
    fn test_parse_reads_claims() {
        let token = make_token(json!({
            "username": "admin",
            "user_session": "3e2a-55",
            "exp": 1_700_000_000,
        }));
        let parsed = ApiToken::parse(&token).unwrap();
        assert_eq!(parsed.user_name, "admin");
        assert_eq!(parsed.session_id, "3e2a-55");
        assert_eq!(parsed.expires_at, 1_700_000_000);
        assert_eq!(parsed.value, token);
    }

    #[test]
    fn test_parse_url_safe_characters() {
        // '?' and '>' produce '-' and '_' in URL-safe base64
        let token = make_token(json!({"username": "a?>b", "user_session": "s", "exp": 1}));
        assert!(token.contains('-') || token.contains('_'));
        assert_eq!(ApiToken::parse(&token).unwrap().user_name, "a?>b");
    }

    #[test]
    fn test_parse_rejects_wrong_part_count() {
        let err = ApiToken::parse("a.b").unwrap_err();
        assert!(matches!(err, ApstraError::InvalidToken { .. }));
        assert!(err.to_string().contains("got 2"));
    }

    #[test]
    fn test_parse_rejects_garbage_claims() {
        assert!(ApiToken::parse("a.!!!.c").is_err());
        let not_json = base64::engine::general_purpose::STANDARD.encode("nope");
        assert!(ApiToken::parse(&format!("a.{}.c", not_json)).is_err());
    }

    #[test]
    fn test_expires_within() {
        let token = ApiToken {
            value: String::new(),
            user_name: String::new(),
            session_id: String::new(),
            expires_at: 1_000,
        };
        assert!(token.expires_within(60, 950));
        assert!(!token.expires_within(60, 900));
        assert!(token.expires_within(60, 2_000));
        assert!(!token.expires_within(0, 2_000));
    }

    #[test]
    fn test_debug_redacts_value() {
        let token = make_token(json!({"username": "u", "user_session": "s", "exp": 1}));
        let parsed = ApiToken::parse(&token).unwrap();
        assert!(!format!("{:?}", parsed).contains(&token));
    }
}

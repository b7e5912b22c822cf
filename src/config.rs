use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ProviderError;

pub const ENV_URL: &str = "APSTRA_URL";
pub const ENV_USER: &str = "APSTRA_USER";
pub const ENV_PASS: &str = "APSTRA_PASS";
pub const ENV_LOG: &str = "APSTRA_LOG";

pub const DEFAULT_MUTEX_TIMEOUT: Duration = Duration::from_secs(600);

/// Connection settings for an Apstra server.
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    /// Base URL with any embedded credentials removed.
    pub url: String,
    pub username: String,
    pub password: String,
    pub tls_validation_disabled: bool,
    pub blueprint_mutex_disabled: bool,
    pub blueprint_mutex_timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("tls_validation_disabled", &self.tls_validation_disabled)
            .field("blueprint_mutex_disabled", &self.blueprint_mutex_disabled)
            .field("blueprint_mutex_timeout", &self.blueprint_mutex_timeout)
            .finish()
    }
}

/// Values supplied on the command line. These win over everything else.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls_validation_disabled: bool,
    pub blueprint_mutex_disabled: bool,
    pub config_file: Option<PathBuf>,
}

/// Optional `provider.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls_validation_disabled: Option<bool>,
    pub blueprint_mutex_disabled: Option<bool>,
    pub blueprint_mutex_timeout_seconds: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Config(format!("parsing {}: {}", path.display(), e)))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("apstra-tf").join("provider.json"))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl ProviderConfig {
    /// Resolves configuration from flags, environment and config file.
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, ProviderError> {
        let file = match &overrides.config_file {
            Some(path) => FileConfig::load(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "loading provider config file");
                    FileConfig::load(&path)?
                }
                None => FileConfig::default(),
            },
        };
        Self::from_sources(overrides, file, env_var)
    }

    pub fn from_sources(
        overrides: ConfigOverrides,
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ProviderError> {
        let raw_url = overrides
            .url
            .or_else(|| env(ENV_URL))
            .or(file.url)
            .ok_or_else(|| {
                ProviderError::Config(format!(
                    "Apstra URL not set. Use --url, {} or the config file",
                    ENV_URL
                ))
            })?;

        let parsed = parse_url(&raw_url)?;

        let username = overrides
            .username
            .or(parsed.username)
            .or_else(|| env(ENV_USER))
            .or(file.username)
            .ok_or_else(|| {
                ProviderError::Config(format!(
                    "username not set. Use --username, {}, the URL or the config file",
                    ENV_USER
                ))
            })?;

        let password = overrides
            .password
            .or(parsed.password)
            .or_else(|| env(ENV_PASS))
            .or(file.password)
            .ok_or_else(|| {
                ProviderError::Config(format!(
                    "password not set. Use --password, {}, the URL or the config file",
                    ENV_PASS
                ))
            })?;

        Ok(Self {
            url: parsed.base,
            username,
            password,
            tls_validation_disabled: overrides.tls_validation_disabled
                || file.tls_validation_disabled.unwrap_or(false),
            blueprint_mutex_disabled: overrides.blueprint_mutex_disabled
                || file.blueprint_mutex_disabled.unwrap_or(false),
            blueprint_mutex_timeout: file
                .blueprint_mutex_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MUTEX_TIMEOUT),
        })
    }
}

struct ParsedUrl {
    base: String,
    username: Option<String>,
    password: Option<String>,
}

fn decode(part: &str) -> Result<String, ProviderError> {
    urlencoding::decode(part)
        .map(|s| s.into_owned())
        .map_err(|e| ProviderError::Config(format!("URL credentials are not valid UTF-8: {}", e)))
}

fn parse_url(raw: &str) -> Result<ParsedUrl, ProviderError> {
    // never echo the raw URL, it may hold a password
    let mut url = Url::parse(raw)
        .map_err(|e| ProviderError::Config(format!("invalid Apstra URL: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProviderError::Config(format!(
                "unsupported URL scheme {:?}, expected http or https",
                other
            )));
        }
    }

    let username = match url.username() {
        "" => None,
        u => Some(decode(u)?),
    };
    let password = url.password().map(decode).transpose()?;

    let _ = url.set_username("");
    let _ = url.set_password(None);

    Ok(ParsedUrl {
        base: url.as_str().trim_end_matches('/').to_string(),
        username,
        password,
    })
}

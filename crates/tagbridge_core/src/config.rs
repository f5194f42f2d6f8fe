use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "tagbridge/0.2";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub wallabag: WallabagSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WallabagSection {
    pub url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_agent: Option<String>,
}

/// Config file layout used by the Go `wallabago` library, kept so existing
/// `config.json` files keep working.
#[derive(Debug, Clone, Deserialize)]
struct LegacyJsonConfig {
    #[serde(rename = "WallabagURL")]
    wallabag_url: Option<String>,
    #[serde(rename = "ClientId")]
    client_id: Option<String>,
    #[serde(rename = "ClientSecret")]
    client_secret: Option<String>,
    #[serde(rename = "UserName")]
    user_name: Option<String>,
    #[serde(rename = "UserPassword")]
    user_password: Option<String>,
}

impl From<LegacyJsonConfig> for BridgeConfig {
    fn from(legacy: LegacyJsonConfig) -> Self {
        Self {
            wallabag: WallabagSection {
                url: legacy.wallabag_url,
                client_id: legacy.client_id,
                client_secret: legacy.client_secret,
                username: legacy.user_name,
                password: legacy.user_password,
                user_agent: None,
            },
        }
    }
}

/// Fully resolved connection settings; every field is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WallabagCredentials {
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

impl BridgeConfig {
    /// Resolve credentials with precedence env > config file. All missing keys are
    /// reported in a single error.
    pub fn credentials(&self) -> Result<WallabagCredentials> {
        self.credentials_with(process_env)
    }

    /// Same as [`BridgeConfig::credentials`], reading overrides through `lookup`.
    pub fn credentials_with<F>(&self, lookup: F) -> Result<WallabagCredentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = &self.wallabag;
        let mut missing = Vec::new();
        let mut require = |env_key: &str, config_key: &str, value: &Option<String>| {
            match override_or(&lookup, env_key, value) {
                Some(found) => found,
                None => {
                    missing.push(format!("wallabag.{config_key} (or {env_key})"));
                    String::new()
                }
            }
        };

        let url = require("WALLABAG_URL", "url", &section.url);
        let client_id = require("WALLABAG_CLIENT_ID", "client_id", &section.client_id);
        let client_secret = require(
            "WALLABAG_CLIENT_SECRET",
            "client_secret",
            &section.client_secret,
        );
        let username = require("WALLABAG_USERNAME", "username", &section.username);
        let password = require("WALLABAG_PASSWORD", "password", &section.password);

        if !missing.is_empty() {
            bail!(
                "Wallabag configuration is incomplete. Missing:\n  - {}",
                missing.join("\n  - ")
            );
        }

        Ok(WallabagCredentials {
            url: url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            username,
            password,
            user_agent: self.user_agent_with(&lookup),
        })
    }

    /// Resolve user agent: env WALLABAG_USER_AGENT > config > DEFAULT_USER_AGENT.
    fn user_agent_with<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        override_or(&lookup, "WALLABAG_USER_AGENT", &self.wallabag.user_agent)
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Load a config file. `.json` files are read in the legacy wallabago layout,
/// anything else as TOML with a `[wallabag]` table.
pub fn load_config(config_path: &Path) -> Result<BridgeConfig> {
    if !config_path.exists() {
        bail!(
            "config file not found: {} (pass --config or create it with a [wallabag] section)",
            config_path.display()
        );
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;

    let is_json = config_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        let legacy: LegacyJsonConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        return Ok(legacy.into());
    }

    let parsed: BridgeConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn override_or<F>(lookup: &F, env_key: &str, fallback: &Option<String>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(env_key) {
        let trimmed = value.trim().to_string();
        if !trimmed.is_empty() {
            return Some(trimmed);
        }
    }
    fallback
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

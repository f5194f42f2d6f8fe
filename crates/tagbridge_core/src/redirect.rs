use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::blocking::Client;

use crate::wallabag::env_value_u64;

pub const DEFAULT_REDIRECT_TIMEOUT_MS: u64 = 15_000;

/// Reports where a URL ends up after redirects. An empty string means the URL
/// could not be resolved; callers treat it as "no redirect found".
pub trait RedirectResolver: Sync {
    fn resolve(&self, url: &str) -> String;
}

pub struct HttpRedirectResolver {
    client: Client,
    user_agent: String,
}

impl HttpRedirectResolver {
    pub fn new(user_agent: &str) -> Result<Self> {
        let timeout_ms = env_value_u64("REDIRECT_TIMEOUT_MS", DEFAULT_REDIRECT_TIMEOUT_MS);
        Self::with_timeout(user_agent, Duration::from_millis(timeout_ms))
    }

    pub fn with_timeout(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build redirect HTTP client")?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

impl RedirectResolver for HttpRedirectResolver {
    fn resolve(&self, url: &str) -> String {
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.user_agent.clone())
            .send();
        match response {
            Ok(response) => {
                let resolved = response.url().to_string();
                debug!("resolved {url} -> {resolved} (HTTP {})", response.status());
                resolved
            }
            Err(error) => {
                warn!("could not resolve redirect for {url}: {error}");
                String::new()
            }
        }
    }
}

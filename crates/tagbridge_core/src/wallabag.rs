use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::WallabagCredentials;

/// An entry already saved in Wallabag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

impl TargetEntry {
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            content: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntriesQuery {
    /// `Some(false)` restricts to unread entries; `None` includes archived ones.
    pub archive: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntriesPage {
    pub items: Vec<TargetEntry>,
    pub page: u32,
    pub pages: u32,
    pub limit: u32,
    pub total: u64,
}

pub trait WallabagReadApi {
    fn fetch_entries(&mut self, query: &EntriesQuery) -> Result<EntriesPage>;
    fn request_count(&self) -> usize;
}

pub trait WallabagWriteApi: WallabagReadApi {
    fn add_tags(&mut self, entry_id: i64, tags: &[String]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct WallabagClientConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl WallabagClientConfig {
    pub fn from_credentials(credentials: &WallabagCredentials) -> Self {
        Self {
            base_url: credentials.url.clone(),
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            user_agent: credentials.user_agent.clone(),
            timeout_ms: env_value_u64("WALLABAG_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("WALLABAG_RATE_LIMIT_MS", 100),
            max_retries: env_value_usize("WALLABAG_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WALLABAG_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct WallabagClient {
    client: Client,
    config: WallabagClientConfig,
    access_token: Option<String>,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl WallabagClient {
    pub fn new(config: WallabagClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Wallabag HTTP client")?;

        Ok(Self {
            client,
            config,
            access_token: None,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn ensure_token(&mut self) -> Result<String> {
        if let Some(token) = &self.access_token {
            return Ok(token.clone());
        }

        self.apply_rate_limit();
        let form = [
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];
        let response = self
            .client
            .post(self.endpoint("/oauth/v2/token"))
            .header("User-Agent", self.config.user_agent.clone())
            .form(&form)
            .send()
            .context("failed to request Wallabag access token")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<Value>()
                .ok()
                .and_then(|body| oauth_error_detail(&body))
                .unwrap_or_else(|| "no error description".to_string());
            bail!("Wallabag authentication failed with HTTP {status}: {detail}");
        }
        let parsed: TokenResponse = response
            .json()
            .context("failed to decode Wallabag token response")?;
        debug!("obtained Wallabag access token");
        self.access_token = Some(parsed.access_token.clone());
        Ok(parsed.access_token)
    }

    fn request_json(
        &mut self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let url = self.endpoint(path);
        let pairs: Vec<(&str, &str)> = params
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (*key, value.as_str()))
            .collect();

        for attempt in 0..=self.config.max_retries {
            let token = self.ensure_token()?;
            self.apply_rate_limit();
            let request: RequestBuilder = self
                .client
                .request(method.clone(), &url)
                .header("User-Agent", self.config.user_agent.clone())
                .bearer_auth(token);
            let request = if method == Method::GET {
                request.query(&pairs)
            } else {
                request.form(&pairs)
            };

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED && attempt < self.config.max_retries {
                        debug!("Wallabag rejected access token; requesting a new one");
                        self.access_token = None;
                        continue;
                    }
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("Wallabag API request {method} {path} failed with HTTP {status}");
                    }
                    return response
                        .json::<Value>()
                        .context("failed to decode Wallabag API JSON response");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        warn!("Wallabag request {method} {path} failed, retrying: {error}");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("failed to call Wallabag API {method} {path}"));
                }
            }
        }

        bail!("Wallabag API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl WallabagReadApi for WallabagClient {
    fn fetch_entries(&mut self, query: &EntriesQuery) -> Result<EntriesPage> {
        let params = vec![
            (
                "archive",
                query
                    .archive
                    .map(|archived| if archived { "1" } else { "0" }.to_string())
                    .unwrap_or_default(),
            ),
            (
                "page",
                query.page.map(|page| page.to_string()).unwrap_or_default(),
            ),
            (
                "perPage",
                query
                    .per_page
                    .map(|per_page| per_page.to_string())
                    .unwrap_or_default(),
            ),
            ("detail", "metadata".to_string()),
        ];

        let response = self.request_json(Method::GET, "/api/entries.json", &params)?;
        let parsed: EntriesResponse = serde_json::from_value(response)
            .context("failed to decode Wallabag entries response")?;

        Ok(EntriesPage {
            items: parsed
                .embedded
                .items
                .into_iter()
                .map(|item| TargetEntry {
                    id: item.id,
                    url: item.url.unwrap_or_default(),
                    content: item.content.unwrap_or_default(),
                })
                .collect(),
            page: parsed.page,
            pages: parsed.pages,
            limit: parsed.limit,
            total: parsed.total,
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WallabagWriteApi for WallabagClient {
    fn add_tags(&mut self, entry_id: i64, tags: &[String]) -> Result<()> {
        let path = format!("/api/entries/{entry_id}/tags.json");
        self.request_json(Method::POST, &path, &[("tags", tags.join(","))])
            .with_context(|| format!("failed to add tags to Wallabag entry {entry_id}"))?;
        Ok(())
    }
}

fn oauth_error_detail(body: &Value) -> Option<String> {
    body.get("error_description")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

pub(crate) fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct EntriesResponse {
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default)]
    limit: u32,
    #[serde(default = "first_page")]
    pages: u32,
    #[serde(default)]
    total: u64,
    #[serde(rename = "_embedded", default)]
    embedded: EmbeddedItems,
}

#[derive(Debug, Deserialize, Default)]
struct EmbeddedItems {
    #[serde(default)]
    items: Vec<EntryItem>,
}

#[derive(Debug, Deserialize)]
struct EntryItem {
    id: i64,
    url: Option<String>,
    content: Option<String>,
}

fn first_page() -> u32 {
    1
}

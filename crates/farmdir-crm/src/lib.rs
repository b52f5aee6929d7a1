//! Zoho CRM client: refresh-token exchange and single-record fetch.

use std::time::Duration;

use async_trait::async_trait;
use farmdir_core::CrmRecord;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "farmdir-crm";

pub const DEFAULT_MODULE: &str = "Accounts";
pub const DEFAULT_REGION: &str = "com";

/// Fields requested on every record fetch.
pub const FIELD_PROJECTION: &[&str] = &[
    "id",
    "Account_Name",
    "Slug",
    "Billing_Street",
    "Billing_City",
    "Billing_State",
    "Billing_Code",
    "Billing_Country",
    "Latitude",
    "Longitude",
    "Phone",
    "Email",
    "Website",
    "Facebook",
    "Instagram",
    "Categories",
    "Service_Types",
    "Amenities",
    "Varieties",
    "Payment_Methods",
    "Pet_Friendly",
    "Price_Range",
    "Established_Year",
    "Season_Open",
    "Season_Close",
    "Monday_Hours",
    "Tuesday_Hours",
    "Wednesday_Hours",
    "Thursday_Hours",
    "Friday_Hours",
    "Saturday_Hours",
    "Sunday_Hours",
    "Description",
    "Place_ID",
];

const INVALID_TOKEN_CODE: &str = "INVALID_TOKEN";
const MAX_BODY_PREVIEW: usize = 2_000;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("missing CRM credentials: {missing}")]
    AuthConfig { missing: String },
    #[error("token exchange failed with status {status}: {body}")]
    AuthExchange { status: u16, body: String },
    #[error("CRM record {id} not found")]
    NotFound { id: String },
    #[error("CRM request failed with status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("CRM rejected the access token (status {status}): {body}")]
    InvalidToken { status: u16, body: String },
    #[error("CRM transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode CRM response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CrmError {
    pub fn requires_reauth(&self) -> bool {
        matches!(self, CrmError::InvalidToken { .. })
            || matches!(self, CrmError::Upstream { status: 401, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CrmError::AuthExchange { status, .. }
            | CrmError::Upstream { status, .. }
            | CrmError::InvalidToken { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait]
pub trait CrmSource: Send + Sync {
    async fn access_token(&self) -> Result<String, CrmError>;

    async fn fetch_record(&self, token: &str, crm_id: &str) -> Result<CrmRecord, CrmError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

pub fn build_http_client(config: &HttpClientConfig) -> Result<reqwest::Client, CrmError> {
    let mut builder = reqwest::Client::builder()
        .gzip(true)
        .brotli(true)
        .timeout(config.timeout);

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }

    Ok(builder.build()?)
}

pub fn region_endpoints(region: &str) -> (String, String) {
    let (accounts, api) = match region.trim().to_ascii_lowercase().as_str() {
        "eu" => ("https://accounts.zoho.eu", "https://www.zohoapis.eu"),
        "in" => ("https://accounts.zoho.in", "https://www.zohoapis.in"),
        "com.au" | "au" => ("https://accounts.zoho.com.au", "https://www.zohoapis.com.au"),
        "jp" => ("https://accounts.zoho.jp", "https://www.zohoapis.jp"),
        "ca" => ("https://accounts.zohocloud.ca", "https://www.zohoapis.ca"),
        _ => ("https://accounts.zoho.com", "https://www.zohoapis.com"),
    };
    (accounts.to_string(), api.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct ZohoConfig {
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub accounts_url: String,
    pub api_url: String,
    pub module: String,
}

impl ZohoConfig {
    pub fn for_region(region: &str) -> Self {
        let (accounts_url, api_url) = region_endpoints(region);
        Self {
            accounts_url,
            api_url,
            module: DEFAULT_MODULE.to_string(),
            ..Default::default()
        }
    }

    pub fn with_credentials(
        mut self,
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn missing_credentials(&self) -> Vec<&'static str> {
        [
            ("ZOHO_REFRESH_TOKEN", &self.refresh_token),
            ("ZOHO_CLIENT_ID", &self.client_id),
            ("ZOHO_CLIENT_SECRET", &self.client_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map(str::trim).unwrap_or("").is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn has_credentials(&self) -> bool {
        self.missing_credentials().is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordEnvelope {
    #[serde(default)]
    data: Vec<CrmRecord>,
}

#[derive(Debug, Clone)]
pub struct ZohoClient {
    http: reqwest::Client,
    config: ZohoConfig,
}

impl ZohoClient {
    pub fn new(config: ZohoConfig, http: HttpClientConfig) -> Result<Self, CrmError> {
        Ok(Self {
            http: build_http_client(&http)?,
            config,
        })
    }

    pub fn config(&self) -> &ZohoConfig {
        &self.config
    }

    fn record_url(&self, crm_id: &str) -> String {
        format!(
            "{}/crm/v2/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.module,
            crm_id
        )
    }
}

fn preview(body: &str) -> String {
    if body.len() <= MAX_BODY_PREVIEW {
        return body.to_string();
    }
    let mut end = MAX_BODY_PREVIEW;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

fn is_invalid_token(body: &str) -> bool {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v.get("code").and_then(JsonValue::as_str).map(|c| c == INVALID_TOKEN_CODE))
        .unwrap_or(false)
}

#[async_trait]
impl CrmSource for ZohoClient {
    async fn access_token(&self) -> Result<String, CrmError> {
        let missing = self.config.missing_credentials();
        if !missing.is_empty() {
            return Err(CrmError::AuthConfig {
                missing: missing.join(", "),
            });
        }

        let url = format!(
            "{}/oauth/v2/token",
            self.config.accounts_url.trim_end_matches('/')
        );
        let form = [
            ("refresh_token", self.config.refresh_token.as_deref().unwrap_or_default()),
            ("client_id", self.config.client_id.as_deref().unwrap_or_default()),
            ("client_secret", self.config.client_secret.as_deref().unwrap_or_default()),
            ("grant_type", "refresh_token"),
        ];

        let resp = self.http.post(&url).form(&form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(status = status.as_u16(), "zoho token exchange");

        if !status.is_success() {
            return Err(CrmError::AuthExchange {
                status: status.as_u16(),
                body: preview(&body),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|_| CrmError::AuthExchange {
            status: status.as_u16(),
            body: preview(&body),
        })?;

        match parsed.access_token.filter(|t| !t.trim().is_empty()) {
            Some(token) if parsed.error.is_none() => Ok(token),
            _ => Err(CrmError::AuthExchange {
                status: status.as_u16(),
                body: preview(&body),
            }),
        }
    }

    async fn fetch_record(&self, token: &str, crm_id: &str) -> Result<CrmRecord, CrmError> {
        let fields = FIELD_PROJECTION.join(",");
        let resp = self
            .http
            .get(self.record_url(crm_id))
            .query(&[("fields", fields.as_str())])
            .header("Authorization", format!("Zoho-oauthtoken {token}"))
            .send()
            .await?;

        let status = resp.status();
        debug!(status = status.as_u16(), crm_id, "zoho record fetch");

        if status == StatusCode::NO_CONTENT {
            return Err(CrmError::NotFound {
                id: crm_id.to_string(),
            });
        }

        let body = resp.text().await?;
        if is_invalid_token(&body) {
            return Err(CrmError::InvalidToken {
                status: status.as_u16(),
                body: preview(&body),
            });
        }
        if !status.is_success() {
            return Err(CrmError::Upstream {
                status: status.as_u16(),
                body: preview(&body),
            });
        }
        if body.trim().is_empty() {
            return Err(CrmError::NotFound {
                id: crm_id.to_string(),
            });
        }

        let envelope: RecordEnvelope = serde_json::from_str(&body)?;
        envelope
            .data
            .into_iter()
            .next()
            .ok_or_else(|| CrmError::NotFound {
                id: crm_id.to_string(),
            })
    }
}

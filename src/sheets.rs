use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Settings;
use crate::credentials::Credentials;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Re-mint the access token this long before Google says it expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Destination for saved rows.
#[async_trait]
pub trait SheetSink: Send + Sync {
    async fn append_row(&self, row: &[Value]) -> Result<()>;
}

/// Supplies bearer tokens for the Sheets API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2 service-account flow: a signed JWT is exchanged for an access
/// token, which is cached until shortly before it expires.
pub struct ServiceAccountTokens {
    client: reqwest::Client,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(client: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            cached: Mutex::new(None),
        }
    }

    fn assertion(&self, now: i64) -> Result<String> {
        let claims = Claims {
            iss: &self.credentials.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.credentials.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.credentials.signing_key,
        )
        .context("Failed to sign service-account assertion")
    }

    async fn fetch(&self) -> Result<TokenResponse> {
        let assertion = self.assertion(chrono::Utc::now().timestamp())?;
        let token_uri = &self.credentials.key.token_uri;

        debug!("Requesting access token from {}", token_uri);

        let response = self
            .client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("Failed to send token request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token endpoint error ({}): {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse token response")
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cached.lock().await.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        // Not held across the request.
        let fresh = self.fetch().await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        *self.cached.lock().await = Some(CachedToken {
            value: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(fresh.access_token)
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Appends rows to the first sheet of one spreadsheet.
pub struct SheetsClient {
    client: reqwest::Client,
    api_base: String,
    spreadsheet_id: String,
    sheet_title: String,
    tokens: Arc<dyn TokenSource>,
}

impl SheetsClient {
    /// Authorize with the configured service account and open the
    /// spreadsheet.
    pub async fn open(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::new();
        let tokens = Arc::new(ServiceAccountTokens::new(
            client.clone(),
            settings.credentials.clone(),
        ));
        Self::open_with(
            client,
            &settings.api_base,
            &settings.spreadsheet_id,
            tokens,
        )
        .await
    }

    /// Fetch spreadsheet metadata and select the first sheet.
    pub async fn open_with(
        client: reqwest::Client,
        api_base: &str,
        spreadsheet_id: &str,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self> {
        let api_base = api_base.trim_end_matches('/').to_string();
        let mut url = spreadsheet_url(&api_base, spreadsheet_id, &[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let token = tokens
            .access_token()
            .await
            .context("Failed to authorize with Google")?;

        let response = client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to request spreadsheet metadata")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Failed to open spreadsheet {} ({}): {}",
                spreadsheet_id,
                status,
                error_body
            );
        }

        let meta: SpreadsheetMeta = response
            .json()
            .await
            .context("Failed to parse spreadsheet metadata")?;

        let sheet_title = meta
            .sheets
            .into_iter()
            .next()
            .map(|s| s.properties.title)
            .with_context(|| format!("Spreadsheet {} has no sheets", spreadsheet_id))?;

        info!(
            "Opened spreadsheet {} (sheet '{}')",
            spreadsheet_id, sheet_title
        );

        Ok(Self {
            client,
            api_base,
            spreadsheet_id: spreadsheet_id.to_string(),
            sheet_title,
            tokens,
        })
    }

    pub fn sheet_title(&self) -> &str {
        &self.sheet_title
    }

    fn append_url(&self) -> Result<Url> {
        let range = format!("'{}'!A1:append", self.sheet_title.replace('\'', "''"));
        let mut url = spreadsheet_url(&self.api_base, &self.spreadsheet_id, &["values", &range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }
}

#[async_trait]
impl SheetSink for SheetsClient {
    async fn append_row(&self, row: &[Value]) -> Result<()> {
        let url = self.append_url()?;
        let token = self.tokens.access_token().await?;

        debug!("Appending {} cell(s) to '{}'", row.len(), self.sheet_title);

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .context("Failed to send append request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Sheets API error ({}): {}", status, error_body);
        }

        Ok(())
    }
}

fn spreadsheet_url(api_base: &str, spreadsheet_id: &str, rest: &[&str]) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/v4/spreadsheets", api_base))
        .with_context(|| format!("Invalid Sheets API base URL: {}", api_base))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Sheets API base URL cannot have a path: {}", api_base))?
        .push(spreadsheet_id)
        .extend(rest);
    Ok(url)
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::credentials::{CredentialError, CredentialSource, Credentials};

pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const SPREADSHEET_ID_ENV: &str = "SPREADSHEET_ID";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    File,
    PathEnv,
    #[default]
    JsonEnv,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialKind::File => write!(f, "file"),
            CredentialKind::PathEnv => write!(f, "path_env"),
            CredentialKind::JsonEnv => write!(f, "json_env"),
        }
    }
}

/// Columns written for each saved message, oldest layout first.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RowLayout {
    /// `(text)`
    Text,
    /// `(name, text)`
    Name,
    /// `(name, id, text)`
    NameId,
    /// `(name, id, text, timestamp)`
    #[default]
    Full,
}

impl std::fmt::Display for RowLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowLayout::Text => write!(f, "text"),
            RowLayout::Name => write!(f, "name"),
            RowLayout::NameId => write!(f, "name_id"),
            RowLayout::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    /// Overridden by `TELEGRAM_BOT_TOKEN` when set.
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub source: CredentialKind,
    /// Variable read by the `path_env` and `json_env` sources. Defaults
    /// depend on the source.
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default = "default_credentials_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SheetsConfig {
    /// Overridden by `SPREADSHEET_ID` when set.
    #[serde(default)]
    pub spreadsheet_id: String,
    #[serde(default)]
    pub row_layout: RowLayout,
    /// Send the save confirmation even when the append fails.
    #[serde(default = "default_confirm_on_failure")]
    pub confirm_on_failure: bool,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_confirm_on_failure() -> bool {
    true
}

fn default_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            source: CredentialKind::default(),
            env_var: None,
            path: default_credentials_path(),
        }
    }
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            row_layout: RowLayout::default(),
            confirm_on_failure: default_confirm_on_failure(),
            api_base: default_api_base(),
        }
    }
}

impl CredentialsConfig {
    pub fn source(&self) -> CredentialSource {
        match self.source {
            CredentialKind::File => CredentialSource::File(self.path.clone()),
            CredentialKind::PathEnv => CredentialSource::PathEnv(
                self.env_var
                    .clone()
                    .unwrap_or_else(|| "GOOGLE_APPLICATION_CREDENTIALS".to_string()),
            ),
            CredentialKind::JsonEnv => CredentialSource::JsonEnv(
                self.env_var
                    .clone()
                    .unwrap_or_else(|| "GOOGLE_CREDENTIALS_JSON".to_string()),
            ),
        }
    }
}

/// Why the bot refused to start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("bot token is missing (set TELEGRAM_BOT_TOKEN or [telegram] bot_token)")]
    MissingBotToken,
    #[error("spreadsheet id is missing (set SPREADSHEET_ID or [sheets] spreadsheet_id)")]
    MissingSpreadsheetId,
    #[error("invalid service-account credentials: {0}")]
    Credentials(#[from] CredentialError),
}

/// Everything the bot needs to run, checked and resolved.
#[derive(Clone)]
pub struct Settings {
    pub bot_token: String,
    pub spreadsheet_id: String,
    pub credentials: Credentials,
    pub row_layout: RowLayout,
    pub confirm_on_failure: bool,
    pub api_base: String,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("bot_token", &"[REDACTED]")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("credentials", &self.credentials)
            .field("row_layout", &self.row_layout)
            .field("confirm_on_failure", &self.confirm_on_failure)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Overlay environment values and resolve credentials.
    pub fn validate<F>(&self, env: F) -> Result<Settings, StartupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = env_or(&env, BOT_TOKEN_ENV, &self.telegram.bot_token)
            .ok_or(StartupError::MissingBotToken)?;
        let credentials = self.credentials.source().resolve(&env)?;
        let spreadsheet_id = env_or(&env, SPREADSHEET_ID_ENV, &self.sheets.spreadsheet_id)
            .ok_or(StartupError::MissingSpreadsheetId)?;

        Ok(Settings {
            bot_token,
            spreadsheet_id,
            credentials,
            row_layout: self.sheets.row_layout,
            confirm_on_failure: self.sheets.confirm_on_failure,
            api_base: self.sheets.api_base.trim_end_matches('/').to_string(),
        })
    }
}

fn env_or<F>(env: &F, var: &str, fallback: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| Some(fallback.trim().to_string()).filter(|v| !v.is_empty()))
}

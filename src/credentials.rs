use std::path::{Path, PathBuf};

use jsonwebtoken::EncodingKey;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Where the service-account key comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    /// Key JSON stored in a file at a fixed path.
    File(PathBuf),
    /// Environment variable holding the path of the key file.
    PathEnv(String),
    /// Environment variable holding the key JSON itself.
    JsonEnv(String),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("environment variable {0} is not set")]
    EnvMissing(String),
    #[error("failed to read credential file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential JSON is malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("credential JSON has an empty `{0}` field")]
    EmptyField(&'static str),
    #[error("private_key is not a valid RSA PEM key: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),
}

/// The fields of a Google service-account key file we rely on.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish()
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// A parsed key together with its ready-to-use signing key.
#[derive(Clone)]
pub struct Credentials {
    pub key: ServiceAccountKey,
    pub signing_key: EncodingKey,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("key", &self.key).finish()
    }
}

impl Credentials {
    pub fn from_json(json: &str) -> Result<Self, CredentialError> {
        let key: ServiceAccountKey = serde_json::from_str(json)?;
        if key.client_email.trim().is_empty() {
            return Err(CredentialError::EmptyField("client_email"));
        }
        if key.private_key.trim().is_empty() {
            return Err(CredentialError::EmptyField("private_key"));
        }
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        Ok(Self { key, signing_key })
    }
}

impl CredentialSource {
    /// Resolve the source into parsed credentials, reading environment
    /// values through `env`.
    pub fn resolve<F>(&self, env: F) -> Result<Credentials, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            CredentialSource::File(path) => {
                debug!("Reading service-account key from {}", path.display());
                Credentials::from_json(&read_file(path)?)
            }
            CredentialSource::PathEnv(var) => {
                let path = PathBuf::from(require_env(&env, var)?);
                debug!("Reading service-account key from {} (via {})", path.display(), var);
                Credentials::from_json(&read_file(&path)?)
            }
            CredentialSource::JsonEnv(var) => {
                debug!("Parsing service-account key from {}", var);
                Credentials::from_json(&require_env(&env, var)?)
            }
        }
    }
}

fn require_env<F>(env: &F, var: &str) -> Result<String, CredentialError>
where
    F: Fn(&str) -> Option<String>,
{
    env(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CredentialError::EnvMissing(var.to_string()))
}

fn read_file(path: &Path) -> Result<String, CredentialError> {
    std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })
}

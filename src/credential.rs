use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Authorization to act on the user's behalf against the storage provider.
///
/// A credential always carries an access token; records without one are
/// rejected by [`Credential::from_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scopes: Vec::new(),
            token_type: default_token_type(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Expiry relative to now, as returned by the token endpoint's `expires_in`
    pub fn expiring_in(mut self, lifetime: Duration) -> Self {
        self.expires_at = Some(Utc::now() + lifetime);
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Value for the `Authorization` header
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Informational only: expired credentials are still presented to the
    /// provider, which answers with an error status.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| exp <= Utc::now()).unwrap_or(false)
    }

    fn validate(self) -> Result<Self> {
        if self.access_token.trim().is_empty() {
            return Err(Error::StoreCorrupt("access token is empty".to_string()));
        }
        if self.token_type.trim().is_empty() {
            return Err(Error::StoreCorrupt("token type is empty".to_string()));
        }
        Ok(self)
    }

    /// Parse a persisted record, rejecting partial or malformed ones
    pub fn from_json(raw: &str) -> Result<Self> {
        let credential: Credential =
            serde_json::from_str(raw).map_err(|e| Error::StoreCorrupt(e.to_string()))?;
        credential.validate()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::StoreWrite(e.to_string()))
    }
}

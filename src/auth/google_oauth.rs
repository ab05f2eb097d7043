/// Google OAuth2 authorization-code flow (web server application, offline access)
use oauth2::basic::{BasicClient, BasicTokenType};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use std::fmt;
use url::Url;

use crate::credential::{Credential, DEFAULT_TOKEN_TYPE};
use crate::error::{Error, Result};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Client registration and endpoints handed to the broker at construction
#[derive(Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
}

impl OAuthSettings {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: vec![DRIVE_READONLY_SCOPE.to_string()],
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_endpoints(mut self, auth_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self.token_url = token_url.into();
        self
    }
}

// Keep the client secret out of logs
impl fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

pub struct GoogleOAuth {
    client: BasicClient,
}

impl GoogleOAuth {
    pub fn new(settings: &OAuthSettings) -> Result<Self> {
        let invalid = |what: &str, e: url::ParseError| {
            Error::InvalidConfig(format!("{} is not a valid URL: {}", what, e))
        };

        let auth_url = AuthUrl::new(settings.auth_url.clone()).map_err(|e| invalid("auth_url", e))?;
        let token_url =
            TokenUrl::new(settings.token_url.clone()).map_err(|e| invalid("token_url", e))?;
        let redirect_url =
            RedirectUrl::new(settings.redirect_uri.clone()).map_err(|e| invalid("redirect_uri", e))?;

        // Google expects client credentials in the form body
        let client = BasicClient::new(
            ClientId::new(settings.client_id.clone()),
            Some(ClientSecret::new(settings.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_redirect_uri(redirect_url);

        Ok(Self { client })
    }

    /// Build the consent URL. Returns the URL and the CSRF state embedded in it.
    pub fn authorization_url(&self, scopes: &[String]) -> (Url, CsrfToken) {
        self.client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .url()
    }

    /// Exchange an authorization code at the token endpoint
    pub async fn exchange_code(&self, code: &str, requested_scopes: &[String]) -> Result<Credential> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|err| {
                let message = match &err {
                    RequestTokenError::ServerResponse(response) => response.to_string(),
                    other => other.to_string(),
                };
                Error::AuthExchange(message)
            })?;

        // An absent scope means the requested scopes were granted as-is
        let scopes: Vec<String> = match token.scopes() {
            Some(granted) => granted.iter().map(|s| s.to_string()).collect(),
            None => requested_scopes.to_vec(),
        };

        let token_type = match token.token_type() {
            BasicTokenType::Bearer => DEFAULT_TOKEN_TYPE.to_string(),
            BasicTokenType::Mac => "MAC".to_string(),
            BasicTokenType::Extension(other) => other.clone(),
        };

        let mut credential = Credential::new(token.access_token().secret().clone())
            .with_scopes(scopes)
            .with_token_type(token_type);

        if let Some(refresh) = token.refresh_token() {
            credential = credential.with_refresh_token(refresh.secret().clone());
        }
        if let Some(lifetime) = token.expires_in().and_then(|d| chrono::Duration::from_std(d).ok()) {
            credential = credential.expiring_in(lifetime);
        }

        Ok(credential)
    }
}

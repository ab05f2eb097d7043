use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::{Path, PathBuf}, sync::Arc};

use crate::assistant::{CommandInterpreter, DEFAULT_MODEL, GROQ_API_BASE};
use crate::auth::google_oauth::{GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
use crate::auth::{OAuthSettings, DRIVE_READONLY_SCOPE};
use crate::gateway::DRIVE_API_BASE;
use crate::store::{CredentialStore, FileCredentialStore, KeyringCredentialStore};

/// Used when no config file is found: everything comes from the environment
const DEFAULT_CONFIG: &str = r#"
[google]
client_id = "${GOOGLE_CLIENT_ID}"
client_secret = "${GOOGLE_CLIENT_SECRET}"
redirect_uri = "${GOOGLE_REDIRECT_URI}"

[assistant]
enabled = true
api_key = "${GROQ_API_KEY}"
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub google: GoogleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_assistant_url")]
    pub base_url: String,
    #[serde(default = "default_assistant_model")]
    pub model: String,
}

// Defaults
fn default_bind() -> String { "0.0.0.0:3000".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_scopes() -> Vec<String> { vec![DRIVE_READONLY_SCOPE.to_string()] }
fn default_auth_url() -> String { GOOGLE_AUTH_URL.to_string() }
fn default_token_url() -> String { GOOGLE_TOKEN_URL.to_string() }
fn default_api_base() -> String { DRIVE_API_BASE.to_string() }
fn default_page_size() -> u32 { 10 }
fn default_backend() -> StorageBackend { StorageBackend::File }
fn default_keyring_service() -> String { "drive-gateway".to_string() }
fn default_assistant_url() -> String { GROQ_API_BASE.to_string() }
fn default_assistant_model() -> String { DEFAULT_MODEL.to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
            keyring_service: default_keyring_service(),
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            base_url: default_assistant_url(),
            model: default_assistant_model(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        match Self::find_config_file() {
            Some(path) => {
                #[cfg(unix)]
                Self::validate_file_permissions(&path)?;

                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Invalid config file: {}", path.display()))
            }
            None => {
                tracing::debug!("No config file found, using environment variables");
                Self::from_toml_str(DEFAULT_CONFIG).context("Invalid configuration from environment")
            }
        }
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("DRIVE_GATEWAY_CONFIG") {
            return Some(PathBuf::from(path));
        }

        let mut locations = vec![
            PathBuf::from("./config.toml"),
            PathBuf::from("./drive-gateway.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join("drive-gateway").join("config.toml"));
        }

        locations.into_iter().find(|path| path.exists())
    }

    /// Parse TOML after `${VAR}` substitution, then validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let content = Self::substitute_env_vars(content);
        let mut config: Config = toml::from_str(&content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Substitute ${VAR_NAME} with environment variable values
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();
        let mut cursor = 0;

        while let Some(offset) = result[cursor..].find("${") {
            let start = cursor + offset;
            match result[start..].find('}') {
                Some(end) => {
                    let var_name = &result[start + 2..start + end];
                    let value = env::var(var_name).unwrap_or_default();
                    result.replace_range(start..start + end + 1, &value);
                    cursor = start + value.len();
                }
                None => break,
            }
        }

        result
    }

    fn validate(&mut self) -> Result<()> {
        let google = &mut self.google;
        for (name, value) in [
            ("google.client_id (GOOGLE_CLIENT_ID)", &google.client_id),
            ("google.client_secret (GOOGLE_CLIENT_SECRET)", &google.client_secret),
            ("google.redirect_uri (GOOGLE_REDIRECT_URI)", &google.redirect_uri),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} is not set", name);
            }
        }

        url::Url::parse(&google.redirect_uri)
            .with_context(|| format!("google.redirect_uri is not a valid URL: {}", google.redirect_uri))?;

        if google.scopes.is_empty() {
            tracing::warn!("No scopes configured, requesting {}", DRIVE_READONLY_SCOPE);
            google.scopes = default_scopes();
        }

        if google.page_size == 0 {
            anyhow::bail!("google.page_size must be positive");
        }

        // An empty substituted key means the assistant stays off
        if self.assistant.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            self.assistant.api_key = None;
        }
        if self.assistant.enabled && self.assistant.api_key.is_none() {
            tracing::info!("Assistant enabled but GROQ_API_KEY is not set - /command disabled");
            self.assistant.enabled = false;
        }

        Ok(())
    }

    /// Settings handed to the authorization broker
    pub fn oauth_settings(&self) -> OAuthSettings {
        OAuthSettings::new(
            self.google.client_id.clone(),
            self.google.client_secret.clone(),
            self.google.redirect_uri.clone(),
        )
        .with_scopes(self.google.scopes.clone())
        .with_endpoints(self.google.auth_url.clone(), self.google.token_url.clone())
    }

    /// Where the file backend keeps the credential
    pub fn credential_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.path {
            return Ok(path.clone());
        }
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join("drive-gateway").join("credential.json"))
    }

    pub fn credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        Ok(match self.storage.backend {
            StorageBackend::File => Arc::new(FileCredentialStore::new(self.credential_path()?)),
            StorageBackend::Keyring => {
                Arc::new(KeyringCredentialStore::new(&self.storage.keyring_service))
            }
        })
    }

    pub fn command_interpreter(&self) -> Option<CommandInterpreter> {
        if !self.assistant.enabled {
            return None;
        }
        let api_key = self.assistant.api_key.clone()?;
        Some(
            CommandInterpreter::new(api_key, self.assistant.model.clone())
                .with_base_url(self.assistant.base_url.clone()),
        )
    }

    /// Validate config file permissions (Unix only)
    #[cfg(unix)]
    fn validate_file_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to read metadata for config file: {}", path.display()))?;
        let mode = metadata.permissions().mode();

        let group_readable = (mode & 0o040) != 0;
        let others_readable = (mode & 0o004) != 0;
        let group_writable = (mode & 0o020) != 0;
        let others_writable = (mode & 0o002) != 0;

        if group_readable || others_readable {
            tracing::warn!(
                "⚠️  Config file {} has insecure permissions: {:o} (it holds the client secret, chmod 600 recommended)",
                path.display(),
                mode & 0o777
            );
        }

        if group_writable || others_writable {
            anyhow::bail!(
                "Config file {} is writable by group or others (mode: {:o}). Run: chmod 600 {}",
                path.display(),
                mode & 0o777,
                path.display()
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[google]
client_id = "id-123"
client_secret = "secret"
redirect_uri = "http://localhost:3000/callback"
"#;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only variable name not read by any other test
        unsafe { env::set_var("DRIVE_GATEWAY_TEST_VAR", "test_value") };

        let input = "client_id = \"${DRIVE_GATEWAY_TEST_VAR}\"\nother = \"${DRIVE_GATEWAY_UNSET_VAR}\"";
        let output = Config::substitute_env_vars(input);

        assert_eq!(output, "client_id = \"test_value\"\nother = \"\"");

        unsafe { env::remove_var("DRIVE_GATEWAY_TEST_VAR") };
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.google.scopes, vec![DRIVE_READONLY_SCOPE.to_string()]);
        assert_eq!(config.google.token_url, GOOGLE_TOKEN_URL);
        assert_eq!(config.google.page_size, 10);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(config.command_interpreter().is_none());
    }

    #[test]
    fn test_missing_client_id_is_rejected() {
        let input = MINIMAL.replace("id-123", "");
        let err = Config::from_toml_str(&input).unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn test_invalid_redirect_uri_is_rejected() {
        let input = MINIMAL.replace("http://localhost:3000/callback", "localhost callback");
        assert!(Config::from_toml_str(&input).is_err());
    }

    #[test]
    fn test_oauth_settings() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        let settings = config.oauth_settings();

        assert_eq!(settings.client_id, "id-123");
        assert_eq!(settings.redirect_uri, "http://localhost:3000/callback");
        assert_eq!(settings.auth_url, GOOGLE_AUTH_URL);
    }

    #[test]
    fn test_storage_section() {
        let input = format!(
            "{}\n[storage]\nbackend = \"file\"\npath = \"/tmp/creds/credential.json\"\n",
            MINIMAL
        );
        let config = Config::from_toml_str(&input).unwrap();

        assert_eq!(
            config.credential_path().unwrap(),
            PathBuf::from("/tmp/creds/credential.json")
        );
    }

    #[test]
    fn test_assistant_without_key_is_disabled() {
        let input = format!("{}\n[assistant]\nenabled = true\napi_key = \"\"\n", MINIMAL);
        let config = Config::from_toml_str(&input).unwrap();

        assert!(!config.assistant.enabled);
        assert!(config.command_interpreter().is_none());
    }
}

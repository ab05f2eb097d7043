use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use super::google_oauth::{GoogleOAuth, OAuthSettings};
use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::metrics::METRICS;
use crate::session::SessionContext;
use crate::store::CredentialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    PendingCallback,
    Authenticated,
}

/// Consent redirect produced by [`AuthBroker::begin_authorization`]. Not persisted.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub scopes: Vec<String>,
}

struct Flow {
    state: AuthState,
    pending_state: Option<String>,
    pending_scopes: Option<Vec<String>>,
}

/// Drives the authorization-code flow and owns the write path of the credential:
/// session first, then the store.
pub struct AuthBroker {
    oauth: GoogleOAuth,
    scopes: Vec<String>,
    session: SessionContext,
    store: Arc<dyn CredentialStore>,
    // Never held across an await
    flow: Mutex<Flow>,
    // Held from session install through store save so both end on the same credential
    commit: tokio::sync::Mutex<()>,
}

impl AuthBroker {
    pub fn new(
        settings: OAuthSettings,
        session: SessionContext,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let oauth = GoogleOAuth::new(&settings)?;
        let state = if session.is_authenticated() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };

        Ok(Self {
            oauth,
            scopes: settings.scopes,
            session,
            store,
            flow: Mutex::new(Flow {
                state,
                pending_state: None,
                pending_scopes: None,
            }),
            commit: tokio::sync::Mutex::new(()),
        })
    }

    /// Install the persisted credential, if any. A corrupt or unreadable
    /// record is logged and the broker stays unauthenticated.
    pub async fn bootstrap(&self) -> AuthState {
        match self.store.load().await {
            Ok(Some(credential)) => {
                self.session.install(credential);
                self.set_state(AuthState::Authenticated);
                info!("✓ Restored stored credential");
            }
            Ok(None) => {
                info!("No stored credential - authorization required");
            }
            Err(e) => {
                warn!("Ignoring stored credential: {}", e);
            }
        }
        self.state()
    }

    pub fn state(&self) -> AuthState {
        self.flow.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Scopes requested when the caller does not name any
    pub fn default_scopes(&self) -> &[String] {
        &self.scopes
    }

    fn set_state(&self, state: AuthState) {
        self.flow.lock().unwrap_or_else(|e| e.into_inner()).state = state;
    }

    /// Build the provider consent URL. Valid from any state; re-running it while
    /// authenticated keeps the current credential until a new one is exchanged.
    pub fn begin_authorization(&self, scopes: &[String]) -> AuthorizationRequest {
        let scopes = if scopes.is_empty() {
            self.scopes.clone()
        } else {
            scopes.to_vec()
        };

        let (url, csrf) = self.oauth.authorization_url(&scopes);

        let mut flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
        flow.pending_state = Some(csrf.secret().clone());
        flow.pending_scopes = Some(scopes.clone());
        if flow.state == AuthState::Unauthenticated {
            flow.state = AuthState::PendingCallback;
        }

        AuthorizationRequest {
            url,
            state: csrf.secret().clone(),
            scopes,
        }
    }

    /// Exchange the callback's authorization code for a credential, install it
    /// and persist it. `state` is checked against the pending request when present.
    ///
    /// A failed save returns [`Error::StoreWrite`] but the new credential stays
    /// installed: the session is authenticated until restart.
    pub async fn complete_authorization(
        &self,
        code: Option<&str>,
        state: Option<&str>,
    ) -> Result<Credential> {
        let code = match code.map(str::trim) {
            Some(code) if !code.is_empty() => code,
            _ => {
                METRICS.auth_exchanges_total.with_label_values(&["missing_code"]).inc();
                return Err(Error::MissingAuthorizationCode);
            }
        };

        let requested_scopes = {
            let flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(state) = state {
                if flow.pending_state.as_deref() != Some(state) {
                    METRICS.auth_exchanges_total.with_label_values(&["state_mismatch"]).inc();
                    return Err(Error::StateMismatch);
                }
            }
            flow.pending_scopes.clone().unwrap_or_else(|| self.scopes.clone())
        };

        let credential = match self.oauth.exchange_code(code, &requested_scopes).await {
            Ok(credential) => credential,
            Err(e) => {
                METRICS.auth_exchanges_total.with_label_values(&["failure"]).inc();
                warn!("Authorization code exchange failed: {}", e);
                return Err(e);
            }
        };
        METRICS.auth_exchanges_total.with_label_values(&["success"]).inc();

        if credential.refresh_token.is_none() {
            info!("Provider issued no refresh token (offline access granted earlier)");
        }

        let _commit = self.commit.lock().await;
        self.session.install(credential.clone());
        {
            let mut flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
            flow.state = AuthState::Authenticated;
            flow.pending_state = None;
            flow.pending_scopes = None;
        }

        self.store.save(&credential).await?;
        info!("✓ Authorization complete, credential stored");

        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// In-memory store that can be told to fail or to save slowly
    #[derive(Default)]
    struct MemoryStore {
        record: Mutex<Option<Credential>>,
        corrupt: bool,
        fail_save: bool,
        slow_token: Option<&'static str>,
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn load(&self) -> Result<Option<Credential>> {
            if self.corrupt {
                return Err(Error::StoreCorrupt("bad record".to_string()));
            }
            Ok(self.record.lock().unwrap().clone())
        }

        async fn save(&self, credential: &Credential) -> Result<()> {
            if self.fail_save {
                return Err(Error::StoreWrite("disk full".to_string()));
            }
            if self.slow_token == Some(credential.access_token.as_str()) {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            *self.record.lock().unwrap() = Some(credential.clone());
            Ok(())
        }
    }

    fn broker_with(store: Arc<dyn CredentialStore>) -> AuthBroker {
        let settings = OAuthSettings::new("client", "secret", "http://localhost:3000/callback");
        AuthBroker::new(settings, SessionContext::new(), store).unwrap()
    }

    fn broker_against(server_url: &str, store: Arc<dyn CredentialStore>) -> AuthBroker {
        let settings = OAuthSettings::new("client", "secret", "http://localhost:3000/callback")
            .with_endpoints(format!("{}/auth", server_url), format!("{}/token", server_url));
        AuthBroker::new(settings, SessionContext::new(), store).unwrap()
    }

    async fn token_endpoint(server: &mut mockito::ServerGuard, code: &str, access_token: &str) {
        server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded("code".into(), code.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"access_token": "{}", "refresh_token": "R-{}", "token_type": "Bearer"}}"#,
                access_token, access_token
            ))
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn test_bootstrap_with_stored_credential() {
        let store = Arc::new(MemoryStore::default());
        *store.record.lock().unwrap() = Some(Credential::new("T0"));

        let broker = broker_with(store);
        assert_eq!(broker.bootstrap().await, AuthState::Authenticated);
        assert_eq!(broker.session().require().unwrap().access_token, "T0");
    }

    #[tokio::test]
    async fn test_bootstrap_empty_store() {
        let broker = broker_with(Arc::new(MemoryStore::default()));
        assert_eq!(broker.bootstrap().await, AuthState::Unauthenticated);
        assert!(!broker.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_bootstrap_survives_corrupt_store() {
        let store = Arc::new(MemoryStore {
            corrupt: true,
            ..Default::default()
        });
        let broker = broker_with(store);

        assert_eq!(broker.bootstrap().await, AuthState::Unauthenticated);
    }

    #[test]
    fn test_begin_moves_to_pending() {
        let broker = broker_with(Arc::new(MemoryStore::default()));
        let request = broker.begin_authorization(&["read".to_string()]);

        assert_eq!(broker.state(), AuthState::PendingCallback);
        assert_eq!(request.scopes, vec!["read".to_string()]);
        assert!(request.url.as_str().contains("access_type=offline"));
        assert!(request.url.as_str().contains("scope=read"));
    }

    #[test]
    fn test_begin_uses_default_scopes() {
        let broker = broker_with(Arc::new(MemoryStore::default()));
        let request = broker.begin_authorization(&[]);

        assert_eq!(request.scopes, broker.default_scopes().to_vec());
    }

    #[tokio::test]
    async fn test_missing_code_is_rejected() {
        let broker = broker_with(Arc::new(MemoryStore::default()));
        broker.begin_authorization(&[]);

        let err = broker.complete_authorization(None, None).await.unwrap_err();
        assert!(matches!(err, Error::MissingAuthorizationCode));

        let err = broker.complete_authorization(Some("  "), None).await.unwrap_err();
        assert!(matches!(err, Error::MissingAuthorizationCode));

        assert_eq!(broker.state(), AuthState::PendingCallback);
    }

    #[tokio::test]
    async fn test_state_mismatch_is_rejected() {
        let broker = broker_with(Arc::new(MemoryStore::default()));
        broker.begin_authorization(&[]);

        let err = broker
            .complete_authorization(Some("abc"), Some("forged"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateMismatch));
        assert_eq!(broker.state(), AuthState::PendingCallback);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_session_authenticated() {
        let mut server = mockito::Server::new_async().await;
        token_endpoint(&mut server, "abc", "T1").await;

        let store = Arc::new(MemoryStore {
            fail_save: true,
            ..Default::default()
        });
        let broker = broker_against(&server.url(), store.clone());
        broker.begin_authorization(&[]);

        let err = broker
            .complete_authorization(Some("abc"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StoreWrite(_)));
        assert_eq!(broker.state(), AuthState::Authenticated);
        assert_eq!(broker.session().require().unwrap().access_token, "T1");
        assert!(store.record.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_completions_leave_session_and_store_agreeing() {
        let mut server = mockito::Server::new_async().await;
        token_endpoint(&mut server, "code-a", "TA").await;
        token_endpoint(&mut server, "code-b", "TB").await;

        let store = Arc::new(MemoryStore {
            slow_token: Some("TA"),
            ..Default::default()
        });
        let broker = broker_against(&server.url(), store.clone());

        let (a, b) = tokio::join!(
            broker.complete_authorization(Some("code-a"), None),
            broker.complete_authorization(Some("code-b"), None),
        );
        assert!(a.is_ok() && b.is_ok());

        let stored = store.record.lock().unwrap().clone();
        assert_eq!(stored, broker.session().current());
    }
}

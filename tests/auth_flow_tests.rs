use std::sync::Arc;

use drive_gateway::{
    AuthBroker, AuthState, CredentialStore, Error, FileCredentialStore, OAuthSettings,
    SessionContext,
};
use mockito::Matcher;
use tempfile::TempDir;

fn settings(server_url: &str) -> OAuthSettings {
    OAuthSettings::new("test-client", "test-secret", "http://localhost:3000/callback")
        .with_endpoints(format!("{}/auth", server_url), format!("{}/token", server_url))
}

fn broker(server_url: &str, store: Arc<FileCredentialStore>) -> AuthBroker {
    AuthBroker::new(settings(server_url), SessionContext::new(), store).unwrap()
}

#[tokio::test]
async fn test_full_authorization_flow_persists_credential() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "abc".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token": "T1", "refresh_token": "R1", "token_type": "Bearer", "expires_in": 3599}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCredentialStore::new(dir.path().join("credential.json")));
    let broker = broker(&server.url(), store.clone());

    let request = broker.begin_authorization(&["read".to_string()]);
    assert!(request.url.as_str().starts_with(&format!("{}/auth", server.url())));
    assert!(request.url.as_str().contains("access_type=offline"));
    assert!(request.url.as_str().contains("scope=read"));
    assert_eq!(broker.state(), AuthState::PendingCallback);

    let credential = broker
        .complete_authorization(Some("abc"), Some(&request.state))
        .await
        .unwrap();

    assert_eq!(credential.access_token, "T1");
    assert_eq!(credential.refresh_token.as_deref(), Some("R1"));
    assert_eq!(credential.scopes, vec!["read".to_string()]);
    assert!(!credential.is_expired());
    assert_eq!(broker.state(), AuthState::Authenticated);

    // Session and store hold the same credential
    assert_eq!(broker.session().current(), Some(credential.clone()));
    assert_eq!(store.load().await.unwrap(), Some(credential));

    token.assert_async().await;
}

#[tokio::test]
async fn test_restart_restores_stored_credential() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "T1", "refresh_token": "R1", "token_type": "Bearer"}"#)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("credential.json");

    let first = broker(&server.url(), Arc::new(FileCredentialStore::new(&path)));
    first.begin_authorization(&[]);
    first.complete_authorization(Some("abc"), None).await.unwrap();

    let second = broker(&server.url(), Arc::new(FileCredentialStore::new(&path)));
    assert_eq!(second.state(), AuthState::Unauthenticated);
    assert_eq!(second.bootstrap().await, AuthState::Authenticated);

    let restored = second.session().require().unwrap();
    assert_eq!(restored.access_token, "T1");
    assert_eq!(restored.refresh_token.as_deref(), Some("R1"));
}

#[tokio::test]
async fn test_missing_code_never_contacts_provider() {
    let mut server = mockito::Server::new_async().await;
    let token = server.mock("POST", "/token").expect(0).create_async().await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCredentialStore::new(dir.path().join("credential.json")));
    let broker = broker(&server.url(), store.clone());
    broker.begin_authorization(&[]);

    let err = broker.complete_authorization(None, None).await.unwrap_err();
    assert!(matches!(err, Error::MissingAuthorizationCode));
    assert_eq!(broker.state(), AuthState::PendingCallback);
    assert!(store.load().await.unwrap().is_none());

    token.assert_async().await;
}

#[tokio::test]
async fn test_rejected_code_leaves_state_unchanged() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": "invalid_grant", "error_description": "Bad Request"}"#)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCredentialStore::new(dir.path().join("credential.json")));
    let broker = broker(&server.url(), store.clone());
    broker.begin_authorization(&[]);

    let err = broker
        .complete_authorization(Some("expired"), None)
        .await
        .unwrap_err();

    match err {
        Error::AuthExchange(message) => assert!(message.contains("invalid_grant")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(broker.state(), AuthState::PendingCallback);
    assert!(!broker.session().is_authenticated());
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_bootstrap_ignores_corrupt_record() {
    let server = mockito::Server::new_async().await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("credential.json");
    std::fs::write(&path, "{not json").unwrap();

    let broker = broker(&server.url(), Arc::new(FileCredentialStore::new(&path)));
    assert_eq!(broker.bootstrap().await, AuthState::Unauthenticated);
    assert!(!broker.session().is_authenticated());
}

#[tokio::test]
async fn test_unwritable_store_reports_store_write() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "T1", "refresh_token": "R1", "token_type": "Bearer"}"#)
        .create_async()
        .await;

    // The store's parent directory is a regular file, so every save fails
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();
    let store = Arc::new(FileCredentialStore::new(blocker.join("credential.json")));

    let broker = broker(&server.url(), store.clone());
    broker.begin_authorization(&[]);

    let err = broker.complete_authorization(Some("abc"), None).await.unwrap_err();
    assert!(matches!(err, Error::StoreWrite(_)));

    assert_eq!(broker.state(), AuthState::Authenticated);
    assert_eq!(broker.session().require().unwrap().access_token, "T1");
    assert!(!matches!(store.load().await, Ok(Some(_))));
}

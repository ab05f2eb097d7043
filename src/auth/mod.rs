// OAuth2 authorization-code flow and credential installation

pub mod broker;
pub mod google_oauth;

pub use broker::{AuthBroker, AuthState, AuthorizationRequest};
pub use google_oauth::{GoogleOAuth, OAuthSettings, DRIVE_READONLY_SCOPE};

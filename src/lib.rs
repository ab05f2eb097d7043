pub mod assistant;
pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod server;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use auth::{AuthBroker, AuthState, OAuthSettings};
pub use config::Config;
pub use credential::Credential;
pub use error::{Error, Result};
pub use gateway::{DriveGateway, FileField, FileMetadata};
pub use session::SessionContext;
pub use store::{CredentialStore, FileCredentialStore, KeyringCredentialStore};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

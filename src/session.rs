use std::sync::{Arc, RwLock};

use crate::credential::Credential;
use crate::error::{Error, Result};

/// Holds the single credential installed for this process.
///
/// Every request shares it: this is a single-user gateway. Clones share the
/// same slot, so hand one clone to the broker and one to the gateway.
#[derive(Clone, Default)]
pub struct SessionContext {
    slot: Arc<RwLock<Option<Credential>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session pre-populated with a credential obtained out of band
    pub fn with_credential(credential: Credential) -> Self {
        let session = Self::new();
        session.install(credential);
        session
    }

    /// Replace the installed credential (never merged with the old one)
    pub(crate) fn install(&self, credential: Credential) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(credential);
    }

    pub fn current(&self) -> Option<Credential> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Current credential, or [`Error::Unauthenticated`] when none is installed
    pub fn require(&self) -> Result<Credential> {
        self.current().ok_or(Error::Unauthenticated)
    }

    pub fn is_authenticated(&self) -> bool {
        self.slot
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or_else(|e| e.into_inner().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        let session = SessionContext::new();
        assert!(!session.is_authenticated());
        assert!(matches!(session.require(), Err(Error::Unauthenticated)));
    }

    #[test]
    fn test_clones_share_the_slot() {
        let session = SessionContext::new();
        let reader = session.clone();

        session.install(Credential::new("T1"));
        assert_eq!(reader.require().unwrap().access_token, "T1");

        session.install(Credential::new("T2"));
        assert_eq!(reader.current().unwrap().access_token, "T2");
    }
}

use anyhow::Result;
use parking_lot::RwLock;

use crate::api::{CurrentUser, TokenProvider};
use crate::data::AccountService;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not signed in")]
    Anonymous,
}

/// Holds the bearer token and the logged-in user snapshot.
///
/// Token storage lives outside this crate; the manager only keeps what it was
/// handed at startup and forgets it when the server rejects it.
#[derive(Default)]
pub struct Manager {
    token: RwLock<Option<String>>,
    user: RwLock<Option<CurrentUser>>,
}

impl Manager {
    pub fn new(token: Option<String>) -> Self {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self {
            token: RwLock::new(token),
            user: RwLock::new(None),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn has_token(&self) -> bool {
        self.token.read().is_some()
    }

    pub fn require(&self) -> Result<String, SessionError> {
        self.token.read().clone().ok_or(SessionError::Anonymous)
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.user.read().clone()
    }

    pub fn username(&self) -> Option<String> {
        self.user.read().as_ref().map(|user| user.username.clone())
    }

    pub fn set_user(&self, user: Option<CurrentUser>) {
        *self.user.write() = user;
    }

    pub fn clear(&self) {
        *self.token.write() = None;
        *self.user.write() = None;
    }

    /// Loads the user behind the current token. A rejected token is dropped
    /// and the session continues anonymously.
    pub fn resume(&self, accounts: &dyn AccountService) -> Result<Option<CurrentUser>> {
        if !self.has_token() {
            return Ok(None);
        }
        match accounts.current_user() {
            Ok(user) => {
                tracing::info!(username = %user.username, "session resumed");
                self.set_user(Some(user.clone()));
                Ok(Some(user))
            }
            Err(err) => {
                tracing::warn!(error = %err, "session token rejected; continuing anonymously");
                self.clear();
                Err(err)
            }
        }
    }
}

impl TokenProvider for Manager {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockService;

    #[test]
    fn blank_token_is_anonymous() {
        let manager = Manager::new(Some("   ".into()));
        assert!(!manager.has_token());
        assert!(matches!(manager.require(), Err(SessionError::Anonymous)));
    }

    #[test]
    fn resume_records_user() {
        let manager = Manager::new(Some("tok".into()));
        let user = manager.resume(&MockService::default()).unwrap();
        assert_eq!(user.map(|u| u.username), Some("guest".to_string()));
        assert_eq!(manager.username().as_deref(), Some("guest"));
    }

    #[test]
    fn resume_without_token_skips_lookup() {
        let manager = Manager::anonymous();
        assert!(manager.resume(&MockService::default()).unwrap().is_none());
        assert!(manager.current_user().is_none());
    }

    #[test]
    fn rejected_token_is_cleared() {
        let manager = Manager::new(Some("expired".into()));
        let accounts = MockService::default().rejecting_tokens();
        assert!(manager.resume(&accounts).is_err());
        assert!(!manager.has_token());
    }
}

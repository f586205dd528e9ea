/// Identity contract consumed by the messaging core
///
/// Authentication lives elsewhere; the core only needs a stable user id and
/// some display metadata for the signed-in user.
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tracing::{error, info};

pub const DEFAULT_DISPLAY_NAME: &str = "You";

pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
    fn current_user_display_name(&self) -> String;
    fn current_user_photo_url(&self) -> Option<String>;
}

/// Resolve the caller's id or fail with `LoginRequired`
pub fn require_user_id(identity: &dyn IdentityProvider) -> Result<String> {
    match identity.current_user_id() {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(ChatError::LoginRequired),
    }
}

/// Reject calls made on behalf of nobody
pub fn ensure_caller(caller_id: &str) -> Result<()> {
    if caller_id.trim().is_empty() {
        return Err(ChatError::LoginRequired);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: Some(display_name.into()),
            photo_url: None,
        }
    }
}

/// Signed-in user as reported by the auth provider. Cloning shares the session.
#[derive(Clone, Default)]
pub struct Session {
    user: Arc<RwLock<Option<UserProfile>>>,
}

impl Session {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(profile: UserProfile) -> Self {
        let session = Self::default();
        session.sign_in(profile);
        session
    }

    pub fn sign_in(&self, profile: UserProfile) {
        info!("Signed in as {}", profile.user_id);
        *self.write() = Some(profile);
    }

    pub fn sign_out(&self) {
        *self.write() = None;
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<UserProfile>> {
        self.user.write().unwrap_or_else(|poisoned| {
            error!("Session lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn profile(&self) -> Option<UserProfile> {
        match self.user.read() {
            Ok(user) => user.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl IdentityProvider for Session {
    fn current_user_id(&self) -> Option<String> {
        self.profile().map(|p| p.user_id)
    }

    fn current_user_display_name(&self) -> String {
        self.profile()
            .and_then(|p| p.display_name)
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
    }

    fn current_user_photo_url(&self) -> Option<String> {
        self.profile().and_then(|p| p.photo_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_required() {
        let session = Session::signed_out();
        assert!(matches!(
            require_user_id(&session),
            Err(ChatError::LoginRequired)
        ));

        session.sign_in(UserProfile::new("u1", "Ada"));
        assert_eq!(require_user_id(&session).unwrap(), "u1");

        session.sign_out();
        assert!(require_user_id(&session).is_err());
    }

    #[test]
    fn test_display_defaults() {
        let session = Session::signed_in(UserProfile {
            user_id: "u1".to_string(),
            display_name: None,
            photo_url: None,
        });
        assert_eq!(session.current_user_display_name(), "You");
        assert_eq!(session.current_user_photo_url(), None);
    }

    #[test]
    fn test_sign_in_after_poisoned_lock() {
        let session = Session::signed_out();
        let shared = session.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.user.write().unwrap();
            panic!("writer died holding the session lock");
        })
        .join();
        assert!(session.user.is_poisoned());

        session.sign_in(UserProfile::new("u1", "Ada"));
        assert_eq!(require_user_id(&session).unwrap(), "u1");
        assert_eq!(session.current_user_display_name(), "Ada");

        session.sign_out();
        assert!(require_user_id(&session).is_err());
    }
}

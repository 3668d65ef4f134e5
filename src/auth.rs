//! Sign-in flow and the locally mirrored user session.
//!
//! Desktop clients sign in through a popup and get the identity back
//! immediately. Mobile clients use a redirect; the identity only becomes
//! available after the page reloads, through `redirect_result`.

use std::future::Future;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("sign-in popup was blocked")]
    PopupBlocked,
    #[error("sign-in redirect failed: {0}")]
    RedirectFailed(String),
    #[error("sign-in was cancelled")]
    Cancelled,
}

/// Identity returned by the auth provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserIdentity {
    pub uid: String,
    pub display_name: Option<String>,
}

/// Local mirror of who is signed in
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserSession {
    pub display_name: Option<String>,
    pub uid: Option<String>,
}

impl UserSession {
    pub fn from_identity(identity: &UserIdentity) -> Self {
        Self {
            display_name: identity.display_name.clone(),
            uid: Some(identity.uid.clone()),
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.uid.is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Which sign-in flow a client should use
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// Mobile when the user agent mentions `Mobi` or `Android` (any case).
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.contains("mobi") || ua.contains("android") {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }
}

/// External identity provider.
pub trait AuthProvider: Send + Sync {
    fn sign_in_popup(&self) -> impl Future<Output = Result<UserIdentity, AuthError>> + Send;

    /// Start a redirect sign-in. Completes before the identity is known.
    fn sign_in_redirect(&self) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Identity from a finished redirect, if one is pending.
    fn redirect_result(&self) -> impl Future<Output = Result<Option<UserIdentity>, AuthError>> + Send;

    fn current_user(&self) -> Option<UserIdentity>;
}

/// Sign in with the flow that suits `device`.
///
/// Returns the identity for a popup sign-in and `None` for a redirect, whose
/// result arrives later through [`AuthProvider::redirect_result`].
pub async fn sign_in<A: AuthProvider>(
    auth: &A,
    device: DeviceClass,
) -> Result<Option<UserIdentity>, AuthError> {
    match device {
        DeviceClass::Desktop => {
            let identity = auth.sign_in_popup().await?;
            info!("signed in as {}", identity.uid);
            Ok(Some(identity))
        }
        DeviceClass::Mobile => {
            auth.sign_in_redirect().await?;
            info!("redirect sign-in started");
            Ok(None)
        }
    }
}

/// Provider with a fixed outcome, for offline play and tests.
#[derive(Debug)]
pub struct StaticAuth {
    identity: Result<UserIdentity, AuthError>,
    pending_redirect: Mutex<bool>,
    current: Mutex<Option<UserIdentity>>,
}

impl StaticAuth {
    pub fn succeeding(identity: UserIdentity) -> Self {
        Self {
            identity: Ok(identity),
            pending_redirect: Mutex::new(false),
            current: Mutex::new(None),
        }
    }

    pub fn failing(error: AuthError) -> Self {
        Self {
            identity: Err(error),
            pending_redirect: Mutex::new(false),
            current: Mutex::new(None),
        }
    }

    fn remember(&self, identity: &UserIdentity) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(identity.clone());
        }
    }
}

impl AuthProvider for StaticAuth {
    async fn sign_in_popup(&self) -> Result<UserIdentity, AuthError> {
        let identity = self.identity.clone()?;
        self.remember(&identity);
        Ok(identity)
    }

    async fn sign_in_redirect(&self) -> Result<(), AuthError> {
        if let Err(e) = &self.identity {
            warn!("redirect sign-in refused: {}", e);
            return Err(AuthError::RedirectFailed(e.to_string()));
        }
        if let Ok(mut pending) = self.pending_redirect.lock() {
            *pending = true;
        }
        Ok(())
    }

    async fn redirect_result(&self) -> Result<Option<UserIdentity>, AuthError> {
        let was_pending = self
            .pending_redirect
            .lock()
            .map(|mut pending| std::mem::replace(&mut *pending, false))
            .unwrap_or(false);
        if !was_pending {
            return Ok(None);
        }
        let identity = self.identity.clone()?;
        self.remember(&identity);
        Ok(Some(identity))
    }

    fn current_user(&self) -> Option<UserIdentity> {
        self.current.lock().ok().and_then(|c| c.clone())
    }
}

//! Authentication module for Classflow
//!
//! The session state machine sits on top of two seams: an identity provider
//! gateway (Entra External ID via OAuth2) and a persistent token store.

mod claims;
pub mod gateway;
pub mod msal;
pub mod session;
pub mod store;
pub mod tokens;

pub use gateway::Reauthenticate;
pub use msal::MsalGateway;
pub use session::{AuthSession, Phase};
pub use store::FileTokenStore;
pub use tokens::TokenStore;

use crate::config::IdentitySettings;

/// Scopes requested for every sign-in
pub const LOGIN_SCOPES: &[&str] = &["openid", "offline_access", "profile", "email"];

/// Identity provider configuration for the Classflow external tenant
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth2 client ID (public client)
    pub client_id: String,
    /// CIAM authority, e.g. `https://classflow.ciamlogin.com/classflow.onmicrosoft.com`
    pub authority: String,
    /// OAuth2 redirect URI
    pub redirect_uri: String,
    /// Where the browser lands after sign-out
    pub post_logout_redirect_uri: String,
    pub scopes: Vec<String>,
}

impl AuthConfig {
    pub fn from_settings(settings: &IdentitySettings) -> Self {
        let tenant = settings.tenant_name.trim();
        Self {
            client_id: settings.client_id.clone(),
            authority: format!("https://{0}.ciamlogin.com/{0}.onmicrosoft.com", tenant),
            redirect_uri: settings.redirect_uri.clone(),
            post_logout_redirect_uri: settings.post_logout_redirect_uri.clone(),
            scopes: LOGIN_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority)
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }

    pub fn device_code_url(&self) -> String {
        format!("{}/oauth2/v2.0/devicecode", self.authority)
    }

    pub fn logout_url(&self) -> String {
        format!("{}/oauth2/v2.0/logout", self.authority)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::from_settings(&IdentitySettings::default())
    }
}

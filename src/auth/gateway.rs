//! Identity provider gateway: the interactive sign-in seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::tokens::Credential;

/// How a sign-in is brokered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginProvider {
    Password,
    Google,
    Microsoft,
}

impl LoginProvider {
    /// Message shown when a failure carries no text of its own
    pub fn failure_fallback(&self) -> &'static str {
        match self {
            LoginProvider::Password => "Login failed",
            LoginProvider::Google => "Google login failed",
            LoginProvider::Microsoft => "Microsoft login failed",
        }
    }
}

impl fmt::Display for LoginProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoginProvider::Password => "password",
            LoginProvider::Google => "google",
            LoginProvider::Microsoft => "microsoft",
        })
    }
}

/// Identity returned by a completed sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    /// Stable account handle (home account id)
    pub account_handle: String,
    pub primary_email: String,
    pub display_name: Option<String>,
}

/// Outcome of a successful sign-in
#[derive(Debug, Clone)]
pub struct SignIn {
    pub identity: ResolvedIdentity,
    pub credential: Option<Credential>,
}

/// Account known to the gateway's cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub home_account_id: String,
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The user backed out of the interactive flow. Not a failure.
    #[error("sign-in cancelled by user")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Human-readable failure text, or `None` when the user cancelled
    pub fn failure_message(&self) -> Option<String> {
        match self {
            GatewayError::Cancelled => None,
            GatewayError::Failed(msg) => Some(msg.clone()),
            GatewayError::Other(e) => Some(format!("{:#}", e)),
        }
    }
}

/// External interactive-authentication broker.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Run an interactive sign-in brokered by `provider`.
    async fn interactive_login(
        &self,
        provider: LoginProvider,
        scopes: &[String],
    ) -> Result<SignIn, GatewayError>;

    /// Exchange an email and password for a session.
    async fn exchange_password(
        &self,
        email: &str,
        password: &str,
        scopes: &[String],
    ) -> Result<SignIn, GatewayError>;

    async fn interactive_logout(
        &self,
        account: &AccountInfo,
        post_logout_target: &str,
    ) -> anyhow::Result<()>;

    async fn known_accounts(&self) -> Vec<AccountInfo>;
}

/// Obtains a fresh credential without user interaction.
#[async_trait]
pub trait Reauthenticate: Send + Sync {
    /// `Ok(None)` means re-authentication is not possible for this credential.
    async fn refresh_credential(
        &self,
        current: Option<Credential>,
    ) -> anyhow::Result<Option<Credential>>;
}

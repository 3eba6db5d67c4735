//! Auth session state machine
//!
//! Owns `{ user, is_loading, error }` and moves it between Idle, Loading,
//! Authenticated and Failed. Observers subscribe to a watch channel; the
//! persisted projection goes through the token store.
//!
//! Public transitions never return errors: failures land in `error`.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use super::gateway::{GatewayError, IdentityGateway, LoginProvider, SignIn};
use super::tokens::{PersistedSession, TokenStore};
use super::AuthConfig;
use crate::api::LoginRedirect;
use crate::models::User;

/// Full session state as observed by the UI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<User>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Which of the four session states currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Authenticated,
    Failed,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn phase(&self) -> Phase {
        if self.is_loading {
            Phase::Loading
        } else if self.user.is_some() {
            Phase::Authenticated
        } else if self.error.is_some() {
            Phase::Failed
        } else {
            Phase::Idle
        }
    }

    /// Rebuild state from its persisted projection. Transient fields start cleared.
    pub fn rehydrate(persisted: PersistedSession) -> Self {
        if persisted.is_authenticated != persisted.user.is_some() {
            tracing::warn!("Persisted session flags disagree with stored user; trusting the user record");
        }
        Self {
            user: persisted.user,
            is_loading: false,
            error: None,
        }
    }
}

impl From<&AuthState> for PersistedSession {
    fn from(state: &AuthState) -> Self {
        match &state.user {
            Some(user) => Self::signed_in(user.clone()),
            None => Self::default(),
        }
    }
}

/// Session context owned by the application shell.
pub struct AuthSession {
    state: watch::Sender<AuthState>,
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<dyn TokenStore>,
    scopes: Vec<String>,
    post_logout_target: String,
}

impl AuthSession {
    /// Initialize the gateway and rehydrate persisted state from the store.
    pub async fn restore(
        gateway: Arc<dyn IdentityGateway>,
        store: Arc<dyn TokenStore>,
        auth_config: &AuthConfig,
    ) -> Self {
        if let Err(e) = gateway.initialize().await {
            tracing::warn!("Identity gateway initialization failed: {:#}", e);
        }

        let initial = match store.load().await {
            Ok(persisted) => AuthState::rehydrate(persisted),
            Err(e) => {
                tracing::warn!("Failed to load session from {} store: {:#}", store.name(), e);
                AuthState::default()
            }
        };
        tracing::debug!(phase = ?initial.phase(), "Session restored");

        let (state, _) = watch::channel(initial);
        Self {
            state,
            gateway,
            store,
            scopes: auth_config.scopes.clone(),
            post_logout_target: auth_config.post_logout_redirect_uri.clone(),
        }
    }

    pub fn snapshot(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Sign in with email and password.
    pub async fn login(&self, email: &str, password: &str) {
        self.begin();
        let result = self
            .gateway
            .exchange_password(email, password, &self.scopes)
            .await;
        self.settle(LoginProvider::Password, result).await;
    }

    pub async fn login_with_google(&self) {
        self.login_interactive(LoginProvider::Google).await;
    }

    pub async fn login_with_microsoft(&self) {
        self.login_interactive(LoginProvider::Microsoft).await;
    }

    /// Sign out. Local state and credentials are cleared even when the
    /// remote teardown fails.
    pub async fn logout(&self) {
        let user = self.state.borrow().user.clone();

        let accounts = self.gateway.known_accounts().await;
        let account = user
            .as_ref()
            .and_then(|u| accounts.iter().find(|a| a.home_account_id == u.id))
            .or_else(|| accounts.first())
            .cloned();

        if let Some(account) = account {
            if let Err(e) = self
                .gateway
                .interactive_logout(&account, &self.post_logout_target)
                .await
            {
                tracing::warn!("Remote sign-out failed: {:#}", e);
            }
        }

        self.reset_local().await;
        tracing::info!("Logged out");
    }

    pub fn clear_error(&self) {
        self.state.send_modify(|s| s.error = None);
    }

    async fn login_interactive(&self, provider: LoginProvider) {
        self.begin();
        let result = self.gateway.interactive_login(provider, &self.scopes).await;
        self.settle(provider, result).await;
    }

    fn begin(&self) {
        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
    }

    async fn settle(&self, provider: LoginProvider, result: Result<SignIn, GatewayError>) {
        let sign_in = match result {
            Ok(sign_in) => sign_in,
            Err(e) => {
                match e.failure_message() {
                    None => {
                        tracing::info!("{} sign-in cancelled", provider);
                        self.state.send_modify(|s| {
                            s.is_loading = false;
                            s.error = None;
                        });
                    }
                    Some(msg) => self.fail(provider, msg).await,
                }
                return;
            }
        };

        match sign_in.credential {
            Some(credential) => {
                if let Err(e) = self.store.set_credential(credential).await {
                    tracing::warn!("Failed to store credential: {:#}", e);
                    self.fail(provider, "Failed to store credentials".into()).await;
                    return;
                }
            }
            // A previous user's token must not outlive their session
            None => {
                if let Err(e) = self.store.clear_credential().await {
                    tracing::warn!("Failed to clear credential: {:#}", e);
                }
            }
        }

        let identity = sign_in.identity;
        let user = User::new(
            identity.account_handle,
            identity.primary_email,
            identity.display_name,
        );
        tracing::info!(user = %user.email, "Signed in via {}", provider);

        self.state.send_replace(AuthState {
            user: Some(user),
            is_loading: false,
            error: None,
        });
        self.persist().await;
    }

    async fn fail(&self, provider: LoginProvider, message: String) {
        let message = if message.trim().is_empty() {
            provider.failure_fallback().to_string()
        } else {
            message
        };
        tracing::warn!("{} sign-in failed: {}", provider, message);

        if let Err(e) = self.store.clear_credential().await {
            tracing::warn!("Failed to clear credential: {:#}", e);
        }
        self.state.send_replace(AuthState {
            user: None,
            is_loading: false,
            error: Some(message),
        });
        self.persist().await;
    }

    async fn reset_local(&self) {
        if let Err(e) = self.store.clear_credential().await {
            tracing::warn!("Failed to clear credential: {:#}", e);
        }
        self.state.send_replace(AuthState::default());
        self.persist().await;
    }

    async fn persist(&self) {
        let persisted = PersistedSession::from(&*self.state.borrow());
        if let Err(e) = self.store.save(&persisted).await {
            tracing::warn!("Failed to persist session: {:#}", e);
        }
    }
}

#[async_trait]
impl LoginRedirect for AuthSession {
    async fn redirect_to_login(&self, route: &str) {
        tracing::info!("Authorization lost, returning to {}", route);
        self.reset_local().await;
    }
}

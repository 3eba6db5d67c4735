//! OAuth2 sign-in against the Entra External ID tenant
//!
//! Interactive sign-in uses the device code flow: the user finishes the
//! Google- or Microsoft-brokered login in a browser while we poll.

use anyhow::{Context, Result};
use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicErrorResponseType, BasicRevocationErrorResponse,
    BasicTokenIntrospectionResponse, BasicTokenType,
};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, Client, ClientId, DeviceAuthorizationUrl, RedirectUrl, DeviceCodeErrorResponse,
    DeviceCodeErrorResponseType, ExtraTokenFields, RefreshToken, RequestTokenError,
    ResourceOwnerPassword, ResourceOwnerUsername, Scope, StandardDeviceAuthorizationResponse,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tokio::sync::RwLock;
use url::Url;

use super::claims::identity_from_id_token;
use super::gateway::{
    AccountInfo, GatewayError, IdentityGateway, LoginProvider, Reauthenticate, SignIn,
};
use super::store::write_private;
use super::tokens::Credential;
use super::AuthConfig;

/// Token endpoint responses carry the OIDC ID token next to the access token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IdTokenFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type OidcTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type OidcClient = Client<
    BasicErrorResponse,
    OidcTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountCacheFile {
    #[serde(default)]
    accounts: Vec<AccountInfo>,
}

/// Build the OAuth2 client from an AuthConfig
fn build_client(auth_config: &AuthConfig) -> Result<OidcClient> {
    let auth_url = AuthUrl::new(auth_config.authorize_url())?;
    let token_url = TokenUrl::new(auth_config.token_url())?;
    let device_url = DeviceAuthorizationUrl::new(auth_config.device_code_url())?;
    let redirect_url = RedirectUrl::new(auth_config.redirect_uri.clone())
        .context("Invalid redirect URI")?;

    Ok(OidcClient::new(
        ClientId::new(auth_config.client_id.clone()),
        None,
        auth_url,
        Some(token_url),
    )
    .set_device_authorization_url(device_url)
    .set_redirect_uri(redirect_url))
}

/// Identity provider gateway backed by the tenant's OAuth2 endpoints.
pub struct MsalGateway {
    config: AuthConfig,
    client: OidcClient,
    accounts_path: PathBuf,
    accounts: RwLock<Vec<AccountInfo>>,
}

impl MsalGateway {
    pub fn new(config: AuthConfig, accounts_path: impl Into<PathBuf>) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            config,
            client,
            accounts_path: accounts_path.into(),
            accounts: RwLock::new(Vec::new()),
        })
    }

    fn save_accounts(&self, accounts: &[AccountInfo]) -> Result<()> {
        let file = AccountCacheFile {
            accounts: accounts.to_vec(),
        };
        let content = toml::to_string_pretty(&file).context("Failed to serialize account cache")?;
        write_private(&self.accounts_path, &content)
    }

    async fn remember(&self, account: AccountInfo) {
        let mut accounts = self.accounts.write().await;
        accounts.retain(|a| a.home_account_id != account.home_account_id);
        accounts.insert(0, account);
        if let Err(e) = self.save_accounts(&accounts) {
            tracing::warn!("Failed to save account cache: {:#}", e);
        }
    }

    async fn complete_sign_in(&self, response: OidcTokenResponse) -> Result<SignIn, GatewayError> {
        let id_token = response
            .extra_fields()
            .id_token
            .as_deref()
            .ok_or_else(|| GatewayError::Failed("Identity provider returned no ID token".into()))?;
        let identity = identity_from_id_token(id_token)?;

        let credential = Credential::new(
            response.access_token().secret().to_string(),
            response.expires_in().map(|d| d.as_secs()),
            response.refresh_token().map(|t| t.secret().to_string()),
        );

        self.remember(AccountInfo {
            home_account_id: identity.account_handle.clone(),
            username: identity.primary_email.clone(),
        })
        .await;

        Ok(SignIn {
            identity,
            credential: Some(credential),
        })
    }

    /// End-session URL that signs the browser out of the tenant.
    pub fn end_session_url(&self, account: &AccountInfo, post_logout_target: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.config.logout_url(),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("post_logout_redirect_uri", post_logout_target),
                ("logout_hint", account.username.as_str()),
            ],
        )
        .context("Failed to build logout URL")
    }
}

fn device_error<RE>(err: RequestTokenError<RE, DeviceCodeErrorResponse>) -> GatewayError
where
    RE: std::error::Error + Send + Sync + 'static,
{
    if let RequestTokenError::ServerResponse(resp) = &err {
        return match resp.error() {
            DeviceCodeErrorResponseType::AccessDenied => GatewayError::Cancelled,
            DeviceCodeErrorResponseType::ExpiredToken => {
                GatewayError::Failed("Sign-in code expired before it was used".into())
            }
            other => GatewayError::Failed(
                resp.error_description()
                    .cloned()
                    .unwrap_or_else(|| other.to_string()),
            ),
        };
    }
    GatewayError::Other(anyhow::Error::new(err).context("Failed to complete sign-in"))
}

#[async_trait]
impl IdentityGateway for MsalGateway {
    async fn initialize(&self) -> Result<()> {
        if !self.accounts_path.exists() {
            return Ok(());
        }
        let content =
            fs::read_to_string(&self.accounts_path).context("Failed to read account cache")?;
        let file: AccountCacheFile =
            toml::from_str(&content).context("Failed to parse account cache")?;
        tracing::debug!("Loaded {} cached account(s)", file.accounts.len());
        *self.accounts.write().await = file.accounts;
        Ok(())
    }

    async fn interactive_login(
        &self,
        provider: LoginProvider,
        scopes: &[String],
    ) -> Result<SignIn, GatewayError> {
        tracing::info!("Initiating device code flow ({})...", provider);

        let mut request = self
            .client
            .exchange_device_code()
            .context("Device authorization endpoint not configured")?
            .add_extra_param("prompt", "select_account");
        if provider == LoginProvider::Google {
            request = request.add_extra_param("domain_hint", "google.com");
        }
        for scope in scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        let device_auth_response: StandardDeviceAuthorizationResponse = request
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                GatewayError::Other(anyhow::Error::new(e).context("Failed to request device code"))
            })?;

        let verification_url = device_auth_response.verification_uri().as_str();
        let user_code = device_auth_response.user_code().secret();

        println!();
        println!("To sign in, visit: {}", verification_url);
        println!("Enter code:        {}", user_code);
        println!("(Ctrl-C to cancel)");
        println!();

        tracing::info!("Waiting for authentication...");

        let poll = self
            .client
            .exchange_device_access_token(&device_auth_response)
            .request_async(async_http_client, tokio::time::sleep, None);

        let token_response = tokio::select! {
            result = poll => result.map_err(device_error)?,
            _ = tokio::signal::ctrl_c() => return Err(GatewayError::Cancelled),
        };

        self.complete_sign_in(token_response).await
    }

    async fn exchange_password(
        &self,
        email: &str,
        password: &str,
        scopes: &[String],
    ) -> Result<SignIn, GatewayError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(GatewayError::Failed("Email and password are required".into()));
        }

        let username = ResourceOwnerUsername::new(email.trim().to_string());
        let password = ResourceOwnerPassword::new(password.to_string());

        let mut request = self.client.exchange_password(&username, &password);
        for scope in scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        match request.request_async(async_http_client).await {
            Ok(token_response) => self.complete_sign_in(token_response).await,
            Err(RequestTokenError::ServerResponse(resp)) => match resp.error() {
                BasicErrorResponseType::InvalidGrant => {
                    Err(GatewayError::Failed("Invalid email or password".into()))
                }
                other => Err(GatewayError::Failed(
                    resp.error_description()
                        .cloned()
                        .unwrap_or_else(|| other.to_string()),
                )),
            },
            Err(e) => Err(GatewayError::Other(
                anyhow::Error::new(e).context("Password sign-in request failed"),
            )),
        }
    }

    async fn interactive_logout(
        &self,
        account: &AccountInfo,
        post_logout_target: &str,
    ) -> Result<()> {
        let url = self.end_session_url(account, post_logout_target)?;

        let mut accounts = self.accounts.write().await;
        accounts.retain(|a| a.home_account_id != account.home_account_id);
        self.save_accounts(&accounts)?;

        println!();
        println!("To finish signing out in the browser, visit: {}", url);
        println!();
        Ok(())
    }

    async fn known_accounts(&self) -> Vec<AccountInfo> {
        self.accounts.read().await.clone()
    }
}

#[async_trait]
impl Reauthenticate for MsalGateway {
    /// Refresh the access token using the stored refresh token.
    async fn refresh_credential(&self, current: Option<Credential>) -> Result<Option<Credential>> {
        let refresh_token_str = match current.and_then(|c| c.refresh_token) {
            Some(rt) => rt,
            None => return Ok(None),
        };

        tracing::info!("Refreshing access token...");

        let refresh = RefreshToken::new(refresh_token_str.clone());
        let mut request = self.client.exchange_refresh_token(&refresh);
        for scope in &self.config.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let token_response = request
            .request_async(async_http_client)
            .await
            .context("Failed to refresh access token")?;

        let refresh_token = token_response
            .refresh_token()
            .map(|t| t.secret().to_string())
            .unwrap_or(refresh_token_str);

        tracing::info!("Token refresh complete");
        Ok(Some(Credential::new(
            token_response.access_token().secret().to_string(),
            token_response.expires_in().map(|d| d.as_secs()),
            Some(refresh_token),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(dir: &tempfile::TempDir) -> MsalGateway {
        MsalGateway::new(AuthConfig::default(), dir.path().join("accounts.toml")).unwrap()
    }

    /// Gateway whose authority is a local fake of the tenant endpoints.
    fn fake_tenant_gateway(server: &MockServer, dir: &tempfile::TempDir) -> MsalGateway {
        let config = AuthConfig {
            authority: server.uri(),
            ..AuthConfig::default()
        };
        MsalGateway::new(config, dir.path().join("accounts.toml")).unwrap()
    }

    fn id_token(claims: serde_json::Value) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    fn scopes() -> Vec<String> {
        AuthConfig::default().scopes
    }

    fn account(id: &str) -> AccountInfo {
        AccountInfo {
            home_account_id: id.into(),
            username: format!("{}@x.com", id),
        }
    }

    #[test]
    fn test_end_session_url() {
        let dir = tempfile::tempdir().unwrap();
        let url = gateway(&dir)
            .end_session_url(&account("a"), "http://localhost:5173")
            .unwrap();
        // Hosts are normalized to lowercase; the path keeps the tenant's casing
        assert_eq!(url.host_str(), Some("classflow.ciamlogin.com"));
        assert_eq!(url.path(), "/Classflow.onmicrosoft.com/oauth2/v2.0/logout");
        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(params.contains(&("post_logout_redirect_uri".into(), "http://localhost:5173".into())));
        assert!(params.contains(&("logout_hint".into(), "a@x.com".into())));
    }

    #[tokio::test]
    async fn test_account_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let first = gateway(&dir);
        first.remember(account("a")).await;
        first.remember(account("b")).await;
        // Re-remembering moves to the front without duplicating
        first.remember(account("a")).await;

        let second = gateway(&dir);
        second.initialize().await.unwrap();
        assert_eq!(second.known_accounts().await, vec![account("a"), account("b")]);

        second
            .interactive_logout(&account("a"), "http://localhost:5173")
            .await
            .unwrap();
        assert_eq!(second.known_accounts().await, vec![account("b")]);

        let third = gateway(&dir);
        third.initialize().await.unwrap();
        assert_eq!(third.known_accounts().await, vec![account("b")]);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        assert!(gw.refresh_credential(None).await.unwrap().is_none());
        let credential = Credential::new("access".into(), None, None);
        assert!(gw.refresh_credential(Some(credential)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_password_requires_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = gateway(&dir)
            .exchange_password("", "pw", &[])
            .await
            .unwrap_err();
        assert_eq!(
            err.failure_message().as_deref(),
            Some("Email and password are required")
        );
    }

    #[tokio::test]
    async fn test_declined_device_code_is_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/devicecode"))
            .and(body_string_contains("domain_hint=google.com"))
            .and(body_string_contains("prompt=select_account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_code": "dc",
                "user_code": "ABC-123",
                "verification_uri": "https://login.example.com/device",
                "expires_in": 900,
                "interval": 1
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "access_denied",
                "error_description": "The user declined the sign-in request"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let gw = fake_tenant_gateway(&server, &dir);
        let err = gw
            .interactive_login(LoginProvider::Google, &scopes())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
        assert!(err.failure_message().is_none());
        assert!(gw.known_accounts().await.is_empty());
    }

    #[tokio::test]
    async fn test_password_invalid_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS50126: Error validating credentials"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = fake_tenant_gateway(&server, &dir)
            .exchange_password("a@x.com", "wrong", &scopes())
            .await
            .unwrap_err();
        assert_eq!(
            err.failure_message().as_deref(),
            Some("Invalid email or password")
        );
    }

    #[tokio::test]
    async fn test_password_sign_in_resolves_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "refresh-1",
                "id_token": id_token(json!({
                    "oid": "o",
                    "tid": "t",
                    "email": "ann@x.com",
                    "name": "Ann"
                }))
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let gw = fake_tenant_gateway(&server, &dir);
        let sign_in = gw
            .exchange_password("ann@x.com", "pw", &scopes())
            .await
            .unwrap();

        assert_eq!(sign_in.identity.account_handle, "o.t");
        assert_eq!(sign_in.identity.primary_email, "ann@x.com");
        assert_eq!(sign_in.identity.display_name.as_deref(), Some("Ann"));
        let credential = sign_in.credential.unwrap();
        assert_eq!(credential.access_token.token, "access-1");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh-1"));

        let expected = AccountInfo {
            home_account_id: "o.t".into(),
            username: "ann@x.com".into(),
        };
        assert_eq!(gw.known_accounts().await, vec![expected.clone()]);

        let reloaded = fake_tenant_gateway(&server, &dir);
        reloaded.initialize().await.unwrap();
        assert_eq!(reloaded.known_accounts().await, vec![expected]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-2",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let current = Credential::new("access-1".into(), Some(3600), Some("refresh-1".into()));
        let refreshed = fake_tenant_gateway(&server, &dir)
            .refresh_credential(Some(current))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.access_token.token, "access-2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
    }
}

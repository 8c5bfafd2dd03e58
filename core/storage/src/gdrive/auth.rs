//! OAuth2 authorization against Google: token refresh and the interactive
//! loopback handshake.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, RedirectUrl, RefreshToken, Scope,
    TokenResponse, TokenUrl,
};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::future::IntoFuture;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use driveocr_common::{Error, Result};

use super::credential::Credential;
use super::secrets::ClientSecrets;

/// Full Drive scope; document conversion needs to create and delete files.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// How long the callback listener may take to finish its last response.
const CALLBACK_SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

const COMPLETED_PAGE: &str =
    "<html><body><p>The authentication flow has completed. You may close this window.</p></body></html>";
const DENIED_PAGE: &str =
    "<html><body><p>Authorization was denied. You may close this window.</p></body></html>";
const STATE_MISMATCH_PAGE: &str = "<html><body><p>State mismatch.</p></body></html>";
const MISSING_CODE_PAGE: &str = "<html><body><p>Missing authorization code.</p></body></html>";

/// Client with an authorization and a token endpoint configured.
type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Obtains and renews credentials from the authorization server.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Exchange the credential's refresh token for a new access token.
    ///
    /// # Errors
    /// - Missing, invalid or revoked refresh token
    /// - Network errors
    async fn refresh(&self, credential: &Credential) -> Result<Credential>;

    /// Run the interactive authorization flow for `secrets`.
    ///
    /// Blocks until the user completes consent, the flow times out, or it is
    /// cancelled.
    async fn authorize(&self, secrets: &ClientSecrets) -> Result<Credential>;
}

/// Configuration for the interactive handshake.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Loopback port for the redirect; 0 picks a free port.
    pub callback_port: u16,
    /// How long to wait for the user to finish consent.
    pub timeout: std::time::Duration,
    /// Try to open the consent page in a browser.
    pub open_browser: bool,
    /// Scopes to request.
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            callback_port: 0,
            timeout: std::time::Duration::from_secs(300),
            open_browser: true,
            scopes: vec![DRIVE_SCOPE.to_string()],
        }
    }
}

/// Google OAuth2 provider using the installed-app loopback flow with PKCE.
pub struct GoogleOAuth {
    config: AuthConfig,
    http: oauth2::reqwest::Client,
    cancel: CancellationToken,
}

impl GoogleOAuth {
    pub fn new(config: AuthConfig) -> Result<Self> {
        // Token endpoints must not be followed through redirects.
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(AuthConfig::default())
    }

    /// Token that aborts a running handshake when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    async fn run_loopback(&self, secrets: &ClientSecrets) -> Result<Credential> {
        let listener = TcpListener::bind(("127.0.0.1", self.config.callback_port)).await?;
        let port = listener.local_addr()?.port();
        let redirect_url = format!("http://127.0.0.1:{}/", port);

        let client = build_client(secrets, &redirect_url)?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_token) =
            authorization_url(&client, &self.config.scopes, Some(pkce_challenge));

        info!("Please authenticate with your Google account: {}", auth_url);
        if self.config.open_browser {
            if let Err(e) = open::that(auth_url.as_str()) {
                warn!("Could not open a browser, visit the URL manually: {}", e);
            }
        }

        let code = wait_for_code(listener, csrf_token.secret()).await?;

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        let credential = credential_from_token(
            &token,
            &secrets.client_id,
            &secrets.client_secret,
            &secrets.token_uri,
            None,
            &self.config.scopes,
        );

        if !credential.can_refresh() {
            warn!("No refresh token received; re-authorization will be needed when it expires");
        }

        Ok(credential)
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Authentication("No refresh token available".to_string()))?;

        let client = BasicClient::new(ClientId::new(credential.client_id.clone()))
            .set_client_secret(ClientSecret::new(credential.client_secret.clone()))
            .set_token_uri(
                TokenUrl::new(credential.token_uri.clone())
                    .map_err(|e| Error::Configuration(format!("Invalid token URL: {}", e)))?,
            );

        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        Ok(credential_from_token(
            &token,
            &credential.client_id,
            &credential.client_secret,
            &credential.token_uri,
            Some(refresh_token),
            &credential.scopes,
        ))
    }

    async fn authorize(&self, secrets: &ClientSecrets) -> Result<Credential> {
        let timeout = self.config.timeout;

        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(Error::Cancelled("Authorization handshake cancelled".to_string()))
            }
            outcome = tokio::time::timeout(timeout, self.run_loopback(secrets)) => {
                outcome.unwrap_or_else(|_| {
                    Err(Error::Timeout(format!(
                        "No authorization received within {}s",
                        timeout.as_secs()
                    )))
                })
            }
        }
    }
}

fn build_client(secrets: &ClientSecrets, redirect_url: &str) -> Result<ConfiguredClient> {
    Ok(BasicClient::new(ClientId::new(secrets.client_id.clone()))
        .set_client_secret(ClientSecret::new(secrets.client_secret.clone()))
        .set_auth_uri(
            AuthUrl::new(secrets.auth_uri.clone())
                .map_err(|e| Error::Configuration(format!("Invalid auth URL: {}", e)))?,
        )
        .set_token_uri(
            TokenUrl::new(secrets.token_uri.clone())
                .map_err(|e| Error::Configuration(format!("Invalid token URL: {}", e)))?,
        )
        .set_redirect_uri(
            RedirectUrl::new(redirect_url.to_string())
                .map_err(|e| Error::Configuration(format!("Invalid redirect URL: {}", e)))?,
        ))
}

/// Consent URL asking for offline access, so a refresh token is issued.
fn authorization_url(
    client: &ConfiguredClient,
    scopes: &[String],
    pkce_challenge: Option<PkceCodeChallenge>,
) -> (url::Url, CsrfToken) {
    let mut request = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(scopes.iter().cloned().map(Scope::new))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent");

    if let Some(challenge) = pkce_challenge {
        request = request.set_pkce_challenge(challenge);
    }

    request.url()
}

fn credential_from_token<T: TokenResponse>(
    token: &T,
    client_id: &str,
    client_secret: &str,
    token_uri: &str,
    previous_refresh_token: Option<&str>,
    requested_scopes: &[String],
) -> Credential {
    let expires_in = token
        .expires_in()
        .unwrap_or_else(|| std::time::Duration::from_secs(3600));
    let expires_at =
        Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

    // Refresh responses usually omit the refresh token; keep the old one.
    let refresh_token = token
        .refresh_token()
        .map(|t| t.secret().clone())
        .or_else(|| previous_refresh_token.map(String::from));

    let scopes = token
        .scopes()
        .map(|granted| granted.iter().map(|s| s.to_string()).collect())
        .unwrap_or_else(|| requested_scopes.to_vec());

    Credential {
        access_token: token.access_token().secret().clone(),
        refresh_token,
        token_uri: token_uri.to_string(),
        client_id: client_id.to_string(),
        client_secret: client_secret.to_string(),
        scopes,
        expires_at: Some(expires_at),
    }
}

/// What arrived on the loopback listener.
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code { code: String, state: String },
    Denied(String),
    /// A request without a code or an error.
    Ignored,
}

/// Query parameters of the authorization redirect.
#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl CallbackParams {
    fn into_callback(self) -> Callback {
        match (self.code, self.error) {
            (_, Some(error)) => Callback::Denied(error),
            (Some(code), None) => Callback::Code {
                code,
                state: self.state.unwrap_or_default(),
            },
            (None, None) => Callback::Ignored,
        }
    }
}

type CodeSender = oneshot::Sender<Result<String>>;

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    sender: Arc<Mutex<Option<CodeSender>>>,
}

impl CallbackState {
    /// Hand the outcome to the waiting handshake; only the first one counts.
    fn complete(&self, outcome: Result<String>) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    match params.into_callback() {
        Callback::Ignored => (StatusCode::BAD_REQUEST, Html(MISSING_CODE_PAGE)),
        Callback::Denied(error) => {
            state.complete(Err(Error::Authentication(format!(
                "Authorization denied: {}",
                error
            ))));
            (StatusCode::OK, Html(DENIED_PAGE))
        }
        Callback::Code { code, state: got } => {
            if got != *state.expected_state {
                state.complete(Err(Error::Authentication(
                    "Authorization callback state mismatch".to_string(),
                )));
                return (StatusCode::BAD_REQUEST, Html(STATE_MISMATCH_PAGE));
            }
            state.complete(Ok(code));
            (StatusCode::OK, Html(COMPLETED_PAGE))
        }
    }
}

/// Serve the redirect target on `listener` until the authorization code
/// (or a refusal) arrives, then shut the listener down.
async fn wait_for_code(listener: TcpListener, expected_state: &str) -> Result<String> {
    let (sender, receiver) = oneshot::channel();
    let state = CallbackState {
        expected_state: Arc::from(expected_state),
        sender: Arc::new(Mutex::new(Some(sender))),
    };
    let app = Router::new()
        .route("/", get(handle_callback))
        .with_state(state);

    let shutdown = CancellationToken::new();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    tokio::pin!(server);

    let outcome = tokio::select! {
        received = receiver => received.unwrap_or_else(|_| {
            Err(Error::Authentication("Authorization callback was abandoned".to_string()))
        }),
        served = &mut server => {
            served?;
            return Err(Error::Authentication(
                "Callback listener stopped before authorization completed".to_string(),
            ));
        }
    };

    // Let the browser receive its page; idle connections are not waited on.
    shutdown.cancel();
    if tokio::time::timeout(CALLBACK_SHUTDOWN_GRACE, &mut server)
        .await
        .is_err()
    {
        debug!("Callback listener did not drain in time");
    }

    outcome
}

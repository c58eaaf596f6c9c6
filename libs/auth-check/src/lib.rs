use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use axum::{
    extract::{
        Request,
        State,
    },
    http::StatusCode,
    middleware::Next,
    response::Response
};

pub const SESSION_COOKIE: &str = "session";

/// The authenticated caller, as established by the auth service.
///
/// Handlers behind [`auth_middleware`] read this from the request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub admin: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth service request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Resolves a bearer/session token into an [`Identity`].
///
/// `Ok(None)` means the token was checked and rejected; `Err` means the check itself could not be made.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Option<Identity>, AuthError>;
}

pub type SharedAuthenticator = Arc<dyn Authenticator>;

/// Delegates verification to the auth service `/auth/verify` endpoint.
pub struct RemoteAuthenticator {
    client: reqwest::Client,
    auth_server_url: String,
}

impl RemoteAuthenticator {
    pub fn new(auth_server_url: impl Into<String>) -> Self {
        RemoteAuthenticator {
            client: reqwest::Client::new(),
            auth_server_url: auth_server_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for RemoteAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let mut map = HashMap::new();
        map.insert("token", token);

        let response = self.client
            .post(format!("{}/auth/verify", self.auth_server_url.trim_end_matches('/')))
            .json(&map)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(Some(response.json::<Identity>().await?))
        } else {
            Ok(None)
        }
    }
}

/// Fixed token table, for local development and tests.
#[derive(Default, Clone)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: &str, username: &str, admin: bool) -> Self {
        self.tokens.insert(
            token.to_string(),
            Identity { username: username.to_string(), admin },
        );
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self.tokens.get(token).cloned())
    }
}

/// Pulls the token from the `Authorization: Bearer` header, falling back to the session cookie.
pub fn extract_token(req: &Request) -> Option<String> {
    if let Some(auth_header) = req.headers().get("Authorization") {
        if let Ok(auth_value) = auth_header.to_str() {
            if let Some(token) = auth_value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    let cookie_jar = CookieJar::from_headers(req.headers());
    cookie_jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_string())
}

// tower middleware: resolve the caller through the authenticator and attach the
// Identity to the request, or reject with 401
pub async fn auth_middleware(
    State(authenticator): State<SharedAuthenticator>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(token) = extract_token(&req) else {
        tracing::debug!("No auth token on request to {}", req.uri());
        return Err(StatusCode::UNAUTHORIZED);
    };

    match authenticator.authenticate(&token).await {
        Ok(Some(identity)) => {
            tracing::debug!("Token verified for user {} at {}", identity.username, req.uri());
            req.extensions_mut().insert(identity);
            Ok(next.run(req).await)
        }
        Ok(None) => {
            tracing::info!("Token verification failed at {}", req.uri());
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(err) => {
            tracing::error!("Unable to verify token: {}", err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

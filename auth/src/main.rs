mod config;
mod token;
mod users;

use std::env;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
    Json,
    extract::State,
    http::{
        HeaderMap,
        HeaderValue,
    },
    http::header::{
        SET_COOKIE,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};

use axum_extra::extract::cookie::CookieJar;

use axum_client_ip::{ClientIp, ClientIpSource};

use tracing_subscriber::EnvFilter;

use serde::{Deserialize, Serialize};

use auth_check::SESSION_COOKIE;

use config::Config;
use token::TokenIssuer;
use users::UserStore;


#[derive(Clone)]
struct AppState {
    users: Arc<UserStore>,
    tokens: Arc<TokenIssuer>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    auth_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    username: String,
    user_type: &'static str,
}

#[derive(Deserialize)]
struct TokenVerificationRequest {
    token: String,
}


/// Handles user login by validating credentials and issuing a JWT token.
///
/// The token is returned in the body for API clients and set as an HttpOnly
/// session cookie for browsers.
///
/// # Returns
/// * `StatusCode::OK` with `{authToken}` on success
/// * `StatusCode::FORBIDDEN` if the credentials are invalid
async fn login_handler(
    ClientIp(client_ip): ClientIp,
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Response {
    let Some(user) = state.users.verify_credentials(&payload.username, &payload.password) else {
        tracing::info!("Unsuccessful login by user {} from {}", payload.username, client_ip);
        return StatusCode::FORBIDDEN.into_response();
    };

    let token = match state.tokens.issue(user) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!("Failed to encode JWT: {}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cookie = session_cookie(&token, state.tokens.ttl().as_secs());
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => { headers.insert(SET_COOKIE, value); }
        Err(err) => {
            tracing::error!("Invalid session cookie value: {}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    tracing::info!("Successful login by user {} from {}", user.username, client_ip);
    (StatusCode::OK, headers, Json(LoginResponse { auth_token: token })).into_response()
}

/// Verifies a token on behalf of the sibling services.
///
/// # Returns
/// * `StatusCode::OK` with the caller's `{username, admin}` if the token is valid.
/// * `StatusCode::UNAUTHORIZED` if the token is invalid.
async fn verify_jwt(State(state): State<AppState>, Json(payload): Json<TokenVerificationRequest>) -> Response {
    match state.tokens.verify(&payload.token) {
        Some(identity) => Json(identity).into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn user_info(State(state): State<AppState>, cookie_jar: CookieJar) -> Response {
    let Some(cookie) = cookie_jar.get(SESSION_COOKIE) else {
        tracing::debug!("No session cookie found");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match state.tokens.verify(cookie.value()) {
        Some(identity) => Json(UserInfo {
            username: identity.username,
            user_type: if identity.admin { "admin" } else { "user" },
        })
        .into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn logout() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, HeaderValue::from_static("session=; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age=0"));
    (StatusCode::OK, headers)
}

fn session_cookie(token: &str, max_age_seconds: u64) -> String {
    format!("{}={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}", SESSION_COOKIE, token, max_age_seconds)
}

fn app(state: AppState, ip_source: ClientIpSource) -> Router {
    Router::new()
        .route("/auth/health", get(|| async { "OK" }))
        .route("/auth/login", post(login_handler))
        .route("/auth/verify", post(verify_jwt))
        .route("/auth/info", get(user_info))
        .route("/auth/logout", get(logout))
        .layer(ip_source.into_extension())
        .with_state(state)
}


#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {

    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .pretty()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let users = UserStore::load(&config.users_file)?;
    tracing::info!("Loaded {} users from {}", users.len(), config.users_file.display());

    let tokens = TokenIssuer::new(config.signing_key.as_bytes(), &config.issuer, &config.audience, config.token_ttl);

    let ip_source_env = env::var("IP_SOURCE").unwrap_or_else(|_| "nginx".to_string());
    let ip_source = match ip_source_env.as_str() {
        "nginx" => ClientIpSource::RightmostXForwardedFor,
        "amazon" => ClientIpSource::CloudFrontViewerAddress,
        _ => {
            tracing::warn!("Unknown IP source: {}, defaulting to Nginx", ip_source_env);
            ClientIpSource::RightmostXForwardedFor
        }
    };

    let state = AppState {
        users: Arc::new(users),
        tokens: Arc::new(tokens),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state, ip_source)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use axum_test::{TestResponse, TestServer};

    fn server() -> TestServer {
        let state = AppState {
            users: Arc::new(users::tests::store()),
            tokens: Arc::new(TokenIssuer::new(
                &b"0123456789abcdef0123456789abcdef"[..],
                "file-store",
                "file-store",
                Duration::from_secs(1800),
            )),
        };
        TestServer::new(app(state, ClientIpSource::RightmostXForwardedFor).into_make_service()).unwrap()
    }

    async fn post_json(server: &TestServer, uri: &str, body: serde_json::Value) -> TestResponse {
        server
            .post(uri)
            .add_header("X-Forwarded-For", "10.0.0.1")
            .json(&body)
            .await
    }

    #[tokio::test]
    async fn login_then_verify_and_info() {
        let server = server();

        let res = post_json(&server, "/auth/login", serde_json::json!({ "username": "admin", "password": "admin" })).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        let cookie = res.headers().get(SET_COOKIE).unwrap().to_str().unwrap().to_string();
        assert!(cookie.starts_with("session=") && cookie.contains("HttpOnly"));
        let token = res.json::<serde_json::Value>()["authToken"].as_str().unwrap().to_string();

        let res = post_json(&server, "/auth/verify", serde_json::json!({ "token": token })).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.json::<serde_json::Value>(), serde_json::json!({ "username": "admin", "admin": true }));

        let res = server.get("/auth/info").add_header("Cookie", format!("session={token}")).await;
        assert_eq!(res.json::<serde_json::Value>(), serde_json::json!({ "username": "admin", "userType": "admin" }));
    }

    #[tokio::test]
    async fn bad_credentials_are_forbidden() {
        let res = post_json(&server(), "/auth/login", serde_json::json!({ "username": "alice", "password": "nope" })).await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn garbage_token_fails_verification() {
        let res = post_json(&server(), "/auth/verify", serde_json::json!({ "token": "garbage" })).await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn info_without_session_is_unauthorized() {
        let res = server().get("/auth/info").await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    }
}

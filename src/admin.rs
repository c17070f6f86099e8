//! Read-only HTTP administration surface.
//!
//! Two endpoints: `POST /signin` exchanges JSON credentials for a
//! short-lived JWT in a `token` cookie, and `GET /search?pattern=` returns
//! every stored record set whose owner contains the pattern. The search
//! endpoint requires a valid token only when credentials are configured.

use axum::extract::{Query, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::record::parse_key;
use crate::store::{decode_value, RecordStore};

/// Token lifetime.
const TOKEN_VALIDITY_HOURS: i64 = 1;

/// Sign-in credentials, also the configured pair to check against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Admin user name.
    pub username: String,
    /// Admin password.
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    username: String,
    exp: usize,
}

/// Shared state of the admin router.
#[derive(Clone)]
pub struct AdminState {
    store: RecordStore,
    credentials: Option<Credentials>,
    jwt_secret: Vec<u8>,
}

impl AdminState {
    /// Create the admin state. Authentication is enforced only when both
    /// username and password are non-empty.
    pub fn new(store: RecordStore, credentials: Option<Credentials>, jwt_secret: &str) -> Self {
        let credentials =
            credentials.filter(|c| !c.username.is_empty() && !c.password.is_empty());

        Self {
            store,
            credentials,
            jwt_secret: jwt_secret.as_bytes().to_vec(),
        }
    }
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/signin", post(signin))
        .route("/search", get(search))
        .with_state(state)
}

async fn signin(State(state): State<AdminState>, body: String) -> Response {
    let creds: Credentials = match serde_json::from_str(&body) {
        Ok(creds) => creds,
        Err(e) => {
            warn!(error = %e, "undecodable sign-in credentials");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let Some(expected) = &state.credentials else {
        warn!("sign-in attempted but no admin credentials are configured");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if creds != *expected {
        info!(username = %creds.username, "unauthorized sign-in attempt");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let expiration = Utc::now() + ChronoDuration::hours(TOKEN_VALIDITY_HOURS);
    let claims = Claims {
        username: creds.username,
        exp: expiration.timestamp() as usize,
    };

    let token = match encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &EncodingKey::from_secret(&state.jwt_secret),
    ) {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "failed to sign admin token");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cookie = format!("token={token}; Path=/; HttpOnly; Max-Age={}", TOKEN_VALIDITY_HOURS * 3600);
    ([(SET_COOKIE, cookie)], StatusCode::OK).into_response()
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    pattern: Option<String>,
}

async fn search(
    State(state): State<AdminState>,
    Query(params): Query<SearchParams>,
    headers: HeaderMap,
) -> Response {
    if state.credentials.is_some() && !is_authorized(&headers, &state.jwt_secret) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(pattern) = params.pattern.filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing pattern").into_response();
    };

    info!(pattern = %pattern, "admin record search");

    let mut results = Vec::new();
    for entry in state.store.iter() {
        let (key, value) = match entry {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "store scan failed during search");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let Some((owner, _)) = parse_key(&key) else {
            continue;
        };

        if owner.contains(&pattern) {
            match decode_value(&value) {
                Ok(records) => results.push(records),
                Err(e) => {
                    warn!(owner = %owner, error = %e, "undecodable record set during search");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }
    }

    Json(results).into_response()
}

/// Validate the JWT carried by the `token` cookie.
fn is_authorized(headers: &HeaderMap, jwt_secret: &[u8]) -> bool {
    let Some(token) = token_cookie(headers) else {
        return false;
    };

    decode::<Claims>(
        &token,
        &DecodingKey::from_secret(jwt_secret),
        &Validation::default(),
    )
    .is_ok()
}

fn token_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;

    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "token").then(|| value.to_string())
    })
}

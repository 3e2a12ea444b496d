//! `/login` and `/logout`: the only routes that do not already require a
//! token, since their whole job is to mint or revoke one.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::get;
use axum::{Form, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::{expired_session_cookie, session_cookie, SESSION_COOKIE};
use crate::error::ApiError;
use crate::state::AppState;

const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>portal — log in</title></head>
<body>
<h1>Log in</h1>
<form method="post" action="/login">
  <label>Username <input type="text" name="username" autocomplete="username"></label><br>
  <label>Password <input type="password" name="password" autocomplete="current-password"></label><br>
  <button type="submit">Log in</button>
</form>
</body>
</html>"#;

async fn login_form() -> Html<&'static str> {
    Html(LOGIN_PAGE)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

async fn login_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(body): Form<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = state
        .identity
        .verify(&body.username, &body.password)
        .await?;
    let token = state
        .tokens
        .mint(&username)
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    info!(username, "login succeeded");
    let secure = state.config.server.behind_tls_proxy;
    let jar = jar.add(session_cookie(token, secure));
    Ok((jar, Redirect::to("/")))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.tokens.revoke(cookie.value());
    } else {
        warn!("logout called without a session cookie");
    }
    let secure = state.config.server.behind_tls_proxy;
    let jar = jar.add(expired_session_cookie(secure));
    (jar, Redirect::to("/login"))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login_form).post(login_submit))
        .route("/logout", get(logout))
}

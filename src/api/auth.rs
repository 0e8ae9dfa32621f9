//! Registration and session endpoints

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::user::{AccessClaims, LoginRequest, RegisterUser, Role},
};

use super::{
    access::CurrentUser,
    cookies::{access_cookie, expired_cookie, refresh_cookie, ACCESS_COOKIE, REFRESH_COOKIE},
    MessageResponse,
};

/// Registered user
#[derive(Serialize, ToSchema)]
pub struct RegisterResponse {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub mailing: bool,
}

/// Login response; the tokens themselves travel in cookies
#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub message: String,
    pub id: i32,
    pub name: String,
    pub role: Role,
}

/// Register a new reader account
#[utoipa::path(
    post,
    path = "/register",
    tag = "auth",
    request_body = RegisterUser,
    responses(
        (status = 201, description = "User created", body = RegisterResponse),
        (status = 400, description = "Invalid input", body = crate::error::ErrorResponse),
        (status = 409, description = "Email already registered", body = crate::error::ErrorResponse)
    )
)]
pub async fn register(
    State(state): State<crate::AppState>,
    Json(request): Json<RegisterUser>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let user = state.services.users.register(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            mailing: user.mailing,
        }),
    ))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful, session cookies set", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<crate::AppState>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let (user, session) = state.services.users.login(&request).await?;

    let auth = &state.config.auth;
    let jar = jar
        .add(access_cookie(auth, &session.access_token))
        .add(refresh_cookie(auth, &session.refresh_token));

    Ok((
        jar,
        Json(LoginResponse {
            message: "Logged in".to_string(),
            id: user.id,
            name: user.name,
            role: user.role,
        }),
    ))
}

/// Logout: forget the refresh token and expire both cookies
#[utoipa::path(
    post,
    path = "/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse)
    )
)]
pub async fn logout(
    State(state): State<crate::AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let refresh = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    state.services.users.logout(refresh.as_deref()).await?;

    let auth = &state.config.auth;
    let jar = jar
        .add(expired_cookie(auth, ACCESS_COOKIE))
        .add(expired_cookie(auth, REFRESH_COOKIE));

    Ok((jar, Json(MessageResponse::new("Logged out"))))
}

/// Claims of the signed-in user
#[utoipa::path(
    get,
    path = "/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user claims", body = AccessClaims),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse)
    )
)]
pub async fn me(CurrentUser(claims): CurrentUser) -> Json<AccessClaims> {
    Json(claims)
}

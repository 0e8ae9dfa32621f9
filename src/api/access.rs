//! Access control middleware for protected routes.
//!
//! Each gate authenticates the caller from its cookies (refreshing the session
//! when the access token is unusable), checks the role and stores the claims
//! in the request extensions for [`CurrentUser`]. Rotated tokens are written
//! back as cookies on whatever response the route produces.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    error::{AppError, AuthError},
    models::user::{AccessClaims, Role},
    services::sessions::{self, IssuedSession},
    AppState,
};

use super::cookies::{
    access_cookie, append_cookie, refresh_cookie, response_sets_cookie, ACCESS_COOKIE,
    REFRESH_COOKIE,
};

/// Claims of the caller, available behind a gate
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AccessClaims);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessClaims>()
            .cloned()
            .map(CurrentUser)
            .ok_or(AppError::Auth(AuthError::NoSession))
    }
}

/// Admins only
pub async fn admin_only(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    authorize(&state, &jar, req, next, &[Role::Admin]).await
}

/// Any signed-in user
pub async fn any_member(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    authorize(&state, &jar, req, next, &[Role::Admin, Role::Reader]).await
}

async fn authorize(
    state: &AppState,
    jar: &CookieJar,
    mut req: Request,
    next: Next,
    allowed: &[Role],
) -> Response {
    let access = jar.get(ACCESS_COOKIE).map(|c| c.value());
    let refresh = jar.get(REFRESH_COOKIE).map(|c| c.value());

    let authenticated = match state.services.sessions.authenticate(access, refresh).await {
        Ok(authenticated) => authenticated,
        Err(e) => {
            tracing::info!(path = %req.uri().path(), reason = %e, "Request rejected by access gate");
            return e.into_response();
        }
    };

    let mut response = match sessions::authorize(&authenticated.claims, allowed) {
        Ok(()) => {
            req.extensions_mut().insert(authenticated.claims);
            next.run(req).await
        }
        Err(e) => {
            tracing::info!(path = %req.uri().path(), reason = %e, "Request rejected by access gate");
            e.into_response()
        }
    };

    // The old refresh token is gone once rotated, so the new pair is sent
    // back even when the route itself refused the caller
    if let Some(session) = authenticated.rotated {
        attach_session(state, &mut response, &session);
    }

    response
}

fn attach_session(state: &AppState, response: &mut Response, session: &IssuedSession) {
    let auth = &state.config.auth;
    if !response_sets_cookie(response, ACCESS_COOKIE) {
        append_cookie(response, &access_cookie(auth, &session.access_token));
    }
    append_cookie(response, &refresh_cookie(auth, &session.refresh_token));
}

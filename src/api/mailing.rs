//! Mailing subscription endpoints

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    error::{AppError, AppResult},
    services::users::MailingChange,
    AppState,
};

use super::{
    access::CurrentUser,
    cookies::{access_cookie, expired_cookie, ACCESS_COOKIE},
    MessageResponse,
};

/// Subscribe to new-book emails
#[utoipa::path(
    post,
    path = "/mailing/subscribe",
    tag = "mailing",
    responses(
        (status = 200, description = "Subscribed, or already subscribed", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse),
        (status = 404, description = "User no longer exists", body = crate::error::ErrorResponse)
    )
)]
pub async fn subscribe(
    State(state): State<AppState>,
    CurrentUser(claims): CurrentUser,
    jar: CookieJar,
) -> AppResult<Response> {
    let change = state.services.users.set_mailing(&claims, true).await?;
    Ok(respond(&state, jar, change, true))
}

/// Unsubscribe from new-book emails
#[utoipa::path(
    post,
    path = "/mailing/unsubscribe",
    tag = "mailing",
    responses(
        (status = 200, description = "Unsubscribed, or already unsubscribed", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse),
        (status = 404, description = "User no longer exists", body = crate::error::ErrorResponse)
    )
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    CurrentUser(claims): CurrentUser,
    jar: CookieJar,
) -> AppResult<Response> {
    let change = state.services.users.set_mailing(&claims, false).await?;
    Ok(respond(&state, jar, change, false))
}

fn respond(state: &AppState, jar: CookieJar, change: MailingChange, mailing: bool) -> Response {
    let auth = &state.config.auth;
    match change {
        MailingChange::Unchanged => {
            let message = if mailing {
                "Already subscribed to the mailing list"
            } else {
                "Already unsubscribed from the mailing list"
            };
            Json(MessageResponse::new(message)).into_response()
        }
        MailingChange::Updated { access_token, .. } => {
            let message = if mailing {
                "Subscribed to the mailing list"
            } else {
                "Unsubscribed from the mailing list"
            };
            let jar = jar.add(access_cookie(auth, &access_token));
            (jar, Json(MessageResponse::new(message))).into_response()
        }
        MailingChange::UserGone => {
            let jar = jar.add(expired_cookie(auth, ACCESS_COOKIE));
            (jar, AppError::UserNotFound("User not found".to_string())).into_response()
        }
    }
}

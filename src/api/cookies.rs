//! Session cookies: `jwt` carries the access token, `refreshToken` the
//! opaque refresh token. Both are HTTP-only and scoped to `/`.

use axum::{
    http::{header::SET_COOKIE, HeaderValue},
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use crate::{config::AuthConfig, services::sessions::REFRESH_COOKIE_MAX_AGE_SECS};

pub const ACCESS_COOKIE: &str = "jwt";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn session_cookie(config: &AuthConfig, name: &str, value: &str, max_age: Duration) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), value.to_string()))
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age);

    if let Some(domain) = config.cookie_domain.as_ref().filter(|d| !d.is_empty()) {
        builder = builder.domain(domain.clone());
    }

    builder.build()
}

pub fn access_cookie(config: &AuthConfig, token: &str) -> Cookie<'static> {
    session_cookie(
        config,
        ACCESS_COOKIE,
        token,
        Duration::seconds(config.access_token_ttl_secs),
    )
}

pub fn refresh_cookie(config: &AuthConfig, token: &str) -> Cookie<'static> {
    session_cookie(
        config,
        REFRESH_COOKIE,
        token,
        Duration::seconds(REFRESH_COOKIE_MAX_AGE_SECS),
    )
}

/// An already-expired cookie that makes the browser drop `name`
pub fn expired_cookie(config: &AuthConfig, name: &str) -> Cookie<'static> {
    session_cookie(config, name, "", Duration::ZERO)
}

/// Whether the response already sets a cookie called `name`
pub fn response_sets_cookie(response: &Response, name: &str) -> bool {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&prefix))
}

/// Append a `Set-Cookie` header to a finished response
pub fn append_cookie(response: &mut Response, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => tracing::error!(cookie = cookie.name(), error = %e, "Invalid cookie header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "s".into(),
            access_token_ttl_secs: 900,
            cookie_domain: Some("library.example".into()),
            secure_cookies: false,
        }
    }

    #[test]
    fn access_cookie_follows_configured_ttl_and_domain() {
        let header = access_cookie(&config(), "abc").to_string();
        assert!(header.starts_with("jwt=abc"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Path=/"));
        assert!(header.contains("Max-Age=900"));
        assert!(header.contains("Domain=library.example"));
    }

    #[test]
    fn refresh_cookie_lasts_thirty_days() {
        let header = refresh_cookie(&config(), "opaque").to_string();
        assert!(header.starts_with("refreshToken=opaque"));
        assert!(header.contains("Max-Age=2592000"));
    }

    #[test]
    fn expired_cookie_has_zero_max_age() {
        let header = expired_cookie(&config(), ACCESS_COOKIE).to_string();
        assert!(header.starts_with("jwt=;"));
        assert!(header.contains("Max-Age=0"));
    }
}

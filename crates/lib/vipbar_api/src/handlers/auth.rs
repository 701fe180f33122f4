//! Authentication request handlers.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use vipbar_core::auth::jwt::ACCESS_TOKEN_EXPIRY_SECS;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::client::Client;
use crate::models::{CsrfResponse, LoginRequest, LoginResponse, LogoutResponse, MeResponse, SessionUser};
use crate::services::auth;
use crate::services::cookies::generate_csrf_token;

/// `POST /api/auth/login`: sign in and set the session cookies.
pub async fn login_handler(
    State(state): State<AppState>,
    Client(ctx): Client,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let signed = auth::sign_in(&state, &body.email, &body.password, &ctx).await?;
    let (Some(access), Some(refresh)) = (signed.tokens.access, signed.tokens.refresh) else {
        return Err(AppError::Internal("sign-in produced no tokens".into()));
    };
    let jar = state.cookies().set_auth_cookies(jar, &access, &refresh);
    Ok((
        jar,
        Json(LoginResponse {
            user: SessionUser::from(&signed.user),
            expires_in: ACCESS_TOKEN_EXPIRY_SECS,
        }),
    ))
}

/// `POST /api/auth/logout`: always succeeds and clears the cookies.
pub async fn logout_handler(
    State(state): State<AppState>,
    Client(ctx): Client,
    jar: CookieJar,
) -> (CookieJar, Json<LogoutResponse>) {
    let jar = auth::sign_out(&state, jar, &ctx).await;
    (jar, Json(LogoutResponse { success: true }))
}

/// `POST /api/auth/refresh`: reissue the access cookie from the refresh cookie.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Client(ctx): Client,
    jar: CookieJar,
) -> Response {
    match auth::refresh_session(&state, jar.clone(), &ctx).await {
        Ok(refreshed) => {
            let body = LoginResponse {
                user: SessionUser::from(&refreshed.user),
                expires_in: ACCESS_TOKEN_EXPIRY_SECS,
            };
            (refreshed.jar, Json(body)).into_response()
        }
        Err(e) => {
            let jar = state.cookies().clear_auth_cookies(jar);
            (jar, AppError::from(e)).into_response()
        }
    }
}

/// `GET /api/auth/me`: the current identity, refreshing the session if needed.
pub async fn me_handler(
    State(state): State<AppState>,
    Client(ctx): Client,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MeResponse>)> {
    let (jar, user) = auth::current_identity(&state, jar, &ctx).await?;
    Ok((
        jar,
        Json(MeResponse {
            user: SessionUser::from(&user),
            source: user.source.as_str().into(),
        }),
    ))
}

/// `GET /api/auth/csrf`: issue a CSRF token and its cookie.
pub async fn csrf_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<CsrfResponse>) {
    let token = generate_csrf_token();
    let jar = jar.add(state.cookies().csrf_cookie(&token));
    (jar, Json(CsrfResponse { csrf_token: token }))
}

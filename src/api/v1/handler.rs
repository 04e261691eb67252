use super::error::*;
use crate::application_port::{
    AuthService, LoginInput, LogoutInput, RegisterInput, TokenEnvelope,
};
use crate::domain_model::{ClientInfo, UserProfile, UserRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use warp::http::header::{HeaderValue, SET_COOKIE};
use warp::http::StatusCode;
use warp::{self, Reply, reject};

/// Refresh cookie lifetime. The JWT inside carries its own expiry; the
/// cookie just has to outlive the longest refresh token we issue.
const REFRESH_COOKIE_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }
    }
}

fn append_cookie(response: &mut warp::reply::Response, cookie: String) {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => warn!("skipping malformed cookie header: {}", e),
    }
}

fn append_token_cookies(response: &mut warp::reply::Response, envelope: &TokenEnvelope) {
    append_cookie(
        response,
        format!(
            "access_token={}; Max-Age={}; Path=/; HttpOnly; Secure; SameSite=Lax",
            envelope.access_token.0, envelope.expires_in
        ),
    );
    append_cookie(
        response,
        format!(
            "refresh_token={}; Max-Age={}; Path=/; HttpOnly; Secure; SameSite=Lax",
            envelope.refresh_token.0, REFRESH_COOKIE_MAX_AGE_SECS
        ),
    );
}

fn append_cleared_token_cookies(response: &mut warp::reply::Response) {
    for name in ["access_token", "refresh_token"] {
        append_cookie(
            response,
            format!("{}=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=Lax", name),
        );
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

pub async fn login(
    body: LoginRequest,
    client: ClientInfo,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let login_input = LoginInput {
        email: body.email,
        password: body.password,
        remember_me: body.remember_me,
    };
    let envelope = auth_service
        .login(login_input, &client)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    let json = warp::reply::json(&ApiResponse::ok(&envelope));
    let mut response = json.into_response();
    append_token_cookies(&mut response, &envelope);
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh_token(
    body: RefreshRequest,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let envelope = auth_service
        .refresh(&body.refresh_token)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    let json = warp::reply::json(&ApiResponse::ok(&envelope));
    let mut response = json.into_response();
    append_token_cookies(&mut response, &envelope);
    Ok(response)
}

#[derive(Debug, Deserialize, Default)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub all_devices: bool,
}

#[derive(Debug, Serialize)]
pub struct DetailResponse {
    pub detail: &'static str,
}

pub async fn logout(
    access_token: String,
    body: LogoutRequest,
    client: ClientInfo,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let logout_input = LogoutInput {
        access_token,
        refresh_token: body.refresh_token,
        all_devices: body.all_devices,
    };
    auth_service
        .logout(logout_input, &client)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    let json = warp::reply::json(&ApiResponse::ok(DetailResponse {
        detail: "Successfully logged out",
    }));
    let mut response = json.into_response();
    append_cleared_token_cookies(&mut response);
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

pub async fn register(
    body: RegisterRequest,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let register_input = RegisterInput {
        email: body.email,
        password: body.password,
        full_name: body.full_name,
        phone: body.phone,
    };
    let profile = auth_service
        .register(register_input)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    let json = warp::reply::json(&ApiResponse::ok(profile));
    Ok(warp::reply::with_status(json, StatusCode::CREATED))
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

pub async fn request_password_reset(
    body: PasswordResetRequest,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let token = auth_service
        .request_password_reset(&body.email)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    // Delivery is out of band. Until a mailer is wired in, surface the token
    // in the logs so operators can hand it to the user.
    if token.is_some() {
        info!("password reset token issued for {}", body.email);
    }

    let json = warp::reply::json(&ApiResponse::ok(DetailResponse {
        detail: "If the email is registered, a reset link has been sent",
    }));
    Ok(warp::reply::with_status(json, StatusCode::ACCEPTED))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

pub async fn reset_password(
    body: ResetPasswordRequest,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    auth_service
        .reset_password(&body.token, &body.new_password)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(DetailResponse {
        detail: "Password has been reset",
    })))
}

pub async fn me(user: UserRecord) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&ApiResponse::ok(UserProfile::from(
        &user,
    ))))
}

use crate::api::v1::handler::ApiResponse;
use crate::application_port::AuthError;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Rejection, reject};

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    if let Some(err) = err.find::<ApiErrorCode>() {
        let json = warp::reply::json(&ApiResponse::<()>::err(err.clone(), err.to_string()));
        Ok(warp::reply::with_status(json, err.status()))
    } else {
        let json = warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiError {
                code: ApiErrorCode::InternalError,
                message: format!("Unhandled error: {:?}", err),
            }),
        });
        Ok(warp::reply::with_status(
            json,
            StatusCode::INTERNAL_SERVER_ERROR,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Error, Serialize)]
pub enum ApiErrorCode {
    /// One message for unknown email and wrong password, so responses never
    /// reveal which part was wrong.
    #[error("Incorrect email or password")]
    AuthenticationFailed,
    #[error("Account is inactive. Please contact support.")]
    AccountInactive,
    #[error("Please verify your email before logging in.")]
    AccountNotVerified,
    #[error("Invalid or revoked refresh token. Please log in again.")]
    InvalidRefreshToken,
    #[error("Token is not valid")]
    InvalidToken,
    #[error("Invalid or expired token")]
    InvalidResetToken,
    #[error("Email already registered")]
    EmailTaken,
    #[error("Too many attempts. Please try again later.")]
    RateLimited,
    #[error("Authentication service is currently unavailable. Please try again later.")]
    ServiceUnavailable,
    #[error("Internal error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::AuthenticationFailed
            | ApiErrorCode::InvalidRefreshToken
            | ApiErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiErrorCode::AccountInactive | ApiErrorCode::AccountNotVerified => {
                StatusCode::FORBIDDEN
            }
            ApiErrorCode::InvalidResetToken | ApiErrorCode::EmailTaken => StatusCode::BAD_REQUEST,
            ApiErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal<E: std::fmt::Display>(error: E) -> ApiErrorCode {
        warn!("Internal error: {}", error);
        ApiErrorCode::InternalError
    }
}

impl reject::Reject for ApiErrorCode {}

impl From<AuthError> for ApiErrorCode {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::UserNotFound | AuthError::WrongPassword => {
                ApiErrorCode::AuthenticationFailed
            }
            AuthError::AccountInactive => ApiErrorCode::AccountInactive,
            AuthError::AccountNotVerified => ApiErrorCode::AccountNotVerified,
            AuthError::InvalidRefreshToken => ApiErrorCode::InvalidRefreshToken,
            AuthError::InvalidAccessToken => ApiErrorCode::InvalidToken,
            AuthError::InvalidResetToken => ApiErrorCode::InvalidResetToken,
            AuthError::EmailTaken => ApiErrorCode::EmailTaken,
            AuthError::RateLimited => ApiErrorCode::RateLimited,
            AuthError::ServiceUnavailable(e) => {
                warn!("auth service unavailable: {}", e);
                ApiErrorCode::ServiceUnavailable
            }
            AuthError::TokenCreationFailed(e) => ApiErrorCode::internal(e),
            AuthError::Store(e) => ApiErrorCode::internal(e),
            AuthError::InternalError(e) => ApiErrorCode::internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_collapse_to_one_code() {
        let a = ApiErrorCode::from(AuthError::UserNotFound);
        let b = ApiErrorCode::from(AuthError::WrongPassword);
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiErrorCode::from(AuthError::AccountInactive).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiErrorCode::from(AuthError::InvalidRefreshToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiErrorCode::from(AuthError::ServiceUnavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiErrorCode::from(AuthError::RateLimited).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}

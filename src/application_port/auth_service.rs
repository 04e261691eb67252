use crate::domain_model::{ClientInfo, UserId, UserProfile, UserRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Internal error taxonomy. `UserNotFound` and `WrongPassword` stay distinct
/// here for logging; the API boundary collapses both into one generic
/// credential failure so the response never reveals which one happened.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication failed: user not found")]
    UserNotFound,
    #[error("authentication failed: wrong password")]
    WrongPassword,
    #[error("account is inactive")]
    AccountInactive,
    #[error("account is not verified")]
    AccountNotVerified,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("invalid access token")]
    InvalidAccessToken,
    #[error("invalid password reset token")]
    InvalidResetToken,
    #[error("email already registered")]
    EmailTaken,
    #[error("too many login attempts")]
    RateLimited,
    #[error("auth service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("could not create token: {0}")]
    TokenCreationFailed(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
    pub remember_me: bool,
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogoutInput {
    /// Raw bearer token from the Authorization header, blacklisted for its
    /// remaining lifetime.
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub all_devices: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessToken(pub String);

#[derive(Debug, Clone, Serialize)]
pub struct RefreshToken(pub String);

/// Wire envelope returned by login and refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenEnvelope {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserProfile,
}

/// Claims of a verified access token, already parsed and type-checked.
#[derive(Debug, Clone)]
pub struct AccessTokenData {
    pub user_id: UserId,
    pub jti: String,
    pub role: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Claims of a verified refresh token.
#[derive(Debug, Clone)]
pub struct RefreshTokenData {
    pub user_id: UserId,
    pub jti: String,
    pub family: Option<String>,
    pub remember_me: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid claims: {0}")]
    InvalidClaims(String),
    #[error("could not encode token: {0}")]
    Encode(String),
}

#[async_trait::async_trait]
pub trait TokenCodec: Send + Sync {
    async fn issue_access_token(
        &self,
        user: &UserRecord,
        jti: String,
    ) -> Result<(AccessToken, DateTime<Utc>), TokenError>;

    async fn issue_refresh_token(
        &self,
        user_id: UserId,
        jti: String,
        family: String,
        remember_me: bool,
    ) -> Result<(RefreshToken, DateTime<Utc>), TokenError>;

    /// One-hour token with `typ = "password_reset"`.
    async fn issue_password_reset_token(&self, user_id: UserId) -> Result<String, TokenError>;

    async fn verify_access_token(&self, token: &str) -> Result<AccessTokenData, TokenError>;

    async fn verify_refresh_token(&self, token: &str) -> Result<RefreshTokenData, TokenError>;

    async fn verify_password_reset_token(&self, token: &str) -> Result<UserId, TokenError>;
}

#[async_trait::async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError>;

    /// False on mismatch and on malformed hashes. Callers must not be able
    /// to tell the two apart.
    async fn verify_password(&self, password: &str, password_hash: &str)
    -> Result<bool, AuthError>;
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn login(
        &self,
        request: LoginInput,
        client: &ClientInfo,
    ) -> Result<TokenEnvelope, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenEnvelope, AuthError>;

    async fn logout(&self, request: LogoutInput, client: &ClientInfo) -> Result<(), AuthError>;

    /// Validates a bearer access token: blacklist check, signature/claims
    /// check, then an active-user lookup.
    async fn current_user(&self, access_token: &str) -> Result<UserRecord, AuthError>;

    async fn register(&self, request: RegisterInput) -> Result<UserProfile, AuthError>;

    /// Returns the reset token when the email maps to an active user, so
    /// the delivery layer can send it. Absence is not reported to clients.
    async fn request_password_reset(&self, email: &str) -> Result<Option<String>, AuthError>;

    async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError>;
}

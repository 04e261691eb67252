use crate::application_port::*;
use crate::domain_model::{ClientInfo, Role, RoleProfile, UserId, UserProfile, UserRecord};

#[derive(Debug)]
pub struct FakeAuthService;

impl FakeAuthService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FakeAuthService {
    fn default() -> Self {
        Self::new()
    }
}

fn fake_id(email: &str) -> UserId {
    UserId(uuid::Uuid::new_v5(
        &uuid::Uuid::NAMESPACE_OID,
        email.as_bytes(),
    ))
}

fn fake_profile(email: &str) -> UserProfile {
    UserProfile {
        id: fake_id(email),
        email: email.to_string(),
        full_name: String::new(),
        phone: String::new(),
        role: RoleProfile {
            name: Role::Client.as_str(),
            permissions: Role::Client.permissions(),
        },
        is_active: true,
        is_verified: true,
    }
}

fn fake_envelope(email: &str) -> TokenEnvelope {
    TokenEnvelope {
        access_token: AccessToken(format!("fake-access-token:{}", email)),
        refresh_token: RefreshToken(format!("fake-refresh-token:{}", email)),
        token_type: "bearer",
        expires_in: 30 * 60,
        user: fake_profile(email),
    }
}

// Minimal fake implementation for wiring and manual testing only. Extend to
// simulate error cases when needed.
#[async_trait::async_trait]
impl AuthService for FakeAuthService {
    async fn login(
        &self,
        request: LoginInput,
        _client: &ClientInfo,
    ) -> Result<TokenEnvelope, AuthError> {
        Ok(fake_envelope(&request.email))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenEnvelope, AuthError> {
        if let Some(email) = refresh_token.strip_prefix("fake-refresh-token:") {
            Ok(fake_envelope(email))
        } else {
            Err(AuthError::InvalidRefreshToken)
        }
    }

    async fn logout(&self, _request: LogoutInput, _client: &ClientInfo) -> Result<(), AuthError> {
        Ok(())
    }

    async fn current_user(&self, access_token: &str) -> Result<UserRecord, AuthError> {
        if let Some(email) = access_token.strip_prefix("fake-access-token:") {
            Ok(UserRecord {
                user_id: fake_id(email),
                email: email.to_string(),
                hashed_password: String::new(),
                full_name: None,
                phone: None,
                role: Role::Client,
                is_active: true,
                is_verified: true,
                last_login: None,
            })
        } else {
            Err(AuthError::InvalidAccessToken)
        }
    }

    async fn register(&self, request: RegisterInput) -> Result<UserProfile, AuthError> {
        Ok(fake_profile(&request.email))
    }

    async fn request_password_reset(&self, email: &str) -> Result<Option<String>, AuthError> {
        Ok(Some(format!("fake-reset-token:{}", email)))
    }

    async fn reset_password(&self, token: &str, _new_password: &str) -> Result<(), AuthError> {
        if token.starts_with("fake-reset-token:") {
            Ok(())
        } else {
            Err(AuthError::InvalidResetToken)
        }
    }
}

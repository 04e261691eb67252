use crate::application_port::AuthError;
use crate::domain_model::{Role, UserId, UserRecord};

/// The user directory. The auth core only reads identity rows and writes
/// back the password hash and last-login timestamp.
#[async_trait::async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError>;

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<UserRecord>, AuthError>;

    /// Insert a new unverified user. Fails with `EmailTaken` on duplicates.
    async fn create(
        &self,
        user_id: UserId,
        email: &str,
        hashed_password: &str,
        full_name: Option<&str>,
        phone: Option<&str>,
        role: Role,
    ) -> Result<(), AuthError>;

    async fn set_password_hash(
        &self,
        user_id: UserId,
        hashed_password: &str,
    ) -> Result<(), AuthError>;

    async fn touch_last_login(&self, user_id: UserId) -> Result<(), AuthError>;
}

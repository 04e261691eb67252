use super::util::is_dup_key;
use crate::application_port::AuthError;
use crate::domain_model::{Role, UserId, UserRecord};
use crate::domain_port::UserRepo;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use uuid::Uuid;

pub struct MySqlUserRepo {
    pool: MySqlPool,
}

impl MySqlUserRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlUserRepo { pool }
    }

    #[inline]
    fn uid_as_bytes(id: &UserId) -> &[u8] {
        id.0.as_bytes()
    }

    #[inline]
    fn uid_from_bytes(id: &[u8]) -> Result<UserId, AuthError> {
        Ok(UserId(
            Uuid::from_slice(id).map_err(|e| AuthError::Store(e.to_string()))?,
        ))
    }

    fn row_to_record(row: MySqlRow) -> Result<UserRecord, AuthError> {
        let user_id_bytes: Vec<u8> = row
            .try_get("user_id")
            .map_err(|e| AuthError::Store(e.to_string()))?;
        let user_id = Self::uid_from_bytes(&user_id_bytes)?;

        let email: String = row
            .try_get("email")
            .map_err(|e| AuthError::Store(e.to_string()))?;
        let hashed_password: String = row
            .try_get("hashed_password")
            .map_err(|e| AuthError::Store(e.to_string()))?;
        let full_name: Option<String> = row
            .try_get("full_name")
            .map_err(|e| AuthError::Store(e.to_string()))?;
        let phone: Option<String> = row
            .try_get("phone")
            .map_err(|e| AuthError::Store(e.to_string()))?;
        let role_str: String = row
            .try_get("role")
            .map_err(|e| AuthError::Store(e.to_string()))?;
        let role = role_str
            .parse::<Role>()
            .map_err(AuthError::Store)?;
        let is_active: bool = row
            .try_get("is_active")
            .map_err(|e| AuthError::Store(e.to_string()))?;
        let is_verified: bool = row
            .try_get("is_verified")
            .map_err(|e| AuthError::Store(e.to_string()))?;
        let last_login: Option<DateTime<Utc>> = row
            .try_get("last_login")
            .map_err(|e| AuthError::Store(e.to_string()))?;

        Ok(UserRecord {
            user_id,
            email,
            hashed_password,
            full_name,
            phone,
            role,
            is_active,
            is_verified,
            last_login,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
SELECT user_id, email, hashed_password, full_name, phone, role, is_active, is_verified, last_login
FROM user
"#;

#[async_trait::async_trait]
impl UserRepo for MySqlUserRepo {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        let row_opt: Option<MySqlRow> =
            sqlx::query(&format!("{} WHERE email = ?", SELECT_COLUMNS))
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AuthError::Store(e.to_string()))?;

        row_opt.map(Self::row_to_record).transpose()
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<UserRecord>, AuthError> {
        let row_opt: Option<MySqlRow> =
            sqlx::query(&format!("{} WHERE user_id = ?", SELECT_COLUMNS))
                .bind(Self::uid_as_bytes(&user_id))
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AuthError::Store(e.to_string()))?;

        row_opt.map(Self::row_to_record).transpose()
    }

    async fn create(
        &self,
        user_id: UserId,
        email: &str,
        hashed_password: &str,
        full_name: Option<&str>,
        phone: Option<&str>,
        role: Role,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
INSERT INTO user (user_id, email, hashed_password, full_name, phone, role, is_active, is_verified)
VALUES (?, ?, ?, ?, ?, ?, TRUE, FALSE)
"#,
        )
        .bind(Self::uid_as_bytes(&user_id))
        .bind(email)
        .bind(hashed_password)
        .bind(full_name)
        .bind(phone)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_dup_key(&e) {
                AuthError::EmailTaken
            } else {
                AuthError::Store(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn set_password_hash(
        &self,
        user_id: UserId,
        hashed_password: &str,
    ) -> Result<(), AuthError> {
        sqlx::query("UPDATE user SET hashed_password = ? WHERE user_id = ?")
            .bind(hashed_password)
            .bind(Self::uid_as_bytes(&user_id))
            .execute(&self.pool)
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?;

        Ok(())
    }

    async fn touch_last_login(&self, user_id: UserId) -> Result<(), AuthError> {
        sqlx::query("UPDATE user SET last_login = UTC_TIMESTAMP() WHERE user_id = ?")
            .bind(Self::uid_as_bytes(&user_id))
            .execute(&self.pool)
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?;

        Ok(())
    }
}

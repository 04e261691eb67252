use crate::application_port::{AuthError, CredentialHasher};
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use tracing::warn;

pub struct Argon2PasswordHasher;

#[async_trait::async_trait]
impl CredentialHasher for Argon2PasswordHasher {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = argon2::password_hash::SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::InternalError(e.to_string()))?
            .to_string();
        Ok(hash)
    }

    async fn verify_password(
        &self,
        password: &str,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        // A corrupt stored hash verifies as false, same as a wrong password.
        let parsed = match PasswordHash::new(password_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("stored password hash is not valid PHC: {}", e);
                return Ok(false);
            }
        };

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = Argon2PasswordHasher;
        let hash = hasher.hash_password("Pw123456").await.unwrap();
        assert!(hasher.verify_password("Pw123456", &hash).await.unwrap());
        assert!(!hasher.verify_password("Pw1234567", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn fresh_salt_per_call() {
        let hasher = Argon2PasswordHasher;
        let a = hasher.hash_password("Pw123456").await.unwrap();
        let b = hasher.hash_password("Pw123456").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn malformed_hash_verifies_false() {
        let hasher = Argon2PasswordHasher;
        assert!(
            !hasher
                .verify_password("Pw123456", "not-a-phc-hash")
                .await
                .unwrap()
        );
        assert!(!hasher.verify_password("Pw123456", "").await.unwrap());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct UserId(pub uuid::Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::from_str(s).map(UserId)
    }
}

/// Closed role set. Permissions are fixed per role, never looked up
/// dynamically.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Staff,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }

    pub fn permissions(&self) -> &'static [&'static str] {
        match self {
            Role::Client => &["appointments:own", "messages:own", "documents:own"],
            Role::Staff => &[
                "appointments:all",
                "messages:all",
                "documents:all",
                "contacts:read",
            ],
            Role::Admin => &[
                "appointments:all",
                "messages:all",
                "documents:all",
                "contacts:all",
                "users:manage",
            ],
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the user directory, as the auth core sees it.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: UserId,
    pub email: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleProfile {
    pub name: &'static str,
    pub permissions: &'static [&'static str],
}

/// What the token envelope carries back to the client. Never includes the
/// password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub phone: String,
    pub role: RoleProfile,
    pub is_active: bool,
    pub is_verified: bool,
}

impl From<&UserRecord> for UserProfile {
    fn from(rec: &UserRecord) -> Self {
        UserProfile {
            id: rec.user_id,
            email: rec.email.clone(),
            full_name: rec.full_name.clone().unwrap_or_default(),
            phone: rec.phone.clone().unwrap_or_default(),
            role: RoleProfile {
                name: rec.role.as_str(),
                permissions: rec.role.permissions(),
            },
            is_active: rec.is_active,
            is_verified: rec.is_verified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Client, Role::Staff, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn every_role_has_permissions() {
        for role in [Role::Client, Role::Staff, Role::Admin] {
            assert!(!role.permissions().is_empty());
        }
    }
}

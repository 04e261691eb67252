use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client fingerprint attached to login/logout requests. Used to key the
/// per-device session record.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn unknown() -> Self {
        ClientInfo {
            ip: "unknown".to_string(),
            user_agent: "unknown".to_string(),
        }
    }
}

/// Stored under `session:{user}:{ip}:{user_agent}` with the refresh TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub ip: String,
    pub user_agent: String,
    pub last_active: DateTime<Utc>,
}

impl SessionDescriptor {
    pub fn new(client: &ClientInfo) -> Self {
        SessionDescriptor {
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            last_active: Utc::now(),
        }
    }
}

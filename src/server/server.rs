use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_mysql::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::settings::Settings;
use sqlx::{MySql, Pool};
use std::sync::Arc;
use std::time::Duration;

pub struct Server {
    pub auth_service: Arc<dyn AuthService>,
    pool: Option<Pool<MySql>>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let store: Arc<dyn RevocationStore> = match settings.store.backend.as_str() {
            "memory" => Arc::new(MemoryRevocationStore::new()),
            "redis" => {
                let redis_client = redis::Client::open(settings.store.url.as_str())?;
                // Slow store calls must surface as Unavailable, not hang the
                // auth decision.
                let manager_config = redis::aio::ConnectionManagerConfig::new()
                    .set_connection_timeout(Duration::from_secs(2))
                    .set_response_timeout(Duration::from_secs(2));
                let redis_manager = redis_client
                    .get_connection_manager_with_config(manager_config)
                    .await?;
                Arc::new(RedisRevocationStore::new(
                    redis_manager,
                    settings.store.prefix.clone(),
                ))
            }
            other => return Err(anyhow::anyhow!("Unknown store backend: {}", other)),
        };

        let signing_key = std::env::var("JWT_SIGNING_KEY")
            .map_err(|_| anyhow::anyhow!("JWT_SIGNING_KEY is not set"))?
            .into_bytes();
        let token_codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(JwtConfig {
            issuer: settings.token.issuer.clone(),
            audience: settings.token.audience.clone(),
            access_ttl: Duration::from_secs(settings.token.access_ttl_minutes * 60),
            refresh_ttl: Duration::from_secs(settings.token.refresh_ttl_days * 24 * 60 * 60),
            remember_me_refresh_ttl: Duration::from_secs(
                settings.token.remember_me_refresh_days * 24 * 60 * 60,
            ),
            enforce_nbf: settings.token.enforce_nbf,
            signing_key,
        }));

        let credential_hasher: Arc<dyn CredentialHasher> = Arc::new(Argon2PasswordHasher {});

        let (auth_service, pool): (Arc<dyn AuthService>, Option<Pool<MySql>>) =
            match settings.auth.backend.as_str() {
                "fake" => (Arc::new(FakeAuthService::new()), None),
                "real" => {
                    let pool = Pool::<MySql>::connect(&settings.database.url).await?;
                    let user_repo: Arc<dyn UserRepo> = Arc::new(MySqlUserRepo::new(pool.clone()));
                    let service = RealAuthService::new(
                        user_repo,
                        credential_hasher,
                        token_codec,
                        store,
                        AuthConfig {
                            fail_open: settings.auth.fail_open,
                            login_rate_limit: settings.auth.login_rate_limit,
                            login_rate_window_secs: settings.auth.login_rate_window_secs,
                        },
                    );
                    (Arc::new(service), Some(pool))
                }
                other => return Err(anyhow::anyhow!("Unknown auth backend: {}", other)),
            };

        info!("server started");

        Ok(Self { auth_service, pool })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

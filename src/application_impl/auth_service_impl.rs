use crate::application_port::{
    AuthError, AuthService, CredentialHasher, LoginInput, LogoutInput, RegisterInput, TokenCodec,
    TokenEnvelope, TokenError,
};
use crate::domain_model::{ClientInfo, Role, SessionDescriptor, UserId, UserProfile, UserRecord};
use crate::domain_port::{
    RevocationStore, StoreError, UserRepo, blacklist_key, login_rate_key, refresh_token_key,
    refresh_token_prefix, session_key, session_prefix, token_family_key, token_family_prefix,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// When the revocation store is unreachable during a validity check,
    /// `true` proceeds optimistically (development), `false` fails the
    /// request with `ServiceUnavailable` (production default).
    pub fail_open: bool,
    pub login_rate_limit: u64,
    pub login_rate_window_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            fail_open: false,
            login_rate_limit: 100,
            login_rate_window_secs: 3600,
        }
    }
}

pub struct RealAuthService {
    user_repo: Arc<dyn UserRepo>,
    credential_hasher: Arc<dyn CredentialHasher>,
    token_codec: Arc<dyn TokenCodec>,
    store: Arc<dyn RevocationStore>,
    cfg: AuthConfig,
}

fn store_err(e: StoreError) -> AuthError {
    match e {
        StoreError::Unavailable(msg) => AuthError::ServiceUnavailable(msg),
        StoreError::Internal(msg) => AuthError::Store(msg),
    }
}

fn issue_err(e: TokenError) -> AuthError {
    AuthError::TokenCreationFailed(e.to_string())
}

impl RealAuthService {
    pub fn new(
        user_repo: Arc<dyn UserRepo>,
        credential_hasher: Arc<dyn CredentialHasher>,
        token_codec: Arc<dyn TokenCodec>,
        store: Arc<dyn RevocationStore>,
        cfg: AuthConfig,
    ) -> Self {
        Self {
            user_repo,
            credential_hasher,
            token_codec,
            store,
            cfg,
        }
    }

    #[inline]
    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn ttl_secs(until: DateTime<Utc>) -> u64 {
        let secs = (until - Utc::now()).num_seconds();
        if secs <= 0 { 1 } else { secs as u64 }
    }

    /// Mints an access/refresh pair and installs the refresh jti as the
    /// family's current token. Persist failures are swallowed only in
    /// fail-open mode; otherwise a token the store never heard of would
    /// trip reuse detection on its first legitimate use.
    async fn issue_pair(
        &self,
        user: &UserRecord,
        family: Option<String>,
        remember_me: bool,
    ) -> Result<TokenEnvelope, AuthError> {
        let family = family.unwrap_or_else(Self::new_id);
        let jti = Self::new_id();

        let (access_token, access_exp) = self
            .token_codec
            .issue_access_token(user, Self::new_id())
            .await
            .map_err(issue_err)?;
        let (refresh_token, refresh_exp) = self
            .token_codec
            .issue_refresh_token(user.user_id, jti.clone(), family.clone(), remember_me)
            .await
            .map_err(issue_err)?;

        let ttl = Self::ttl_secs(refresh_exp);
        let persisted = async {
            self.store
                .set_with_ttl(&token_family_key(user.user_id, &family), &jti, ttl)
                .await?;
            self.store
                .set_with_ttl(&refresh_token_key(user.user_id, &jti), &family, ttl)
                .await
        }
        .await;
        if let Err(e) = persisted {
            if self.cfg.fail_open {
                warn!(user_id = %user.user_id, "could not persist refresh token record: {}", e);
            } else {
                return Err(store_err(e));
            }
        }

        Ok(TokenEnvelope {
            access_token,
            refresh_token,
            token_type: "bearer",
            expires_in: (access_exp - Utc::now()).num_seconds(),
            user: UserProfile::from(user),
        })
    }

    /// The liveness rule from the store's point of view: the jti record must
    /// exist and, when a family is claimed, the jti must be the family's
    /// current pointer.
    async fn is_live_refresh_token(
        &self,
        user_id: UserId,
        jti: &str,
        family: Option<&str>,
    ) -> Result<bool, StoreError> {
        if !self.store.exists(&refresh_token_key(user_id, jti)).await? {
            return Ok(false);
        }
        let Some(family) = family else {
            return Ok(true);
        };

        // The pointer check is unconditional: an older record that survived
        // rotation (a failed conditional delete in fail-open mode) must not
        // pass just because its stored family still matches.
        let current = self.store.get(&token_family_key(user_id, family)).await?;
        Ok(current.as_deref() == Some(jti))
    }

    /// Deletes one refresh token record and, when it is the family's
    /// current token, the family pointer as well.
    async fn revoke_refresh_token(&self, user_id: UserId, jti: &str) -> Result<(), StoreError> {
        let token_key = refresh_token_key(user_id, jti);
        let family = self.store.get(&token_key).await?;
        self.store.delete(&token_key).await?;

        if let Some(family) = family.filter(|f| !f.is_empty()) {
            let family_key = token_family_key(user_id, &family);
            if self.store.get(&family_key).await?.as_deref() == Some(jti) {
                self.store.delete(&family_key).await?;
            }
        }
        Ok(())
    }

    /// Nukes every refresh token and family record for the user. Sessions
    /// are left alone; logout-all handles those separately.
    async fn revoke_all_refresh_tokens(&self, user_id: UserId) -> Result<u64, StoreError> {
        let tokens = self
            .store
            .delete_matching(&refresh_token_prefix(user_id))
            .await?;
        let families = self
            .store
            .delete_matching(&token_family_prefix(user_id))
            .await?;
        Ok(tokens + families)
    }

    async fn store_session(&self, user_id: UserId, client: &ClientInfo, ttl: u64) {
        let descriptor = SessionDescriptor::new(client);
        let payload = match serde_json::to_string(&descriptor) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(user_id = %user_id, "could not serialize session descriptor: {}", e);
                return;
            }
        };
        let key = session_key(user_id, &client.ip, &client.user_agent);
        if let Err(e) = self.store.set_with_ttl(&key, &payload, ttl).await {
            warn!(user_id = %user_id, "could not store session descriptor: {}", e);
        }
    }

    async fn check_login_rate(&self, client: &ClientInfo) -> Result<(), AuthError> {
        match self
            .store
            .increment_with_ttl(&login_rate_key(&client.ip), self.cfg.login_rate_window_secs)
            .await
        {
            Ok(count) if count > self.cfg.login_rate_limit => {
                warn!(ip = %client.ip, count, "login rate limit exceeded");
                Err(AuthError::RateLimited)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                // Counting is best-effort; an unreachable store must not
                // block logins by itself.
                warn!("login rate counter unavailable: {}", e);
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn login(
        &self,
        request: LoginInput,
        client: &ClientInfo,
    ) -> Result<TokenEnvelope, AuthError> {
        self.check_login_rate(client).await?;

        let user = match self.user_repo.find_by_email(&request.email).await? {
            Some(user) => user,
            None => {
                info!(ip = %client.ip, "login attempt for unknown email");
                return Err(AuthError::UserNotFound);
            }
        };

        let ok = self
            .credential_hasher
            .verify_password(&request.password, &user.hashed_password)
            .await?;
        if !ok {
            info!(user_id = %user.user_id, ip = %client.ip, "login attempt with wrong password");
            return Err(AuthError::WrongPassword);
        }

        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }
        if !user.is_verified {
            return Err(AuthError::AccountNotVerified);
        }

        let envelope = self.issue_pair(&user, None, request.remember_me).await?;

        let refresh_data = self
            .token_codec
            .verify_refresh_token(&envelope.refresh_token.0)
            .await;
        let session_ttl = refresh_data
            .map(|d| Self::ttl_secs(d.expires_at))
            .unwrap_or(60 * 60 * 24);
        self.store_session(user.user_id, client, session_ttl).await;

        if let Err(e) = self.user_repo.touch_last_login(user.user_id).await {
            warn!(user_id = %user.user_id, "could not update last_login: {}", e);
        }

        info!(user_id = %user.user_id, ip = %client.ip, "login succeeded");
        Ok(envelope)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenEnvelope, AuthError> {
        let data = match self.token_codec.verify_refresh_token(refresh_token).await {
            Ok(data) => data,
            Err(TokenError::Expired) => {
                info!("refresh attempt with expired token");
                return Err(AuthError::InvalidRefreshToken);
            }
            Err(e) => {
                info!("refresh attempt with undecodable token: {}", e);
                return Err(AuthError::InvalidRefreshToken);
            }
        };

        let live = match self
            .is_live_refresh_token(data.user_id, &data.jti, data.family.as_deref())
            .await
        {
            Ok(live) => live,
            Err(e) if self.cfg.fail_open => {
                warn!(user_id = %data.user_id, "store unreachable during refresh check, proceeding optimistically: {}", e);
                true
            }
            Err(e) => return Err(store_err(e)),
        };

        if !live {
            if let Some(family) = &data.family {
                // A revoked member of a known family came back: assume the
                // lineage is compromised and force re-login everywhere.
                warn!(user_id = %data.user_id, family = %family, "refresh token reuse detected, revoking all tokens");
                if let Err(e) = self.revoke_all_refresh_tokens(data.user_id).await {
                    warn!(user_id = %data.user_id, "could not revoke token family: {}", e);
                }
            }
            return Err(AuthError::InvalidRefreshToken);
        }

        let user = self.user_repo.find_by_id(data.user_id).await?;
        let user = match user {
            Some(user) if user.is_active => user,
            _ => {
                if let Err(e) = self.revoke_all_refresh_tokens(data.user_id).await {
                    warn!(user_id = %data.user_id, "could not revoke tokens of inactive user: {}", e);
                }
                return Err(AuthError::InvalidRefreshToken);
            }
        };

        // Rotation. The conditional delete makes this first-wins: a
        // concurrent refresh of the same token loses the race here and is
        // handled as reuse.
        let family_value = data.family.clone().unwrap_or_default();
        match self
            .store
            .compare_and_delete(&refresh_token_key(data.user_id, &data.jti), &family_value)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id = %data.user_id, "lost rotation race, treating as reuse");
                if let Err(e) = self.revoke_all_refresh_tokens(data.user_id).await {
                    warn!(user_id = %data.user_id, "could not revoke token family: {}", e);
                }
                return Err(AuthError::InvalidRefreshToken);
            }
            Err(e) if self.cfg.fail_open => {
                warn!(user_id = %data.user_id, "store unreachable during rotation, old token not consumed: {}", e);
            }
            Err(e) => return Err(store_err(e)),
        }

        self.issue_pair(&user, data.family, data.remember_me).await
    }

    async fn logout(&self, request: LogoutInput, client: &ClientInfo) -> Result<(), AuthError> {
        let data = self
            .token_codec
            .verify_access_token(&request.access_token)
            .await
            .map_err(|_| AuthError::InvalidAccessToken)?;
        let user_id = data.user_id;

        // Everything past authentication is best-effort: logout must
        // succeed even when revocation partially fails.
        let remaining = Self::ttl_secs(data.expires_at);
        if let Err(e) = self
            .store
            .set_with_ttl(&blacklist_key(&request.access_token), "1", remaining)
            .await
        {
            warn!(user_id = %user_id, "could not blacklist access token: {}", e);
        }

        if request.all_devices {
            if let Err(e) = self.revoke_all_refresh_tokens(user_id).await {
                warn!(user_id = %user_id, "could not revoke all refresh tokens: {}", e);
            }
            if let Err(e) = self.store.delete_matching(&session_prefix(user_id)).await {
                warn!(user_id = %user_id, "could not revoke sessions: {}", e);
            }
            info!(user_id = %user_id, "logged out of all devices");
            return Ok(());
        }

        let current_session = session_key(user_id, &client.ip, &client.user_agent);
        if let Err(e) = self.store.delete(&current_session).await {
            warn!(user_id = %user_id, "could not delete session record: {}", e);
        }

        if let Some(refresh_token) = &request.refresh_token {
            match self.token_codec.verify_refresh_token(refresh_token).await {
                Ok(refresh) if refresh.user_id == user_id => {
                    if let Err(e) = self.revoke_refresh_token(user_id, &refresh.jti).await {
                        warn!(user_id = %user_id, "could not revoke refresh token: {}", e);
                    }
                }
                Ok(refresh) => {
                    warn!(user_id = %user_id, other = %refresh.user_id, "logout refresh token belongs to another user, ignored");
                }
                Err(e) => {
                    warn!(user_id = %user_id, "could not decode refresh token during logout: {}", e);
                }
            }
        }

        info!(user_id = %user_id, "logged out");
        Ok(())
    }

    async fn current_user(&self, access_token: &str) -> Result<UserRecord, AuthError> {
        match self.store.exists(&blacklist_key(access_token)).await {
            Ok(true) => {
                warn!("blacklisted access token presented");
                return Err(AuthError::InvalidAccessToken);
            }
            Ok(false) => {}
            Err(e) if self.cfg.fail_open => {
                warn!("store unreachable during blacklist check, proceeding: {}", e);
            }
            Err(e) => return Err(store_err(e)),
        }

        let data = self
            .token_codec
            .verify_access_token(access_token)
            .await
            .map_err(|_| AuthError::InvalidAccessToken)?;

        match self.user_repo.find_by_id(data.user_id).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AuthError::InvalidAccessToken),
        }
    }

    async fn register(&self, request: RegisterInput) -> Result<UserProfile, AuthError> {
        if self
            .user_repo
            .find_by_email(&request.email)
            .await?
            .is_some()
        {
            return Err(AuthError::EmailTaken);
        }

        let user_id = UserId(Uuid::new_v4());
        let hashed = self
            .credential_hasher
            .hash_password(&request.password)
            .await?;
        self.user_repo
            .create(
                user_id,
                &request.email,
                &hashed,
                request.full_name.as_deref(),
                request.phone.as_deref(),
                Role::Client,
            )
            .await?;

        info!(user_id = %user_id, "registered new user");
        Ok(UserProfile {
            id: user_id,
            email: request.email,
            full_name: request.full_name.unwrap_or_default(),
            phone: request.phone.unwrap_or_default(),
            role: crate::domain_model::RoleProfile {
                name: Role::Client.as_str(),
                permissions: Role::Client.permissions(),
            },
            is_active: true,
            is_verified: false,
        })
    }

    async fn request_password_reset(&self, email: &str) -> Result<Option<String>, AuthError> {
        let user = match self.user_repo.find_by_email(email).await? {
            Some(user) if user.is_active => user,
            _ => return Ok(None),
        };
        let token = self
            .token_codec
            .issue_password_reset_token(user.user_id)
            .await
            .map_err(issue_err)?;
        info!(user_id = %user.user_id, "issued password reset token");
        Ok(Some(token))
    }

    async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let user_id = self
            .token_codec
            .verify_password_reset_token(token)
            .await
            .map_err(|_| AuthError::InvalidResetToken)?;

        let user = match self.user_repo.find_by_id(user_id).await? {
            Some(user) if user.is_active => user,
            _ => return Err(AuthError::InvalidResetToken),
        };

        let hashed = self.credential_hasher.hash_password(new_password).await?;
        self.user_repo
            .set_password_hash(user.user_id, &hashed)
            .await?;

        // A password change kills every existing session.
        self.revoke_all_refresh_tokens(user.user_id)
            .await
            .map_err(store_err)?;

        info!(user_id = %user.user_id, "password reset completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{
        Argon2PasswordHasher, JwtConfig, JwtHs256Codec, MemoryRevocationStore,
    };
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const SECRET: &str = "test-signing-key";

    struct FakeUserRepo {
        users: Mutex<HashMap<UserId, UserRecord>>,
    }

    impl FakeUserRepo {
        fn new() -> Self {
            FakeUserRepo {
                users: Mutex::new(HashMap::new()),
            }
        }

        fn insert(&self, user: UserRecord) {
            self.users.lock().unwrap().insert(user.user_id, user);
        }

        fn deactivate(&self, user_id: UserId) {
            if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
                user.is_active = false;
            }
        }
    }

    #[async_trait::async_trait]
    impl UserRepo for FakeUserRepo {
        async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .values()
                .find(|u| u.email == email)
                .cloned())
        }

        async fn find_by_id(&self, user_id: UserId) -> Result<Option<UserRecord>, AuthError> {
            Ok(self.users.lock().unwrap().get(&user_id).cloned())
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
            let mut users = self.users.lock().unwrap();
            if users.values().any(|u| u.email == email) {
                return Err(AuthError::EmailTaken);
            }
            users.insert(
                user_id,
                UserRecord {
                    user_id,
                    email: email.to_string(),
                    hashed_password: hashed_password.to_string(),
                    full_name: full_name.map(str::to_string),
                    phone: phone.map(str::to_string),
                    role,
                    is_active: true,
                    is_verified: false,
                    last_login: None,
                },
            );
            Ok(())
        }

        async fn set_password_hash(
            &self,
            user_id: UserId,
            hashed_password: &str,
        ) -> Result<(), AuthError> {
            let mut users = self.users.lock().unwrap();
            let user = users
                .get_mut(&user_id)
                .ok_or(AuthError::UserNotFound)?;
            user.hashed_password = hashed_password.to_string();
            Ok(())
        }

        async fn touch_last_login(&self, user_id: UserId) -> Result<(), AuthError> {
            let mut users = self.users.lock().unwrap();
            if let Some(user) = users.get_mut(&user_id) {
                user.last_login = Some(Utc::now());
            }
            Ok(())
        }
    }

    /// Store whose every operation fails, for fail-open/fail-closed tests.
    struct UnreachableStore;

    #[async_trait::async_trait]
    impl RevocationStore for UnreachableStore {
        async fn set_with_ttl(&self, _: &str, _: &str, _: u64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn exists(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete_matching(&self, _: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn compare_and_delete(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn increment_with_ttl(&self, _: &str, _: u64) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn health_check(&self) -> bool {
            false
        }
    }

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            issuer: "aerie.auth".to_string(),
            audience: "aerie-clients".to_string(),
            access_ttl: Duration::from_secs(30 * 60),
            refresh_ttl: Duration::from_secs(24 * 60 * 60),
            remember_me_refresh_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            enforce_nbf: false,
            signing_key: SECRET.as_bytes().to_vec(),
        }
    }

    struct Fixture {
        service: RealAuthService,
        store: Arc<MemoryRevocationStore>,
        repo: Arc<FakeUserRepo>,
        codec: Arc<JwtHs256Codec>,
    }

    async fn fixture() -> Fixture {
        fixture_with(AuthConfig::default()).await
    }

    async fn fixture_with(cfg: AuthConfig) -> Fixture {
        let store = Arc::new(MemoryRevocationStore::new());
        let repo = Arc::new(FakeUserRepo::new());
        let codec = Arc::new(JwtHs256Codec::new(jwt_config()));
        let hasher = Arc::new(Argon2PasswordHasher);

        let hash = hasher.hash_password("Pw123456").await.unwrap();
        repo.insert(UserRecord {
            user_id: UserId(Uuid::new_v4()),
            email: "a@x.com".to_string(),
            hashed_password: hash,
            full_name: Some("Ada".to_string()),
            phone: None,
            role: Role::Client,
            is_active: true,
            is_verified: true,
            last_login: None,
        });

        let service = RealAuthService::new(
            repo.clone(),
            hasher,
            codec.clone(),
            store.clone(),
            cfg,
        );
        Fixture {
            service,
            store,
            repo,
            codec,
        }
    }

    fn client() -> ClientInfo {
        ClientInfo {
            ip: "10.0.0.9".to_string(),
            user_agent: "test-agent".to_string(),
        }
    }

    fn login_input() -> LoginInput {
        LoginInput {
            email: "a@x.com".to_string(),
            password: "Pw123456".to_string(),
            remember_me: false,
        }
    }

    fn keys_with_prefix(store: &MemoryRevocationStore, prefix: &str) -> Vec<String> {
        store
            .live_keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    #[tokio::test]
    async fn login_issues_pair_and_persists_records() {
        let f = fixture().await;
        let envelope = f.service.login(login_input(), &client()).await.unwrap();
        assert_eq!(envelope.token_type, "bearer");
        assert_eq!(envelope.user.email, "a@x.com");

        let data = f
            .codec
            .verify_refresh_token(&envelope.refresh_token.0)
            .await
            .unwrap();
        let family = data.family.expect("fresh login gets a family");

        assert_eq!(
            f.store
                .get(&refresh_token_key(data.user_id, &data.jti))
                .await
                .unwrap()
                .as_deref(),
            Some(family.as_str())
        );
        assert_eq!(
            f.store
                .get(&token_family_key(data.user_id, &family))
                .await
                .unwrap()
                .as_deref(),
            Some(data.jti.as_str())
        );
        assert_eq!(
            keys_with_prefix(&f.store, &session_prefix(data.user_id)).len(),
            1
        );

        let user = f.repo.find_by_id(data.user_id).await.unwrap().unwrap();
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn bad_credentials_fail_without_tokens() {
        let f = fixture().await;

        let mut wrong_pw = login_input();
        wrong_pw.password = "nope".to_string();
        assert!(matches!(
            f.service.login(wrong_pw, &client()).await.unwrap_err(),
            AuthError::WrongPassword
        ));

        let mut unknown = login_input();
        unknown.email = "nobody@x.com".to_string();
        assert!(matches!(
            f.service.login(unknown, &client()).await.unwrap_err(),
            AuthError::UserNotFound
        ));

        assert!(keys_with_prefix(&f.store, "refresh_token:").is_empty());
    }

    #[tokio::test]
    async fn inactive_login_writes_nothing() {
        let f = fixture().await;
        let user = f.repo.find_by_email("a@x.com").await.unwrap().unwrap();
        f.repo.deactivate(user.user_id);

        let err = f.service.login(login_input(), &client()).await.unwrap_err();
        assert!(matches!(err, AuthError::AccountInactive));

        assert!(keys_with_prefix(&f.store, "refresh_token:").is_empty());
        assert!(keys_with_prefix(&f.store, "token_family:").is_empty());
        assert!(keys_with_prefix(&f.store, "session:").is_empty());
    }

    #[tokio::test]
    async fn refresh_rotates_within_the_family() {
        let f = fixture().await;
        let first = f.service.login(login_input(), &client()).await.unwrap();
        let first_data = f
            .codec
            .verify_refresh_token(&first.refresh_token.0)
            .await
            .unwrap();

        let second = f.service.refresh(&first.refresh_token.0).await.unwrap();
        let second_data = f
            .codec
            .verify_refresh_token(&second.refresh_token.0)
            .await
            .unwrap();

        assert_ne!(first_data.jti, second_data.jti);
        assert_eq!(first_data.family, second_data.family);

        let family = second_data.family.unwrap();
        assert!(
            !f.store
                .exists(&refresh_token_key(first_data.user_id, &first_data.jti))
                .await
                .unwrap()
        );
        assert_eq!(
            f.store
                .get(&token_family_key(second_data.user_id, &family))
                .await
                .unwrap()
                .as_deref(),
            Some(second_data.jti.as_str())
        );
    }

    #[tokio::test]
    async fn reuse_of_rotated_token_wipes_the_family() {
        let f = fixture().await;
        let first = f.service.login(login_input(), &client()).await.unwrap();
        let second = f.service.refresh(&first.refresh_token.0).await.unwrap();

        // Presenting the rotated-away token again is treated as theft.
        let err = f.service.refresh(&first.refresh_token.0).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));

        assert!(keys_with_prefix(&f.store, "refresh_token:").is_empty());
        assert!(keys_with_prefix(&f.store, "token_family:").is_empty());

        // The still-current token died with the family.
        let err = f.service.refresh(&second.refresh_token.0).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn stale_record_behind_family_pointer_is_treated_as_reuse() {
        let f = fixture().await;
        let first = f.service.login(login_input(), &client()).await.unwrap();
        let data = f
            .codec
            .verify_refresh_token(&first.refresh_token.0)
            .await
            .unwrap();
        let family = data.family.clone().unwrap();

        // Simulate a rotation that failed to consume the old record: the
        // family pointer has moved on but the old jti record survived. Its
        // stored family still matches, which alone must not make it live.
        f.store
            .set_with_ttl(&token_family_key(data.user_id, &family), "newer-jti", 60)
            .await
            .unwrap();

        let err = f.service.refresh(&first.refresh_token.0).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
        assert!(keys_with_prefix(&f.store, "refresh_token:").is_empty());
        assert!(keys_with_prefix(&f.store, "token_family:").is_empty());
    }

    #[tokio::test]
    async fn expired_refresh_token_needs_no_store() {
        // A store that errors on every call proves the expiry is caught by
        // the codec before any liveness lookup.
        let repo = Arc::new(FakeUserRepo::new());
        let codec = Arc::new(JwtHs256Codec::new(jwt_config()));
        let service = RealAuthService::new(
            repo,
            Arc::new(Argon2PasswordHasher),
            codec,
            Arc::new(UnreachableStore),
            AuthConfig::default(),
        );

        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": UserId(Uuid::new_v4()).to_string(),
            "jti": "jti-old",
            "tf": "fam",
            "type": "refresh",
            "iat": now - 7200,
            "nbf": now - 7200,
            "exp": now - 3600,
            "iss": "aerie.auth",
            "aud": "aerie-clients",
            "rm": false,
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = service.refresh(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn refresh_for_deactivated_user_revokes_everything() {
        let f = fixture().await;
        let envelope = f.service.login(login_input(), &client()).await.unwrap();
        let user = f.repo.find_by_email("a@x.com").await.unwrap().unwrap();
        f.repo.deactivate(user.user_id);

        let err = f.service.refresh(&envelope.refresh_token.0).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
        assert!(keys_with_prefix(&f.store, "refresh_token:").is_empty());
    }

    #[tokio::test]
    async fn store_outage_fails_closed_by_default_and_open_when_configured() {
        let closed = fixture().await;
        let envelope = closed.service.login(login_input(), &client()).await.unwrap();

        // Same signing key, so the token verifies against a service backed
        // by the unreachable store.
        let repo = Arc::new(FakeUserRepo::new());
        let user = closed.repo.find_by_email("a@x.com").await.unwrap().unwrap();
        repo.insert(user.clone());

        let make = |fail_open: bool, repo: Arc<FakeUserRepo>| {
            RealAuthService::new(
                repo,
                Arc::new(Argon2PasswordHasher),
                Arc::new(JwtHs256Codec::new(jwt_config())),
                Arc::new(UnreachableStore),
                AuthConfig {
                    fail_open,
                    ..AuthConfig::default()
                },
            )
        };

        let strict = make(false, repo.clone());
        let err = strict.refresh(&envelope.refresh_token.0).await.unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable(_)));

        let lenient = make(true, repo);
        assert!(lenient.refresh(&envelope.refresh_token.0).await.is_ok());
    }

    #[tokio::test]
    async fn logout_all_devices_leaves_no_records() {
        let f = fixture().await;
        let phone = ClientInfo {
            ip: "10.0.0.7".to_string(),
            user_agent: "phone".to_string(),
        };
        let a = f.service.login(login_input(), &client()).await.unwrap();
        let _b = f.service.login(login_input(), &phone).await.unwrap();

        f.service
            .logout(
                LogoutInput {
                    access_token: a.access_token.0.clone(),
                    refresh_token: None,
                    all_devices: true,
                },
                &client(),
            )
            .await
            .unwrap();

        assert!(keys_with_prefix(&f.store, "refresh_token:").is_empty());
        assert!(keys_with_prefix(&f.store, "token_family:").is_empty());
        assert!(keys_with_prefix(&f.store, "session:").is_empty());

        // The blacklisted access token no longer authenticates even though
        // its signature is still valid.
        let err = f.service.current_user(&a.access_token.0).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidAccessToken));
    }

    #[tokio::test]
    async fn single_device_logout_spares_other_sessions() {
        let f = fixture().await;
        let phone = ClientInfo {
            ip: "10.0.0.7".to_string(),
            user_agent: "phone".to_string(),
        };
        let a = f.service.login(login_input(), &client()).await.unwrap();
        let b = f.service.login(login_input(), &phone).await.unwrap();

        f.service
            .logout(
                LogoutInput {
                    access_token: a.access_token.0.clone(),
                    refresh_token: Some(a.refresh_token.0.clone()),
                    all_devices: false,
                },
                &client(),
            )
            .await
            .unwrap();

        // Device A's records are gone, device B still rotates fine.
        let a_data = f.codec.verify_refresh_token(&a.refresh_token.0).await.unwrap();
        assert!(
            !f.store
                .exists(&refresh_token_key(a_data.user_id, &a_data.jti))
                .await
                .unwrap()
        );
        assert_eq!(
            keys_with_prefix(&f.store, &session_prefix(a_data.user_id)).len(),
            1
        );
        assert!(f.service.refresh(&b.refresh_token.0).await.is_ok());
    }

    #[tokio::test]
    async fn valid_access_token_authenticates_until_blacklisted() {
        let f = fixture().await;
        let envelope = f.service.login(login_input(), &client()).await.unwrap();

        let user = f
            .service
            .current_user(&envelope.access_token.0)
            .await
            .unwrap();
        assert_eq!(user.email, "a@x.com");

        f.store
            .set_with_ttl(&blacklist_key(&envelope.access_token.0), "1", 60)
            .await
            .unwrap();
        assert!(f.service.current_user(&envelope.access_token.0).await.is_err());
    }

    #[tokio::test]
    async fn login_rate_limit_kicks_in() {
        let f = fixture_with(AuthConfig {
            login_rate_limit: 2,
            ..AuthConfig::default()
        })
        .await;

        let mut wrong = login_input();
        wrong.password = "nope".to_string();
        for _ in 0..2 {
            let _ = f.service.login(wrong.clone(), &client()).await;
        }
        let err = f.service.login(login_input(), &client()).await.unwrap_err();
        assert!(matches!(err, AuthError::RateLimited));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let f = fixture().await;
        let err = f
            .service
            .register(RegisterInput {
                email: "a@x.com".to_string(),
                password: "Pw123456".to_string(),
                full_name: None,
                phone: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));

        let profile = f
            .service
            .register(RegisterInput {
                email: "new@x.com".to_string(),
                password: "Pw123456".to_string(),
                full_name: Some("Nia".to_string()),
                phone: None,
            })
            .await
            .unwrap();
        assert!(!profile.is_verified);
        assert_eq!(profile.role.name, "client");
    }

    #[tokio::test]
    async fn password_reset_revokes_every_refresh_token() {
        let f = fixture().await;
        let phone = ClientInfo {
            ip: "10.0.0.7".to_string(),
            user_agent: "phone".to_string(),
        };
        let a = f.service.login(login_input(), &client()).await.unwrap();
        let _b = f.service.login(login_input(), &phone).await.unwrap();

        let token = f
            .service
            .request_password_reset("a@x.com")
            .await
            .unwrap()
            .expect("active user gets a token");
        f.service.reset_password(&token, "NewPw12345").await.unwrap();

        assert!(keys_with_prefix(&f.store, "refresh_token:").is_empty());
        assert!(keys_with_prefix(&f.store, "token_family:").is_empty());
        assert!(f.service.refresh(&a.refresh_token.0).await.is_err());

        let mut new_login = login_input();
        new_login.password = "NewPw12345".to_string();
        assert!(f.service.login(new_login, &client()).await.is_ok());
        assert!(matches!(
            f.service.login(login_input(), &client()).await.unwrap_err(),
            AuthError::WrongPassword
        ));
    }

    #[tokio::test]
    async fn reset_request_for_unknown_email_is_silent() {
        let f = fixture().await;
        assert!(
            f.service
                .request_password_reset("ghost@x.com")
                .await
                .unwrap()
                .is_none()
        );
    }
}

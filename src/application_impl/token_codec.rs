use crate::application_port::{
    AccessToken, AccessTokenData, RefreshToken, RefreshTokenData, TokenCodec, TokenError,
};
use crate::domain_model::{UserId, UserRecord};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";
pub const TOKEN_TYPE_PASSWORD_RESET: &str = "password_reset";

const PASSWORD_RESET_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub remember_me_refresh_ttl: Duration,
    /// Source behavior is to skip `nbf`; kept switchable rather than
    /// silently enforced.
    pub enforce_nbf: bool,
    pub signing_key: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    jti: String,
    #[serde(rename = "type")]
    typ: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    iss: String,
    aud: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RefreshClaims {
    sub: String,
    jti: String,
    /// Token family. Absent only for tokens minted before families existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tf: Option<String>,
    #[serde(rename = "type")]
    typ: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    iss: String,
    aud: String,
    #[serde(default)]
    rm: bool,
}

pub struct JwtHs256Codec {
    cfg: JwtConfig,
}

impl JwtHs256Codec {
    pub fn new(cfg: JwtConfig) -> Self {
        JwtHs256Codec { cfg }
    }

    fn validation(&self) -> Validation {
        let mut v = Validation::new(Algorithm::HS256);
        // No leeway: a token at its expiry boundary is expired.
        v.leeway = 0;
        v.validate_exp = true;
        v.validate_nbf = self.cfg.enforce_nbf;
        v.set_audience(&[self.cfg.audience.clone()]);
        v.set_issuer(&[self.cfg.issuer.clone()]);
        v.set_required_spec_claims(&["exp", "iat", "sub", "aud", "iss"]);
        v
    }

    fn encode_claims<C: Serialize>(&self, claims: &C) -> Result<String, TokenError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(&self.cfg.signing_key),
        )
        .map_err(|e| TokenError::Encode(e.to_string()))
    }

    fn decode_claims<C: serde::de::DeserializeOwned>(&self, token: &str) -> Result<C, TokenError> {
        let data = decode::<C>(
            token,
            &DecodingKey::from_secret(&self.cfg.signing_key),
            &self.validation(),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ImmatureSignature => TokenError::InvalidClaims("token not yet valid".into()),
            other => TokenError::InvalidClaims(format!("{:?}", other)),
        })?;
        Ok(data.claims)
    }

    fn parse_user_id(sub: &str) -> Result<UserId, TokenError> {
        sub.parse::<UserId>()
            .map_err(|_| TokenError::InvalidClaims("sub is not a user id".into()))
    }

    fn exp_datetime(exp: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(exp, 0).single().unwrap_or_else(Utc::now)
    }
}

#[async_trait::async_trait]
impl TokenCodec for JwtHs256Codec {
    async fn issue_access_token(
        &self,
        user: &UserRecord,
        jti: String,
    ) -> Result<(AccessToken, DateTime<Utc>), TokenError> {
        let iat = Utc::now();
        let exp = iat + self.cfg.access_ttl;
        let claims = AccessClaims {
            sub: user.user_id.to_string(),
            jti,
            typ: TOKEN_TYPE_ACCESS.to_string(),
            iat: iat.timestamp(),
            nbf: iat.timestamp(),
            exp: exp.timestamp(),
            iss: self.cfg.issuer.clone(),
            aud: self.cfg.audience.clone(),
            role: user.role.as_str().to_string(),
            email: user.email.clone(),
        };
        Ok((AccessToken(self.encode_claims(&claims)?), exp))
    }

    async fn issue_refresh_token(
        &self,
        user_id: UserId,
        jti: String,
        family: String,
        remember_me: bool,
    ) -> Result<(RefreshToken, DateTime<Utc>), TokenError> {
        let ttl = if remember_me {
            self.cfg.remember_me_refresh_ttl
        } else {
            self.cfg.refresh_ttl
        };
        let iat = Utc::now();
        let exp = iat + ttl;
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti,
            tf: Some(family),
            typ: TOKEN_TYPE_REFRESH.to_string(),
            iat: iat.timestamp(),
            nbf: iat.timestamp(),
            exp: exp.timestamp(),
            iss: self.cfg.issuer.clone(),
            aud: self.cfg.audience.clone(),
            rm: remember_me,
        };
        Ok((RefreshToken(self.encode_claims(&claims)?), exp))
    }

    async fn issue_password_reset_token(&self, user_id: UserId) -> Result<String, TokenError> {
        let iat = Utc::now();
        let exp = iat + PASSWORD_RESET_TTL;
        let claims = AccessClaims {
            sub: user_id.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            typ: TOKEN_TYPE_PASSWORD_RESET.to_string(),
            iat: iat.timestamp(),
            nbf: iat.timestamp(),
            exp: exp.timestamp(),
            iss: self.cfg.issuer.clone(),
            aud: self.cfg.audience.clone(),
            role: String::new(),
            email: String::new(),
        };
        self.encode_claims(&claims)
    }

    async fn verify_access_token(&self, token: &str) -> Result<AccessTokenData, TokenError> {
        let claims: AccessClaims = self.decode_claims(token)?;
        if claims.typ != TOKEN_TYPE_ACCESS {
            return Err(TokenError::InvalidClaims(format!(
                "unexpected token type: {}",
                claims.typ
            )));
        }
        Ok(AccessTokenData {
            user_id: Self::parse_user_id(&claims.sub)?,
            jti: claims.jti,
            role: claims.role,
            email: claims.email,
            expires_at: Self::exp_datetime(claims.exp),
        })
    }

    async fn verify_refresh_token(&self, token: &str) -> Result<RefreshTokenData, TokenError> {
        let claims: RefreshClaims = self.decode_claims(token)?;
        if claims.typ != TOKEN_TYPE_REFRESH {
            return Err(TokenError::InvalidClaims(format!(
                "unexpected token type: {}",
                claims.typ
            )));
        }
        if claims.jti.is_empty() {
            return Err(TokenError::InvalidClaims("missing jti".into()));
        }
        Ok(RefreshTokenData {
            user_id: Self::parse_user_id(&claims.sub)?,
            jti: claims.jti,
            family: claims.tf,
            remember_me: claims.rm,
            expires_at: Self::exp_datetime(claims.exp),
        })
    }

    async fn verify_password_reset_token(&self, token: &str) -> Result<UserId, TokenError> {
        let claims: AccessClaims = self.decode_claims(token)?;
        if claims.typ != TOKEN_TYPE_PASSWORD_RESET {
            return Err(TokenError::InvalidClaims(format!(
                "unexpected token type: {}",
                claims.typ
            )));
        }
        Self::parse_user_id(&claims.sub)
    }
}

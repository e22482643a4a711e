use crate::config::AppConfig;
use crate::db::DbPool;
use crate::error_handler::ServiceError;
use crate::models::User;
use crate::schema::users;
use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use futures_util::future::{FutureExt, LocalBoxFuture};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims embedded in every bearer token issued at login.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub id: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(id: Uuid, email: String, ttl_days: i64) -> Result<Self, ServiceError> {
        let now = Utc::now();
        let expires_at = Duration::try_days(ttl_days)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                log::error!("Token lifetime of {} days is out of range", ttl_days);
                ServiceError::InternalServerError("Could not issue token.".to_string())
            })?;
        Ok(Claims {
            id,
            email,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        })
    }
}

pub fn issue_token(claims: &Claims, secret: &str) -> Result<String, ServiceError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        log::error!("Failed to sign token: {}", e);
        ServiceError::InternalServerError("Could not issue token.".to_string())
    })
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

// --- Mots de passe ---

pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, ServiceError> {
    let parsed = PasswordHash::new(stored_hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

// Argon2 est coûteux : on sort du thread du worker actix.
pub async fn hash_password_blocking(password: String) -> Result<String, ServiceError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| {
            log::error!("Password hashing task failed: {}", e);
            ServiceError::InternalServerError("Could not process credentials.".to_string())
        })?
}

pub async fn verify_password_blocking(
    password: String,
    stored_hash: String,
) -> Result<bool, ServiceError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| {
            log::error!("Password verification task failed: {}", e);
            ServiceError::InternalServerError("Could not process credentials.".to_string())
        })?
}

// --- Extracteur ---

fn bearer_token(req: &HttpRequest) -> Result<String, ServiceError> {
    let no_token = || ServiceError::Unauthorized("Unauthorized: no token provided.".to_string());

    let raw = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| {
            log::warn!("Authorization header was NOT found in request headers.");
            no_token()
        })?
        .to_str()
        .map_err(|_| {
            log::warn!("Authorization header is not valid UTF-8.");
            no_token()
        })?;

    match raw.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => {
            log::warn!("Authorization header does not carry a bearer token.");
            Err(no_token())
        }
    }
}

/// The caller resolved from a valid bearer token. Taking it as a handler
/// argument makes the route protected.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl From<User> for AuthenticatedUser {
    fn from(user: User) -> Self {
        AuthenticatedUser {
            id: user.id,
            username: user.username,
            email: user.email,
        }
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = ServiceError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = bearer_token(req);
        let config = req.app_data::<web::Data<AppConfig>>().cloned();
        let pool = req.app_data::<web::Data<DbPool>>().cloned();

        async move {
            let token = token?;
            let (config, pool) = match (config, pool) {
                (Some(config), Some(pool)) => (config, pool),
                _ => {
                    log::error!("AuthenticatedUser extractor used without config or pool app data");
                    return Err(ServiceError::InternalServerError(
                        "Authentication is not configured.".to_string(),
                    ));
                }
            };

            let claims = decode_token(&token, &config.jwt_secret)?;

            let mut conn = pool.get().await?;
            let user = users::table
                .find(claims.id)
                .select(User::as_select())
                .first::<User>(&mut conn)
                .await
                .optional()?;

            match user {
                Some(user) => {
                    log::debug!("Authenticated user {}", user.id);
                    Ok(AuthenticatedUser::from(user))
                }
                None => {
                    log::warn!("Token references missing user {}", claims.id);
                    Err(ServiceError::Unauthorized(
                        "Unauthorized: user not found.".to_string(),
                    ))
                }
            }
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    const SECRET: &str = "test-secret";

    #[test]
    fn token_round_trips_identity_claims() {
        let user_id = Uuid::new_v4();
        let claims = Claims::new(user_id, "alice@example.com".to_string(), 30).unwrap();
        let token = issue_token(&claims, SECRET).unwrap();

        let decoded = decode_token(&token, SECRET).unwrap();
        assert_eq!(decoded.id, user_id);
        assert_eq!(decoded.email, "alice@example.com");
        assert_eq!(decoded.exp - decoded.iat, 30 * 24 * 60 * 60);
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let claims = Claims::new(Uuid::new_v4(), "bob@example.com".to_string(), 30).unwrap();
        let token = issue_token(&claims, "other-secret").unwrap();
        assert!(matches!(
            decode_token(&token, SECRET),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn out_of_range_lifetime_is_an_error_not_a_panic() {
        let result = Claims::new(Uuid::new_v4(), "dave@example.com".to_string(), 1_000_000_000);
        assert!(matches!(result, Err(ServiceError::InternalServerError(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            id: Uuid::new_v4(),
            email: "carol@example.com".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = issue_token(&claims, SECRET).unwrap();
        assert!(matches!(
            decode_token(&token, SECRET),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn password_hash_is_salted_and_verifiable() {
        let first = hash_password("hunter2").unwrap();
        let second = hash_password("hunter2").unwrap();
        assert_ne!(first, "hunter2");
        assert_ne!(first, second);
        assert!(verify_password("hunter2", &first).unwrap());
        assert!(!verify_password("hunter3", &first).unwrap());
    }

    #[test]
    fn malformed_stored_hash_is_a_server_error() {
        assert!(matches!(
            verify_password("hunter2", "not-a-phc-string"),
            Err(ServiceError::InternalServerError(_))
        ));
    }

    #[actix_web::test]
    async fn blocking_helpers_hash_off_thread() {
        let hash = hash_password_blocking("s3cret".to_string()).await.unwrap();
        assert!(verify_password_blocking("s3cret".to_string(), hash)
            .await
            .unwrap());
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        let req = TestRequest::default().to_http_request();
        assert!(bearer_token(&req).is_err());

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic abc"))
            .to_http_request();
        assert!(bearer_token(&req).is_err());

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer   "))
            .to_http_request();
        assert!(bearer_token(&req).is_err());

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer abc.def.ghi"))
            .to_http_request();
        assert_eq!(bearer_token(&req).unwrap(), "abc.def.ghi");
    }
}

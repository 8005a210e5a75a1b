use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::{headers, TypedHeader};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cookie the web client stores its access token in
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// How long a token issued by [`create_token`] stays valid
pub const TOKEN_LIFETIME: Duration = Duration::days(7);

/// JWT payload shared with the identity service
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The user's id
    pub sub: Uuid,
    pub username: String,
    /// Expiry and issue instants, Unix seconds
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn issued_now(user_id: Uuid, username: impl Into<String>, lifetime: Duration) -> Self {
        let iat = Utc::now();
        Self {
            sub: user_id,
            username: username.into(),
            exp: (iat + lifetime).timestamp(),
            iat: iat.timestamp(),
        }
    }
}

fn sign(claims: &Claims, secret: &str) -> Result<String> {
    Ok(encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Issues a token. Login lives in the external identity service; this is used
/// by development tooling and tests.
pub fn create_token(user_id: Uuid, username: &str, secret: &str) -> Result<String> {
    sign(&Claims::issued_now(user_id, username, TOKEN_LIFETIME), secret)
}

/// Checks signature and expiry, and that the subject is present.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Extractor for authenticated requests.
///
/// Reads `Authorization: Bearer <token>` first and falls back to the
/// `accessToken` cookie. The user's profile is created on first sight.
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> std::result::Result<Self, Self::Rejection> {
        let token = match parts
            .extract::<TypedHeader<headers::Authorization<headers::authorization::Bearer>>>()
            .await
        {
            Ok(TypedHeader(bearer)) => bearer.token().to_string(),
            Err(_) => parts
                .extract::<TypedHeader<headers::Cookie>>()
                .await
                .ok()
                .and_then(|TypedHeader(cookie)| cookie.get(ACCESS_TOKEN_COOKIE).map(str::to_string))
                .ok_or(AppError::Unauthorized)?,
        };

        let claims = verify_token(&token, &state.config.jwt_secret)?;
        state
            .user_service
            .ensure_profile(claims.sub, &claims.username)
            .await?;

        Ok(AuthUser {
            user_id: claims.sub,
            username: claims.username,
        })
    }
}

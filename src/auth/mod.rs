use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Session lifetime: 12 hours.
const SESSION_TTL_HOURS: i64 = 12;

// ============================================================================
// Session Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SessionClaims {
    pub user_id: i64,
    pub email: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl SessionClaims {
    fn new(user_id: i64, email: String) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(SESSION_TTL_HOURS);

        SessionClaims {
            user_id,
            email,
            issued_at: now.timestamp(),
            expires_at: exp.timestamp(),
        }
    }
}

// ============================================================================
// Token Operations
// ============================================================================
//
// Token format: `<base64url(payload-json)>.<base64url(hmac-sha256(secret,
// base64url-payload))>`. The signature covers the encoded payload string, so
// verification never touches untrusted JSON before the MAC check passes.

fn sign_payload(encoded_payload: &str, secret: &str) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        tracing::error!("Failed to build session token MAC: {:?}", e);
        AppError::Internal
    })?;
    mac.update(encoded_payload.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

pub fn mint_token(user_id: i64, email: String, secret: &str) -> AppResult<String> {
    let claims = SessionClaims::new(user_id, email);
    mint_token_for_claims(&claims, secret)
}

fn mint_token_for_claims(claims: &SessionClaims, secret: &str) -> AppResult<String> {
    let payload = serde_json::to_string(claims).map_err(|e| {
        tracing::error!("Failed to serialize session claims: {:?}", e);
        AppError::Internal
    })?;
    let encoded = URL_SAFE_NO_PAD.encode(payload);
    let signature = sign_payload(&encoded, secret)?;
    Ok(format!("{encoded}.{signature}"))
}

/// Validate a session token: structure, signature, then expiry.
///
/// Expiry has zero skew tolerance — a token whose `expires_at` is strictly
/// in the past is rejected.
pub fn verify_token(token: &str, secret: &str) -> AppResult<SessionClaims> {
    let malformed = || AppError::Unauthenticated("Malformed session token".into());

    let (encoded_payload, encoded_signature) = token.split_once('.').ok_or_else(malformed)?;

    let signature = URL_SAFE_NO_PAD
        .decode(encoded_signature)
        .map_err(|_| malformed())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        tracing::error!("Failed to build session token MAC: {:?}", e);
        AppError::Internal
    })?;
    mac.update(encoded_payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AppError::Unauthenticated("Invalid token signature".into()))?;

    let payload = URL_SAFE_NO_PAD
        .decode(encoded_payload)
        .map_err(|_| malformed())?;
    let claims: SessionClaims = serde_json::from_slice(&payload).map_err(|_| malformed())?;

    if claims.expires_at < Utc::now().timestamp() {
        return Err(AppError::Unauthenticated("Session token expired".into()));
    }

    Ok(claims)
}

// ============================================================================
// Password Hashing
// ============================================================================

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, 12).map_err(|e| {
        tracing::error!("Failed to hash password: {:?}", e);
        AppError::Internal
    })
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    bcrypt::verify(password, hash).map_err(|e| {
        tracing::error!("Failed to verify password: {:?}", e);
        AppError::Internal
    })
}

// ============================================================================
// Auth Middleware
// ============================================================================

/// Authenticated user extracted from a valid bearer session token.
///
/// Fields are private: the only valid constructor is the `FromRequestParts`
/// impl, preventing callers from forging an `AuthUser` via struct literal.
pub struct AuthUser {
    user_id: i64,
    email: String,
}

impl AuthUser {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

type AuthRejection = (StatusCode, Json<serde_json::Value>);

fn auth_error(message: &str) -> AuthRejection {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| auth_error("Missing or invalid Authorization header"))?;

        let claims = verify_token(bearer.token(), &state.session_secret)
            .map_err(|_| auth_error("Invalid or expired token"))?;

        Ok(AuthUser {
            user_id: claims.user_id,
            email: claims.email,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret-min-32-characters-long!!";

    // ------------------------------------------------------------------------
    // mint_token / verify_token
    // ------------------------------------------------------------------------

    #[test]
    fn token_roundtrip_happy_path() {
        let token = mint_token(42, "alice@example.com".into(), TEST_SECRET)
            .expect("mint_token should succeed");

        let claims = verify_token(&token, TEST_SECRET)
            .expect("verify_token should succeed for a fresh token");

        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.email, "alice@example.com");
        assert!(claims.expires_at > claims.issued_at);
    }

    #[test]
    fn token_ttl_is_twelve_hours() {
        let token =
            mint_token(7, "bob@example.com".into(), TEST_SECRET).expect("mint_token should succeed");
        let claims = verify_token(&token, TEST_SECRET).expect("verify_token should succeed");

        assert_eq!(claims.expires_at - claims.issued_at, 12 * 3600);
    }

    #[test]
    fn verify_token_rejects_wrong_secret() {
        let token = mint_token(1, "carol@example.com".into(), TEST_SECRET)
            .expect("mint_token should succeed");

        let result = verify_token(&token, "completely-different-secret-value!!");
        assert!(
            result.is_err(),
            "verify_token must reject a token signed with a different secret"
        );
    }

    #[test]
    fn verify_token_rejects_expired() {
        let claims = SessionClaims {
            user_id: 1,
            email: "dave@example.com".into(),
            issued_at: 0,
            expires_at: 1, // 1970 — long past
        };
        let token =
            mint_token_for_claims(&claims, TEST_SECRET).expect("mint_token should succeed");

        let result = verify_token(&token, TEST_SECRET);
        assert!(result.is_err(), "verify_token must reject an expired token");
    }

    #[test]
    fn verify_token_rejects_tampered_payload() {
        let token =
            mint_token(1, "eve@example.com".into(), TEST_SECRET).expect("mint_token should succeed");

        // Swap the payload for a different (validly encoded) one; the
        // signature no longer matches.
        let (_, signature) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_string(&SessionClaims {
                user_id: 999,
                email: "eve@example.com".into(),
                issued_at: 0,
                expires_at: i64::MAX,
            })
            .unwrap(),
        );
        let forged = format!("{forged_payload}.{signature}");

        let result = verify_token(&forged, TEST_SECRET);
        assert!(
            result.is_err(),
            "verify_token must reject a token whose payload was replaced"
        );
    }

    #[test]
    fn verify_token_rejects_missing_separator() {
        let result = verify_token("no-dot-in-here", TEST_SECRET);
        assert!(result.is_err());
    }

    #[test]
    fn verify_token_rejects_invalid_base64() {
        let result = verify_token("!!!not-base64!!!.????", TEST_SECRET);
        assert!(result.is_err());
    }

    #[test]
    fn verify_token_rejects_empty_string() {
        let result = verify_token("", TEST_SECRET);
        assert!(result.is_err());
    }

    #[test]
    fn verify_token_rejects_non_json_payload() {
        let payload = URL_SAFE_NO_PAD.encode("this is not json");
        let signature = sign_payload(&payload, TEST_SECRET).unwrap();
        let token = format!("{payload}.{signature}");

        let result = verify_token(&token, TEST_SECRET);
        assert!(
            result.is_err(),
            "verify_token must reject a well-signed but non-JSON payload"
        );
    }

    // ------------------------------------------------------------------------
    // hash_password + verify_password roundtrip
    // ------------------------------------------------------------------------

    #[test]
    fn password_hash_verify_roundtrip_correct_password() {
        let password = "super-secure-password-123!";
        let hash = hash_password(password).expect("hash_password should succeed");

        let is_valid = verify_password(password, &hash)
            .expect("verify_password should not error on a valid hash");
        assert!(is_valid, "Correct password must verify against its hash");
    }

    #[test]
    fn password_hash_verify_roundtrip_wrong_password() {
        let password = "correct-password";
        let hash = hash_password(password).expect("hash_password should succeed");

        let is_valid = verify_password("wrong-password", &hash)
            .expect("verify_password should not error on a valid hash");
        assert!(
            !is_valid,
            "Wrong password must not verify against a different password's hash"
        );
    }
}

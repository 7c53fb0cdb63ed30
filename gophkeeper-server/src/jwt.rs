//! HS256 bearer tokens.
//!
//! Claims are `{exp, user_id}`. Tokens use base64url without padding and are
//! verified with `Hmac::verify_slice`.

use crate::error::ServerError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

/// Claims carried by every bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiry, Unix seconds.
    pub exp: i64,
    pub user_id: i64,
}

fn b64url_decode(s: &str) -> Result<Vec<u8>, ServerError> {
    URL_SAFE_NO_PAD
        .decode(s.as_bytes())
        .map_err(|e| ServerError::Auth(format!("Invalid base64url: {e}")))
}

fn mac_for(secret: &[u8]) -> Result<Hmac<Sha256>, ServerError> {
    Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| ServerError::Internal(format!("Invalid HMAC key: {e}")))
}

/// Encode claims as an HS256-signed JWT.
pub fn encode_hs256<T: Serialize>(secret: &[u8], claims: &T) -> Result<String, ServerError> {
    let header = JwtHeader {
        alg: "HS256".to_string(),
        typ: "JWT".to_string(),
    };

    let header_json = serde_json::to_vec(&header)
        .map_err(|e| ServerError::Internal(format!("Failed to serialize JWT header: {e}")))?;
    let claims_json = serde_json::to_vec(claims)
        .map_err(|e| ServerError::Internal(format!("Failed to serialize JWT claims: {e}")))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    let mut mac = mac_for(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

/// Decode an HS256 JWT and verify its signature. Does not check `exp`.
pub fn decode_hs256<T: DeserializeOwned>(secret: &[u8], token: &str) -> Result<T, ServerError> {
    let mut parts = token.trim().split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ServerError::Auth("Invalid JWT format".to_string()));
    };

    let header: JwtHeader = serde_json::from_slice(&b64url_decode(header_b64)?)
        .map_err(|e| ServerError::Auth(format!("Invalid JWT header JSON: {e}")))?;
    if header.alg != "HS256" || !header.typ.eq_ignore_ascii_case("JWT") {
        return Err(ServerError::Auth("Unsupported JWT header".to_string()));
    }

    let mut mac = mac_for(secret)?;
    mac.update(format!("{header_b64}.{payload_b64}").as_bytes());
    mac.verify_slice(&b64url_decode(sig_b64)?)
        .map_err(|_| ServerError::Auth("Invalid JWT signature".to_string()))?;

    serde_json::from_slice(&b64url_decode(payload_b64)?)
        .map_err(|e| ServerError::Auth(format!("Invalid JWT payload JSON: {e}")))
}

/// Issue a token for `user_id` valid for `ttl`.
pub fn issue(secret: &[u8], user_id: i64, ttl: Duration) -> Result<String, ServerError> {
    let claims = Claims {
        exp: Utc::now().timestamp() + ttl.as_secs() as i64,
        user_id,
    };
    encode_hs256(secret, &claims)
}

/// Verify a token and its expiry.
pub fn verify(secret: &[u8], token: &str) -> Result<Claims, ServerError> {
    let claims: Claims = decode_hs256(secret, token)?;
    if claims.exp <= Utc::now().timestamp() {
        return Err(ServerError::Auth("Token expired".to_string()));
    }
    Ok(claims)
}

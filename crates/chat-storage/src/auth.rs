use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or malformed authorization header")]
    MissingToken,
    #[error("token not recognized or revoked")]
    InvalidToken,
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: String,
    pub is_system: bool,
}

pub fn extract_bearer(authorization: Option<&str>) -> Result<&str, AuthError> {
    authorization
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)
}

pub async fn validate_token(pool: &PgPool, raw_token: &str) -> Result<TokenClaims, AuthError> {
    let hash = Sha256::digest(raw_token.as_bytes()).to_vec();
    let row = sqlx::query(
        r#"SELECT user_id, is_system FROM device_tokens
           WHERE token_hash = $1 AND revoked_at IS NULL"#,
    )
    .bind(&hash)
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or(AuthError::InvalidToken)?;
    Ok(TokenClaims {
        user_id: row.get("user_id"),
        is_system: row.get("is_system"),
    })
}

/// The fixed uid the system identity authenticates as.
pub const SYSTEM_USER_ID: &str = "system";

/// Mints a fresh system-identity token on every boot, revoking whichever one
/// was active before. Nothing durable needs the old value back -- only the
/// hash is ever stored, and the transfer pipeline only ever needs the token
/// this process is about to mint. Returns the raw bearer token.
pub async fn ensure_system_identity(pool: &PgPool) -> Result<String, AuthError> {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let raw_token = format!("sys_{}", hex::encode(raw));
    let hash = Sha256::digest(raw_token.as_bytes()).to_vec();

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE device_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL")
        .bind(SYSTEM_USER_ID)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO device_tokens (token_hash, user_id, is_system) VALUES ($1, $2, TRUE)")
        .bind(&hash)
        .bind(SYSTEM_USER_ID)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(raw_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_strips_prefix() {
        assert_eq!(extract_bearer(Some("Bearer abc123")).unwrap(), "abc123");
    }

    #[test]
    fn extract_bearer_rejects_missing_prefix() {
        assert!(extract_bearer(Some("abc123")).is_err());
    }

    #[test]
    fn extract_bearer_rejects_absent_header() {
        assert!(extract_bearer(None).is_err());
    }
}

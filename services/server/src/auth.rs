//! Single-use WebSocket tickets.
//!
//! The auth collaborator exchanges a user's session for a short-lived
//! ticket over REST; the client presents it once in the `/ws` upgrade
//! query. Only the SHA-256 hash is stored; validation consumes the
//! ticket atomically so a replayed upgrade fails.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::time::Duration;

fn hash_ticket(raw: &str) -> Vec<u8> {
    Sha256::digest(raw.as_bytes()).as_slice().to_vec()
}

/// Mints a ticket for `user_id` and returns the raw value. The raw
/// value exists only in this return; the row keeps the hash.
pub async fn issue_ticket(
    pool: &PgPool,
    user_id: i64,
    ttl: Duration,
) -> Result<String, sqlx::Error> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = URL_SAFE_NO_PAD.encode(bytes);

    sqlx::query(
        "INSERT INTO ws_tickets (token_hash, user_id, expires_at)
         VALUES ($1, $2, now() + $3::interval)",
    )
    .bind(hash_ticket(&raw))
    .bind(user_id)
    .bind(format!("{} seconds", ttl.as_secs()))
    .execute(pool)
    .await?;

    Ok(raw)
}

/// Consumes the ticket and returns the user it authenticates.
/// `None` for unknown, expired or already-used tickets (and on storage
/// errors; the upgrade is simply rejected).
pub async fn validate_ticket(pool: &PgPool, raw_ticket: &str) -> Option<i64> {
    let row = sqlx::query(
        "UPDATE ws_tickets SET used_at = now()
         WHERE token_hash = $1 AND used_at IS NULL AND expires_at > now()
         RETURNING user_id",
    )
    .bind(hash_ticket(raw_ticket))
    .fetch_optional(pool)
    .await
    .ok()??;
    Some(row.get("user_id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_hash_is_stable_and_input_sensitive() {
        assert_eq!(hash_ticket("abc"), hash_ticket("abc"));
        assert_ne!(hash_ticket("abc"), hash_ticket("abd"));
        assert_eq!(hash_ticket("abc").len(), 32);
    }
}

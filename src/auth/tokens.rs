//! Opaque access-token management.
//!
//! Token issuance lives with whatever front door mints credentials; the core
//! only needs the verification half: an opaque bearer token looked up in the
//! key-value store. `verify_access_token` is the token-verification
//! collaborator consumed once per gateway handshake and per REST request.

use serde::{Deserialize, Serialize};

use crate::store::{KeyValueStore, StoreError};

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

/// Access token TTL in seconds (1 hour).
pub const ACCESS_TOKEN_TTL_SECS: u64 = 3600;

/// Data stored alongside an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenData {
    pub user_id: String,
}

pub fn generate_access_token() -> String {
    generate_opaque_token("tok", 32)
}

pub async fn store_access_token(
    kv: &dyn KeyValueStore,
    token: &str,
    data: &TokenData,
) -> Result<(), StoreError> {
    let key = format!("auth:tok:{}", token);
    let value = serde_json::to_string(data)
        .map_err(|e| StoreError::Unavailable(format!("serialization: {e}")))?;
    kv.set_ex(&key, &value, ACCESS_TOKEN_TTL_SECS).await
}

/// Resolve a bearer token to its identity, or `None` if unknown or expired.
pub async fn verify_access_token(
    kv: &dyn KeyValueStore,
    token: &str,
) -> Result<Option<TokenData>, StoreError> {
    let key = format!("auth:tok:{}", token);
    match kv.get(&key).await? {
        Some(v) => {
            let data: TokenData = serde_json::from_str(&v)
                .map_err(|e| StoreError::Unavailable(format!("corrupt token data: {e}")))?;
            Ok(Some(data))
        }
        None => Ok(None),
    }
}

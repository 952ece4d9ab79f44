use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::domain::order::VerificationCode;

// ============================================================================
// Registration Codes
// ============================================================================
//
// Short-lived six-digit codes keyed by an identifier (email, phone).
// Consuming is an atomic check-and-delete: the first matching attempt wins,
// a wrong code leaves the stored code untouched, an expired code never
// matches.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CodeStoreError {
    #[error("Code store backend error: {0}")]
    Backend(String),

    #[error("TTL must be positive, got {0}s")]
    InvalidTtl(i64),
}

#[async_trait]
pub trait RegistrationCodeStore: Send + Sync {
    /// Issue a fresh code for `key`, replacing any earlier one
    async fn issue(&self, key: &str, ttl: Duration) -> Result<VerificationCode, CodeStoreError>;

    /// `true` exactly once for the live, matching code
    async fn consume(&self, key: &str, code: &str) -> Result<bool, CodeStoreError>;
}

fn ttl_seconds(ttl: Duration) -> Result<u64, CodeStoreError> {
    let seconds = ttl.num_seconds();
    if seconds <= 0 {
        return Err(CodeStoreError::InvalidTtl(seconds));
    }
    Ok(seconds as u64)
}

// ============================================================================
// In-Memory Store
// ============================================================================

struct IssuedCode {
    code: VerificationCode,
    expires_at: DateTime<Utc>,
}

/// Single-process store; expiry follows the injected clock
pub struct InMemoryCodeStore {
    codes: Mutex<HashMap<String, IssuedCode>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCodeStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            codes: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl RegistrationCodeStore for InMemoryCodeStore {
    async fn issue(&self, key: &str, ttl: Duration) -> Result<VerificationCode, CodeStoreError> {
        ttl_seconds(ttl)?;
        let code = VerificationCode::generate();
        let now = self.clock.now();
        let expires_at = now + ttl;

        let mut codes = self.codes.lock().await;
        // Drop codes that expired unconsumed
        codes.retain(|_, issued| issued.expires_at > now);
        codes.insert(
            key.to_string(),
            IssuedCode {
                code: code.clone(),
                expires_at,
            },
        );

        Ok(code)
    }

    async fn consume(&self, key: &str, code: &str) -> Result<bool, CodeStoreError> {
        let now = self.clock.now();
        let mut codes = self.codes.lock().await;

        let Some(issued) = codes.get(key) else {
            return Ok(false);
        };

        if issued.expires_at <= now {
            codes.remove(key);
            return Ok(false);
        }
        if !issued.code.matches(code) {
            return Ok(false);
        }

        codes.remove(key);
        Ok(true)
    }
}

// ============================================================================
// Redis Store
// ============================================================================

const CONSUME_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        redis.call('DEL', KEYS[1])
        return 1
    end
    return 0
"#;

/// Shared across instances; TTL enforced by Redis `SET EX`
#[derive(Clone)]
pub struct RedisCodeStore {
    connection: MultiplexedConnection,
    consume_script: redis::Script,
}

impl RedisCodeStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CodeStoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| CodeStoreError::Backend(format!("Failed to create Redis client: {}", e)))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CodeStoreError::Backend(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            connection,
            consume_script: redis::Script::new(CONSUME_SCRIPT),
        })
    }

    fn code_key(key: &str) -> String {
        format!("registration_code:{}", key)
    }
}

#[async_trait]
impl RegistrationCodeStore for RedisCodeStore {
    async fn issue(&self, key: &str, ttl: Duration) -> Result<VerificationCode, CodeStoreError> {
        let seconds = ttl_seconds(ttl)?;
        let code = VerificationCode::generate();
        let mut conn = self.connection.clone();

        let _: () = conn
            .set_ex(Self::code_key(key), code.as_str(), seconds)
            .await
            .map_err(|e| CodeStoreError::Backend(format!("Failed to store code: {}", e)))?;

        tracing::debug!(key = %key, ttl_seconds = seconds, "Issued registration code");
        Ok(code)
    }

    async fn consume(&self, key: &str, code: &str) -> Result<bool, CodeStoreError> {
        let mut conn = self.connection.clone();

        let deleted: i32 = self
            .consume_script
            .key(Self::code_key(key))
            .arg(code.trim())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CodeStoreError::Backend(format!("Failed to consume code: {}", e)))?;

        Ok(deleted == 1)
    }
}

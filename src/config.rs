//! Runtime configuration.
//!
//! DESIGN
//! ======
//! One immutable `HubConfig` is built from environment variables at process
//! start and passed by `Arc` into the registry and every hub it spawns.
//! Nothing reads the environment after startup.

use std::time::Duration;

const DEFAULT_MAX_ENVELOPE_BYTES: usize = 1024;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 512;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_OUTBOUND_BUFFER: usize = 256;
const DEFAULT_TYPING_THROTTLE_MS: u64 = 3000;
const DEFAULT_EVICT_GRACE_SECS: u64 = 10;
const DEFAULT_FLUSH_RETRIES: usize = 3;
const DEFAULT_FLUSH_RETRY_BASE_MS: u64 = 20;
const DEFAULT_BOARD_TTL_HOURS: u64 = 24;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Immutable hub limits and timings, loaded once from the environment.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Ceiling for a whole serialized inbound envelope, checked before decode.
    pub max_envelope_bytes: usize,
    /// Ceiling for a message body in UTF-8 bytes.
    pub max_message_bytes: usize,
    /// A connection with no inbound traffic for this long is closed.
    pub idle_timeout: Duration,
    /// Bounded per-connection outbound queue. A full queue drops the connection.
    pub outbound_buffer: usize,
    /// Minimum gap between typing notifications relayed per connection.
    pub typing_throttle: Duration,
    /// How long an idle hub survives after its last connection leaves.
    pub evict_grace: Duration,
    /// Snapshot flush attempts before the hub degrades to memory-only.
    pub flush_retries: usize,
    /// Base delay for exponential flush retry back-off.
    pub flush_retry_base: Duration,
    /// Auto-delete deadline assigned to newly created boards.
    pub board_ttl: Duration,
    pub db_max_connections: u32,
}

impl HubConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_envelope_bytes: env_parse("MAX_ENVELOPE_BYTES", DEFAULT_MAX_ENVELOPE_BYTES),
            max_message_bytes: env_parse("MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES),
            idle_timeout: Duration::from_secs(env_parse("IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS)),
            outbound_buffer: env_parse("OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER),
            typing_throttle: Duration::from_millis(env_parse("TYPING_THROTTLE_MS", DEFAULT_TYPING_THROTTLE_MS)),
            evict_grace: Duration::from_secs(env_parse("EVICT_GRACE_SECS", DEFAULT_EVICT_GRACE_SECS)),
            flush_retries: env_parse("FLUSH_RETRIES", DEFAULT_FLUSH_RETRIES),
            flush_retry_base: Duration::from_millis(env_parse("FLUSH_RETRY_BASE_MS", DEFAULT_FLUSH_RETRY_BASE_MS)),
            board_ttl: Duration::from_secs(env_parse("BOARD_TTL_HOURS", DEFAULT_BOARD_TTL_HOURS) * 3600),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_envelope_bytes: DEFAULT_MAX_ENVELOPE_BYTES,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            typing_throttle: Duration::from_millis(DEFAULT_TYPING_THROTTLE_MS),
            evict_grace: Duration::from_secs(DEFAULT_EVICT_GRACE_SECS),
            flush_retries: DEFAULT_FLUSH_RETRIES,
            flush_retry_base: Duration::from_millis(DEFAULT_FLUSH_RETRY_BASE_MS),
            board_ttl: Duration::from_secs(DEFAULT_BOARD_TTL_HOURS * 3600),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

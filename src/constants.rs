//! Upstream endpoints, fixed headers and timing knobs.

/// Base URL of the JetBrains AI platform. Overridable via `GRAZIE_API_BASE`
/// so integration tests can point at a local stub.
pub const GRAZIE_API_BASE: &str = "https://api.jetbrains.ai";

pub const CHAT_STREAM_PATH: &str = "/user/v5/llm/chat/stream/v8";
pub const JWT_REFRESH_PATH: &str = "/auth/jetbrains-jwt/provide-access/license/v2";
pub const QUOTA_PATH: &str = "/user/v5/quota/get";

/// The upstream only accepts its own IDE client UA.
pub const GRAZIE_USER_AGENT: &str = "ktor-client";
pub const GRAZIE_AGENT_DESCRIPTOR: &str =
    r#"{"name":"aia:pycharm","version":"251.26094.80.13:251.26094.141"}"#;
pub const GRAZIE_JWT_HEADER: &str = "grazie-authenticate-jwt";

pub const CHAT_PROMPT_TAG: &str = "ij.chat.request.new-chat-on-start";

/// Upstream signals an out-of-quota account with this non-standard status.
pub const STATUS_OUT_OF_QUOTA: u16 = 477;

/// Refresh the access token when its `exp` is closer than this.
pub const JWT_REFRESH_WINDOW_SECS: i64 = 12 * 60 * 60;
/// Re-probe an account's quota when the last probe is older than this.
pub const QUOTA_CHECK_INTERVAL_SECS: i64 = 60 * 60;

/// How long `AccountPool::acquire` waits for a free account.
pub const ACQUIRE_TIMEOUT_SECS: u64 = 60;
/// Generous end-to-end budget for one upstream completion.
pub const UPSTREAM_TIMEOUT_SECS: u64 = 300;

pub const CACHE_CAPACITY: usize = 1000;
pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 5 * 60;
pub const MESSAGE_CACHE_TTL_SECS: u64 = 10 * 60;
pub const TOOLS_CACHE_TTL_SECS: u64 = 30 * 60;

pub const STATS_HISTORY_LIMIT: usize = 1000;
pub const STATS_SAVE_INTERVAL_SECS: u64 = 5 * 60;
pub const LOG_RING_CAPACITY: usize = 500;

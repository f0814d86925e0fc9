/// Application name
pub const APP_NAME: &str = "meshchat";

/// Length of the random token used for peer ids and message ids
pub const ID_TOKEN_LEN: usize = 9;

/// Number of most-recent peer ids kept in the shared roster
pub const ROSTER_CAPACITY: usize = 10;

/// Number of messages kept in the history buffer and sent on replay
pub const HISTORY_CAPACITY: usize = 50;

/// Number of message ids remembered for duplicate suppression
pub const SEEN_CAPACITY: usize = 200;

/// Locally originated chat messages admitted per rate-limit window
pub const RATE_LIMIT_MAX_MESSAGES: usize = 5;

/// Rate-limit sliding window in milliseconds
pub const RATE_LIMIT_WINDOW_MS: u64 = 10_000;

/// Signaling attachment attempts before a join fails
pub const MAX_JOIN_ATTEMPTS: u32 = 3;

/// First retry delay; also the fixed delay before a signaling reconnect
pub const RETRY_BASE_DELAY_MS: u64 = 2_000;

/// Backoff multiplier between consecutive join attempts
pub const RETRY_MULTIPLIER: u32 = 2;

/// Upper bound on a single backoff delay
pub const RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Time allowed for one signaling attachment attempt
pub const CONNECT_TIMEOUT_MS: u64 = 15_000;

/// Shared store keys
pub const ROSTER_KEY: &str = "chat_room_peers";
pub const SAVED_EMAIL_KEY: &str = "chat_user_email";
pub const SAVED_USERNAME_KEY: &str = "chat_user_username";

/// Username length bounds (inclusive)
pub const USERNAME_MIN_LEN: usize = 2;
pub const USERNAME_MAX_LEN: usize = 20;

//! Cache key definitions

/// Prefix of user-by-master-token entries
pub const USER_TOKEN_PREFIX: &str = "user:token:";

/// Prefix of daemon-by-token entries
pub const DAEMON_TOKEN_PREFIX: &str = "daemon:token:";

/// Wildcard invalidation clearing every key
pub const ALL_KEYS: &str = "*";

pub fn user_by_token(token: &str) -> String {
    format!("{}{}", USER_TOKEN_PREFIX, token)
}

pub fn daemon_by_token(token: &str) -> String {
    format!("{}{}", DAEMON_TOKEN_PREFIX, token)
}

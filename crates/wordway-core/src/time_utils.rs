use chrono::{DateTime, Utc};

use crate::models::User;

/// Current time as whole seconds since the Unix epoch.
///
/// This is the clock session tokens are compared against.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// `true` when `user`'s token has expired as of right now.
pub fn is_token_expired(user: &User) -> bool {
    user.is_token_expired_at(now_timestamp())
}

/// Token expiry as a UTC datetime, for log output.
///
/// Returns `None` when `expiresIn` is outside chrono's representable range.
pub fn token_expiry(user: &User) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(user.jwt_token.expires_at_secs()?, 0)
}

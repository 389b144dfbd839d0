use chrono::{DateTime, Utc};

use crate::auth::Session;
use crate::oauth::TokenResponse;

pub trait IsExpired {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool;

    fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl IsExpired for TokenResponse {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl IsExpired for Session {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.token.is_expired_at(now)
    }
}

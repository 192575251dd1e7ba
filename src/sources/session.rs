//! Provider session state
//!
//! Portal providers hold a handshake-issued bearer token with a nominal
//! lifetime; playlist and Xtream providers embed credentials per request and
//! use a stateless session that is always valid.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Nominal lifetime assumed for portal tokens; portals do not advertise one
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// Tokens are treated as expired this long before their nominal lifetime,
/// so a request never races an expiry mid-flight.
pub const EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Live authentication state for one provider
#[derive(Debug, Clone)]
pub struct ProviderSession {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    refresh_count: u32,
    stateless: bool,
}

impl ProviderSession {
    /// Session for providers whose credentials ride on every request
    pub fn stateless() -> Self {
        Self {
            token: None,
            expires_at: None,
            refresh_count: 0,
            stateless: true,
        }
    }

    /// Unauthenticated portal session; `is_valid` is false until a token
    /// is installed by a handshake.
    pub fn portal() -> Self {
        Self {
            token: None,
            expires_at: None,
            refresh_count: 0,
            stateless: false,
        }
    }

    /// Fast local validity check: pure expiry comparison, never I/O
    pub fn is_valid(&self) -> bool {
        if self.stateless {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => {
                let skew = ChronoDuration::from_std(EXPIRY_SKEW).unwrap_or_default();
                Utc::now() + skew < expires_at
            }
            None => false,
        }
    }

    /// Install a freshly issued token with its nominal lifetime
    pub fn install_token(&mut self, token: String, lifetime: Duration) {
        let lifetime = ChronoDuration::from_std(lifetime).unwrap_or_default();
        self.token = Some(token);
        self.expires_at = Some(Utc::now() + lifetime);
        self.refresh_count += 1;
    }

    /// Drop the current token, forcing the next request to reauthenticate
    pub fn invalidate(&mut self) {
        self.token = None;
        self.expires_at = None;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// How many times a token has been issued for this session
    pub fn refresh_count(&self) -> u32 {
        self.refresh_count
    }
}

use chrono::Duration;

use crate::clock::Timestamp;
use crate::contact::domain::AuthToken;

/// Holds at most one bearer token. Not persisted: a restart always resolves
/// again before touching the backend.
#[derive(Debug, Clone)]
pub struct AuthTokenCache {
    token: Option<AuthToken>,
    safety_margin: Duration,
}

impl AuthTokenCache {
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            token: None,
            safety_margin,
        }
    }

    pub fn set(&mut self, token: AuthToken) {
        log::debug!(
            "[TOKEN] cached token for {} until {}",
            token.identifier,
            token.expiration
        );
        self.token = Some(token);
    }

    /// Returns the token if it belongs to `contact_id` and has at least the
    /// safety margin left.
    pub fn valid_for(&self, contact_id: Option<&str>, now: Timestamp) -> Option<&AuthToken> {
        let token = self.token.as_ref()?;
        let contact_id = contact_id?;
        if token.identifier != contact_id {
            return None;
        }
        if now + self.safety_margin > token.expiration {
            return None;
        }
        Some(token)
    }

    /// Drops the cached token if it is `token`.
    pub fn expire_if_matches(&mut self, token: &str) {
        if self.token.as_ref().is_some_and(|t| t.token == token) {
            log::debug!("[TOKEN] expiring cached token");
            self.token = None;
        }
    }
}

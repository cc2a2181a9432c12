//! Per-token authenticated sessions and round-robin selection across them.

use crate::rest::{RestClient, RestError};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no source token survived validation")]
    NoValidTokens,
}

/// One validated session: a REST client plus the token it was built from
/// (kept for the gateway loop's IDENTIFY step).
pub struct Session {
    pub token: String,
    pub rest: RestClient,
    pub username: String,
}

/// Validates every configured token, discarding any that fail. Order of the
/// survivors matches the order of the input tokens that passed.
pub async fn init_sessions(tokens: &[String]) -> Result<Vec<Session>, SessionError> {
    let mut sessions = Vec::new();
    for token in tokens {
        let rest = match RestClient::new(token) {
            Ok(rest) => rest,
            Err(err) => {
                warn!(error = %err, "discarding token: failed to build http client");
                continue;
            }
        };

        let user = match rest.validate().await {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "discarding token: validation failed");
                continue;
            }
        };

        if let Err(err) = rest.my_guilds().await {
            warn!(error = %err, username = %user.username, "discarding token: guild fetch failed");
            continue;
        }

        info!(username = %user.username, "source session established");
        sessions.push(Session {
            token: token.clone(),
            rest,
            username: user.username,
        });
    }

    if sessions.is_empty() {
        return Err(SessionError::NoValidTokens);
    }
    Ok(sessions)
}

/// Round-robin cursor over a fixed list of sessions.
pub struct SessionRotation {
    cursor: AtomicUsize,
}

impl SessionRotation {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next_index(&self, len: usize) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl Default for SessionRotation {
    fn default() -> Self {
        Self::new()
    }
}

pub type SessionResult<T> = Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_cycles_through_all_indices() {
        let rotation = SessionRotation::new();
        let seen: Vec<usize> = (0..6).map(|_| rotation.next_index(3)).collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }
}

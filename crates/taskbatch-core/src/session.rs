use std::fmt;

use tracing::{debug, warn};

use crate::config::Config;

pub const TOKEN_ENV_VAR: &str = "TASKBATCH_TOKEN";

/// Bearer credentials for one interactive session. Resolved once at
/// startup and handed to whatever needs to talk to the server.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
}

impl Session {
    /// Returns `None` for blank tokens.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            None
        } else {
            Some(Self { token })
        }
    }

    /// Precedence: explicit flag, then `TASKBATCH_TOKEN`, then the
    /// `auth.token` config key.
    #[tracing::instrument(skip_all)]
    pub fn resolve(cfg: &Config, flag_token: Option<String>) -> Option<Self> {
        if let Some(session) = flag_token.and_then(Self::new) {
            debug!(source = "flag", "resolved session token");
            return Some(session);
        }

        if let Some(session) = std::env::var(TOKEN_ENV_VAR).ok().and_then(Self::new) {
            debug!(source = TOKEN_ENV_VAR, "resolved session token");
            return Some(session);
        }

        if let Some(session) = cfg.get("auth.token").and_then(Self::new) {
            debug!(source = "config", "resolved session token");
            return Some(session);
        }

        warn!("no session token configured; remote operations are disabled");
        None
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .finish()
    }
}

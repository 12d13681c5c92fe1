//! Credentials - login material held in memory for re-authentication
//!
//! Credentials are created once at login and kept by the pool so dropped
//! sessions can be rebuilt. They are never persisted and never logged.

use std::fmt;

use zeroize::Zeroizing;

/// User credentials for the object service.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
    hostname: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            hostname: hostname.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        self.password.as_str()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Copy with a new username/password, keeping the host.
    pub fn with_login(&self, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(username, password, self.hostname.clone())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("hostname", &self.hostname)
            .finish()
    }
}

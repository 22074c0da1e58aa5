//! Error types for directory operations.
//!
//! ## Security Note
//!
//! Authentication failures must be indistinguishable to an untrusted
//! caller. `UserNotFound` and `InvalidCredentials` are separate variants
//! so the engine can reason about them internally, but both render as the
//! same generic message. Raw server error detail is only ever logged at
//! debug level, never embedded in a returned error.

use thiserror::Error;

/// Errors produced by the directory engine.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Malformed or contradictory configuration. Fatal, never retried.
    #[error("directory configuration error: {0}")]
    Configuration(String),

    /// TLS trust or identity material could not be loaded or applied.
    #[error("directory TLS error: {0}")]
    Tls(String),

    /// Every configured endpoint failed to open and bind.
    #[error("unable to connect to any directory server of {attempted:?}")]
    NoReachableServer {
        /// Endpoints that were attempted, in configured order.
        attempted: Vec<String>,
        /// The last underlying failure, if any endpoint produced one.
        #[source]
        source: Option<Box<DirectoryError>>,
    },

    /// The principal could not be located in the directory.
    ///
    /// Renders identically to [`DirectoryError::InvalidCredentials`].
    #[error("authentication failed")]
    UserNotFound,

    /// The credential-verification bind was rejected.
    #[error("authentication failed")]
    InvalidCredentials,

    /// Unrecoverable directory failure. During role resolution the caller
    /// must treat this as a denial (fail closed).
    #[error("directory operation failed: {0}")]
    Directory(String),
}

impl DirectoryError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a TLS error.
    #[must_use]
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Creates a directory operation error.
    #[must_use]
    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    /// Checks whether this error is a uniform authentication failure.
    ///
    /// Both "user absent" and "wrong secret" answer true; callers must not
    /// branch on which of the two occurred when shaping a response.
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::UserNotFound | Self::InvalidCredentials)
    }

    /// Checks whether this error aborts an authorization request.
    ///
    /// Role resolution fails closed: any of these means "deny", never
    /// "proceed with no roles".
    #[must_use]
    pub const fn is_fatal_for_authorization(&self) -> bool {
        matches!(
            self,
            Self::Directory(_)
                | Self::NoReachableServer { .. }
                | Self::UserNotFound
                | Self::Configuration(_)
                | Self::Tls(_)
        )
    }
}

impl From<ldap3::LdapError> for DirectoryError {
    fn from(err: ldap3::LdapError) -> Self {
        Self::Directory(err.to_string())
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failures_render_identically() {
        assert_eq!(
            DirectoryError::UserNotFound.to_string(),
            DirectoryError::InvalidCredentials.to_string()
        );
    }

    #[test]
    fn authentication_failure_predicate() {
        assert!(DirectoryError::UserNotFound.is_authentication_failure());
        assert!(DirectoryError::InvalidCredentials.is_authentication_failure());
        assert!(!DirectoryError::config("x").is_authentication_failure());
    }

    #[test]
    fn authorization_fails_closed() {
        assert!(DirectoryError::directory("boom").is_fatal_for_authorization());
        assert!(DirectoryError::NoReachableServer {
            attempted: vec!["dc1:636".to_string()],
            source: None,
        }
        .is_fatal_for_authorization());
        assert!(!DirectoryError::InvalidCredentials.is_fatal_for_authorization());
    }

    #[test]
    fn no_reachable_server_lists_endpoints() {
        let err = DirectoryError::NoReachableServer {
            attempted: vec!["dc1:636".to_string(), "dc2:636".to_string()],
            source: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("dc1:636"));
        assert!(msg.contains("dc2:636"));
    }
}

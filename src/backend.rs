//! The directory backend facade.
//!
//! One [`DirectoryBackend`] owns the validated configuration and the
//! connection pool and exposes the engine's operations: credential
//! authentication, role resolution, existence checks and shutdown.
//!
//! ## Security
//!
//! `authenticate` zeroizes the caller's secret buffer on every exit path,
//! success or failure. No connection that carried a credential-
//! verification bind is ever shared: with pooling enabled the bind runs
//! on a private session, without pooling the whole authentication runs on
//! a throwaway session, closed either way.

use std::sync::Arc;

use tracing::instrument;
use zeroize::Zeroize;

use crate::authn;
use crate::authz;
use crate::config::DirectoryConfig;
use crate::connect::ConnectionPool;
use crate::error::DirectoryResult;
use crate::identity::DirectoryUser;
use crate::search::resolve_user;

/// Directory-backed authentication and authorization engine.
pub struct DirectoryBackend {
    config: Arc<DirectoryConfig>,
    pool: ConnectionPool,
}

impl DirectoryBackend {
    /// Validates the configuration and builds the backend.
    pub fn new(config: DirectoryConfig) -> DirectoryResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = ConnectionPool::new(Arc::clone(&config))?;
        Ok(Self { config, pool })
    }

    /// The backend's configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Authenticates `username` with `secret`.
    ///
    /// The secret buffer is zeroized before this returns, regardless of
    /// outcome. The returned identity carries no roles; call
    /// [`Self::authorize`] to resolve them.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn authenticate(
        &self,
        username: &str,
        secret: &mut [u8],
    ) -> DirectoryResult<DirectoryUser> {
        let result = self.authenticate_inner(username, secret).await;
        secret.zeroize();
        result
    }

    async fn authenticate_inner(
        &self,
        username: &str,
        secret: &[u8],
    ) -> DirectoryResult<DirectoryUser> {
        if self.config.pool_enabled {
            // The verification bind gets a private session so the pooled
            // lookup session is never left bound as an end user.
            let mut lookup = self.pool.acquire().await?;
            let mut verifier = self.pool.connector().connect().await?;
            let result =
                authn::authenticate(&mut lookup, &mut verifier, &self.config, username, secret)
                    .await;
            verifier.close().await;
            result
        } else {
            let mut session = self.pool.connector().connect().await?;
            let result =
                authn::authenticate_single(&mut session, &self.config, username, secret).await;
            session.close().await;
            result
        }
    }

    /// Resolves roles into an already-authenticated identity.
    #[instrument(skip_all, fields(username = %user.username()))]
    pub async fn authorize(&self, user: &mut DirectoryUser) -> DirectoryResult<()> {
        let mut session = self.pool.acquire().await?;
        authz::fill_roles(&mut session, &self.config, user).await
    }

    /// Resolves roles for a bare principal name, without authenticating.
    pub async fn authorize_username(&self, username: &str) -> DirectoryResult<DirectoryUser> {
        let mut user = DirectoryUser::without_entry(username);
        self.authorize(&mut user).await?;
        Ok(user)
    }

    /// Checks whether an entry exists for `username`.
    pub async fn exists(&self, username: &str) -> DirectoryResult<bool> {
        let mut session = self.pool.acquire().await?;
        let entry = resolve_user(&mut session, &self.config, username).await?;
        Ok(entry.is_some())
    }

    /// Closes the connection pool. Idle sessions are unbound and further
    /// operations fail.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

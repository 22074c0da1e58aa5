//! Connection establishment, service binds and pooling.
//!
//! Hosts are tried strictly in configured order; the first endpoint that
//! both connects and completes its service bind wins. A failed endpoint is
//! closed and logged, and the next one is tried. Only when the whole list
//! is exhausted does the caller see an error.
//!
//! ## Security
//!
//! Credential-verification binds never ride on a pooled connection; the
//! authenticator opens a private session for them and discards it
//! afterwards, so no shared handle is ever left bound as an end user.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::DirectoryConfig;
use crate::error::{DirectoryError, DirectoryResult};
use crate::search::{DirectoryOps, LdapEntry};
use crate::tls::build_tls_connector;

/// How the service connection authenticates itself to the server.
#[derive(Debug, PartialEq, Eq)]
pub enum BindMethod<'a> {
    /// No credentials at all.
    Anonymous,
    /// Simple bind with a service-account DN and password.
    Simple {
        /// Service-account DN.
        dn: &'a str,
        /// Service-account password.
        password: &'a str,
    },
    /// SASL EXTERNAL bind backed by the TLS client certificate.
    External,
}

/// Selects the service bind method.
///
/// Explicit simple-bind credentials take precedence over client-certificate
/// authentication; with neither, the connection stays anonymous. A bind DN
/// with an empty password is ignored rather than sent, since many servers
/// treat that as an unauthenticated bind that silently succeeds.
#[must_use]
pub fn select_bind_method(config: &DirectoryConfig) -> BindMethod<'_> {
    match (&config.bind_dn, &config.bind_password) {
        (Some(dn), Some(password)) if !password.is_empty() => BindMethod::Simple { dn, password },
        (Some(dn), _) => {
            warn!(bind_dn = %dn, "bind_dn is set without a password and will not be used");
            if config.enable_client_auth {
                BindMethod::External
            } else {
                BindMethod::Anonymous
            }
        }
        (None, _) if config.enable_client_auth => BindMethod::External,
        (None, _) => BindMethod::Anonymous,
    }
}

fn result_code(err: &ldap3::LdapError) -> Option<u32> {
    match err {
        ldap3::LdapError::LdapResult { result } => Some(result.rc),
        _ => None,
    }
}

const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Opens service sessions against the configured host list.
pub struct DirectoryConnector {
    config: Arc<DirectoryConfig>,
    tls: Option<native_tls::TlsConnector>,
}

impl DirectoryConnector {
    /// Creates a connector, building the TLS connector up front when any
    /// TLS mode is enabled.
    pub fn new(config: Arc<DirectoryConfig>) -> DirectoryResult<Self> {
        let tls = if config.wants_tls() {
            Some(build_tls_connector(&config)?)
        } else {
            None
        };
        Ok(Self { config, tls })
    }

    /// Derives the connection URL for one configured host.
    #[must_use]
    pub fn endpoint_url(&self, host: &str) -> String {
        let (scheme, default_port) = if self.config.enable_ssl {
            ("ldaps", 636)
        } else {
            ("ldap", 389)
        };
        if host.contains(':') {
            format!("{scheme}://{host}")
        } else {
            format!("{scheme}://{host}:{default_port}")
        }
    }

    /// Connects and service-binds, failing over across the host list.
    ///
    /// ## Errors
    ///
    /// [`DirectoryError::NoReachableServer`] when every endpoint failed;
    /// it carries the attempted endpoints in order and the last failure.
    pub async fn connect(&self) -> DirectoryResult<DirectorySession> {
        let mut attempted = Vec::with_capacity(self.config.hosts.len());
        let mut last_error = None;

        for host in &self.config.hosts {
            let url = self.endpoint_url(host);
            match self.connect_one(&url).await {
                Ok(session) => {
                    debug!(endpoint = %url, "directory session established");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(endpoint = %url, error = %e, "directory endpoint failed, trying next");
                    attempted.push(url);
                    last_error = Some(e);
                }
            }
        }

        Err(DirectoryError::NoReachableServer {
            attempted,
            source: last_error.map(Box::new),
        })
    }

    async fn connect_one(&self, url: &str) -> DirectoryResult<DirectorySession> {
        let mut settings = LdapConnSettings::new();
        if let Some(timeout) = self.config.connect_timeout() {
            settings = settings.set_conn_timeout(timeout);
        }
        if self.config.enable_start_tls {
            settings = settings.set_starttls(true);
        }
        if let Some(tls) = &self.tls {
            settings = settings.set_connector(tls.clone());
        }

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, url).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "directory connection driver error");
            }
        });

        if let Err(e) = self.service_bind(&mut ldap).await {
            let _ = ldap.unbind().await;
            return Err(e);
        }

        Ok(DirectorySession {
            ldap,
            response_timeout: self.config.response_timeout(),
        })
    }

    async fn service_bind(&self, ldap: &mut Ldap) -> DirectoryResult<()> {
        let ldap = match self.config.response_timeout() {
            Some(timeout) => ldap.with_timeout(timeout),
            None => ldap,
        };
        match select_bind_method(&self.config) {
            BindMethod::Anonymous => {
                debug!("anonymous service bind");
                ldap.simple_bind("", "").await?.success()?;
            }
            BindMethod::Simple { dn, password } => {
                debug!(bind_dn = %dn, "simple service bind");
                ldap.simple_bind(dn, password).await?.success()?;
            }
            BindMethod::External => {
                debug!("external SASL service bind");
                ldap.sasl_external_bind().await?.success()?;
            }
        }
        Ok(())
    }
}

/// A connected, service-bound directory session.
pub struct DirectorySession {
    ldap: Ldap,
    response_timeout: Option<Duration>,
}

impl DirectorySession {
    fn op(&mut self) -> &mut Ldap {
        if let Some(timeout) = self.response_timeout {
            return self.ldap.with_timeout(timeout);
        }
        &mut self.ldap
    }

    /// Unbinds and closes the session. Errors are ignored; the transport
    /// is going away either way.
    pub async fn close(mut self) {
        let _ = self.ldap.unbind().await;
    }
}

impl DirectoryOps for DirectorySession {
    async fn lookup(&mut self, dn: &str) -> DirectoryResult<Option<LdapEntry>> {
        let result = self
            .op()
            .search(dn, Scope::Base, "(objectClass=*)", vec!["*"])
            .await?
            .success();

        match result {
            Ok((entries, _)) => Ok(entries
                .into_iter()
                .next()
                .map(|e| LdapEntry::from_search_entry(SearchEntry::construct(e)))),
            Err(e) if result_code(&e) == Some(RC_NO_SUCH_OBJECT) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn search(&mut self, base: &str, filter: &str) -> DirectoryResult<Vec<LdapEntry>> {
        let (entries, _) = self
            .op()
            .search(base, Scope::Subtree, filter, vec!["*"])
            .await?
            .success()?;

        Ok(entries
            .into_iter()
            .map(|e| LdapEntry::from_search_entry(SearchEntry::construct(e)))
            .collect())
    }

    async fn verify_bind(&mut self, dn: &str, secret: &[u8]) -> DirectoryResult<()> {
        // A secret that is not valid UTF-8 cannot match any directory
        // password sent over the protocol.
        let password =
            std::str::from_utf8(secret).map_err(|_| DirectoryError::InvalidCredentials)?;

        let result = self.op().simple_bind(dn, password).await?;
        match result.success() {
            Ok(_) => Ok(()),
            Err(e) if result_code(&e) == Some(RC_INVALID_CREDENTIALS) => {
                Err(DirectoryError::InvalidCredentials)
            }
            Err(e) => {
                debug!(error = %e, "credential verification bind failed");
                Err(DirectoryError::directory("credential verification bind failed"))
            }
        }
    }
}

/// Pool of shared lookup sessions.
///
/// A semaphore bounds concurrent checkouts; a single idle slot keeps the
/// most recently returned session warm for reuse.
pub struct ConnectionPool {
    connector: DirectoryConnector,
    semaphore: Arc<Semaphore>,
    slot: Arc<Mutex<Option<DirectorySession>>>,
    pooling: bool,
    closed: Arc<AtomicBool>,
}

impl ConnectionPool {
    /// Creates the pool. When pooling is disabled every checkout opens a
    /// fresh session and drops it on return.
    pub fn new(config: Arc<DirectoryConfig>) -> DirectoryResult<Self> {
        let pooling = config.pool_enabled;
        let max = if pooling {
            config.pool_max_size
        } else {
            Semaphore::MAX_PERMITS
        };
        Ok(Self {
            connector: DirectoryConnector::new(config)?,
            semaphore: Arc::new(Semaphore::new(max)),
            slot: Arc::new(Mutex::new(None)),
            pooling,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The underlying connector, for callers that need a private session.
    #[must_use]
    pub fn connector(&self) -> &DirectoryConnector {
        &self.connector
    }

    /// Checks out a session, reusing the idle one when available.
    ///
    /// Fails once the pool has been closed.
    pub async fn acquire(&self) -> DirectoryResult<PooledSession> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DirectoryError::directory("connection pool is closed"));
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DirectoryError::directory("connection pool is closed"))?;

        if self.pooling {
            let idle = self.slot.lock().ok().and_then(|mut slot| slot.take());
            if let Some(session) = idle {
                return Ok(PooledSession {
                    session: Some(session),
                    slot: Arc::clone(&self.slot),
                    pooling: true,
                    closed: Arc::clone(&self.closed),
                    _permit: permit,
                });
            }
        }

        let session = self.connector.connect().await?;
        Ok(PooledSession {
            session: Some(session),
            slot: Arc::clone(&self.slot),
            pooling: self.pooling,
            closed: Arc::clone(&self.closed),
            _permit: permit,
        })
    }

    /// Shuts the pool down: the idle session is unbound, sessions still
    /// checked out are dropped on return instead of cached, and further
    /// checkouts fail. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.semaphore.close();
        let idle = self.slot.lock().ok().and_then(|mut slot| slot.take());
        if let Some(session) = idle {
            session.close().await;
        }
    }
}

/// A checked-out pool session. Returned to the pool on drop unless
/// pooling is disabled, the pool has been closed, or the caller discards
/// it.
pub struct PooledSession {
    session: Option<DirectorySession>,
    slot: Arc<Mutex<Option<DirectorySession>>>,
    pooling: bool,
    closed: Arc<AtomicBool>,
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("pooling", &self.pooling)
            .finish_non_exhaustive()
    }
}

impl PooledSession {
    /// Unbinds and drops the session instead of returning it to the pool.
    pub async fn discard(mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if !self.pooling || self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Some(session) = self.session.take() {
            if let Ok(mut slot) = self.slot.lock() {
                if slot.is_none() {
                    *slot = Some(session);
                }
            }
        }
    }
}

impl DirectoryOps for PooledSession {
    async fn lookup(&mut self, dn: &str) -> DirectoryResult<Option<LdapEntry>> {
        match self.session.as_mut() {
            Some(session) => session.lookup(dn).await,
            None => Err(DirectoryError::directory("session already discarded")),
        }
    }

    async fn search(&mut self, base: &str, filter: &str) -> DirectoryResult<Vec<LdapEntry>> {
        match self.session.as_mut() {
            Some(session) => session.search(base, filter).await,
            None => Err(DirectoryError::directory("session already discarded")),
        }
    }

    async fn verify_bind(&mut self, dn: &str, secret: &[u8]) -> DirectoryResult<()> {
        match self.session.as_mut() {
            Some(session) => session.verify_bind(dn, secret).await,
            None => Err(DirectoryError::directory("session already discarded")),
        }
    }
}

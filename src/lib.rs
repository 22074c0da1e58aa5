//! # ldap-auth
//!
//! Directory-backed authentication and authorization using `ldap3`.
//!
//! The engine resolves a login name to a directory entry, verifies the
//! credential with a bind on a private connection, and resolves the
//! user's roles from membership attributes and role searches, optionally
//! expanding nested groups.
//!
//! ```no_run
//! use ldap_auth::{DirectoryBackend, DirectoryConfig};
//!
//! # async fn run() -> Result<(), ldap_auth::DirectoryError> {
//! let config = DirectoryConfig::builder()
//!     .hosts(["dc1.example.com", "dc2.example.com"])
//!     .enable_ssl(true)
//!     .bind_dn("cn=svc,ou=accounts,dc=example,dc=com")
//!     .bind_password("service-secret")
//!     .user_base("ou=people,dc=example,dc=com")
//!     .role_base("ou=groups,dc=example,dc=com")
//!     .role_name("cn")
//!     .resolve_nested_roles(true)
//!     .build()?;
//!
//! let backend = DirectoryBackend::new(config)?;
//! let mut secret = b"hunter2".to_vec();
//! let mut user = backend.authenticate("jdoe", &mut secret).await?;
//! backend.authorize(&mut user).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod authn;
pub mod authz;
pub mod backend;
pub mod config;
pub mod connect;
pub mod dn;
pub mod error;
pub mod identity;
pub mod search;
pub mod tls;
pub mod util;

pub use backend::DirectoryBackend;
pub use config::{DirectoryConfig, DirectoryConfigBuilder, TlsSettings, TlsVersion};
pub use error::{DirectoryError, DirectoryResult};
pub use identity::DirectoryUser;
pub use search::LdapEntry;

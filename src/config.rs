//! Engine configuration.
//!
//! One immutable [`DirectoryConfig`] is constructed up front and shared by
//! reference with every component; there is no ambient configuration
//! state. Defaults mirror conservative directory-client behavior: plain
//! LDAP on port 389, hostname verification on, role search enabled,
//! nested-role resolution off.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};

/// PEM material supplied either inline or as a file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PemSource {
    /// Inline PEM text.
    Inline(String),
    /// Path to a PEM file.
    File(PathBuf),
}

impl PemSource {
    /// Reads the PEM bytes from this source.
    pub fn read(&self) -> DirectoryResult<Vec<u8>> {
        match self {
            Self::Inline(text) => Ok(text.clone().into_bytes()),
            Self::File(path) => std::fs::read(path).map_err(|e| {
                DirectoryError::tls(format!("cannot read {}: {e}", path.display()))
            }),
        }
    }
}

/// TLS protocol versions selectable for directory connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    /// TLS 1.0.
    #[serde(rename = "TLSv1")]
    Tlsv10,
    /// TLS 1.1.
    #[serde(rename = "TLSv1.1")]
    Tlsv11,
    /// TLS 1.2.
    #[serde(rename = "TLSv1.2")]
    Tlsv12,
}

impl TlsVersion {
    /// Converts to the native-tls protocol selector.
    #[must_use]
    pub fn to_native(self) -> native_tls::Protocol {
        match self {
            Self::Tlsv10 => native_tls::Protocol::Tlsv10,
            Self::Tlsv11 => native_tls::Protocol::Tlsv11,
            Self::Tlsv12 => native_tls::Protocol::Tlsv12,
        }
    }
}

/// The conservative two-entry default protocol list.
#[must_use]
pub fn default_tls_protocols() -> Vec<TlsVersion> {
    vec![TlsVersion::Tlsv12, TlsVersion::Tlsv11]
}

/// Trust and identity material for TLS connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Trusted CA certificates in PEM form. Selects PEM mode when set.
    pub pem_trusted_cas: Option<PemSource>,

    /// Client certificate (PEM) for certificate authentication.
    pub pem_client_cert: Option<PemSource>,

    /// Client private key (PKCS#8 PEM) for certificate authentication.
    pub pem_client_key: Option<PemSource>,

    /// PKCS#12 bundle holding the client identity (keystore mode).
    pub keystore_path: Option<PathBuf>,

    /// Password for the PKCS#12 bundle.
    #[serde(skip_serializing)]
    pub keystore_password: Option<String>,

    /// PEM bundle of trusted CAs (keystore mode trust material).
    pub truststore_path: Option<PathBuf>,

    /// Enabled TLS protocol versions. Empty means library default.
    pub enabled_protocols: Vec<TlsVersion>,

    /// Enabled cipher suites. Carried for operational visibility; suite
    /// selection is owned by the platform TLS backend.
    pub enabled_cipher_suites: Vec<String>,
}

impl TlsSettings {
    /// Checks whether any PEM trust/identity source is configured.
    #[must_use]
    pub fn uses_pem(&self) -> bool {
        self.pem_trusted_cas.is_some()
            || self.pem_client_cert.is_some()
            || self.pem_client_key.is_some()
    }

    /// Checks whether usable client identity material is configured.
    #[must_use]
    pub fn has_client_identity(&self) -> bool {
        (self.pem_client_cert.is_some() && self.pem_client_key.is_some())
            || self.keystore_path.is_some()
    }
}

/// Immutable configuration for the directory engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    // === Connection ===
    /// Ordered directory hosts, `host` or `host:port`. The first entry is
    /// always tried first; failover walks the list in order.
    pub hosts: Vec<String>,

    /// Use LDAPS (TLS from connection start). Default port becomes 636.
    pub enable_ssl: bool,

    /// Upgrade a plain connection via StartTLS.
    pub enable_start_tls: bool,

    /// Authenticate to the server with the client certificate (external
    /// SASL bind) when no simple-bind credentials take precedence.
    pub enable_client_auth: bool,

    /// Verify the server hostname against its certificate.
    pub verify_hostnames: bool,

    /// Accept any server certificate. Forces hostname verification off.
    pub trust_all: bool,

    /// TLS trust and identity material.
    pub tls: TlsSettings,

    /// Connect timeout in milliseconds. Zero means protocol default.
    pub connect_timeout_ms: u64,

    /// Response timeout in milliseconds. Zero means wait indefinitely.
    pub response_timeout_ms: u64,

    // === Service bind ===
    /// Distinguished name for the service-account simple bind.
    pub bind_dn: Option<String>,

    /// Password for the service-account simple bind.
    #[serde(skip_serializing)]
    pub bind_password: Option<String>,

    // === Pooling ===
    /// Share lookup connections through a pool. Credential-verification
    /// binds always use a private, unpooled connection.
    pub pool_enabled: bool,

    /// Maximum concurrently checked-out pooled connections.
    pub pool_max_size: usize,

    // === User lookup ===
    /// Search base for user entries.
    pub user_base: String,

    /// User search filter template; `{0}` is the escaped username.
    pub user_search: String,

    /// Entry attribute whose value replaces the username after a
    /// successful authentication. `None` keeps the DN.
    pub username_attribute: Option<String>,

    // === Decoy login ===
    /// Perform a decoy bind when the user does not exist, equalizing the
    /// timing and shape of the failure path.
    pub fake_login_enabled: bool,

    /// DN used for decoy binds. Defaults to a synthesized name.
    pub fake_login_dn: Option<String>,

    /// Password used for decoy binds.
    #[serde(skip_serializing)]
    pub fake_login_password: Option<String>,

    // === Custom attributes ===
    /// Maximum length for a user attribute value to be copied onto the
    /// resolved identity.
    pub custom_attr_max_value_len: usize,

    /// Wildcard allow-list of attribute names to copy. Empty allows all.
    pub allowed_custom_attributes: Vec<String>,

    // === Role resolution ===
    /// Search base for role entries.
    pub role_base: String,

    /// Role search filter template; `{0}` escaped user DN, `{1}` original
    /// username, `{2}` value of [`Self::user_role_attribute`].
    pub role_search: String,

    /// Whether the role search runs at all.
    pub role_search_enabled: bool,

    /// Role-entry attribute carrying the role name, or `"dn"` to use the
    /// full distinguished name.
    pub role_name: String,

    /// Comma-separated user-entry attributes holding role memberships.
    pub user_role_names: String,

    /// User attribute whose value substitutes `{2}` in the role search.
    pub user_role_attribute: Option<String>,

    /// Recursively expand nested group membership.
    pub resolve_nested_roles: bool,

    /// Wildcard patterns of role DNs never expanded (still included).
    pub nested_role_filter: Vec<String>,

    /// Safety cutoff for nested expansion depth.
    pub max_nested_depth: u32,

    /// Wildcard patterns of principals exempt from role resolution.
    pub skip_users: Vec<String>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_string()],
            enable_ssl: false,
            enable_start_tls: false,
            enable_client_auth: false,
            verify_hostnames: true,
            trust_all: false,
            tls: TlsSettings {
                enabled_protocols: default_tls_protocols(),
                ..TlsSettings::default()
            },
            connect_timeout_ms: 5000,
            response_timeout_ms: 0,
            bind_dn: None,
            bind_password: None,
            pool_enabled: false,
            pool_max_size: 8,
            user_base: String::new(),
            user_search: "(sAMAccountName={0})".to_string(),
            username_attribute: None,
            fake_login_enabled: false,
            fake_login_dn: None,
            fake_login_password: None,
            custom_attr_max_value_len: 36,
            allowed_custom_attributes: Vec::new(),
            role_base: String::new(),
            role_search: "(member={0})".to_string(),
            role_search_enabled: true,
            role_name: "name".to_string(),
            user_role_names: "memberOf".to_string(),
            user_role_attribute: None,
            resolve_nested_roles: false,
            nested_role_filter: Vec::new(),
            max_nested_depth: 30,
            skip_users: Vec::new(),
        }
    }
}

impl DirectoryConfig {
    /// Creates a builder initialized with the defaults.
    #[must_use]
    pub fn builder() -> DirectoryConfigBuilder {
        DirectoryConfigBuilder {
            config: Self::default(),
        }
    }

    /// Validates the configuration.
    ///
    /// ## Errors
    ///
    /// Returns [`DirectoryError::Configuration`] for contradictory or
    /// incomplete settings; these are fatal and never retried.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.hosts.is_empty() {
            return Err(DirectoryError::config("at least one host is required"));
        }

        if self.enable_ssl && self.enable_start_tls {
            return Err(DirectoryError::config(
                "enable_ssl and enable_start_tls are mutually exclusive",
            ));
        }

        if self.enable_client_auth && !self.tls.has_client_identity() {
            return Err(DirectoryError::config(
                "client certificate authentication is enabled but no client \
                 identity material (PEM cert/key or keystore) is configured",
            ));
        }

        if self.tls.pem_client_cert.is_some() != self.tls.pem_client_key.is_some() {
            return Err(DirectoryError::config(
                "PEM client certificate and key must both be configured",
            ));
        }

        if self.pool_enabled && self.pool_max_size == 0 {
            return Err(DirectoryError::config(
                "pool_max_size must be at least 1 when pooling is enabled",
            ));
        }

        Ok(())
    }

    /// Returns the configured role-attribute names, comma-split and
    /// trimmed.
    #[must_use]
    pub fn role_attribute_names(&self) -> Vec<&str> {
        self.user_role_names
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Whether connections negotiate TLS at all.
    #[must_use]
    pub const fn wants_tls(&self) -> bool {
        self.enable_ssl || self.enable_start_tls
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    pub(crate) fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout_ms > 0).then(|| Duration::from_millis(self.response_timeout_ms))
    }
}

/// Builder for [`DirectoryConfig`].
#[derive(Debug)]
pub struct DirectoryConfigBuilder {
    config: DirectoryConfig,
}

impl DirectoryConfigBuilder {
    /// Sets the ordered host list.
    #[must_use]
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Enables LDAPS.
    #[must_use]
    pub const fn enable_ssl(mut self, enable: bool) -> Self {
        self.config.enable_ssl = enable;
        self
    }

    /// Enables StartTLS.
    #[must_use]
    pub const fn enable_start_tls(mut self, enable: bool) -> Self {
        self.config.enable_start_tls = enable;
        self
    }

    /// Enables client-certificate authentication.
    #[must_use]
    pub const fn enable_client_auth(mut self, enable: bool) -> Self {
        self.config.enable_client_auth = enable;
        self
    }

    /// Sets hostname verification.
    #[must_use]
    pub const fn verify_hostnames(mut self, verify: bool) -> Self {
        self.config.verify_hostnames = verify;
        self
    }

    /// Accepts any server certificate.
    #[must_use]
    pub const fn trust_all(mut self, trust: bool) -> Self {
        self.config.trust_all = trust;
        self
    }

    /// Sets the TLS trust/identity material.
    #[must_use]
    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.config.tls = tls;
        self
    }

    /// Sets the connect timeout in milliseconds (zero = protocol default).
    #[must_use]
    pub const fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Sets the response timeout in milliseconds (zero = wait forever).
    #[must_use]
    pub const fn response_timeout_ms(mut self, ms: u64) -> Self {
        self.config.response_timeout_ms = ms;
        self
    }

    /// Sets the service-account bind DN.
    #[must_use]
    pub fn bind_dn(mut self, dn: impl Into<String>) -> Self {
        self.config.bind_dn = Some(dn.into());
        self
    }

    /// Sets the service-account bind password.
    #[must_use]
    pub fn bind_password(mut self, password: impl Into<String>) -> Self {
        self.config.bind_password = Some(password.into());
        self
    }

    /// Enables connection pooling.
    #[must_use]
    pub const fn pool_enabled(mut self, enabled: bool) -> Self {
        self.config.pool_enabled = enabled;
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub const fn pool_max_size(mut self, size: usize) -> Self {
        self.config.pool_max_size = size;
        self
    }

    /// Sets the user search base.
    #[must_use]
    pub fn user_base(mut self, base: impl Into<String>) -> Self {
        self.config.user_base = base.into();
        self
    }

    /// Sets the user search filter template.
    #[must_use]
    pub fn user_search(mut self, filter: impl Into<String>) -> Self {
        self.config.user_search = filter.into();
        self
    }

    /// Sets the post-authentication username attribute.
    #[must_use]
    pub fn username_attribute(mut self, attr: impl Into<String>) -> Self {
        self.config.username_attribute = Some(attr.into());
        self
    }

    /// Enables the decoy-login path.
    #[must_use]
    pub const fn fake_login_enabled(mut self, enabled: bool) -> Self {
        self.config.fake_login_enabled = enabled;
        self
    }

    /// Sets the role search base.
    #[must_use]
    pub fn role_base(mut self, base: impl Into<String>) -> Self {
        self.config.role_base = base.into();
        self
    }

    /// Sets the role search filter template.
    #[must_use]
    pub fn role_search(mut self, filter: impl Into<String>) -> Self {
        self.config.role_search = filter.into();
        self
    }

    /// Enables or disables the role search.
    #[must_use]
    pub const fn role_search_enabled(mut self, enabled: bool) -> Self {
        self.config.role_search_enabled = enabled;
        self
    }

    /// Sets the role-name attribute (`"dn"` uses the full DN).
    #[must_use]
    pub fn role_name(mut self, attr: impl Into<String>) -> Self {
        self.config.role_name = attr.into();
        self
    }

    /// Sets the comma-separated user role attributes.
    #[must_use]
    pub fn user_role_names(mut self, names: impl Into<String>) -> Self {
        self.config.user_role_names = names.into();
        self
    }

    /// Sets the `{2}` substitution attribute.
    #[must_use]
    pub fn user_role_attribute(mut self, attr: impl Into<String>) -> Self {
        self.config.user_role_attribute = Some(attr.into());
        self
    }

    /// Enables nested-role resolution.
    #[must_use]
    pub const fn resolve_nested_roles(mut self, enabled: bool) -> Self {
        self.config.resolve_nested_roles = enabled;
        self
    }

    /// Sets the nested-role exclusion patterns.
    #[must_use]
    pub fn nested_role_filter<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.nested_role_filter = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the nested expansion depth cutoff.
    #[must_use]
    pub const fn max_nested_depth(mut self, depth: u32) -> Self {
        self.config.max_nested_depth = depth;
        self
    }

    /// Sets the skip-user patterns.
    #[must_use]
    pub fn skip_users<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.skip_users = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> DirectoryResult<DirectoryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = DirectoryConfig::default();
        assert_eq!(config.hosts, vec!["localhost".to_string()]);
        assert!(!config.enable_ssl);
        assert!(config.verify_hostnames);
        assert!(!config.trust_all);
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.response_timeout_ms, 0);
        assert_eq!(config.user_search, "(sAMAccountName={0})");
        assert_eq!(config.role_search, "(member={0})");
        assert_eq!(config.role_name, "name");
        assert_eq!(config.user_role_names, "memberOf");
        assert_eq!(config.max_nested_depth, 30);
        assert_eq!(config.custom_attr_max_value_len, 36);
        assert_eq!(
            config.tls.enabled_protocols,
            vec![TlsVersion::Tlsv12, TlsVersion::Tlsv11]
        );
    }

    #[test]
    fn rejects_empty_host_list() {
        let result = DirectoryConfig::builder().hosts(Vec::<String>::new()).build();
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
    }

    #[test]
    fn rejects_ssl_with_start_tls() {
        let result = DirectoryConfig::builder()
            .enable_ssl(true)
            .enable_start_tls(true)
            .build();
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
    }

    #[test]
    fn rejects_client_auth_without_identity() {
        let result = DirectoryConfig::builder()
            .enable_ssl(true)
            .enable_client_auth(true)
            .build();
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
    }

    #[test]
    fn accepts_client_auth_with_keystore() {
        let mut tls = TlsSettings::default();
        tls.keystore_path = Some(PathBuf::from("/etc/ldap/identity.p12"));
        let result = DirectoryConfig::builder()
            .enable_ssl(true)
            .enable_client_auth(true)
            .tls(tls)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_pem_cert_without_key() {
        let mut tls = TlsSettings::default();
        tls.pem_client_cert = Some(PemSource::Inline("cert".to_string()));
        let result = DirectoryConfig::builder().tls(tls).build();
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
    }

    #[test]
    fn role_attribute_names_split_and_trim() {
        let config = DirectoryConfig::builder()
            .user_role_names("memberOf, roleAttr ,other")
            .build()
            .unwrap();
        assert_eq!(
            config.role_attribute_names(),
            vec!["memberOf", "roleAttr", "other"]
        );
    }

    #[test]
    fn zero_timeouts_mean_unset() {
        let config = DirectoryConfig::builder()
            .connect_timeout_ms(0)
            .response_timeout_ms(0)
            .build()
            .unwrap();
        assert_eq!(config.connect_timeout(), None);
        assert_eq!(config.response_timeout(), None);
    }

    #[test]
    fn serialized_config_omits_secrets() {
        let config = DirectoryConfig::builder()
            .bind_dn("cn=svc,dc=example,dc=com")
            .bind_password("s3cret")
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(json.contains("cn=svc,dc=example,dc=com"));
    }
}

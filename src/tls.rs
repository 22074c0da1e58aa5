//! TLS trust and identity configuration.
//!
//! Builds the [`native_tls::TlsConnector`] handed to the transport for
//! LDAPS and StartTLS connections. Trust material comes either from PEM
//! sources or from a PKCS#12 keystore plus a PEM truststore bundle.
//!
//! ## Security
//!
//! `trust_all` and disabled hostname verification are security-relevant
//! degradations and are always logged at warning level, never applied
//! silently. `trust_all` implicitly disables hostname verification even
//! when `verify_hostnames` is set.

use native_tls::{Certificate, Identity, TlsConnector};
use tracing::{debug, warn};

use crate::config::{DirectoryConfig, TlsVersion};
use crate::error::{DirectoryError, DirectoryResult};

/// Resolves the effective hostname-verification flag.
///
/// Accepting any certificate makes hostname verification meaningless, so
/// `trust_all` forces it off regardless of `verify_hostnames`.
#[must_use]
pub const fn hostname_verification_effective(trust_all: bool, verify_hostnames: bool) -> bool {
    !trust_all && verify_hostnames
}

/// Resolves the min/max protocol bounds from an enabled-protocol list.
#[must_use]
pub fn protocol_bounds(enabled: &[TlsVersion]) -> Option<(TlsVersion, TlsVersion)> {
    let min = enabled.iter().min()?;
    let max = enabled.iter().max()?;
    Some((*min, *max))
}

/// Builds a TLS connector from the configured trust and identity material.
///
/// ## Errors
///
/// - [`DirectoryError::Configuration`] when client-certificate
///   authentication is required but no usable identity material exists.
/// - [`DirectoryError::Tls`] when PEM or PKCS#12 material cannot be read
///   or parsed.
pub fn build_tls_connector(config: &DirectoryConfig) -> DirectoryResult<TlsConnector> {
    let mut builder = TlsConnector::builder();

    if config.trust_all {
        warn!("directory TLS is configured to trust any server certificate");
        builder.danger_accept_invalid_certs(true);
    }

    if !hostname_verification_effective(config.trust_all, config.verify_hostnames) {
        if config.trust_all && config.verify_hostnames {
            warn!("trust_all is set; hostname verification is disabled despite verify_hostnames");
        } else {
            warn!("directory TLS hostname verification is disabled");
        }
        builder.danger_accept_invalid_hostnames(true);
    }

    let identity = if config.tls.uses_pem() {
        if let Some(cas) = &config.tls.pem_trusted_cas {
            for cert in parse_cert_bundle(&cas.read()?)? {
                builder.add_root_certificate(cert);
            }
        }
        load_pem_identity(config)?
    } else {
        if let Some(path) = &config.tls.truststore_path {
            let bytes = std::fs::read(path).map_err(|e| {
                DirectoryError::tls(format!("cannot read truststore {}: {e}", path.display()))
            })?;
            for cert in parse_cert_bundle(&bytes)? {
                builder.add_root_certificate(cert);
            }
        }
        load_keystore_identity(config)?
    };

    match identity {
        Some(identity) => {
            debug!("directory TLS client identity loaded");
            builder.identity(identity);
        }
        None if config.enable_client_auth => {
            return Err(DirectoryError::config(
                "client certificate authentication requires client identity material",
            ));
        }
        None => {}
    }

    if let Some((min, max)) = protocol_bounds(&config.tls.enabled_protocols) {
        debug!(?min, ?max, "enabled TLS protocol bounds for directory connections");
        builder.min_protocol_version(Some(min.to_native()));
        builder.max_protocol_version(Some(max.to_native()));
    }

    if !config.tls.enabled_cipher_suites.is_empty() {
        // Suite selection is owned by the platform TLS backend; the list is
        // surfaced for operators comparing against server-side policy.
        debug!(
            suites = ?config.tls.enabled_cipher_suites,
            "configured cipher suites for directory TLS"
        );
    }

    builder
        .build()
        .map_err(|e| DirectoryError::tls(format!("cannot initialize TLS connector: {e}")))
}

fn load_pem_identity(config: &DirectoryConfig) -> DirectoryResult<Option<Identity>> {
    let (cert, key) = match (&config.tls.pem_client_cert, &config.tls.pem_client_key) {
        (Some(cert), Some(key)) => (cert.read()?, key.read()?),
        _ => return Ok(None),
    };

    Identity::from_pkcs8(&cert, &key)
        .map(Some)
        .map_err(|e| DirectoryError::tls(format!("invalid PEM client identity: {e}")))
}

fn load_keystore_identity(config: &DirectoryConfig) -> DirectoryResult<Option<Identity>> {
    let path = match &config.tls.keystore_path {
        Some(path) => path,
        None => return Ok(None),
    };

    let der = std::fs::read(path).map_err(|e| {
        DirectoryError::tls(format!("cannot read keystore {}: {e}", path.display()))
    })?;
    let password = config.tls.keystore_password.as_deref().unwrap_or("");

    Identity::from_pkcs12(&der, password)
        .map(Some)
        .map_err(|e| DirectoryError::tls(format!("invalid PKCS#12 keystore: {e}")))
}

/// Parses every certificate out of a PEM bundle.
fn parse_cert_bundle(pem: &[u8]) -> DirectoryResult<Vec<Certificate>> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let text = std::str::from_utf8(pem)
        .map_err(|_| DirectoryError::tls("trust material is not valid PEM text"))?;

    let mut certs = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(BEGIN) {
        let block_end = rest[start..]
            .find(END)
            .map(|i| start + i + END.len())
            .ok_or_else(|| DirectoryError::tls("truncated certificate in PEM bundle"))?;
        let block = &rest[start..block_end];
        certs.push(
            Certificate::from_pem(block.as_bytes())
                .map_err(|e| DirectoryError::tls(format!("invalid certificate in bundle: {e}")))?,
        );
        rest = &rest[block_end..];
    }

    if certs.is_empty() {
        return Err(DirectoryError::tls("no certificates found in PEM material"));
    }

    Ok(certs)
}

//! Directory entries, filter templating and user resolution.
//!
//! [`DirectoryOps`] is the seam between the resolution logic and the wire:
//! the live session in [`crate::connect`] implements it against `ldap3`,
//! and the authentication and role-resolution code is written purely
//! against the trait.

use std::collections::HashMap;

use ldap3::ldap_escape;
use tracing::debug;

use crate::config::DirectoryConfig;
use crate::dn::DistinguishedName;
use crate::error::{DirectoryError, DirectoryResult};

/// A directory entry: its DN plus string-valued attributes.
#[derive(Debug, Clone)]
pub struct LdapEntry {
    dn: String,
    attrs: HashMap<String, Vec<String>>,
}

impl LdapEntry {
    /// Creates an entry from a DN and attribute/values pairs.
    #[must_use]
    pub fn new<S: Into<String>>(dn: S, attrs: Vec<(S, Vec<S>)>) -> Self {
        Self {
            dn: dn.into(),
            attrs: attrs
                .into_iter()
                .map(|(k, vs)| (k.into(), vs.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Converts a raw `ldap3` search entry, folding binary attributes in
    /// as lossy UTF-8.
    #[must_use]
    pub fn from_search_entry(entry: ldap3::SearchEntry) -> Self {
        let mut attrs = entry.attrs;
        for (name, values) in entry.bin_attrs {
            attrs.entry(name).or_default().extend(
                values
                    .into_iter()
                    .map(|v| String::from_utf8_lossy(&v).into_owned()),
            );
        }
        Self {
            dn: entry.dn,
            attrs,
        }
    }

    /// The entry's distinguished name, exactly as returned by the server.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Returns the first value of `attr`, case-insensitively.
    #[must_use]
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values(attr).first().map(|s| s.as_str())
    }

    /// Returns all values of `attr`, case-insensitively. Missing
    /// attributes yield an empty slice.
    #[must_use]
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map_or(&[], |(_, values)| values.as_slice())
    }

    /// Iterates over all attributes with their values.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Low-level directory operations the resolution logic runs against.
///
/// The live implementation sits on the connected session; tests swap in an
/// in-memory directory.
#[allow(async_fn_in_trait)]
pub trait DirectoryOps {
    /// Reads a single entry by DN. `Ok(None)` when the entry is absent.
    async fn lookup(&mut self, dn: &str) -> DirectoryResult<Option<LdapEntry>>;

    /// Runs a subtree search under `base`.
    async fn search(&mut self, base: &str, filter: &str) -> DirectoryResult<Vec<LdapEntry>>;

    /// Attempts a simple bind as `dn` with `secret`.
    ///
    /// ## Security
    ///
    /// A rejected bind must map to
    /// [`DirectoryError::InvalidCredentials`], never to an error carrying
    /// server detail.
    async fn verify_bind(&mut self, dn: &str, secret: &[u8]) -> DirectoryResult<()>;
}

/// Renders a filter template.
///
/// `{0}` is always replaced (escaped). `{1}` and `{2}` are replaced only
/// when a value is supplied; an unset `{2}` stays literal in the filter,
/// matching nothing rather than matching broadly.
#[must_use]
pub fn render_filter(template: &str, zero: &str, one: Option<&str>, two: Option<&str>) -> String {
    let mut filter = template.replace("{0}", &ldap_escape(zero));
    if let Some(one) = one {
        filter = filter.replace("{1}", &ldap_escape(one));
    }
    if let Some(two) = two {
        filter = filter.replace("{2}", &ldap_escape(two));
    }
    filter
}

/// Locates the entry for `username`.
///
/// A username that parses as a DN is read directly; anything else goes
/// through the configured user search. Returns `Ok(None)` when no entry
/// matches and an error when the search is ambiguous.
pub async fn resolve_user<D: DirectoryOps>(
    directory: &mut D,
    config: &DirectoryConfig,
    username: &str,
) -> DirectoryResult<Option<LdapEntry>> {
    if DistinguishedName::is_valid(username) {
        debug!(username, "resolving user by distinguished name");
        return directory.lookup(username).await;
    }

    let filter = render_filter(&config.user_search, username, None, None);
    debug!(base = %config.user_base, %filter, "resolving user by search");

    let mut entries = directory.search(&config.user_base, &filter).await?;
    match entries.len() {
        0 => Ok(None),
        1 => Ok(entries.pop()),
        n => Err(DirectoryError::directory(format!(
            "user search matched {n} entries, expected at most one"
        ))),
    }
}

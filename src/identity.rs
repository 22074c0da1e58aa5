//! The resolved user identity.
//!
//! After a successful authentication the caller gets a
//! [`DirectoryUser`]: the effective username, the entry DN, a filtered
//! copy of the entry's attributes and (once authorization ran) the
//! resolved role names.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::config::DirectoryConfig;
use crate::search::LdapEntry;
use crate::util::wildcard_match_any;

/// An authenticated directory user.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryUser {
    username: String,
    original_username: String,
    dn: Option<String>,
    attributes: BTreeMap<String, String>,
    roles: BTreeSet<String>,
}

impl DirectoryUser {
    /// Builds the identity from the user's directory entry.
    ///
    /// The effective username is the configured attribute's value when set
    /// and present, otherwise the entry DN. The attribute copy honors the
    /// configured length cap and allow-list.
    #[must_use]
    pub fn from_entry(
        config: &DirectoryConfig,
        entry: &LdapEntry,
        original_username: &str,
    ) -> Self {
        let username = config
            .username_attribute
            .as_deref()
            .and_then(|attr| entry.first(attr))
            .unwrap_or_else(|| entry.dn())
            .to_string();

        Self {
            username,
            original_username: original_username.to_string(),
            dn: Some(entry.dn().to_string()),
            attributes: filtered_attributes(config, entry),
            roles: BTreeSet::new(),
        }
    }

    /// Builds an identity for a principal without a directory entry, e.g.
    /// a skipped user.
    #[must_use]
    pub fn without_entry(username: &str) -> Self {
        Self {
            username: username.to_string(),
            original_username: username.to_string(),
            dn: None,
            attributes: BTreeMap::new(),
            roles: BTreeSet::new(),
        }
    }

    /// The effective username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The username as presented at login, before any substitution.
    #[must_use]
    pub fn original_username(&self) -> &str {
        &self.original_username
    }

    /// The entry DN, when the user was resolved from the directory.
    #[must_use]
    pub fn dn(&self) -> Option<&str> {
        self.dn.as_deref()
    }

    /// The filtered entry attributes (first value each).
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// The resolved role names.
    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub(crate) fn extend_roles<I: IntoIterator<Item = String>>(&mut self, roles: I) {
        self.roles.extend(roles);
    }
}

/// Copies entry attributes subject to the length cap and allow-list.
///
/// An empty allow-list admits every attribute; a zero length cap disables
/// the cap.
fn filtered_attributes(config: &DirectoryConfig, entry: &LdapEntry) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, values) in entry.attrs() {
        let Some(value) = values.first() else {
            continue;
        };
        if config.custom_attr_max_value_len > 0 && value.len() > config.custom_attr_max_value_len {
            debug!(attribute = name, "attribute value exceeds length cap, skipping");
            continue;
        }
        if !config.allowed_custom_attributes.is_empty()
            && !wildcard_match_any(&config.allowed_custom_attributes, name)
        {
            continue;
        }
        out.insert(name.to_string(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> LdapEntry {
        LdapEntry::new(
            "cn=jdoe,ou=people,dc=example,dc=com",
            vec![
                ("uid", vec!["jdoe"]),
                ("displayName", vec!["John Doe"]),
                ("description", vec!["a value that is much longer than the thirty-six byte default cap"]),
            ],
        )
    }

    #[test]
    fn username_attribute_substitutes_the_name() {
        let config = DirectoryConfig::builder()
            .username_attribute("uid")
            .build()
            .unwrap();
        let user = DirectoryUser::from_entry(&config, &entry(), "CN=jdoe,OU=people,DC=example,DC=com");
        assert_eq!(user.username(), "jdoe");
        assert_eq!(user.original_username(), "CN=jdoe,OU=people,DC=example,DC=com");
    }

    #[test]
    fn falls_back_to_entry_dn() {
        let config = DirectoryConfig::default();
        let user = DirectoryUser::from_entry(&config, &entry(), "jdoe");
        assert_eq!(user.username(), "cn=jdoe,ou=people,dc=example,dc=com");
    }

    #[test]
    fn missing_attribute_falls_back_to_dn() {
        let config = DirectoryConfig::builder()
            .username_attribute("mail")
            .build()
            .unwrap();
        let user = DirectoryUser::from_entry(&config, &entry(), "jdoe");
        assert_eq!(user.username(), "cn=jdoe,ou=people,dc=example,dc=com");
    }

    #[test]
    fn long_values_are_dropped() {
        let config = DirectoryConfig::default();
        let user = DirectoryUser::from_entry(&config, &entry(), "jdoe");
        assert!(user.attributes().contains_key("uid"));
        assert!(!user.attributes().contains_key("description"));
    }

    #[test]
    fn allow_list_filters_by_wildcard() {
        let mut config = DirectoryConfig::default();
        config.allowed_custom_attributes = vec!["display*".to_string()];
        let user = DirectoryUser::from_entry(&config, &entry(), "jdoe");
        assert!(user.attributes().contains_key("displayName"));
        assert!(!user.attributes().contains_key("uid"));
    }

    #[test]
    fn without_entry_has_no_dn_or_roles() {
        let user = DirectoryUser::without_entry("kibanaserver");
        assert_eq!(user.username(), "kibanaserver");
        assert!(user.dn().is_none());
        assert!(user.roles().is_empty());
    }
}

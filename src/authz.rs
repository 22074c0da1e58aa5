//! Role resolution, including nested group expansion.
//!
//! Roles come from two sources: DN-valued membership attributes on the
//! user entry, and a role search keyed on the user's DN. With nested
//! resolution enabled, every discovered role is itself expanded the same
//! way, breadth first, with a visited set making cycles safe and a depth
//! cutoff bounding pathological graphs.
//!
//! ## Security
//!
//! Resolution fails closed: any directory failure is returned as an error
//! and the caller must deny, never proceed with a partial role set.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::config::DirectoryConfig;
use crate::dn::DistinguishedName;
use crate::error::{DirectoryError, DirectoryResult};
use crate::identity::DirectoryUser;
use crate::search::{render_filter, resolve_user, DirectoryOps, LdapEntry};
use crate::util::wildcard_match_any;

/// Resolves the user's roles into `user`.
///
/// Skipped principals return immediately with no directory traffic. A
/// principal without a directory entry is an error, DN-shaped or not;
/// roles are never resolved for a name the directory does not know.
pub async fn fill_roles<D: DirectoryOps>(
    directory: &mut D,
    config: &DirectoryConfig,
    user: &mut DirectoryUser,
) -> DirectoryResult<()> {
    if is_skipped(config, user) {
        debug!(username = %user.username(), "user matches skip list, no roles resolved");
        return Ok(());
    }

    let entry = match user.dn() {
        Some(dn) => directory.lookup(dn).await?,
        None => resolve_user(directory, config, user.original_username()).await?,
    };
    let Some(entry) = entry else {
        return Err(DirectoryError::UserNotFound);
    };
    let user_dn = entry.dn().to_string();

    let mut plain_roles: BTreeSet<String> = BTreeSet::new();
    let mut discovered: HashSet<DistinguishedName> = HashSet::new();
    let mut role_entries: HashMap<DistinguishedName, LdapEntry> = HashMap::new();
    let mut queue: VecDeque<(DistinguishedName, u32)> = VecDeque::new();

    // Membership attributes on the user entry. DN values become role
    // candidates; anything else is taken verbatim as a role name.
    for attr in config.role_attribute_names() {
        for value in entry.values(attr) {
            match DistinguishedName::parse(value) {
                Ok(dn) => {
                    if discovered.insert(dn.clone()) {
                        queue.push_back((dn, 0));
                    }
                }
                Err(_) => {
                    plain_roles.insert(value.clone());
                }
            }
        }
    }

    let role_attr_value = config
        .user_role_attribute
        .as_deref()
        .and_then(|attr| entry.first(attr));

    if config.role_search_enabled {
        let filter = render_filter(
            &config.role_search,
            &user_dn,
            Some(user.original_username()),
            role_attr_value,
        );
        debug!(base = %config.role_base, %filter, "searching direct roles");
        for role_entry in directory.search(&config.role_base, &filter).await? {
            let Ok(dn) = DistinguishedName::parse(role_entry.dn()) else {
                continue;
            };
            if discovered.insert(dn.clone()) {
                queue.push_back((dn.clone(), 0));
            }
            role_entries.insert(dn, role_entry);
        }
    }

    if config.resolve_nested_roles {
        expand_nested(
            directory,
            config,
            &mut discovered,
            &mut role_entries,
            &mut queue,
        )
        .await?;
    }

    let roles = extract_role_names(config, &discovered);
    debug!(
        username = %user.username(),
        count = roles.len() + plain_roles.len(),
        "role resolution complete"
    );
    user.extend_roles(plain_roles);
    user.extend_roles(roles);
    Ok(())
}

fn is_skipped(config: &DirectoryConfig, user: &DirectoryUser) -> bool {
    wildcard_match_any(&config.skip_users, user.username())
        || wildcard_match_any(&config.skip_users, user.original_username())
        || user
            .dn()
            .is_some_and(|dn| wildcard_match_any(&config.skip_users, dn))
}

/// Breadth-first expansion of the discovered roles.
///
/// A role already in `discovered` is never re-queued, which both
/// deduplicates and terminates cycles. A role whose DN matches the
/// exclusion filter stays in the result but is not expanded. A child at
/// depth `max_nested_depth` or beyond is kept but not expanded either, so
/// directly-held roles always get exactly one expansion even at depth
/// zero.
async fn expand_nested<D: DirectoryOps>(
    directory: &mut D,
    config: &DirectoryConfig,
    discovered: &mut HashSet<DistinguishedName>,
    role_entries: &mut HashMap<DistinguishedName, LdapEntry>,
    queue: &mut VecDeque<(DistinguishedName, u32)>,
) -> DirectoryResult<()> {
    while let Some((dn, depth)) = queue.pop_front() {
        if wildcard_match_any(&config.nested_role_filter, dn.as_str()) {
            debug!(role = %dn, "role matches nested exclusion filter, not expanding");
            continue;
        }

        let mut children: Vec<DistinguishedName> = Vec::new();

        if !role_entries.contains_key(&dn) {
            if let Some(entry) = directory.lookup(dn.as_str()).await? {
                role_entries.insert(dn.clone(), entry);
            }
        }
        if let Some(entry) = role_entries.get(&dn) {
            for attr in config.role_attribute_names() {
                for value in entry.values(attr) {
                    match DistinguishedName::parse(value) {
                        Ok(child) => children.push(child),
                        Err(_) => {
                            debug!(%value, "ignoring non-DN value during nested expansion");
                        }
                    }
                }
            }
        }

        if config.role_search_enabled {
            // The role's own DN stands in for both the member DN and the
            // username; the {2} placeholder is not substituted here.
            let filter = render_filter(&config.role_search, dn.as_str(), Some(dn.as_str()), None);
            for parent in directory.search(&config.role_base, &filter).await? {
                let Ok(parent_dn) = DistinguishedName::parse(parent.dn()) else {
                    continue;
                };
                role_entries.insert(parent_dn.clone(), parent);
                children.push(parent_dn);
            }
        }

        for child in children {
            if discovered.insert(child.clone()) {
                if depth + 1 < config.max_nested_depth {
                    queue.push_back((child, depth + 1));
                } else {
                    warn!(role = %child, depth, "nested role depth cutoff reached");
                }
            }
        }
    }
    Ok(())
}

/// Maps discovered role DNs to role names.
///
/// With the `"dn"` sentinel the full DN is the name, case preserved as
/// stored. Otherwise the name is the value of the most specific RDN
/// matching the configured attribute; the role entry's attributes play no
/// part here. Roles whose DN has no matching component are dropped with a
/// warning.
fn extract_role_names(
    config: &DirectoryConfig,
    discovered: &HashSet<DistinguishedName>,
) -> BTreeSet<String> {
    let use_dn = config.role_name.eq_ignore_ascii_case("dn");
    let mut roles = BTreeSet::new();

    for dn in discovered {
        if use_dn {
            roles.insert(dn.as_str().to_string());
            continue;
        }
        match dn.first_value_of(&config.role_name) {
            Some(name) => {
                roles.insert(name.to_string());
            }
            None => warn!(
                role = %dn,
                attribute = %config.role_name,
                "role yields no name, dropping"
            ),
        }
    }

    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::testing::MockDirectory;

    const USER_DN: &str = "cn=jdoe,ou=people,dc=example,dc=com";

    fn user_entry() -> LdapEntry {
        LdapEntry::new(
            USER_DN,
            vec![("sAMAccountName", vec!["jdoe"]), ("department", vec!["ops"])],
        )
    }

    fn group(dn: &str, members: Vec<&str>) -> LdapEntry {
        LdapEntry::new(dn, vec![("member", members)])
    }

    fn config() -> DirectoryConfig {
        DirectoryConfig::builder()
            .role_base("ou=groups,dc=example,dc=com")
            .role_name("cn")
            .build()
            .unwrap()
    }

    async fn roles_for(dir: &mut MockDirectory, config: &DirectoryConfig) -> Vec<String> {
        let mut user = DirectoryUser::without_entry("jdoe");
        fill_roles(dir, config, &mut user).await.unwrap();
        user.roles().iter().cloned().collect()
    }

    #[tokio::test]
    async fn direct_roles_from_search() {
        let mut dir = MockDirectory::new()
            .with_entry(user_entry())
            .with_entry(group("cn=devs,ou=groups,dc=example,dc=com", vec![USER_DN]));
        assert_eq!(roles_for(&mut dir, &config()).await, vec!["devs"]);
    }

    #[tokio::test]
    async fn direct_roles_from_membership_attribute() {
        let mut dir = MockDirectory::new().with_entry(LdapEntry::new(
            USER_DN,
            vec![
                ("sAMAccountName", vec!["jdoe"]),
                (
                    "memberOf",
                    vec!["cn=admins,ou=groups,dc=example,dc=com", "plainrole"],
                ),
            ],
        ));
        let roles = roles_for(&mut dir, &config()).await;
        assert_eq!(roles, vec!["admins", "plainrole"]);
    }

    #[tokio::test]
    async fn dn_sentinel_returns_the_full_dn_as_stored() {
        let mut dir = MockDirectory::new()
            .with_entry(user_entry())
            .with_entry(group("CN=Devs,OU=groups,DC=example,DC=com", vec![USER_DN]));
        let mut config = config();
        config.role_name = "dn".to_string();
        assert_eq!(
            roles_for(&mut dir, &config).await,
            vec!["CN=Devs,OU=groups,DC=example,DC=com"]
        );
    }

    #[tokio::test]
    async fn nested_roles_are_expanded() {
        let mut dir = MockDirectory::new()
            .with_entry(user_entry())
            .with_entry(group("cn=devs,ou=groups,dc=example,dc=com", vec![USER_DN]))
            .with_entry(group(
                "cn=staff,ou=groups,dc=example,dc=com",
                vec!["cn=devs,ou=groups,dc=example,dc=com"],
            ));
        let mut config = config();
        config.resolve_nested_roles = true;
        assert_eq!(roles_for(&mut dir, &config).await, vec!["devs", "staff"]);
    }

    #[tokio::test]
    async fn cyclic_groups_terminate() {
        let mut dir = MockDirectory::new()
            .with_entry(user_entry())
            .with_entry(group(
                "cn=a,ou=groups,dc=example,dc=com",
                vec![USER_DN, "cn=b,ou=groups,dc=example,dc=com"],
            ))
            .with_entry(group(
                "cn=b,ou=groups,dc=example,dc=com",
                vec!["cn=a,ou=groups,dc=example,dc=com"],
            ));
        let mut config = config();
        config.resolve_nested_roles = true;
        assert_eq!(roles_for(&mut dir, &config).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn depth_cutoff_keeps_but_does_not_expand() {
        // user -> a -> b -> c, cutoff after one level of expansion
        let mut dir = MockDirectory::new()
            .with_entry(user_entry())
            .with_entry(group("cn=a,ou=groups,dc=example,dc=com", vec![USER_DN]))
            .with_entry(group(
                "cn=b,ou=groups,dc=example,dc=com",
                vec!["cn=a,ou=groups,dc=example,dc=com"],
            ))
            .with_entry(group(
                "cn=c,ou=groups,dc=example,dc=com",
                vec!["cn=b,ou=groups,dc=example,dc=com"],
            ));
        let mut config = config();
        config.resolve_nested_roles = true;
        config.max_nested_depth = 1;
        assert_eq!(roles_for(&mut dir, &config).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn excluded_roles_are_kept_but_not_expanded() {
        let mut dir = MockDirectory::new()
            .with_entry(user_entry())
            .with_entry(group("cn=frozen,ou=groups,dc=example,dc=com", vec![USER_DN]))
            .with_entry(group(
                "cn=outer,ou=groups,dc=example,dc=com",
                vec!["cn=frozen,ou=groups,dc=example,dc=com"],
            ));
        let mut config = config();
        config.resolve_nested_roles = true;
        config.nested_role_filter = vec!["cn=frozen,*".to_string()];
        assert_eq!(roles_for(&mut dir, &config).await, vec!["frozen"]);
    }

    #[tokio::test]
    async fn non_dn_values_are_dropped_during_expansion() {
        let mut dir = MockDirectory::new()
            .with_entry(user_entry())
            .with_entry(LdapEntry::new(
                "cn=devs,ou=groups,dc=example,dc=com",
                vec![("member", vec![USER_DN]), ("memberOf", vec!["not-a-dn"])],
            ));
        let mut config = config();
        config.resolve_nested_roles = true;
        assert_eq!(roles_for(&mut dir, &config).await, vec!["devs"]);
    }

    #[tokio::test]
    async fn user_role_attribute_substitutes_into_the_filter() {
        let mut dir = MockDirectory::new()
            .with_entry(user_entry())
            .with_entry(LdapEntry::new(
                "cn=opsteam,ou=groups,dc=example,dc=com",
                vec![("owningDept", vec!["ops"])],
            ));
        let mut config = config();
        config.role_search = "(owningDept={2})".to_string();
        config.user_role_attribute = Some("department".to_string());
        assert_eq!(roles_for(&mut dir, &config).await, vec!["opsteam"]);
    }

    #[tokio::test]
    async fn skipped_users_cause_no_directory_traffic() {
        let mut dir = MockDirectory::new().with_entry(user_entry());
        let mut config = config();
        config.skip_users = vec!["jd*".to_string()];
        let mut user = DirectoryUser::without_entry("jdoe");
        fill_roles(&mut dir, &config, &mut user).await.unwrap();
        assert!(user.roles().is_empty());
        assert!(dir.search_log.is_empty());
    }

    #[tokio::test]
    async fn directory_failure_is_fatal() {
        let mut dir = MockDirectory::new();
        dir.fail_operations = true;
        let mut user = DirectoryUser::without_entry("jdoe");
        let err = fill_roles(&mut dir, &config(), &mut user)
            .await
            .unwrap_err();
        assert!(err.is_fatal_for_authorization());
    }

    #[tokio::test]
    async fn unknown_user_fails_closed() {
        let mut dir = MockDirectory::new();
        let mut user = DirectoryUser::without_entry("ghost");
        let err = fill_roles(&mut dir, &config(), &mut user)
            .await
            .unwrap_err();
        assert!(err.is_fatal_for_authorization());
    }

    #[tokio::test]
    async fn dn_shaped_principal_without_an_entry_fails_closed() {
        let mut dir = MockDirectory::new().with_entry(group(
            "cn=devs,ou=groups,dc=example,dc=com",
            vec!["cn=ghost,ou=people,dc=example,dc=com"],
        ));
        let mut user = DirectoryUser::without_entry("cn=ghost,ou=people,dc=example,dc=com");
        let err = fill_roles(&mut dir, &config(), &mut user)
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::UserNotFound));
        assert!(err.is_fatal_for_authorization());
    }

    #[tokio::test]
    async fn role_name_comes_from_the_dn_not_the_entry() {
        // The group entry carries a "name" attribute, but its DN has no
        // "name" component; the role must be dropped, not renamed.
        let mut dir = MockDirectory::new()
            .with_entry(user_entry())
            .with_entry(LdapEntry::new(
                "cn=opsteam,ou=groups,dc=example,dc=com",
                vec![("member", vec![USER_DN]), ("name", vec!["Friendly"])],
            ));
        let mut config = config();
        config.role_name = "name".to_string();
        let mut user = DirectoryUser::without_entry("jdoe");
        fill_roles(&mut dir, &config, &mut user).await.unwrap();
        assert!(user.roles().is_empty());
    }
}

//! Credential authentication.
//!
//! With pooling enabled, resolution and verification run on different
//! sessions: `lookup` is a shared service-bound session used to find the
//! user's entry, `verifier` is a private session whose bind state is
//! sacrificed to check the credential. Without pooling the caller owns a
//! throwaway session and both phases run on it.
//!
//! ## Security
//!
//! When the user does not exist and the decoy login is enabled, a bind is
//! performed against a decoy DN before failing, so the absent-user path
//! costs a directory round trip just like the wrong-password path. The
//! decoy outcome is always [`DirectoryError::InvalidCredentials`], and it
//! renders identically to [`DirectoryError::UserNotFound`].

use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::DirectoryConfig;
use crate::error::{DirectoryError, DirectoryResult};
use crate::identity::DirectoryUser;
use crate::search::{resolve_user, DirectoryOps, LdapEntry};

const DEFAULT_DECOY_PASSWORD: &str = "fakeLoginPwd123";

/// Authenticates `username` with `secret`, resolving on `lookup` and
/// binding on `verifier`.
///
/// ## Errors
///
/// - [`DirectoryError::UserNotFound`] when no entry matches and the decoy
///   login is off.
/// - [`DirectoryError::InvalidCredentials`] when the bind is rejected,
///   the secret is empty, or the decoy path ran.
/// - [`DirectoryError::Directory`] for operational failures.
///
/// The first two render identically; callers shaping a response must use
/// [`DirectoryError::is_authentication_failure`] instead of matching on
/// the variant.
pub async fn authenticate<L, V>(
    lookup: &mut L,
    verifier: &mut V,
    config: &DirectoryConfig,
    username: &str,
    secret: &[u8],
) -> DirectoryResult<DirectoryUser>
where
    L: DirectoryOps,
    V: DirectoryOps,
{
    check_inputs(username, secret)?;
    let entry = resolve_user(lookup, config, username).await?;
    verify_target(verifier, config, entry, username, secret).await
}

/// Single-session variant: lookup and verification bind both run on
/// `directory`. For callers that own a throwaway connection; after a
/// verification bind the session is no longer service-bound and must not
/// be reused.
pub async fn authenticate_single<D: DirectoryOps>(
    directory: &mut D,
    config: &DirectoryConfig,
    username: &str,
    secret: &[u8],
) -> DirectoryResult<DirectoryUser> {
    check_inputs(username, secret)?;
    let entry = resolve_user(directory, config, username).await?;
    verify_target(directory, config, entry, username, secret).await
}

fn check_inputs(username: &str, secret: &[u8]) -> DirectoryResult<()> {
    if username.is_empty() {
        return Err(DirectoryError::UserNotFound);
    }
    // An empty password must never reach the server; several directory
    // implementations treat it as an anonymous bind that succeeds.
    if secret.is_empty() {
        return Err(DirectoryError::InvalidCredentials);
    }
    Ok(())
}

async fn verify_target<V: DirectoryOps>(
    verifier: &mut V,
    config: &DirectoryConfig,
    entry: Option<LdapEntry>,
    username: &str,
    secret: &[u8],
) -> DirectoryResult<DirectoryUser> {
    match entry {
        Some(entry) => {
            verifier.verify_bind(entry.dn(), secret).await?;
            debug!(dn = %entry.dn(), "credential bind succeeded");
            Ok(DirectoryUser::from_entry(config, &entry, username))
        }
        None if config.fake_login_enabled => {
            decoy_bind(verifier, config).await;
            Err(DirectoryError::InvalidCredentials)
        }
        None => Err(DirectoryError::UserNotFound),
    }
}

/// Binds against the decoy DN. The outcome is ignored; the caller fails
/// the same way regardless.
async fn decoy_bind<V: DirectoryOps>(verifier: &mut V, config: &DirectoryConfig) {
    let dn = config
        .fake_login_dn
        .clone()
        .unwrap_or_else(|| format!("CN=faketomakebindfail,DC={}", Uuid::new_v4()));
    let password = Zeroizing::new(
        config
            .fake_login_password
            .clone()
            .unwrap_or_else(|| DEFAULT_DECOY_PASSWORD.to_string())
            .into_bytes(),
    );

    if let Err(e) = verifier.verify_bind(&dn, &password).await {
        debug!(error = %e, "decoy bind completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::testing::MockDirectory;

    const USER_DN: &str = "cn=jdoe,ou=people,dc=example,dc=com";

    fn lookup_side() -> MockDirectory {
        MockDirectory::new().with_entry(LdapEntry::new(
            USER_DN,
            vec![("sAMAccountName", vec!["jdoe"]), ("uid", vec!["jdoe"])],
        ))
    }

    #[tokio::test]
    async fn valid_credentials_yield_an_identity() {
        let mut lookup = lookup_side();
        let mut verifier = MockDirectory::new().allow_bind(USER_DN, b"hunter2");
        let config = DirectoryConfig::builder()
            .username_attribute("uid")
            .build()
            .unwrap();

        let user = authenticate(&mut lookup, &mut verifier, &config, "jdoe", b"hunter2")
            .await
            .unwrap();
        assert_eq!(user.username(), "jdoe");
        assert_eq!(user.dn(), Some(USER_DN));
        assert!(user.roles().is_empty());
        assert_eq!(verifier.bind_attempts, vec![USER_DN.to_string()]);
    }

    #[tokio::test]
    async fn single_session_runs_both_phases() {
        let mut dir = lookup_side().allow_bind(USER_DN, b"hunter2");
        let config = DirectoryConfig::default();

        let user = authenticate_single(&mut dir, &config, "jdoe", b"hunter2")
            .await
            .unwrap();
        assert_eq!(user.dn(), Some(USER_DN));
        assert_eq!(dir.search_log.len(), 1);
        assert_eq!(dir.bind_attempts, vec![USER_DN.to_string()]);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let mut lookup = lookup_side();
        let mut verifier = MockDirectory::new().allow_bind(USER_DN, b"hunter2");
        let config = DirectoryConfig::default();

        let err = authenticate(&mut lookup, &mut verifier, &config, "jdoe", b"wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidCredentials));
        assert!(err.is_authentication_failure());
    }

    #[tokio::test]
    async fn empty_password_never_reaches_the_server() {
        let mut lookup = lookup_side();
        let mut verifier = MockDirectory::new();
        let config = DirectoryConfig::default();

        let err = authenticate(&mut lookup, &mut verifier, &config, "jdoe", b"")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidCredentials));
        assert!(verifier.bind_attempts.is_empty());
        assert!(lookup.search_log.is_empty());
    }

    #[tokio::test]
    async fn unknown_user_without_decoy_skips_the_bind() {
        let mut lookup = MockDirectory::new();
        let mut verifier = MockDirectory::new();
        let config = DirectoryConfig::default();

        let err = authenticate(&mut lookup, &mut verifier, &config, "ghost", b"pw")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::UserNotFound));
        assert!(verifier.bind_attempts.is_empty());
    }

    #[tokio::test]
    async fn unknown_user_with_decoy_costs_a_bind() {
        let mut lookup = MockDirectory::new();
        let mut verifier = MockDirectory::new();
        let config = DirectoryConfig::builder()
            .fake_login_enabled(true)
            .build()
            .unwrap();

        let err = authenticate(&mut lookup, &mut verifier, &config, "ghost", b"pw")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidCredentials));
        assert_eq!(verifier.bind_attempts.len(), 1);
        assert!(verifier.bind_attempts[0].starts_with("CN=faketomakebindfail,DC="));
    }

    #[tokio::test]
    async fn decoy_bind_fails_even_when_the_server_accepts_it() {
        let mut lookup = MockDirectory::new();
        let mut verifier =
            MockDirectory::new().allow_bind("cn=decoy,dc=example", b"fakeLoginPwd123");
        let mut config = DirectoryConfig::builder()
            .fake_login_enabled(true)
            .build()
            .unwrap();
        config.fake_login_dn = Some("cn=decoy,dc=example".to_string());

        let err = authenticate(&mut lookup, &mut verifier, &config, "ghost", b"pw")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidCredentials));
        assert_eq!(verifier.bind_attempts, vec!["cn=decoy,dc=example".to_string()]);
    }

    #[tokio::test]
    async fn failure_messages_are_uniform() {
        let mut lookup = lookup_side();
        let mut verifier = MockDirectory::new();
        let config = DirectoryConfig::default();

        let wrong_pw = authenticate(&mut lookup, &mut verifier, &config, "jdoe", b"wrong")
            .await
            .unwrap_err();
        let mut empty = MockDirectory::new();
        let no_user = authenticate(&mut empty, &mut verifier, &config, "ghost", b"wrong")
            .await
            .unwrap_err();
        assert_eq!(wrong_pw.to_string(), no_user.to_string());
    }
}

//! Property-based tests for credential matching and request resolution
//!
//! - Symmetry: match(a, b) == match(b, a)
//! - Reflexivity: match(a, a) for every credential
//! - None only matches None
//! - An explicit credential always wins over request info

use proptest::prelude::*;
use resource_adapter::credential::{credentials_match, resolve_credential, Credential};
use resource_adapter::ConnectionRequestInfo;

/// Strategy for generating credentials of both kinds
fn credential_strategy() -> impl Strategy<Value = Credential> {
    prop_oneof![
        ("[a-z]{1,8}", "[a-zA-Z0-9]{0,12}").prop_map(|(u, p)| Credential::password(u, p)),
        ("[a-z]{1,8}", "[a-z]{1,8}").prop_map(|(v, a)| Credential::key_store(v, a)),
    ]
}

/// Strategy for optional credentials
fn optional_credential() -> impl Strategy<Value = Option<Credential>> {
    prop::option::of(credential_strategy())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: matching is symmetric
    #[test]
    fn prop_match_symmetric(a in optional_credential(), b in optional_credential()) {
        prop_assert_eq!(
            credentials_match(a.as_ref(), b.as_ref()),
            credentials_match(b.as_ref(), a.as_ref())
        );
    }

    /// Property: every credential matches itself and its clone
    #[test]
    fn prop_match_reflexive(a in optional_credential()) {
        let copy = a.clone();
        prop_assert!(credentials_match(a.as_ref(), a.as_ref()));
        prop_assert!(credentials_match(a.as_ref(), copy.as_ref()));
    }

    /// Property: None matches nothing but None
    #[test]
    fn prop_none_only_matches_none(a in credential_strategy()) {
        prop_assert!(!credentials_match(None, Some(&a)));
        prop_assert!(!credentials_match(Some(&a), None));
        prop_assert!(credentials_match(None, None));
    }

    /// Property: matching agrees with structural equality
    #[test]
    fn prop_match_is_equality(a in credential_strategy(), b in credential_strategy()) {
        prop_assert_eq!(credentials_match(Some(&a), Some(&b)), a == b);
    }

    /// Property: an explicit credential wins over the request's user
    #[test]
    fn prop_explicit_credential_wins(
        explicit in credential_strategy(),
        user in "[a-z]{1,8}",
        password in "[a-z0-9]{0,8}",
    ) {
        let info = ConnectionRequestInfo::for_channel("out-1").with_user(user.clone(), password.clone());

        prop_assert_eq!(resolve_credential(Some(&explicit), Some(&info)), Some(explicit));
        prop_assert_eq!(
            resolve_credential(None, Some(&info)),
            Some(Credential::password(user, password))
        );
    }
}

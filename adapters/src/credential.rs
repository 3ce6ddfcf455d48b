//! Credentials and credential matching
//!
//! A managed connection remembers the credential it was created with.
//! It is only handed out again to callers presenting an equal credential.

use crate::types::ConnectionRequestInfo;
use std::fmt;

/// Credential kinds understood by the adapter
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Credential {
    /// User name and password
    Password {
        /// User name
        user: String,
        /// Password
        password: String,
    },
    /// Reference to a key in a key store
    KeyStore {
        /// Key store view
        view: String,
        /// Key alias within the view
        alias: String,
    },
}

impl Credential {
    /// Password credential
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Password {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Key store credential
    pub fn key_store(view: impl Into<String>, alias: impl Into<String>) -> Self {
        Credential::KeyStore {
            view: view.into(),
            alias: alias.into(),
        }
    }

    /// Principal name for logging and metadata
    pub fn principal(&self) -> &str {
        match self {
            Credential::Password { user, .. } => user,
            Credential::KeyStore { alias, .. } => alias,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            Credential::KeyStore { view, alias } => f
                .debug_struct("KeyStore")
                .field("view", view)
                .field("alias", alias)
                .finish(),
        }
    }
}

/// Structural equality of two optional credentials.
///
/// `None` only matches `None`.
pub fn credentials_match(a: Option<&Credential>, b: Option<&Credential>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Effective credential of an allocation request.
///
/// An explicit credential wins; otherwise a user name in the request info
/// yields a password credential.
pub fn resolve_credential(
    explicit: Option<&Credential>,
    info: Option<&ConnectionRequestInfo>,
) -> Option<Credential> {
    if let Some(c) = explicit {
        return Some(c.clone());
    }
    let info = info?;
    let user = info.user_name.as_ref()?;
    Some(Credential::password(
        user.clone(),
        info.password.clone().unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_same_kind() {
        let a = Credential::password("alice", "pw");
        let b = Credential::password("alice", "pw");
        let c = Credential::password("alice", "other");

        assert!(credentials_match(Some(&a), Some(&b)));
        assert!(!credentials_match(Some(&a), Some(&c)));
    }

    #[test]
    fn test_kinds_never_match() {
        let a = Credential::password("alias", "view");
        let b = Credential::key_store("view", "alias");

        assert!(!credentials_match(Some(&a), Some(&b)));
    }

    #[test]
    fn test_none_matches_only_none() {
        let a = Credential::key_store("v", "a");

        assert!(credentials_match(None, None));
        assert!(!credentials_match(Some(&a), None));
        assert!(!credentials_match(None, Some(&a)));
    }

    #[test]
    fn test_resolve_credential() {
        let explicit = Credential::key_store("v", "a");
        let info = ConnectionRequestInfo::for_channel("ch").with_user("bob", "pw");

        assert_eq!(
            resolve_credential(Some(&explicit), Some(&info)),
            Some(explicit.clone())
        );
        assert_eq!(
            resolve_credential(None, Some(&info)),
            Some(Credential::password("bob", "pw"))
        );
        assert_eq!(
            resolve_credential(None, Some(&ConnectionRequestInfo::for_channel("ch"))),
            None
        );
        assert_eq!(resolve_credential(None, None), None);
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", Credential::password("alice", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}

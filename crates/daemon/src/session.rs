//! Per-connection authentication state.
//!
//! A [`Session`] is owned by one connection loop. The router takes it by
//! value and hands back the next state with every response, so the only
//! transitions are the ones `LOGIN` and `LOGOUT` return.
//!
//! ```text
//!                  LOGIN ok
//!  Unauthenticated ─────────▶ Authenticated(user, permissions)
//!        ▲                          │   ▲
//!        └──────── LOGOUT ──────────┘   └── LOGIN ok (re-authenticate)
//! ```

use crate::auth::{AuthenticatedUser, Permission, PermissionSet};

/// Authentication state of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    /// No identity yet. Only `LOGIN` is served.
    #[default]
    Unauthenticated,
    /// Logged in as `user`.
    Authenticated {
        user: String,
        permissions: PermissionSet,
    },
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated { .. })
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Session::Authenticated { user, .. } => Some(user),
            Session::Unauthenticated => None,
        }
    }

    pub fn permissions(&self) -> Option<&PermissionSet> {
        match self {
            Session::Authenticated { permissions, .. } => Some(permissions),
            Session::Unauthenticated => None,
        }
    }

    /// Returns true if the session is authenticated and holds `permission`
    /// or `ROOT`.
    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions()
            .is_some_and(|permissions| permissions.allows(permission))
    }

    /// Name used in logs: the username, or `-` before login.
    pub fn log_name(&self) -> &str {
        self.username().unwrap_or("-")
    }
}

impl From<AuthenticatedUser> for Session {
    fn from(user: AuthenticatedUser) -> Self {
        Session::Authenticated {
            user: user.username,
            permissions: user.permissions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unauthenticated() {
        let session = Session::default();
        assert!(!session.is_authenticated());
        assert!(session.username().is_none());
        assert!(session.permissions().is_none());
        assert_eq!(session.log_name(), "-");
    }

    #[test]
    fn test_unauthenticated_allows_nothing() {
        let session = Session::Unauthenticated;
        for permission in Permission::ALL {
            assert!(!session.allows(permission));
        }
    }

    #[test]
    fn test_from_authenticated_user() {
        let session = Session::from(AuthenticatedUser {
            username: "tester".to_string(),
            permissions: [Permission::DownloadFile].into_iter().collect(),
        });

        assert!(session.is_authenticated());
        assert_eq!(session.username(), Some("tester"));
        assert!(session.allows(Permission::DownloadFile));
        assert!(!session.allows(Permission::DeleteFile));
    }

    #[test]
    fn test_root_session_allows_everything() {
        let session = Session::Authenticated {
            user: "root".to_string(),
            permissions: PermissionSet::root(),
        };
        for permission in Permission::FILE_OPERATIONS {
            assert!(session.allows(permission));
        }
    }
}

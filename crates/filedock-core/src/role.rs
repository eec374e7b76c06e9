//! Session roles and the access levels commands require

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access level of a session, declared by the client during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Full command set
    Administrator,
    /// List and read only (plus upload)
    ReadOnly,
}

impl Role {
    /// Map a client-declared role token to a role.
    ///
    /// Only `admin` and `administrator` (any case) grant administrator
    /// rights; every other token falls back to [`Role::ReadOnly`].
    pub fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("admin") || token.eq_ignore_ascii_case("administrator") {
            Role::Administrator
        } else {
            Role::ReadOnly
        }
    }

    /// Whether this role satisfies the given access requirement
    pub fn permits(self, access: Access) -> bool {
        match access {
            Access::Any => true,
            Access::Administrator => self == Role::Administrator,
        }
    }

    /// Whether this is the administrator role
    pub fn is_admin(self) -> bool {
        self == Role::Administrator
    }

    /// Display name used in the welcome line
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Administrator => "Administrator",
            Role::ReadOnly => "ReadOnly",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access requirement attached to a command verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Any handshaken session
    Any,
    /// Administrator sessions only
    Administrator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_tokens() {
        assert_eq!(Role::from_token("admin"), Role::Administrator);
        assert_eq!(Role::from_token("ADMIN"), Role::Administrator);
        assert_eq!(Role::from_token("Administrator"), Role::Administrator);
        assert_eq!(Role::from_token("readonly"), Role::ReadOnly);
        assert_eq!(Role::from_token("root"), Role::ReadOnly);
        assert_eq!(Role::from_token(""), Role::ReadOnly);
    }

    #[test]
    fn test_permits() {
        assert!(Role::Administrator.permits(Access::Any));
        assert!(Role::Administrator.permits(Access::Administrator));
        assert!(Role::ReadOnly.permits(Access::Any));
        assert!(!Role::ReadOnly.permits(Access::Administrator));
    }

    #[test]
    fn test_display() {
        assert_eq!(Role::Administrator.to_string(), "Administrator");
        assert_eq!(Role::ReadOnly.to_string(), "ReadOnly");
    }
}
